//! Approval notification glue.
//!
//! When the device reports that a signing request needs user approval, the
//! engine fires an [`ApprovalCallback`] so the caller can surface "check
//! your device" wherever is appropriate. Delivery channels (desktop
//! notifications, terminal hints) live outside this crate behind the
//! [`Notifier`] trait.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

/// Invoked at most once per request, when the device signals that user
/// approval is required before it will sign.
pub type ApprovalCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("notification delivery failed: {0}")]
    DeliveryFailed(String),
}

/// An open handle to a notification channel. Channel resources are released
/// when the handle drops.
pub trait NotifyHandle: Send {
    fn send(&mut self, body: &str) -> Result<(), NotifyError>;
}

/// A channel that can show a short message to the user.
pub trait Notifier: Send + Sync {
    fn open(&self) -> Result<Box<dyn NotifyHandle>, NotifyError>;
}

/// Open a channel, deliver one message, release.
pub fn notify_once(notifier: &dyn Notifier, body: &str) -> Result<(), NotifyError> {
    let mut handle = notifier.open()?;
    handle.send(body)
}

/// Build an approval callback that sends `body` through `notifier`.
/// Delivery failures are logged, never propagated; the signing request is
/// unaffected either way.
pub fn approval_callback(notifier: Arc<dyn Notifier>, body: String) -> ApprovalCallback {
    Box::new(move || {
        if let Err(err) = notify_once(notifier.as_ref(), &body) {
            warn!(error = %err, "approval notification not delivered");
        }
    })
}

/// Notifier that writes to the log. The default when nothing better is
/// wired up.
#[derive(Default)]
pub struct LogNotifier;

struct LogHandle;

impl NotifyHandle for LogHandle {
    fn send(&mut self, body: &str) -> Result<(), NotifyError> {
        tracing::info!(%body, "approval required");
        Ok(())
    }
}

impl Notifier for LogNotifier {
    fn open(&self) -> Result<Box<dyn NotifyHandle>, NotifyError> {
        Ok(Box::new(LogHandle))
    }
}
