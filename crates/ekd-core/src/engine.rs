//! Pending-request table.
//!
//! Every outbound request registers a one-shot suspension keyed by its
//! request id. The delivery task resolves it with the matching response
//! body; `cancel_all` tears every entry down with `Cancelled`. Ids are
//! unique for the lifetime of the table, so at most one waiter per id.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use ekd_wire::ResponseBody;

use crate::notify::ApprovalCallback;

/// How a pending request finished.
#[derive(Debug)]
pub enum Resolution {
    Response(ResponseBody),
    Cancelled,
}

struct Pending {
    tx: oneshot::Sender<Resolution>,
    approval: Option<ApprovalCallback>,
}

/// Correlation table for in-flight requests.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<String, Pending>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `request_id`. The optional approval callback
    /// fires at most once, when the device reports the request needs user
    /// approval.
    pub fn register(
        &self,
        request_id: &str,
        approval: Option<ApprovalCallback>,
    ) -> oneshot::Receiver<Resolution> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .insert(request_id.to_owned(), Pending { tx, approval });
        rx
    }

    /// Resolve a waiter with a response body. Returns false when no entry
    /// exists (late, duplicate, or cross-talk response).
    pub fn resolve(&self, request_id: &str, body: ResponseBody) -> bool {
        let Some(pending) = self.inner.lock().remove(request_id) else {
            return false;
        };
        // Waiter may have timed out and dropped the receiver.
        pending.tx.send(Resolution::Response(body)).is_ok()
    }

    /// Fire the approval callback for `request_id`, if one is registered and
    /// has not fired yet. The entry stays pending.
    pub fn approve(&self, request_id: &str) {
        let callback = {
            let mut map = self.inner.lock();
            map.get_mut(request_id).and_then(|p| p.approval.take())
        };
        // Invoked outside the lock; callbacks may block or log freely.
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Drop the entry for `request_id` without resolving it. Used when the
    /// waiter gives up (timeout, send failure).
    pub fn remove(&self, request_id: &str) {
        self.inner.lock().remove(request_id);
    }

    /// Cancel every pending request. Waiters observe `Cancelled`.
    pub fn cancel_all(&self) {
        let drained: Vec<Pending> = self.inner.lock().drain().map(|(_, p)| p).collect();
        for pending in drained {
            let _ = pending.tx.send(Resolution::Cancelled);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
