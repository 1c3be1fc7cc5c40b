//! Error taxonomy for the enclave engine.
//!
//! Inbound decryption/authentication failures never appear here: they are
//! swallowed at the engine boundary since they may be ordinary transport
//! noise or stale traffic from a prior pairing. Everything else propagates
//! to the facade and from there to the control surface.

use thiserror::Error;

use crate::store::StoreError;
use crate::transport::TransportError;

/// Failures visible to callers of the enclave client.
#[derive(Debug, Error)]
pub enum EnclaveError {
    /// No valid paired state; signing is not possible.
    #[error("not paired with an enclave device")]
    NotPaired,

    /// No matching response arrived before the per-request deadline. The
    /// request is never re-issued automatically.
    #[error("request timed out waiting for the device")]
    Timeout,

    /// The pending request was torn down by `unpair()` or `stop()`.
    #[error("request cancelled")]
    Cancelled,

    /// Persistence I/O failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// The send failed at the transport boundary.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A response decrypted but failed structural validation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local sealing failed; the request never left the workstation.
    #[error("crypto failure: {0}")]
    Crypto(#[from] ekd_crypto::CryptoError),
}

impl EnclaveError {
    /// Whether the caller may safely retry without risking a duplicate
    /// signature: only failures where the request provably never reached a
    /// pending state on the device.
    pub fn is_send_failure(&self) -> bool {
        matches!(
            self,
            EnclaveError::NotPaired | EnclaveError::Transport(_) | EnclaveError::Crypto(_)
        )
    }
}
