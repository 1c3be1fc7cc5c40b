//! Transport collaborator contract.
//!
//! The transport is bidirectional, asynchronous, and best-effort: it may
//! reorder, duplicate, or delay payloads, but never silently corrupts them.
//! Payloads are opaque sealed bytes addressed by a per-pairing channel
//! identifier. Concrete implementations (queue relays and the like) live
//! outside this crate; tests use [`crate::testing::MockTransport`].

use async_trait::async_trait;
use bytes::Bytes;

use ekd_wire::ChannelId;

/// Transport-boundary failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport disconnected")]
    Disconnected,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bidirectional best-effort delivery of sealed payloads.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand a sealed payload to the transport for the given channel.
    async fn send(&self, channel: &ChannelId, payload: Bytes) -> Result<(), TransportError>;

    /// Wait for the next inbound payload on any known channel. Called in a
    /// loop by the client's delivery task; `Disconnected` ends the loop.
    async fn recv(&self) -> Result<(ChannelId, Bytes), TransportError>;
}
