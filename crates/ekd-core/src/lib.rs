//! ekd-core - Enclave pairing and request/response engine.
//!
//! This crate implements:
//! - The pairing state machine (unpaired / in-flight / paired)
//! - Encrypted request/response correlation with per-request deadlines
//! - The paired device's profile cache
//! - Approval notification glue for sensitive operations
//! - The `EnclaveClient` facade consumed by the local control surface
//!
//! Transport and persistence are injected collaborators (`Transport`,
//! `PairingStore`); in-memory doubles for both live in [`testing`] and
//! [`store`].

#![forbid(unsafe_code)]

// Core state machine and engine
pub mod engine;
pub mod pairing;

// Facade
pub mod client;

// Supporting modules
pub mod cache;
pub mod errors;
pub mod notify;

// Collaborator contracts
pub mod store;
pub mod transport;

// Test doubles
pub mod testing;

pub use client::{ClientConfig, EnclaveClient};
pub use errors::EnclaveError;
pub use notify::{approval_callback, ApprovalCallback, LogNotifier, Notifier, NotifyError};
pub use store::{MemoryStore, PairingStore, StoreError};
pub use transport::{Transport, TransportError};
