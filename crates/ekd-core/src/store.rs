//! Persistence collaborator contract and in-memory implementation.
//!
//! The store holds at most one durable pairing record. A missing or
//! unreadable record is treated as unpaired by the client at load time;
//! the store itself only reports what it sees.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use ekd_wire::{ChannelId, PairingSecret};

/// Errors from pairing-state persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("corrupt pairing record: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable snapshot of a non-unpaired pairing state. Secret key material is
/// carried as raw bytes; durable encoding (and where the record lands) is
/// the implementation's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredPairing {
    InFlight {
        #[serde(with = "hex")]
        secret_key: Vec<u8>,
        secret: PairingSecret,
    },
    Paired {
        #[serde(with = "hex")]
        secret_key: Vec<u8>,
        #[serde(with = "hex")]
        device_public_key: Vec<u8>,
        channel: ChannelId,
    },
}

/// Durable storage for the current pairing record.
#[async_trait]
pub trait PairingStore: Send + Sync {
    /// Load the current record, `None` if absent. Implementations should
    /// report unreadable records as [`StoreError::Corrupt`].
    async fn load(&self) -> Result<Option<StoredPairing>, StoreError>;

    /// Replace the current record.
    async fn save(&self, record: &StoredPairing) -> Result<(), StoreError>;

    /// Remove any current record; absent is not an error.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// In-memory store for tests and ephemeral use.
///
/// `fail_next_write()` makes the next save/clear fail once, for exercising
/// the fail-safe paths around persistence errors.
#[derive(Default)]
pub struct MemoryStore {
    record: Mutex<Option<StoredPairing>>,
    fail_next_write: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Current record, for assertions.
    pub fn snapshot(&self) -> Option<StoredPairing> {
        self.record.lock().clone()
    }

    /// Pre-seed a record, for restart tests.
    pub fn seed(&self, record: StoredPairing) {
        *self.record.lock() = Some(record);
    }

    fn check_failure(&self) -> Result<(), StoreError> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(StoreError::OperationFailed("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PairingStore for MemoryStore {
    async fn load(&self) -> Result<Option<StoredPairing>, StoreError> {
        Ok(self.record.lock().clone())
    }

    async fn save(&self, record: &StoredPairing) -> Result<(), StoreError> {
        self.check_failure()?;
        *self.record.lock() = Some(record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.check_failure()?;
        *self.record.lock() = None;
        Ok(())
    }
}
