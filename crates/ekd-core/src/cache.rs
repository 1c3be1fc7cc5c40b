//! Cache of the paired device's profile.
//!
//! Holds the most recent identity the device reported. Invalidated on
//! unpair; refreshed whenever a profile arrives (handshake or me-response).

use parking_lot::Mutex;

use ekd_wire::Profile;

#[derive(Default)]
pub struct ProfileCache {
    inner: Mutex<Option<Profile>>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Profile> {
        self.inner.lock().clone()
    }

    pub fn set(&self, profile: Profile) {
        *self.inner.lock() = Some(profile);
    }

    pub fn invalidate(&self) {
        *self.inner.lock() = None;
    }
}
