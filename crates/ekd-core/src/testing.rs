//! Test doubles: an in-memory transport and a scripted enclave device.
//!
//! Helpers here panic on malformed input rather than returning errors;
//! they exist to keep test scenarios short, not to model failure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use ekd_crypto::{KeyPair, PublicKey};
use ekd_wire::{ChannelId, Handshake, Inbound, PairingSecret, Profile, Request};

use crate::transport::{Transport, TransportError};

/// In-memory transport: records everything sent, replays injected inbound
/// payloads, and can be flipped into failure or disconnected modes.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(ChannelId, Bytes)>>,
    inbound: Mutex<VecDeque<(ChannelId, Bytes)>>,
    fail_sends: AtomicBool,
    disconnected: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a payload for the client's delivery task to pick up.
    pub fn inject(&self, channel: ChannelId, payload: Bytes) {
        self.inbound.lock().push_back((channel, payload));
    }

    /// Everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<(ChannelId, Bytes)> {
        self.sent.lock().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Pop the oldest sent payload, for request/reply scripting.
    pub fn take_sent(&self) -> Option<(ChannelId, Bytes)> {
        let mut sent = self.sent.lock();
        if sent.is_empty() {
            None
        } else {
            Some(sent.remove(0))
        }
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, channel: &ChannelId, payload: Bytes) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("mock send failure".into()));
        }
        self.sent.lock().push((*channel, payload));
        Ok(())
    }

    async fn recv(&self) -> Result<(ChannelId, Bytes), TransportError> {
        loop {
            if let Some(item) = self.inbound.lock().pop_front() {
                return Ok(item);
            }
            if self.disconnected.load(Ordering::SeqCst) {
                return Err(TransportError::Disconnected);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// A scripted enclave device driven from a pairing secret: it can complete
/// the handshake, open the workstation's sealed requests, and seal replies.
pub struct TestDevice {
    keypair: KeyPair,
    workstation_public: PublicKey,
    channel: ChannelId,
}

impl TestDevice {
    pub fn from_secret(secret: &PairingSecret) -> Self {
        let workstation_public = PublicKey::try_from_slice(&secret.workstation_public_key)
            .expect("pairing secret carries a 32-byte key");
        Self {
            keypair: KeyPair::generate(),
            workstation_public,
            channel: secret.channel,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public()
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Sealed handshake payload, as the device would send after scanning
    /// the pairing secret.
    pub fn handshake(&self, profile: Option<Profile>) -> Bytes {
        let inbound = Inbound::Handshake(Handshake {
            device_public_key: self.keypair.public().to_vec(),
            profile,
        });
        let plain = serde_json::to_vec(&inbound).expect("handshake serializes");
        let sealed =
            ekd_crypto::seal_anonymous(&plain, &self.workstation_public).expect("seal handshake");
        Bytes::from(sealed)
    }

    /// Open a sealed request the workstation sent to this device.
    pub fn open_request(&self, payload: &[u8]) -> Request {
        let plain = ekd_crypto::open(payload, &self.keypair, &self.workstation_public)
            .expect("request opens with the paired keys");
        serde_json::from_slice(&plain).expect("request parses")
    }

    /// Seal an inbound message (response or approval signal) to the
    /// workstation.
    pub fn seal_inbound(&self, inbound: &Inbound) -> Bytes {
        let plain = serde_json::to_vec(inbound).expect("inbound serializes");
        let sealed =
            ekd_crypto::seal(&plain, &self.keypair, &self.workstation_public).expect("seal inbound");
        Bytes::from(sealed)
    }
}

/// A profile with a plausible SSH wire key, for cache and identity tests.
pub fn sample_profile(email: &str) -> Profile {
    let name = b"ssh-ed25519";
    let mut wire = (name.len() as u32).to_be_bytes().to_vec();
    wire.extend_from_slice(name);
    wire.extend_from_slice(&(32u32).to_be_bytes());
    wire.extend_from_slice(&[0x42; 32]);
    Profile {
        public_key_wire: wire,
        email: email.into(),
        pgp_public_key: None,
    }
}
