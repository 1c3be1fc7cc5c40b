//! `EnclaveClient`: the facade the local control surface talks to.
//!
//! Owns the pairing state, the pending-request table, the profile cache,
//! and the background delivery task that drains the transport. Transport
//! and persistence are injected.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use ekd_crypto::PublicKey;
use ekd_wire::{
    ChannelId, GitSignRequest, Inbound, MeRequest, NoOpRequest, PairingSecret, Profile, Request,
    RequestBody, ResponseBody, SignOutcome, SignRequest,
};

use crate::cache::ProfileCache;
use crate::engine::{PendingRequests, Resolution};
use crate::errors::EnclaveError;
use crate::notify::ApprovalCallback;
use crate::pairing::PairingState;
use crate::store::PairingStore;
use crate::transport::{Transport, TransportError};

/// Client tunables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request deadline. A request that misses it fails with `Timeout`
    /// and is never re-issued.
    pub request_timeout: Duration,
    /// Name shown on the device during pairing approval.
    pub workstation_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            workstation_name: "workstation".to_owned(),
        }
    }
}

impl ClientConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_workstation_name(mut self, name: impl Into<String>) -> Self {
        self.workstation_name = name.into();
        self
    }
}

struct Shared {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn PairingStore>,
    // Write lock serializes pairing transitions, including their persistence
    // awaits. Request admission takes the read side.
    pairing: RwLock<PairingState>,
    pending: PendingRequests,
    cache: ProfileCache,
}

/// Facade over pairing and the request/response protocol.
pub struct EnclaveClient {
    shared: Arc<Shared>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl EnclaveClient {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn PairingStore>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                store,
                pairing: RwLock::new(PairingState::Unpaired),
                pending: PendingRequests::new(),
                cache: ProfileCache::new(),
            }),
            recv_task: Mutex::new(None),
        }
    }

    /// Load any persisted pairing and start the delivery task. Idempotent;
    /// a missing or unreadable record starts the client unpaired.
    pub async fn start(&self) {
        {
            let guard = self.recv_task.lock();
            if guard.is_some() {
                return;
            }
        }

        let state = match self.shared.store.load().await {
            Ok(Some(record)) => match PairingState::from_stored(record) {
                Ok(state) => state,
                Err(err) => {
                    warn!(error = %err, "ignoring unreadable pairing record");
                    PairingState::Unpaired
                }
            },
            Ok(None) => PairingState::Unpaired,
            Err(err) => {
                warn!(error = %err, "pairing store unavailable, starting unpaired");
                PairingState::Unpaired
            }
        };
        if state.is_paired() {
            info!("restored persisted pairing");
        }
        *self.shared.pairing.write().await = state;

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            recv_loop(shared).await;
        });

        let mut guard = self.recv_task.lock();
        if guard.is_none() {
            *guard = Some(handle);
        } else {
            // Concurrent start won the race; this task is redundant.
            handle.abort();
        }
    }

    /// Stop the delivery task and cancel every in-flight request.
    pub fn stop(&self) {
        if let Some(handle) = self.recv_task.lock().take() {
            handle.abort();
        }
        self.shared.pending.cancel_all();
    }

    pub async fn is_paired(&self) -> bool {
        self.shared.pairing.read().await.is_paired()
    }

    /// Start a new pairing attempt and return the secret to hand to the
    /// device out-of-band. Supersedes any current pairing: if one exists it
    /// is discarded, its cache invalidated and its pending requests
    /// cancelled, exactly as if `unpair` had run first.
    pub async fn pair(&self) -> Result<PairingSecret, EnclaveError> {
        let mut state = self.shared.pairing.write().await;

        let next = PairingState::begin(&self.shared.config.workstation_name)?;
        let secret = match &next {
            PairingState::InFlight { secret, .. } => secret.clone(),
            // begin() only constructs InFlight.
            _ => unreachable!(),
        };

        // Persist before committing so a restart never resurrects the old
        // pairing after the new secret has been handed out.
        let record = next.to_stored();
        if let Some(record) = &record {
            self.shared.store.save(record).await?;
        }

        if state.is_paired() {
            info!("replacing existing pairing");
        }
        self.shared.cache.invalidate();
        self.shared.pending.cancel_all();
        *state = next;

        info!(channel = %secret.channel, "pairing started");
        Ok(secret)
    }

    /// Forget the current pairing. Memory is cleared before the store is
    /// touched, so a persistence failure can leave a stale record behind
    /// but never a usable in-memory pairing.
    pub async fn unpair(&self) -> Result<(), EnclaveError> {
        let mut state = self.shared.pairing.write().await;
        *state = PairingState::Unpaired;
        self.shared.cache.invalidate();
        self.shared.pending.cancel_all();

        self.shared.store.clear().await?;
        info!("unpaired");
        Ok(())
    }

    /// The device's profile. With `force_refresh` the device is always
    /// asked; otherwise a cached profile is returned when present.
    pub async fn request_me(&self, force_refresh: bool) -> Result<Profile, EnclaveError> {
        if !force_refresh {
            if let Some(profile) = self.shared.cache.get() {
                return Ok(profile);
            }
        }

        let body = self
            .send_request(RequestBody::MeRequest(MeRequest::default()), None)
            .await?;
        match body {
            ResponseBody::MeResponse(me) => {
                self.shared.cache.set(me.me.clone());
                Ok(me.me)
            }
            other => Err(mismatched_response("me_response", &other)),
        }
    }

    /// Cached profile only; never touches the transport.
    pub fn cached_me(&self) -> Option<Profile> {
        self.shared.cache.get()
    }

    /// Ask the device to sign SSH-style data. The optional callback fires
    /// if the device reports that user approval is required first.
    pub async fn request_signature(
        &self,
        request: SignRequest,
        approval: Option<ApprovalCallback>,
    ) -> Result<SignOutcome, EnclaveError> {
        let body = self
            .send_request(RequestBody::SignRequest(request), approval)
            .await?;
        match body {
            ResponseBody::SignResponse(r) => Ok(r.outcome),
            other => Err(mismatched_response("sign_response", &other)),
        }
    }

    /// Ask the device to sign a Git commit.
    pub async fn request_git_signature(
        &self,
        request: GitSignRequest,
        approval: Option<ApprovalCallback>,
    ) -> Result<SignOutcome, EnclaveError> {
        let body = self
            .send_request(RequestBody::GitSignRequest(request), approval)
            .await?;
        match body {
            ResponseBody::GitSignResponse(r) => Ok(r.outcome),
            other => Err(mismatched_response("git_sign_response", &other)),
        }
    }

    /// Fire-and-forget liveness ping. Never registers a pending entry and
    /// never surfaces a failure: unpaired or failing sends are logged and
    /// dropped.
    pub async fn request_no_op(&self) {
        let (payload, channel) = {
            let state = self.shared.pairing.read().await;
            let PairingState::Paired {
                keypair,
                device_public_key,
                channel,
            } = &*state
            else {
                debug!("no-op skipped, not paired");
                return;
            };
            let request = Request {
                request_id: Uuid::new_v4().to_string(),
                sent_at: unix_now(),
                body: RequestBody::NoOpRequest(NoOpRequest::default()),
            };
            match seal_request(&request, keypair, device_public_key) {
                Ok(payload) => (payload, *channel),
                Err(err) => {
                    debug!(error = %err, "no-op seal failed");
                    return;
                }
            }
        };
        if let Err(err) = self.shared.transport.send(&channel, payload).await {
            debug!(error = %err, "no-op send failed");
        }
    }

    /// Seal and send one request, then wait for its correlated response.
    async fn send_request(
        &self,
        body: RequestBody,
        approval: Option<ApprovalCallback>,
    ) -> Result<ResponseBody, EnclaveError> {
        let request = Request {
            request_id: Uuid::new_v4().to_string(),
            sent_at: unix_now(),
            body,
        };

        // Admission and registration happen under the pairing read lock so
        // an unpair cannot slip between the check and the registration
        // without cancelling this entry.
        let (sealed, channel, rx) = {
            let state = self.shared.pairing.read().await;
            let PairingState::Paired {
                keypair,
                device_public_key,
                channel,
            } = &*state
            else {
                return Err(EnclaveError::NotPaired);
            };
            let sealed = seal_request(&request, keypair, device_public_key)?;
            let rx = self.shared.pending.register(&request.request_id, approval);
            (sealed, *channel, rx)
        };

        trace!(request_id = %request.request_id, "request sent");
        if let Err(err) = self.shared.transport.send(&channel, sealed).await {
            self.shared.pending.remove(&request.request_id);
            return Err(err.into());
        }

        match timeout(self.shared.config.request_timeout, rx).await {
            Ok(Ok(Resolution::Response(body))) => Ok(body),
            Ok(Ok(Resolution::Cancelled)) => Err(EnclaveError::Cancelled),
            // Sender dropped without resolving; treat as cancellation.
            Ok(Err(_)) => Err(EnclaveError::Cancelled),
            Err(_) => {
                self.shared.pending.remove(&request.request_id);
                Err(EnclaveError::Timeout)
            }
        }
    }
}

impl Drop for EnclaveClient {
    fn drop(&mut self) {
        if let Some(handle) = self.recv_task.lock().take() {
            handle.abort();
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn seal_request(
    request: &Request,
    keypair: &ekd_crypto::KeyPair,
    device_public_key: &PublicKey,
) -> Result<Bytes, EnclaveError> {
    let plaintext = serde_json::to_vec(request)
        .map_err(|e| EnclaveError::Protocol(format!("request encoding: {e}")))?;
    let sealed = ekd_crypto::seal(&plaintext, keypair, device_public_key)?;
    Ok(Bytes::from(sealed))
}

fn mismatched_response(expected: &str, got: &ResponseBody) -> EnclaveError {
    let got = match got {
        ResponseBody::MeResponse(_) => "me_response",
        ResponseBody::SignResponse(_) => "sign_response",
        ResponseBody::GitSignResponse(_) => "git_sign_response",
        ResponseBody::AckResponse(_) => "ack_response",
    };
    EnclaveError::Protocol(format!("expected {expected}, device sent {got}"))
}

async fn recv_loop(shared: Arc<Shared>) {
    loop {
        match shared.transport.recv().await {
            Ok((channel, payload)) => handle_inbound(&shared, channel, payload).await,
            Err(TransportError::Disconnected) => {
                debug!("transport disconnected, delivery task exiting");
                break;
            }
            Err(err) => {
                warn!(error = %err, "transport receive error");
            }
        }
    }
}

/// Classify one inbound payload against the current pairing state and act
/// on it. Payloads that fail to open or to parse are dropped; they may be
/// noise, stale traffic, or tampering, and all three look alike.
async fn handle_inbound(shared: &Arc<Shared>, channel: ChannelId, payload: Bytes) {
    enum Opened {
        HandshakePlain(Vec<u8>),
        PairedPlain(Vec<u8>),
    }

    let opened = {
        let state = shared.pairing.read().await;
        match &*state {
            PairingState::InFlight { keypair, secret } if secret.channel == channel => {
                match ekd_crypto::open_anonymous(&payload, keypair) {
                    Ok(plain) => Opened::HandshakePlain(plain),
                    Err(_) => {
                        trace!(%channel, "dropping unopenable handshake payload");
                        return;
                    }
                }
            }
            PairingState::Paired {
                keypair,
                device_public_key,
                channel: paired_channel,
            } if *paired_channel == channel => {
                match ekd_crypto::open(&payload, keypair, device_public_key) {
                    Ok(plain) => Opened::PairedPlain(plain),
                    Err(_) => {
                        trace!(%channel, "dropping unopenable payload");
                        return;
                    }
                }
            }
            _ => {
                trace!(%channel, "dropping payload for unknown channel");
                return;
            }
        }
    };

    match opened {
        Opened::HandshakePlain(plain) => handle_handshake(shared, channel, &plain).await,
        Opened::PairedPlain(plain) => handle_paired_message(shared, &plain),
    }
}

async fn handle_handshake(shared: &Arc<Shared>, channel: ChannelId, plain: &[u8]) {
    let inbound: Inbound = match serde_json::from_slice(plain) {
        Ok(inbound) => inbound,
        Err(err) => {
            warn!(error = %err, "dropping malformed handshake payload");
            return;
        }
    };
    let Inbound::Handshake(handshake) = inbound else {
        trace!("non-handshake message before pairing completed, dropped");
        return;
    };
    let Some(device_public_key) = PublicKey::try_from_slice(&handshake.device_public_key) else {
        warn!("handshake carried a malformed device key, dropped");
        return;
    };

    let mut state = shared.pairing.write().await;
    // A later pair() may have superseded this attempt while the payload was
    // being opened; only the latest attempt's handshake may complete.
    let PairingState::InFlight { keypair, secret } = &*state else {
        trace!("handshake for a superseded pairing attempt, dropped");
        return;
    };
    if secret.channel != channel {
        trace!("handshake for a superseded channel, dropped");
        return;
    }

    let next = PairingState::Paired {
        keypair: keypair.clone(),
        device_public_key,
        channel,
    };
    if let Some(record) = next.to_stored() {
        // Memory is authoritative; a persistence failure costs the pairing
        // a restart, not the session.
        if let Err(err) = shared.store.save(&record).await {
            warn!(error = %err, "pairing completed but could not be persisted");
        }
    }
    *state = next;
    drop(state);

    if let Some(profile) = handshake.profile {
        shared.cache.set(profile);
    }
    info!(%channel, "pairing completed");
}

fn handle_paired_message(shared: &Arc<Shared>, plain: &[u8]) {
    let inbound: Inbound = match serde_json::from_slice(plain) {
        Ok(inbound) => inbound,
        Err(err) => {
            warn!(error = %err, "dropping malformed device message");
            return;
        }
    };
    match inbound {
        Inbound::ApprovalRequired { request_id } => {
            debug!(%request_id, "device requires user approval");
            shared.pending.approve(&request_id);
        }
        Inbound::Response(response) => {
            if !shared.pending.resolve(&response.request_id, response.body) {
                debug!(request_id = %response.request_id, "response with no pending request, dropped");
            }
        }
        Inbound::Handshake(_) => {
            trace!("handshake while already paired, dropped");
        }
    }
}
