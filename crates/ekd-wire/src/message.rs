//! Request/response messages exchanged with the enclave device.
//!
//! Request and response payloads are closed tagged variants: a message
//! carries exactly one body, enforced by construction rather than by a
//! bundle of optional fields. On the JSON wire the variant tag doubles as
//! the field name (`me_request`, `sign_response`, ...), so the encoding
//! stays one-key-per-kind.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::b64;
use crate::commit::CommitInfo;
use crate::profile::Profile;
use crate::WireError;

// ============================================================================
// Channel addressing
// ============================================================================

/// Addressing token used by the transport to route opaque payloads between a
/// specific workstation/enclave pair. Random per pairing attempt; rendered as
/// hex on the wire and in logs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId([u8; Self::LEN]);

impl ChannelId {
    pub const LEN: usize = 16;

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, WireError> {
        let raw = hex::decode(s).map_err(|_| WireError::InvalidChannelId)?;
        let arr: [u8; Self::LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| WireError::InvalidChannelId)?;
        Ok(Self(arr))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self)
    }
}

impl Serialize for ChannelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for ChannelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChannelId::from_hex(&s).map_err(D::Error::custom)
    }
}

// ============================================================================
// Pairing secret (out-of-band payload)
// ============================================================================

/// The payload handed to the device out-of-band (e.g. rendered as a QR code)
/// when a new pairing is started. Immutable once created; a later pairing
/// attempt supersedes it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingSecret {
    /// Workstation's X25519 public key; the device seals its handshake to it.
    #[serde(rename = "pk", with = "b64")]
    pub workstation_public_key: Vec<u8>,
    /// Channel the two sides will exchange sealed payloads on.
    #[serde(rename = "ch")]
    pub channel: ChannelId,
    /// Human-readable workstation name shown on the device.
    #[serde(rename = "n")]
    pub workstation_name: String,
}

// ============================================================================
// Requests (workstation -> device)
// ============================================================================

/// A logical request to the enclave. `request_id` is the correlation key the
/// eventual response must echo; it must be unique for the lifetime of the
/// pending-request set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: String,
    /// Unix seconds at send time.
    pub sent_at: u64,
    #[serde(flatten)]
    pub body: RequestBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestBody {
    MeRequest(MeRequest),
    SignRequest(SignRequest),
    GitSignRequest(GitSignRequest),
    NoOpRequest(NoOpRequest),
}

/// Ask the device for its current public identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeRequest {}

/// SSH-style signing request: the device signs `data` with the key selected
/// by `public_key_fingerprint` (empty means "current pairing").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    #[serde(with = "b64")]
    pub data: Vec<u8>,
    #[serde(with = "b64")]
    pub public_key_fingerprint: Vec<u8>,
}

/// Git commit signing request. The device reconstructs the canonical
/// signable byte sequence from `commit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSignRequest {
    pub commit: CommitInfo,
    #[serde(with = "b64")]
    pub public_key_fingerprint: Vec<u8>,
}

/// Liveness request used to keep the channel warm.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoOpRequest {}

// ============================================================================
// Inbound messages (device -> workstation)
// ============================================================================

/// Decrypted plaintext arriving from the device. Exactly one of:
/// the pairing handshake, an intermediate approval signal, or a response
/// correlated to an earlier request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inbound {
    Handshake(Handshake),
    /// The device will not sign until the user approves on the device; the
    /// original request stays pending and is resolved by a later `Response`.
    ApprovalRequired {
        request_id: String,
    },
    Response(Response),
}

/// Pairing handshake: carries the device's static public key and optionally
/// its identity so the workstation can seed the profile cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handshake {
    #[serde(with = "b64")]
    pub device_public_key: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

/// A response correlated to a prior request by `request_id`. Responses with
/// no pending entry are discarded by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: String,
    #[serde(flatten)]
    pub body: ResponseBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBody {
    MeResponse(MeResponse),
    SignResponse(SignResponse),
    GitSignResponse(GitSignResponse),
    /// Reply to a no-op; never has a pending entry and is always dropped.
    AckResponse(AckResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponse {
    pub me: Profile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignResponse {
    pub outcome: SignOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSignResponse {
    pub outcome: SignOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AckResponse {}

/// Terminal outcome of a signing request. A rejection is a completed round
/// trip, not an engine failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignOutcome {
    Signed {
        #[serde(with = "b64")]
        signature: Vec<u8>,
    },
    Rejected {
        reason: String,
    },
}
