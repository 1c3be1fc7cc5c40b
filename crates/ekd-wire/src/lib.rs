//! Wire types for ekd (enclave key delegation).
//!
//! This crate defines the serialized shapes exchanged between a workstation
//! and its paired enclave device:
//! - Tagged request/response messages with correlation IDs
//! - The enclave's public identity (`Profile`)
//! - The out-of-band pairing payload (`PairingSecret`, `ChannelId`)
//! - Git commit payloads and ASCII-armored signature rendering
//!
//! Everything here is plain data. Encryption of these messages and the
//! request lifecycle live in `ekd-crypto` and `ekd-core`.

#![forbid(unsafe_code)]

pub mod b64;
pub mod commit;
pub mod message;
pub mod profile;

mod errors;

pub use commit::{ascii_armor, CommitInfo};
pub use errors::WireError;
pub use message::{
    AckResponse, ChannelId, GitSignRequest, GitSignResponse, Handshake, Inbound, MeRequest,
    MeResponse,
    NoOpRequest, PairingSecret, Request, RequestBody, Response, ResponseBody, SignOutcome,
    SignRequest, SignResponse,
};
pub use profile::Profile;
