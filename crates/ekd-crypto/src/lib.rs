//! Crypto primitives for ekd (enclave key delegation).
//!
//! Two sealed-payload forms share one construction
//! (X25519 + HKDF-SHA256 + ChaCha20-Poly1305):
//! - an *authenticated box* between two static key pairs, used for all
//!   request/response traffic once paired;
//! - an *anonymous seal* from an ephemeral key to a static public key, used
//!   for the pairing handshake where the device is not yet known.
//!
//! Opening either form authenticates the AEAD tag; any failure is reported
//! as a single opaque error so callers can drop undecryptable traffic
//! without leaking why it failed.

#![forbid(unsafe_code)]

pub mod hash;
pub mod keypair;
pub mod sealed;

pub use keypair::{KeyPair, PublicKey, PUBLIC_KEY_LEN};
pub use sealed::{open, open_anonymous, seal, seal_anonymous, CryptoError};
