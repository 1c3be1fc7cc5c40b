//! Sealed payloads: authenticated box and anonymous seal.
//!
//! Wire layout (version-prefixed binary):
//! - authenticated box: `0x02 || salt(24) || ciphertext`
//! - anonymous seal:    `0x01 || ephemeral_pub(32) || salt(24) || ciphertext`
//!
//! Per-message key and AEAD nonce are derived with HKDF-SHA256 from the
//! X25519 shared secret, salted by the random 24-byte salt so a fresh key
//! is used for every payload. The header bytes are bound as AEAD associated
//! data, so a spliced header fails authentication.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::Zeroize;

use crate::keypair::{KeyPair, PublicKey, PUBLIC_KEY_LEN};

const VERSION_ANONYMOUS: u8 = 0x01;
const VERSION_BOX: u8 = 0x02;
const SALT_LEN: usize = 24;

/// Errors from seal/open. Open failures are deliberately opaque: transport
/// noise, stale-channel traffic, and tampering all look alike.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    SealFailed,
    #[error("decryption failed")]
    OpenFailed,
}

fn derive_key_nonce(shared: &[u8; 32], salt: &[u8]) -> ([u8; 32], [u8; 12]) {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared);

    let mut key = [0u8; 32];
    hk.expand(b"ekd_box_v1_key", &mut key).unwrap(); // Output size matches digest size, infallible

    let mut nonce = [0u8; 12];
    hk.expand(b"ekd_box_v1_nonce", &mut nonce).unwrap(); // Output size < digest size, infallible

    (key, nonce)
}

fn aead_seal(
    shared: &[u8; 32],
    header: &[u8],
    salt: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let (mut key, nonce) = derive_key_nonce(shared, salt);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let result = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: header,
            },
        )
        .map_err(|_| CryptoError::SealFailed);
    key.zeroize();
    result
}

fn aead_open(
    shared: &[u8; 32],
    header: &[u8],
    salt: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let (mut key, nonce) = derive_key_nonce(shared, salt);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let result = cipher
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: ciphertext,
                aad: header,
            },
        )
        .map_err(|_| CryptoError::OpenFailed);
    key.zeroize();
    result
}

/// Seal `plaintext` in an authenticated box from `local` to `peer`.
///
/// Both static keys enter the shared secret, so only the two paired parties
/// can produce or open these payloads.
pub fn seal(plaintext: &[u8], local: &KeyPair, peer: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    getrandom::getrandom(&mut salt).map_err(|_| CryptoError::SealFailed)?;

    let shared = local.diffie_hellman(peer);

    let mut wire = Vec::with_capacity(1 + SALT_LEN + plaintext.len() + 16);
    wire.push(VERSION_BOX);
    wire.extend_from_slice(&salt);

    let ct = aead_seal(&shared, &wire, &salt, plaintext)?;
    wire.extend_from_slice(&ct);
    Ok(wire)
}

/// Open an authenticated box sealed between `local` and `peer`.
pub fn open(wire: &[u8], local: &KeyPair, peer: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    let header_len = 1 + SALT_LEN;
    if wire.len() <= header_len || wire[0] != VERSION_BOX {
        return Err(CryptoError::OpenFailed);
    }
    let (header, ct) = wire.split_at(header_len);
    let salt = &header[1..];

    let shared = local.diffie_hellman(peer);
    aead_open(&shared, header, salt, ct)
}

/// Seal `plaintext` to `recipient` without a sender identity. Used for the
/// pairing handshake, where the device only knows the workstation's public
/// key from the out-of-band pairing secret.
pub fn seal_anonymous(plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    getrandom::getrandom(&mut salt).map_err(|_| CryptoError::SealFailed)?;

    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pub = X25519PublicKey::from(&ephemeral);
    let shared: [u8; 32] = *ephemeral.diffie_hellman(&recipient.dalek()).as_bytes();

    let mut wire = Vec::with_capacity(1 + PUBLIC_KEY_LEN + SALT_LEN + plaintext.len() + 16);
    wire.push(VERSION_ANONYMOUS);
    wire.extend_from_slice(ephemeral_pub.as_bytes());
    wire.extend_from_slice(&salt);

    let ct = aead_seal(&shared, &wire, &salt, plaintext)?;
    wire.extend_from_slice(&ct);
    Ok(wire)
}

/// Open an anonymously sealed payload addressed to `local`.
pub fn open_anonymous(wire: &[u8], local: &KeyPair) -> Result<Vec<u8>, CryptoError> {
    let header_len = 1 + PUBLIC_KEY_LEN + SALT_LEN;
    if wire.len() <= header_len || wire[0] != VERSION_ANONYMOUS {
        return Err(CryptoError::OpenFailed);
    }
    let (header, ct) = wire.split_at(header_len);
    let ephemeral_pub = PublicKey::try_from_slice(&header[1..1 + PUBLIC_KEY_LEN])
        .ok_or(CryptoError::OpenFailed)?;
    let salt = &header[1 + PUBLIC_KEY_LEN..];

    let shared = local.diffie_hellman(&ephemeral_pub);
    aead_open(&shared, header, salt, ct)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_round_trip() {
        let workstation = KeyPair::generate();
        let device = KeyPair::generate();

        let sealed = seal(b"sign this", &workstation, &device.public()).unwrap();
        let opened = open(&sealed, &device, &workstation.public()).unwrap();
        assert_eq!(opened, b"sign this");
    }

    #[test]
    fn box_rejects_wrong_peer() {
        let workstation = KeyPair::generate();
        let device = KeyPair::generate();
        let stranger = KeyPair::generate();

        let sealed = seal(b"secret", &workstation, &device.public()).unwrap();
        assert!(open(&sealed, &stranger, &workstation.public()).is_err());
        assert!(open(&sealed, &device, &stranger.public()).is_err());
    }

    #[test]
    fn box_rejects_tampering() {
        let workstation = KeyPair::generate();
        let device = KeyPair::generate();

        let mut sealed = seal(b"secret", &workstation, &device.public()).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(open(&sealed, &device, &workstation.public()).is_err());
    }

    #[test]
    fn box_rejects_header_splice() {
        let workstation = KeyPair::generate();
        let device = KeyPair::generate();

        let mut sealed = seal(b"secret", &workstation, &device.public()).unwrap();
        // Flip a salt byte: key derivation and AAD both change.
        sealed[1] ^= 0xff;
        assert!(open(&sealed, &device, &workstation.public()).is_err());
    }

    #[test]
    fn anonymous_round_trip() {
        let workstation = KeyPair::generate();
        let sealed = seal_anonymous(b"handshake", &workstation.public()).unwrap();
        let opened = open_anonymous(&sealed, &workstation).unwrap();
        assert_eq!(opened, b"handshake");
    }

    #[test]
    fn anonymous_rejects_wrong_recipient() {
        let workstation = KeyPair::generate();
        let other = KeyPair::generate();
        let sealed = seal_anonymous(b"handshake", &workstation.public()).unwrap();
        assert!(open_anonymous(&sealed, &other).is_err());
    }

    #[test]
    fn forms_are_not_interchangeable() {
        let workstation = KeyPair::generate();
        let device = KeyPair::generate();

        let boxed = seal(b"x", &workstation, &device.public()).unwrap();
        assert!(open_anonymous(&boxed, &device).is_err());

        let anon = seal_anonymous(b"x", &device.public()).unwrap();
        assert!(open(&anon, &device, &workstation.public()).is_err());
    }

    #[test]
    fn truncated_wire_is_rejected() {
        let workstation = KeyPair::generate();
        let device = KeyPair::generate();
        let sealed = seal(b"x", &workstation, &device.public()).unwrap();
        for len in 0..=(1 + SALT_LEN) {
            assert!(open(&sealed[..len], &device, &workstation.public()).is_err());
        }
    }

    #[test]
    fn fresh_salt_every_seal() {
        let workstation = KeyPair::generate();
        let device = KeyPair::generate();
        let a = seal(b"same", &workstation, &device.public()).unwrap();
        let b = seal(b"same", &workstation, &device.public()).unwrap();
        assert_ne!(a, b);
    }
}
