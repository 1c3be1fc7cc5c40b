//! The enclave's public identity as presented to the workstation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::b64;
use crate::WireError;

/// Public identity of the paired device: its SSH public key in wire
/// encoding, the associated email identity, and an optional ASCII-armored
/// PGP public key for Git signing.
///
/// Two profiles are equal iff the key material and email match; the PGP key
/// is ignored for equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "public_key_wire", with = "b64")]
    pub public_key_wire: Vec<u8>,
    pub email: String,
    #[serde(rename = "pgp_pk", default, skip_serializing_if = "Option::is_none")]
    pub pgp_public_key: Option<String>,
}

impl PartialEq for Profile {
    fn eq(&self, other: &Self) -> bool {
        self.public_key_wire == other.public_key_wire && self.email == other.email
    }
}

impl Eq for Profile {}

impl Profile {
    /// SHA-256 of the SSH wire public key. Used to select which paired
    /// identity should sign when multiple keys could apply.
    pub fn fingerprint(&self) -> [u8; 32] {
        let digest = Sha256::digest(&self.public_key_wire);
        digest.into()
    }

    /// Render an OpenSSH `authorized_keys` line for this identity.
    ///
    /// The key type is read from the SSH wire encoding (a length-prefixed
    /// algorithm name leads the blob); spaces in the email are stripped so
    /// the comment field stays a single token.
    pub fn authorized_key(&self) -> Result<String, WireError> {
        let key_type = ssh_wire_key_type(&self.public_key_wire)?;
        Ok(format!(
            "{} {} {}",
            key_type,
            STANDARD.encode(&self.public_key_wire),
            self.email.replace(' ', "")
        ))
    }
}

/// Read the algorithm name out of an SSH wire-format public key:
/// `u32 be length || name || ...`.
fn ssh_wire_key_type(wire: &[u8]) -> Result<&str, WireError> {
    if wire.len() < 4 {
        return Err(WireError::InvalidSshKey);
    }
    let len = u32::from_be_bytes([wire[0], wire[1], wire[2], wire[3]]) as usize;
    if len == 0 || wire.len() < 4 + len {
        return Err(WireError::InvalidSshKey);
    }
    std::str::from_utf8(&wire[4..4 + len]).map_err(|_| WireError::InvalidSshKey)
}
