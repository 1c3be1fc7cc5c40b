//! Pairing state machine.
//!
//! Three states: `Unpaired`, `InFlight` (pairing secret issued, waiting for
//! the device's handshake), `Paired`. Transitions only happen under the
//! client's pairing lock; this module holds the state data and its durable
//! form conversions.

use ekd_crypto::{KeyPair, PublicKey};
use ekd_wire::{ChannelId, PairingSecret};

use crate::store::{StoreError, StoredPairing};

/// Current relationship with an enclave device.
pub enum PairingState {
    Unpaired,
    /// A pairing secret has been issued and the workstation is waiting for
    /// the device's sealed handshake on `secret.channel`.
    InFlight {
        keypair: KeyPair,
        secret: PairingSecret,
    },
    Paired {
        keypair: KeyPair,
        device_public_key: PublicKey,
        channel: ChannelId,
    },
}

impl PairingState {
    /// Start a fresh pairing attempt: new key pair, new random channel.
    pub fn begin(workstation_name: &str) -> Result<Self, StoreError> {
        let keypair = KeyPair::generate();
        let mut channel_bytes = [0u8; ChannelId::LEN];
        getrandom::getrandom(&mut channel_bytes)
            .map_err(|e| StoreError::OperationFailed(format!("random source: {e}")))?;
        let secret = PairingSecret {
            workstation_public_key: keypair.public().to_vec(),
            channel: ChannelId::from_bytes(channel_bytes),
            workstation_name: workstation_name.to_owned(),
        };
        Ok(PairingState::InFlight { keypair, secret })
    }

    pub fn is_paired(&self) -> bool {
        matches!(self, PairingState::Paired { .. })
    }

    /// Durable form, `None` for `Unpaired`.
    pub fn to_stored(&self) -> Option<StoredPairing> {
        match self {
            PairingState::Unpaired => None,
            PairingState::InFlight { keypair, secret } => Some(StoredPairing::InFlight {
                secret_key: keypair.secret_bytes().to_vec(),
                secret: secret.clone(),
            }),
            PairingState::Paired {
                keypair,
                device_public_key,
                channel,
            } => Some(StoredPairing::Paired {
                secret_key: keypair.secret_bytes().to_vec(),
                device_public_key: device_public_key.to_vec(),
                channel: *channel,
            }),
        }
    }

    /// Rebuild in-memory state from a durable record, validating key lengths.
    pub fn from_stored(record: StoredPairing) -> Result<Self, StoreError> {
        match record {
            StoredPairing::InFlight { secret_key, secret } => {
                let keypair = keypair_from_bytes(&secret_key)?;
                if keypair.public().to_vec() != secret.workstation_public_key {
                    return Err(StoreError::Corrupt(
                        "pairing secret does not match stored key".into(),
                    ));
                }
                Ok(PairingState::InFlight { keypair, secret })
            }
            StoredPairing::Paired {
                secret_key,
                device_public_key,
                channel,
            } => {
                let keypair = keypair_from_bytes(&secret_key)?;
                let device_public_key = PublicKey::try_from_slice(&device_public_key)
                    .ok_or_else(|| StoreError::Corrupt("bad device public key length".into()))?;
                Ok(PairingState::Paired {
                    keypair,
                    device_public_key,
                    channel,
                })
            }
        }
    }
}

fn keypair_from_bytes(bytes: &[u8]) -> Result<KeyPair, StoreError> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt("bad secret key length".into()))?;
    Ok(KeyPair::from_secret_bytes(arr))
}
