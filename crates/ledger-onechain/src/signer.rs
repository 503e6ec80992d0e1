//! Ed25519 transaction signing for the referee admin account.
//!
//! A OneChain transaction signature covers the Blake2b-256 digest of the
//! intent message `[0, 0, 0] || tx_bytes`. The serialized signature sent to
//! the node is `flag || signature || public_key`, base64-encoded.
//!
//! # Security
//!
//! - The key is read from an environment variable, never from config files
//! - The key is never logged; `Debug` prints only the derived address
//! - Decoded key bytes are zeroized, and the signing key zeroizes on drop

use crate::error::{OneChainError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use duel_referee_core::AccountId;
use ed25519_dalek::{Signer, SigningKey};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

type Blake2b256 = Blake2b<U32>;

/// Signature scheme flag for Ed25519.
pub const ED25519_FLAG: u8 = 0x00;

/// Intent prefix: transaction data, version 0, app id 0.
const TRANSACTION_INTENT: [u8; 3] = [0, 0, 0];

/// Human-readable part of bech32 private keys (`keytool export`).
const BECH32_KEY_PREFIX: &str = "suiprivkey";

/// Signing identity of the referee.
pub struct AdminSigner {
    key: SigningKey,
    address: AccountId,
}

impl std::fmt::Debug for AdminSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSigner")
            .field("address", &self.address)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl AdminSigner {
    /// Loads the key from the named environment variable.
    ///
    /// # Errors
    /// Returns [`OneChainError::Configuration`] if the variable is unset and
    /// [`OneChainError::Signing`] if its value is not a supported key.
    pub fn from_env(var: &str) -> Result<Self> {
        let raw = std::env::var(var).map_err(|_| {
            OneChainError::Configuration(format!("missing environment variable: {var}"))
        })?;
        Self::from_secret(&SecretString::from(raw))
    }

    /// Parses a private key.
    ///
    /// Accepted encodings: bech32 `suiprivkey1...`, base64 keystore entry
    /// (both carry `flag || 32 bytes`, flag must be Ed25519), or 0x-prefixed
    /// hex of the 32-byte seed.
    ///
    /// # Errors
    /// Returns [`OneChainError::Signing`] describing the rejected format,
    /// never the key material.
    pub fn from_secret(secret: &SecretString) -> Result<Self> {
        let text = secret.expose_secret().trim();

        let seed: Zeroizing<Vec<u8>> = if text.starts_with(BECH32_KEY_PREFIX) {
            let (hrp, payload) = bech32::decode(text)
                .map_err(|_| OneChainError::Signing("private key is not valid bech32".into()))?;
            let payload = Zeroizing::new(payload);
            if hrp.to_lowercase() != BECH32_KEY_PREFIX {
                return Err(OneChainError::Signing(format!(
                    "unexpected bech32 prefix {}",
                    hrp.to_lowercase()
                )));
            }
            flagged_seed(&payload)?
        } else if let Some(hex_digits) = text.strip_prefix("0x") {
            let bytes = Zeroizing::new(
                hex::decode(hex_digits)
                    .map_err(|_| OneChainError::Signing("private key is not valid hex".into()))?,
            );
            if bytes.len() != 32 {
                return Err(OneChainError::Signing(format!(
                    "hex private key must be 32 bytes, got {}",
                    bytes.len()
                )));
            }
            bytes
        } else {
            let bytes = Zeroizing::new(
                BASE64
                    .decode(text)
                    .map_err(|_| OneChainError::Signing("private key is not valid base64".into()))?,
            );
            flagged_seed(&bytes)?
        };

        let mut seed_array = Zeroizing::new([0u8; 32]);
        seed_array.copy_from_slice(&seed);
        Self::from_seed(&seed_array)
    }

    fn from_seed(seed: &[u8; 32]) -> Result<Self> {
        let key = SigningKey::from_bytes(seed);
        let address = derive_address(&key.verifying_key().to_bytes())?;
        Ok(Self { key, address })
    }

    /// Address of the admin account.
    #[must_use]
    pub fn address(&self) -> &AccountId {
        &self.address
    }

    /// Signs unsigned transaction bytes, returning the serialized signature
    /// in the base64 form `sui_executeTransactionBlock` expects.
    #[must_use]
    pub fn sign_transaction(&self, tx_bytes: &[u8]) -> String {
        let digest = intent_digest(tx_bytes);
        let signature = self.key.sign(&digest);

        let mut serialized = Vec::with_capacity(1 + 64 + 32);
        serialized.push(ED25519_FLAG);
        serialized.extend_from_slice(&signature.to_bytes());
        serialized.extend_from_slice(&self.key.verifying_key().to_bytes());
        BASE64.encode(serialized)
    }
}

/// Splits `flag || seed`, accepting only an Ed25519 flag and a 32-byte seed.
fn flagged_seed(bytes: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    match bytes.split_first() {
        Some((&ED25519_FLAG, rest)) if rest.len() == 32 => Ok(Zeroizing::new(rest.to_vec())),
        Some((flag, rest)) if rest.len() == 32 => Err(OneChainError::Signing(format!(
            "unsupported signature scheme flag {flag:#04x}"
        ))),
        _ => Err(OneChainError::Signing(format!(
            "flagged private key must be 33 bytes, got {}",
            bytes.len()
        ))),
    }
}

fn intent_digest(tx_bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(TRANSACTION_INTENT);
    hasher.update(tx_bytes);
    hasher.finalize().into()
}

fn derive_address(public_key: &[u8; 32]) -> Result<AccountId> {
    let mut hasher = Blake2b256::new();
    hasher.update([ED25519_FLAG]);
    hasher.update(public_key);
    let hash: [u8; 32] = hasher.finalize().into();
    AccountId::parse(&format!("0x{}", hex::encode(hash)))
        .map_err(|e| OneChainError::Signing(e.to_string()))
}
