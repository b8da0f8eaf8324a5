//! Holder key capability
//!
//! The wallet signs every event with one long-lived secp256k1 key. The
//! key is modeled as an explicit value handed to the event codec, never
//! as module-global state. Accepted input formats: 32-byte hex and
//! bech32 `nsec1...`; temporary wallets generate a fresh key that is
//! never persisted.

use secp256k1::schnorr::Signature;
use secp256k1::{Keypair, Message, PublicKey, Secp256k1, SecretKey, XOnlyPublicKey};

/// Errors from key parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    InvalidHex(String),
    InvalidBech32(String),
    InvalidKey(String),
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidHex(msg) => write!(f, "Invalid hex key: {}", msg),
            Self::InvalidBech32(msg) => write!(f, "Invalid nsec: {}", msg),
            Self::InvalidKey(msg) => write!(f, "Invalid key: {}", msg),
        }
    }
}

impl std::error::Error for KeyError {}

/// The holder's signing identity.
#[derive(Clone)]
pub struct WalletKeys {
    secp: Secp256k1<secp256k1::All>,
    secret: SecretKey,
    keypair: Keypair,
}

impl std::fmt::Debug for WalletKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret.
        f.debug_struct("WalletKeys")
            .field("pubkey", &self.public_key_hex())
            .finish()
    }
}

impl WalletKeys {
    /// Parse a signing key from 64-char hex or bech32 `nsec1...`.
    pub fn parse(input: &str) -> Result<Self, KeyError> {
        let trimmed = input.trim();
        let bytes: Vec<u8> = if trimmed.starts_with("nsec1") {
            let (hrp, data) =
                bech32::decode(trimmed).map_err(|e| KeyError::InvalidBech32(e.to_string()))?;
            if hrp.as_str() != "nsec" {
                return Err(KeyError::InvalidBech32(format!(
                    "Unexpected prefix: {}",
                    hrp.as_str()
                )));
            }
            data
        } else {
            hex::decode(trimmed).map_err(|e| KeyError::InvalidHex(e.to_string()))?
        };

        if bytes.len() != 32 {
            return Err(KeyError::InvalidKey(format!(
                "Expected 32 bytes, got {}",
                bytes.len()
            )));
        }

        let secret =
            SecretKey::from_slice(&bytes).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Ok(Self::from_secret_key(secret))
    }

    /// Generate an ephemeral key for a temporary wallet. Not persisted
    /// anywhere; funds received under it are only reachable while the
    /// process lives.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        loop {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            if let Ok(secret) = SecretKey::from_slice(&bytes) {
                return Self::from_secret_key(secret);
            }
        }
    }

    fn from_secret_key(secret: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &secret);
        Self {
            secp,
            secret,
            keypair,
        }
    }

    /// The underlying secret key, for NIP-44 key derivation.
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    /// Nostr x-only public key, hex.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.x_only().serialize())
    }

    /// Full compressed public key (33 bytes), used as the NIP-44
    /// self-encryption recipient.
    pub fn compressed_public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    fn x_only(&self) -> XOnlyPublicKey {
        self.keypair.x_only_public_key().0
    }

    /// BIP-340 Schnorr signature over a 32-byte digest (an event id).
    pub fn sign_digest(&self, digest: [u8; 32]) -> Signature {
        let msg = Message::from_digest(digest);
        self.secp.sign_schnorr_no_aux_rand(&msg, &self.keypair)
    }

    /// Verify a Schnorr signature against an x-only pubkey.
    pub fn verify_digest(digest: [u8; 32], sig_hex: &str, pubkey_hex: &str) -> bool {
        let secp = Secp256k1::verification_only();
        let Ok(sig_bytes) = hex::decode(sig_hex) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        let Ok(pk_bytes) = hex::decode(pubkey_hex) else {
            return false;
        };
        let Ok(pubkey) = XOnlyPublicKey::from_slice(&pk_bytes) else {
            return false;
        };
        let msg = Message::from_digest(digest);
        secp.verify_schnorr(&sig, &msg, &pubkey).is_ok()
    }
}

/// Generate a fresh secp256k1 private key, hex encoded. Used for the
/// auxiliary P2PK key stored in the wallet metadata event.
pub fn generate_privkey_hex() -> String {
    hex::encode(WalletKeys::generate().secret.secret_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_key() {
        let keys = WalletKeys::parse(&"ab".repeat(32)).unwrap();
        assert_eq!(keys.public_key_hex().len(), 64);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(WalletKeys::parse("zz").is_err());
        assert!(WalletKeys::parse(&"ab".repeat(16)).is_err());
        assert!(WalletKeys::parse("nsec1invalidinvalid").is_err());
    }

    #[test]
    fn test_generated_keys_are_distinct() {
        let a = WalletKeys::generate();
        let b = WalletKeys::generate();
        assert_ne!(a.public_key_hex(), b.public_key_hex());
    }

    #[test]
    fn test_sign_and_verify() {
        let keys = WalletKeys::parse(&"07".repeat(32)).unwrap();
        let digest = [0x33u8; 32];
        let sig = keys.sign_digest(digest);
        assert!(WalletKeys::verify_digest(
            digest,
            &hex::encode(sig.as_ref()),
            &keys.public_key_hex()
        ));
        // Wrong digest fails
        assert!(!WalletKeys::verify_digest(
            [0x34u8; 32],
            &hex::encode(sig.as_ref()),
            &keys.public_key_hex()
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let keys = WalletKeys::parse(&"07".repeat(32)).unwrap();
        let rendered = format!("{:?}", keys);
        assert!(!rendered.contains(&"07".repeat(32)));
    }
}
