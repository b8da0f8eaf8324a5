//! Cashu cryptographic primitives (BDHKE)
//!
//! Blind Diffie-Hellmann Key Exchange over secp256k1: hashing secrets to
//! curve points, blinding messages for the mint, unblinding the returned
//! signatures, and deriving keyset identifiers.

pub mod keys;
pub mod nip44;

use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::mint::types::BlindedMessage;

/// Domain separator for hash_to_curve per NUT-00.
const DOMAIN_SEPARATOR: &[u8] = b"Secp256k1_HashToCurve_Cashu_";

/// Errors from the blind-signature primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// No valid curve point found within the counter bound. Astronomically
    /// improbable for random inputs; retry with a fresh secret.
    CurveSearchExhausted,
    /// A compressed point received from the mint failed to decode.
    InvalidCompressedPoint(String),
    /// A scalar or secret key was out of range.
    InvalidScalar(String),
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CurveSearchExhausted => write!(f, "No valid curve point found for message"),
            Self::InvalidCompressedPoint(msg) => write!(f, "Invalid compressed point: {}", msg),
            Self::InvalidScalar(msg) => write!(f, "Invalid scalar: {}", msg),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Blinded point plus the blinding factor that produced it.
///
/// The blinding factor never leaves the wallet; only `b` is sent to the
/// mint.
#[derive(Debug, Clone)]
pub struct BlindingData {
    /// Blinded point `B_ = Y + r*G` (compressed hex).
    pub b: String,
    /// Blinding factor `r` (32-byte hex). Keep secret.
    pub r: String,
}

/// A freshly blinded output the wallet must retain until the mint signs it.
///
/// Carries everything needed to turn the mint's blind signature back into
/// a proof: the plaintext secret, the blinding factor, and the requested
/// amount (zero for NUT-08 blank outputs, whose real amount the mint
/// assigns later).
#[derive(Debug, Clone)]
pub struct PendingOutput {
    pub amount: u64,
    pub keyset_id: String,
    /// Proof secret (32-byte hex).
    pub secret: String,
    /// Blinding factor (32-byte hex).
    pub r: String,
}

/// Hash a message to a point on the secp256k1 curve per NUT-00.
///
/// `Y = Point(0x02 || SHA256(msg_hash || counter))` with
/// `msg_hash = SHA256(DOMAIN_SEPARATOR || message)`, trying prefix 0x02
/// then 0x03 and incrementing the little-endian counter until a valid
/// point appears.
pub fn hash_to_curve(message: &[u8]) -> Result<PublicKey, CryptoError> {
    let msg_hash = Sha256::new()
        .chain_update(DOMAIN_SEPARATOR)
        .chain_update(message)
        .finalize();

    let mut counter: u32 = 0;
    loop {
        let digest = Sha256::new()
            .chain_update(msg_hash)
            .chain_update(counter.to_le_bytes())
            .finalize();

        let mut candidate = [0u8; 33];
        candidate[1..].copy_from_slice(&digest);
        for prefix in [0x02u8, 0x03u8] {
            candidate[0] = prefix;
            if let Ok(point) = PublicKey::from_slice(&candidate) {
                return Ok(point);
            }
        }

        counter = match counter.checked_add(1) {
            Some(c) => c,
            None => return Err(CryptoError::CurveSearchExhausted),
        };
    }
}

/// Hash a proof secret to its curve point.
///
/// Cashu convention: the secret's *hex string* is hashed as UTF-8 bytes,
/// not the raw secret bytes.
pub fn secret_to_curve(secret_hex: &str) -> Result<PublicKey, CryptoError> {
    hash_to_curve(secret_hex.as_bytes())
}

/// Compressed y-value for a proof secret, used by `/v1/checkstate`.
///
/// `Y = hash_to_curve(hex(secret))`, hex-encoded compressed.
pub fn proof_y_value(secret_hex: &str) -> Result<String, CryptoError> {
    Ok(hex::encode(secret_to_curve(secret_hex)?.serialize()))
}

/// Blind a secret for the mint: `B_ = Y + r*G`.
///
/// Returns the blinded point and the blinding factor used.
pub fn blind_message(
    secret: &[u8],
    r: Option<[u8; 32]>,
) -> Result<(PublicKey, SecretKey), CryptoError> {
    let secp = Secp256k1::new();
    let y = hash_to_curve(secret)?;

    let r_key = match r {
        Some(bytes) => SecretKey::from_slice(&bytes)
            .map_err(|e| CryptoError::InvalidScalar(e.to_string()))?,
        None => random_secret_key(),
    };

    let r_point = PublicKey::from_secret_key(&secp, &r_key);
    let blinded = y
        .combine(&r_point)
        .map_err(|e| CryptoError::InvalidScalar(e.to_string()))?;

    Ok((blinded, r_key))
}

/// Unblind a signature from the mint: `C = C_ - r*K`.
///
/// `K` is the mint public key for the proof's denomination.
pub fn unblind_signature(
    c_blinded: &PublicKey,
    r: &SecretKey,
    mint_key: &PublicKey,
) -> Result<PublicKey, CryptoError> {
    let secp = Secp256k1::new();
    let r_scalar = Scalar::from_be_bytes(r.secret_bytes())
        .map_err(|e| CryptoError::InvalidScalar(e.to_string()))?;

    let rk = mint_key
        .mul_tweak(&secp, &r_scalar)
        .map_err(|e| CryptoError::InvalidScalar(e.to_string()))?;
    let neg_rk = rk.negate(&secp);

    c_blinded
        .combine(&neg_rk)
        .map_err(|e| CryptoError::InvalidScalar(e.to_string()))
}

/// Parse a compressed point received on the wire.
pub fn parse_point(hex_point: &str) -> Result<PublicKey, CryptoError> {
    let bytes =
        hex::decode(hex_point).map_err(|e| CryptoError::InvalidCompressedPoint(e.to_string()))?;
    PublicKey::from_slice(&bytes).map_err(|e| CryptoError::InvalidCompressedPoint(e.to_string()))
}

/// Generate a valid random secret key.
fn random_secret_key() -> SecretKey {
    use rand::RngCore;
    let mut rng = rand::thread_rng();
    loop {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        if let Ok(key) = SecretKey::from_slice(&bytes) {
            return key;
        }
    }
}

/// Create one blinded message with a fresh random secret.
///
/// Returns the wire message and the pending output to retain for
/// unblinding.
pub fn create_blinded_output(
    amount: u64,
    keyset_id: &str,
) -> Result<(BlindedMessage, PendingOutput), CryptoError> {
    use rand::RngCore;
    let mut secret_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret_bytes);
    let secret_hex = hex::encode(secret_bytes);

    // The hex string's UTF-8 bytes are what gets hashed to the curve.
    let (blinded, r_key) = blind_message(secret_hex.as_bytes(), None)?;

    let message = BlindedMessage {
        amount,
        id: keyset_id.to_string(),
        b: hex::encode(blinded.serialize()),
    };
    let pending = PendingOutput {
        amount,
        keyset_id: keyset_id.to_string(),
        secret: secret_hex,
        r: hex::encode(r_key.secret_bytes()),
    };

    Ok((message, pending))
}

/// Recover the blinding factor of a [`PendingOutput`] as a secret key.
pub fn pending_blinding_factor(pending: &PendingOutput) -> Result<SecretKey, CryptoError> {
    let bytes =
        hex::decode(&pending.r).map_err(|e| CryptoError::InvalidScalar(e.to_string()))?;
    SecretKey::from_slice(&bytes).map_err(|e| CryptoError::InvalidScalar(e.to_string()))
}

/// Derive a keyset id from an amount -> pubkey table per NUT-02.
///
/// Version byte followed by the first 7 bytes of SHA-256 over
/// `{amount}{pubkey_hex}` concatenated in ascending amount order.
pub fn derive_keyset_id(keys: &std::collections::HashMap<u64, String>, version: u8) -> String {
    let mut sorted: Vec<(&u64, &String)> = keys.iter().collect();
    sorted.sort_by_key(|(amount, _)| **amount);

    let mut concat = String::new();
    for (amount, pubkey) in sorted {
        concat.push_str(&amount.to_string());
        concat.push_str(pubkey);
    }

    let digest = Sha256::digest(concat.as_bytes());
    let mut id = vec![version];
    id.extend_from_slice(&digest[..7]);
    hex::encode(id)
}

/// Check that a keyset id matches its key table.
pub fn validate_keyset_id(keyset_id: &str, keys: &std::collections::HashMap<u64, String>) -> bool {
    derive_keyset_id(keys, 0).eq_ignore_ascii_case(keyset_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_hash_to_curve_deterministic() {
        let a = hash_to_curve(b"test message").unwrap();
        let b = hash_to_curve(b"test message").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, hash_to_curve(b"other message").unwrap());
    }

    #[test]
    fn test_hash_to_curve_random_secrets() {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        for _ in 0..16 {
            let mut secret = [0u8; 32];
            rng.fill_bytes(&mut secret);
            let hex_secret = hex::encode(secret);
            let point = secret_to_curve(&hex_secret).unwrap();
            // Serializes to a valid 33-byte compressed point
            assert_eq!(point.serialize().len(), 33);
            assert_eq!(point, secret_to_curve(&hex_secret).unwrap());
        }
    }

    #[test]
    fn test_blind_unblind_round_trip() {
        // With mint key k: C_ = k*(Y + rG), K = kG. Unblinding must yield
        // C = k*Y.
        let secp = Secp256k1::new();
        let k = SecretKey::from_slice(&[0x11u8; 32]).unwrap();
        let mint_pub = PublicKey::from_secret_key(&secp, &k);

        let secret_hex = hex::encode([0x42u8; 32]);
        let (blinded, r) = blind_message(secret_hex.as_bytes(), Some([0x07u8; 32])).unwrap();

        let k_scalar = Scalar::from_be_bytes(k.secret_bytes()).unwrap();
        let c_blinded = blinded.mul_tweak(&secp, &k_scalar).unwrap();

        let c = unblind_signature(&c_blinded, &r, &mint_pub).unwrap();
        let y = secret_to_curve(&secret_hex).unwrap();
        let expected = y.mul_tweak(&secp, &k_scalar).unwrap();
        assert_eq!(c, expected);
    }

    #[test]
    fn test_keyset_id_order_independent() {
        let mut keys = HashMap::new();
        keys.insert(1u64, "02a1".to_string() + &"0".repeat(62));
        keys.insert(2u64, "02b2".to_string() + &"0".repeat(62));
        keys.insert(4u64, "02c3".to_string() + &"0".repeat(62));

        let id = derive_keyset_id(&keys, 0);
        assert_eq!(id.len(), 16);
        assert!(id.starts_with("00"));

        // Insert in a different order; derivation sorts by amount.
        let mut permuted = HashMap::new();
        permuted.insert(4u64, keys[&4].clone());
        permuted.insert(1u64, keys[&1].clone());
        permuted.insert(2u64, keys[&2].clone());
        assert_eq!(id, derive_keyset_id(&permuted, 0));
        assert!(validate_keyset_id(&id, &keys));
    }

    #[test]
    fn test_y_value_is_compressed_point() {
        let y = proof_y_value(&hex::encode([9u8; 32])).unwrap();
        assert_eq!(y.len(), 66);
        assert!(y.starts_with("02") || y.starts_with("03"));
        parse_point(&y).unwrap();
    }

    #[test]
    fn test_create_blinded_output_retains_material() {
        let (msg, pending) = create_blinded_output(8, "009a1f293253e41e").unwrap();
        assert_eq!(msg.amount, 8);
        assert_eq!(msg.id, "009a1f293253e41e");
        assert_eq!(pending.secret.len(), 64);
        assert_eq!(pending.r.len(), 64);
        parse_point(&msg.b).unwrap();
        pending_blinding_factor(&pending).unwrap();
    }

    #[test]
    fn test_parse_point_rejects_garbage() {
        assert!(parse_point("not-hex").is_err());
        assert!(parse_point("02").is_err());
        assert!(parse_point(&"ff".repeat(33)).is_err());
    }
}
