//! NIP-44 v2 authenticated encryption
//!
//! Hybrid scheme used for the wallet's encrypted event kinds: ECDH against
//! the holder's own key pair, HKDF-SHA256 key derivation, ChaCha20 stream
//! cipher and HMAC-SHA256 authentication. Conversation-key derivation is
//! deterministic and pure; the per-message nonce is fresh random.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{ChaCha20, Key, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, SecretKey};
use sha2::Sha256;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

type HmacSha256 = Hmac<Sha256>;

const VERSION: u8 = 2;
const SALT: &[u8] = b"nip44-v2";
const MIN_PLAINTEXT_SIZE: usize = 1;
const MAX_PLAINTEXT_SIZE: usize = 65535;
// version(1) + nonce(32) + ciphertext(>= 32 + 2) + mac(32)
const MIN_PAYLOAD_SIZE: usize = 99;
const MAX_PAYLOAD_SIZE: usize = 65603;

/// NIP-44 encryption/decryption errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nip44Error {
    InvalidPlaintextLength(usize),
    InvalidPayload(String),
    UnknownVersion(u8),
    MacMismatch,
    InvalidPadding,
}

impl std::fmt::Display for Nip44Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPlaintextLength(len) => write!(f, "Invalid plaintext length: {}", len),
            Self::InvalidPayload(msg) => write!(f, "Invalid payload: {}", msg),
            Self::UnknownVersion(v) => write!(f, "Unknown encryption version: {}", v),
            Self::MacMismatch => write!(f, "MAC verification failed"),
            Self::InvalidPadding => write!(f, "Invalid padding"),
        }
    }
}

impl std::error::Error for Nip44Error {}

/// Padded plaintext length (excluding the 2-byte length prefix).
///
/// Plaintexts up to 32 bytes pad to exactly 32. Longer ones round up to a
/// chunk of 32 bytes while the next power of two is <= 256, and to an
/// eighth of the next power of two beyond that.
pub fn calc_padded_len(unpadded_len: usize) -> usize {
    if unpadded_len <= 32 {
        return 32;
    }
    let next_power = 1usize << (usize::BITS - ((unpadded_len - 1).leading_zeros()));
    let chunk = if next_power <= 256 { 32 } else { next_power / 8 };
    chunk * ((unpadded_len - 1) / chunk + 1)
}

/// Apply the length prefix and zero padding.
fn pad(plaintext: &[u8]) -> Result<Vec<u8>, Nip44Error> {
    let len = plaintext.len();
    if !(MIN_PLAINTEXT_SIZE..=MAX_PLAINTEXT_SIZE).contains(&len) {
        return Err(Nip44Error::InvalidPlaintextLength(len));
    }
    let padded_len = calc_padded_len(len);
    let mut out = Vec::with_capacity(2 + padded_len);
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(plaintext);
    out.resize(2 + padded_len, 0);
    Ok(out)
}

/// Strip the length prefix and validate the padded length.
fn unpad(padded: &[u8]) -> Result<Vec<u8>, Nip44Error> {
    if padded.len() < 2 {
        return Err(Nip44Error::InvalidPadding);
    }
    let unpadded_len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if unpadded_len == 0 || padded.len() < 2 + unpadded_len {
        return Err(Nip44Error::InvalidPadding);
    }
    if padded.len() != 2 + calc_padded_len(unpadded_len) {
        return Err(Nip44Error::InvalidPadding);
    }
    Ok(padded[2..2 + unpadded_len].to_vec())
}

/// Conversation key: HKDF-Extract of the shared ECDH x coordinate with the
/// ASCII salt `nip44-v2`. Deterministic for a key pair.
pub fn conversation_key(privkey: &SecretKey, pubkey: &PublicKey) -> [u8; 32] {
    let shared = secp256k1::ecdh::shared_secret_point(pubkey, privkey);
    let shared_x = &shared[..32];
    let (prk, _) = Hkdf::<Sha256>::extract(Some(SALT), shared_x);
    let mut key = [0u8; 32];
    key.copy_from_slice(prk.as_slice());
    key
}

/// Expand the conversation key with the message nonce into
/// `(chacha_key, chacha_nonce, hmac_key)`.
fn message_keys(conversation_key: &[u8; 32], nonce: &[u8; 32]) -> ([u8; 32], [u8; 12], [u8; 32]) {
    let hk = Hkdf::<Sha256>::from_prk(conversation_key).expect("PRK is 32 bytes");
    let mut okm = [0u8; 76];
    hk.expand(nonce, &mut okm).expect("76 bytes is a valid HKDF length");

    let mut chacha_key = [0u8; 32];
    let mut chacha_nonce = [0u8; 12];
    let mut hmac_key = [0u8; 32];
    chacha_key.copy_from_slice(&okm[0..32]);
    chacha_nonce.copy_from_slice(&okm[32..44]);
    hmac_key.copy_from_slice(&okm[44..76]);
    (chacha_key, chacha_nonce, hmac_key)
}

/// MAC over `nonce || ciphertext` keyed by the message hmac key.
fn hmac_aad(key: &[u8; 32], message: &[u8], aad: &[u8; 32]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts 32-byte keys");
    mac.update(aad);
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Encrypt a plaintext for `recipient_pubkey` under `sender_privkey`.
///
/// Wallet-private kinds pass the holder's own compressed pubkey here
/// (self-encryption). Returns the base64 payload
/// `version || nonce || ciphertext || mac`.
pub fn encrypt(
    plaintext: &str,
    sender_privkey: &SecretKey,
    recipient_pubkey: &PublicKey,
) -> Result<String, Nip44Error> {
    use rand::RngCore;
    let mut nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce);
    encrypt_with_nonce(plaintext, sender_privkey, recipient_pubkey, nonce)
}

fn encrypt_with_nonce(
    plaintext: &str,
    sender_privkey: &SecretKey,
    recipient_pubkey: &PublicKey,
    nonce: [u8; 32],
) -> Result<String, Nip44Error> {
    let conv_key = conversation_key(sender_privkey, recipient_pubkey);
    let (chacha_key, chacha_nonce, hmac_key) = message_keys(&conv_key, &nonce);

    let mut buffer = pad(plaintext.as_bytes())?;
    let mut cipher = ChaCha20::new(Key::from_slice(&chacha_key), Nonce::from_slice(&chacha_nonce));
    cipher.apply_keystream(&mut buffer);

    let mac = hmac_aad(&hmac_key, &buffer, &nonce);

    let mut payload = Vec::with_capacity(1 + 32 + buffer.len() + 32);
    payload.push(VERSION);
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&buffer);
    payload.extend_from_slice(&mac);
    Ok(BASE64.encode(payload))
}

/// Decrypt a NIP-44 payload. Fails with an integrity error when any byte
/// of ciphertext, nonce or MAC was altered.
pub fn decrypt(
    payload_b64: &str,
    recipient_privkey: &SecretKey,
    sender_pubkey: &PublicKey,
) -> Result<String, Nip44Error> {
    if payload_b64.starts_with('#') {
        return Err(Nip44Error::InvalidPayload(
            "Unsupported encryption version".into(),
        ));
    }
    let payload = BASE64
        .decode(payload_b64)
        .map_err(|e| Nip44Error::InvalidPayload(format!("Invalid base64: {}", e)))?;

    if !(MIN_PAYLOAD_SIZE..=MAX_PAYLOAD_SIZE).contains(&payload.len()) {
        return Err(Nip44Error::InvalidPayload(format!(
            "Invalid payload size: {}",
            payload.len()
        )));
    }

    let version = payload[0];
    if version != VERSION {
        return Err(Nip44Error::UnknownVersion(version));
    }

    let mut nonce = [0u8; 32];
    nonce.copy_from_slice(&payload[1..33]);
    let mac_offset = payload.len() - 32;
    let ciphertext = &payload[33..mac_offset];
    let mac = &payload[mac_offset..];

    let conv_key = conversation_key(recipient_privkey, sender_pubkey);
    let (chacha_key, chacha_nonce, hmac_key) = message_keys(&conv_key, &nonce);

    // Constant-time comparison via the Mac verify path.
    let mut verifier = HmacSha256::new_from_slice(&hmac_key).expect("HMAC accepts 32-byte keys");
    verifier.update(&nonce);
    verifier.update(ciphertext);
    verifier
        .verify_slice(mac)
        .map_err(|_| Nip44Error::MacMismatch)?;

    let mut buffer = ciphertext.to_vec();
    let mut cipher = ChaCha20::new(Key::from_slice(&chacha_key), Nonce::from_slice(&chacha_nonce));
    cipher.apply_keystream(&mut buffer);

    let plaintext = unpad(&buffer)?;
    String::from_utf8(plaintext)
        .map_err(|e| Nip44Error::InvalidPayload(format!("Invalid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::Secp256k1;

    fn test_keys() -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x5au8; 32]).unwrap();
        let pk = PublicKey::from_secret_key(&secp, &sk);
        (sk, pk)
    }

    #[test]
    fn test_padded_len_size_classes() {
        assert_eq!(calc_padded_len(1), 32);
        assert_eq!(calc_padded_len(32), 32);
        assert_eq!(calc_padded_len(33), 64);
        assert_eq!(calc_padded_len(64), 64);
        assert_eq!(calc_padded_len(65), 96);
        assert_eq!(calc_padded_len(100), 128);
        assert_eq!(calc_padded_len(256), 256);
        assert_eq!(calc_padded_len(257), 320);
        assert_eq!(calc_padded_len(1000), 1024);
    }

    #[test]
    fn test_padded_len_monotone_and_floor() {
        let mut prev = 0;
        for len in 1..=4096 {
            let padded = calc_padded_len(len);
            assert!(padded >= 32);
            assert!(padded >= len);
            assert!(padded >= prev, "padding not monotone at {}", len);
            prev = padded;
        }
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let (sk, pk) = test_keys();
        for plaintext in [
            "x",
            "hello nip-44",
            &"a".repeat(32),
            &"b".repeat(33),
            &"c".repeat(5000),
        ] {
            let payload = encrypt(plaintext, &sk, &pk).unwrap();
            assert_eq!(decrypt(&payload, &sk, &pk).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_fresh_nonce_per_message() {
        let (sk, pk) = test_keys();
        let a = encrypt("same plaintext", &sk, &pk).unwrap();
        let b = encrypt("same plaintext", &sk, &pk).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_conversation_key_deterministic() {
        let (sk, pk) = test_keys();
        assert_eq!(conversation_key(&sk, &pk), conversation_key(&sk, &pk));
    }

    #[test]
    fn test_tampering_fails_integrity() {
        let (sk, pk) = test_keys();
        let payload = encrypt("integrity matters", &sk, &pk).unwrap();
        let raw = BASE64.decode(&payload).unwrap();

        // Flip one byte at every region: nonce, ciphertext, mac.
        for index in [5usize, 40, raw.len() - 5] {
            let mut tampered = raw.clone();
            tampered[index] ^= 0x01;
            let tampered_b64 = BASE64.encode(&tampered);
            assert!(matches!(
                decrypt(&tampered_b64, &sk, &pk),
                Err(Nip44Error::MacMismatch)
            ));
        }
    }

    #[test]
    fn test_rejects_unknown_version() {
        let (sk, pk) = test_keys();
        let payload = encrypt("versioned", &sk, &pk).unwrap();
        let mut raw = BASE64.decode(&payload).unwrap();
        raw[0] = 1;
        let err = decrypt(&BASE64.encode(&raw), &sk, &pk).unwrap_err();
        assert_eq!(err, Nip44Error::UnknownVersion(1));
    }

    #[test]
    fn test_rejects_short_payload() {
        let (sk, pk) = test_keys();
        let err = decrypt(&BASE64.encode([2u8; 10]), &sk, &pk).unwrap_err();
        assert!(matches!(err, Nip44Error::InvalidPayload(_)));
    }
}
