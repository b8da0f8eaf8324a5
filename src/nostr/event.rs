//! Nostr event model
//!
//! Events are immutable once signed: the id is the SHA-256 of the
//! canonical JSON array `[0, pubkey, created_at, kind, tags, content]`
//! and the signature is BIP-340 Schnorr over the id under the holder's
//! long-lived key. Encrypted kinds carry NIP-44 self-encrypted content.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::keys::WalletKeys;
use crate::crypto::nip44::{self, Nip44Error};

/// A signed Nostr event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 over the canonical form).
    pub id: String,
    /// Author public key (x-only hex).
    pub pubkey: String,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Kind number, e.g. `7375`.
    pub kind: u32,
    /// Arbitrary tags.
    pub tags: Vec<Vec<String>>,
    /// Content body (NIP-44 payload for the encrypted kinds).
    pub content: String,
    /// Schnorr signature over the event id.
    pub sig: String,
}

/// Unsigned event fields, turned into an [`Event`] by [`EventTemplate::sign`].
#[derive(Debug, Clone)]
pub struct EventTemplate {
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub created_at: Option<u64>,
}

impl EventTemplate {
    pub fn new(kind: u32, content: String) -> Self {
        Self {
            kind,
            tags: Vec::new(),
            content,
            created_at: None,
        }
    }

    pub fn tag(mut self, tag: Vec<String>) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn tags(mut self, tags: Vec<Vec<String>>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Compute the canonical id and sign with the holder key.
    pub fn sign(self, keys: &WalletKeys) -> Event {
        let pubkey = keys.public_key_hex();
        let created_at = self
            .created_at
            .unwrap_or_else(|| chrono::Utc::now().timestamp() as u64);

        let digest = compute_event_id(&pubkey, created_at, self.kind, &self.tags, &self.content);
        let sig = keys.sign_digest(digest);

        Event {
            id: hex::encode(digest),
            pubkey,
            created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: hex::encode(sig.as_ref()),
        }
    }
}

/// SHA-256 of the canonical JSON form `[0, pubkey, created_at, kind, tags,
/// content]` with compact separators.
pub fn compute_event_id(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Vec<String>],
    content: &str,
) -> [u8; 32] {
    let canonical = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    let serialized = serde_json::to_string(&canonical).expect("canonical form serializes");
    Sha256::digest(serialized.as_bytes()).into()
}

impl Event {
    /// Recompute the id and check the Schnorr signature.
    pub fn verify(&self) -> bool {
        let digest =
            compute_event_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content);
        if hex::encode(digest) != self.id {
            return false;
        }
        WalletKeys::verify_digest(digest, &self.sig, &self.pubkey)
    }

    /// Serialized size in bytes as published to a relay.
    ///
    /// Used to keep token bundles under the relay soft limit before
    /// publication.
    pub fn estimate_size(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }

    /// First value of the given tag, if present.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(|n| n.as_str()) == Some(name))
            .and_then(|t| t.get(1))
            .map(|s| s.as_str())
    }

    /// All values of `e` tags (referenced event ids).
    pub fn referenced_event_ids(&self) -> Vec<String> {
        self.tags
            .iter()
            .filter(|t| t.first().map(|n| n.as_str()) == Some("e"))
            .filter_map(|t| t.get(1))
            .cloned()
            .collect()
    }

    /// Decrypt NIP-44 self-encrypted content with the holder key.
    pub fn decrypt_content(&self, keys: &WalletKeys) -> Result<String, Nip44Error> {
        nip44::decrypt(
            &self.content,
            keys.secret_key(),
            &keys.compressed_public_key(),
        )
    }
}

/// Build an encrypted event of the given kind: the plaintext is NIP-44
/// self-encrypted under the holder key before signing.
pub fn encrypted_event(
    keys: &WalletKeys,
    kind: u32,
    plaintext: &str,
    tags: Vec<Vec<String>>,
) -> Result<Event, Nip44Error> {
    let content = nip44::encrypt(plaintext, keys.secret_key(), &keys.compressed_public_key())?;
    Ok(EventTemplate::new(kind, content).tags(tags).sign(keys))
}

/// Subscription filter for REQ frames.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn author(mut self, pubkey: &str) -> Self {
        self.authors.get_or_insert_with(Vec::new).push(pubkey.to_string());
        self
    }

    pub fn kind(mut self, kind: u32) -> Self {
        self.kinds.get_or_insert_with(Vec::new).push(kind);
        self
    }

    pub fn kinds(mut self, kinds: &[u32]) -> Self {
        self.kinds.get_or_insert_with(Vec::new).extend_from_slice(kinds);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> WalletKeys {
        WalletKeys::parse(&"11".repeat(32)).unwrap()
    }

    #[test]
    fn test_sign_produces_valid_event() {
        let event = EventTemplate::new(1, "hello".into())
            .tag(vec!["t".into(), "test".into()])
            .sign(&keys());
        assert_eq!(event.id.len(), 64);
        assert_eq!(event.sig.len(), 128);
        assert!(event.verify());
    }

    #[test]
    fn test_id_is_canonical_hash() {
        let event = EventTemplate::new(7375, "content".into()).sign(&keys());
        let digest = compute_event_id(
            &event.pubkey,
            event.created_at,
            event.kind,
            &event.tags,
            &event.content,
        );
        assert_eq!(event.id, hex::encode(digest));
    }

    #[test]
    fn test_verify_rejects_mutation() {
        let mut event = EventTemplate::new(1, "original".into()).sign(&keys());
        event.content = "altered".into();
        assert!(!event.verify());
    }

    #[test]
    fn test_encrypted_event_round_trip() {
        let keys = keys();
        let event = encrypted_event(&keys, 7375, "{\"mint\":\"m\"}", vec![]).unwrap();
        assert_ne!(event.content, "{\"mint\":\"m\"}");
        assert_eq!(event.decrypt_content(&keys).unwrap(), "{\"mint\":\"m\"}");
        assert!(event.verify());
    }

    #[test]
    fn test_tag_helpers() {
        let event = EventTemplate::new(5, String::new())
            .tag(vec!["e".into(), "aa".into()])
            .tag(vec!["e".into(), "bb".into()])
            .tag(vec!["k".into(), "7375".into()])
            .sign(&keys());
        assert_eq!(event.referenced_event_ids(), vec!["aa", "bb"]);
        assert_eq!(event.tag_value("k"), Some("7375"));
        assert_eq!(event.tag_value("missing"), None);
    }

    #[test]
    fn test_filter_serialization_omits_unset() {
        let filter = Filter::new().author("ab").kind(7375).limit(10);
        let json = serde_json::to_string(&filter).unwrap();
        assert!(json.contains("authors"));
        assert!(json.contains("kinds"));
        assert!(!json.contains("since"));
        assert!(!json.contains("ids"));
    }

    #[test]
    fn test_estimate_size_tracks_content() {
        let small = EventTemplate::new(1, "x".into()).sign(&keys());
        let large = EventTemplate::new(1, "x".repeat(10_000)).sign(&keys());
        assert!(large.estimate_size() > small.estimate_size() + 9_000);
    }
}
