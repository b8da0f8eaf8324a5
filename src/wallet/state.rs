//! State reconstruction and caches
//!
//! The wallet has no local database: its proof set is folded on demand
//! from the holder's relay events. The fold is deterministic in the event
//! *set* (fetch order does not matter), honors kind-5 deletions and the
//! `del` supersession field, and deduplicates proofs by fingerprint
//! preferring the newer claim. A spent-proof cache in front of
//! `/v1/checkstate` keeps validation cheap.

use std::collections::{HashMap, HashSet};

use crate::crypto::keys::WalletKeys;
use crate::mint::types::{KeysetInfo, ProofSpentState};
use crate::nostr::event::Event;
use crate::nostr::kind;

use super::types::{Proof, TokenEventContent, WalletState};

/// Decrypted wallet metadata (kind 17375).
#[derive(Debug, Clone, Default)]
pub struct WalletMetadata {
    /// Auxiliary P2PK private key (hex) for nutzap unwrapping.
    pub privkey: Option<String>,
    pub mint_urls: Vec<String>,
    pub unit: Option<String>,
}

/// Result of folding the event history.
#[derive(Debug, Clone, Default)]
pub struct FoldedState {
    pub proofs: Vec<Proof>,
    /// proof fingerprint -> owning live token event id.
    pub proof_to_event: HashMap<String, String>,
    /// Newest wallet metadata, if any event decrypted.
    pub metadata: Option<WalletMetadata>,
}

impl FoldedState {
    pub fn into_wallet_state(self) -> WalletState {
        WalletState {
            proofs: self.proofs,
            proof_to_event: self.proof_to_event,
            events_needing_rollover: Vec::new(),
        }
    }
}

/// Fold fetched events into the current proof set.
///
/// Procedure per NIP-60:
/// 1. collect ids referenced by the holder's kind-5 events;
/// 2. walk token events newest first (ties broken by lexicographically
///    greater id), accumulating each live event's `del` references into
///    the dead set;
/// 3. emit each surviving event's proofs tagged with the owning event id,
///    deduplicating by `(secret, C)` — the newest-first walk makes the
///    newer claim win.
pub fn fold_wallet_events(keys: &WalletKeys, events: &[Event]) -> FoldedState {
    let holder = keys.public_key_hex();

    let mut deleted: HashSet<String> = HashSet::new();
    for event in events {
        if event.kind == kind::DELETE && event.pubkey == holder {
            deleted.extend(event.referenced_event_ids());
        }
    }

    // Newest metadata wins.
    let metadata = events
        .iter()
        .filter(|e| e.kind == kind::WALLET && e.pubkey == holder)
        .max_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        })
        .and_then(|event| parse_metadata(keys, event));

    let mut token_events: Vec<&Event> = events
        .iter()
        .filter(|e| e.kind == kind::TOKEN && e.pubkey == holder)
        .collect();
    // Newest first; tie on created_at prefers the lexicographically
    // greater id, making the fold order-independent.
    token_events.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });

    let mut proofs: Vec<Proof> = Vec::new();
    let mut proof_to_event: HashMap<String, String> = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();

    for event in token_events {
        if deleted.contains(&event.id) {
            continue;
        }

        let plaintext = match event.decrypt_content(keys) {
            Ok(p) => p,
            Err(e) => {
                // Likely an event from an old key or corrupted; skip.
                log::warn!("Could not decrypt token event {}: {}", event.id, e);
                continue;
            }
        };
        let content: TokenEventContent = match serde_json::from_str(&plaintext) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Malformed token event {}: {}", event.id, e);
                continue;
            }
        };

        // A live event supersedes everything in its del field.
        for old_id in &content.del {
            deleted.insert(old_id.clone());
        }
        if deleted.contains(&event.id) {
            continue;
        }

        for relay_proof in &content.proofs {
            let proof = relay_proof.into_proof(&content.mint, &content.unit);
            let fingerprint = proof.fingerprint();
            if !seen.insert(fingerprint.clone()) {
                continue;
            }
            proof_to_event.insert(fingerprint, event.id.clone());
            proofs.push(proof);
        }
    }

    FoldedState {
        proofs,
        proof_to_event,
        metadata,
    }
}

fn parse_metadata(keys: &WalletKeys, event: &Event) -> Option<WalletMetadata> {
    let plaintext = match event.decrypt_content(keys) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Could not decrypt wallet metadata {}: {}", event.id, e);
            return None;
        }
    };
    let rows: Vec<Vec<String>> = serde_json::from_str(&plaintext).ok()?;

    let mut metadata = WalletMetadata::default();
    for row in rows {
        match (row.first().map(|s| s.as_str()), row.get(1)) {
            (Some("privkey"), Some(value)) => metadata.privkey = Some(value.clone()),
            (Some("mint"), Some(value)) => {
                if !metadata.mint_urls.contains(value) {
                    metadata.mint_urls.push(value.clone());
                }
            }
            (Some("unit"), Some(value)) => metadata.unit = Some(value.clone()),
            _ => {}
        }
    }
    Some(metadata)
}

// =============================================================================
// Spent-proof cache
// =============================================================================

/// UNKNOWN/PENDING results expire faster than UNSPENT because the mint
/// may not yet have recorded a pending use.
const UNKNOWN_TTL_SECS: u64 = 300;

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    state: ProofSpentState,
    cached_at: u64,
}

/// Cache of mint-reported proof states, keyed by fingerprint
/// (`secret:C`).
#[derive(Debug)]
pub struct ProofStateCache {
    entries: HashMap<String, CacheEntry>,
    /// TTL for UNSPENT entries.
    unspent_ttl_secs: u64,
}

impl ProofStateCache {
    pub fn new(unspent_ttl_secs: u64) -> Self {
        Self {
            entries: HashMap::new(),
            unspent_ttl_secs,
        }
    }

    pub fn record(&mut self, fingerprint: &str, state: ProofSpentState) {
        self.entries.insert(
            fingerprint.to_string(),
            CacheEntry {
                state,
                cached_at: now_secs(),
            },
        );
    }

    /// Cached state, honoring per-state TTLs. SPENT never expires.
    pub fn lookup(&self, fingerprint: &str) -> Option<ProofSpentState> {
        let entry = self.entries.get(fingerprint)?;
        match entry.state {
            ProofSpentState::Spent => Some(ProofSpentState::Spent),
            ProofSpentState::Unspent => {
                (now_secs().saturating_sub(entry.cached_at) < self.unspent_ttl_secs)
                    .then_some(ProofSpentState::Unspent)
            }
            ProofSpentState::Pending => {
                (now_secs().saturating_sub(entry.cached_at) < UNKNOWN_TTL_SECS)
                    .then_some(ProofSpentState::Pending)
            }
        }
    }

    /// Split proofs into (known valid, known dead-or-pending, needs
    /// checkstate).
    pub fn partition<'a>(
        &self,
        proofs: &'a [Proof],
    ) -> (Vec<&'a Proof>, Vec<&'a Proof>, Vec<&'a Proof>) {
        let mut valid = Vec::new();
        let mut dead = Vec::new();
        let mut unknown = Vec::new();
        for proof in proofs {
            match self.lookup(&proof.fingerprint()) {
                Some(ProofSpentState::Unspent) => valid.push(proof),
                Some(ProofSpentState::Spent) | Some(ProofSpentState::Pending) => dead.push(proof),
                None => unknown.push(proof),
            }
        }
        (valid, dead, unknown)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    fn backdate(&mut self, fingerprint: &str, seconds: u64) {
        if let Some(entry) = self.entries.get_mut(fingerprint) {
            entry.cached_at = entry.cached_at.saturating_sub(seconds);
        }
    }
}

// =============================================================================
// Keyset cache
// =============================================================================

/// Per-mint cache of keyset metadata and key tables.
#[derive(Debug, Default)]
pub struct KeysetCache {
    /// mint url -> (keysets, cached_at).
    keysets: HashMap<String, (Vec<KeysetInfo>, u64)>,
    /// (mint url, keyset id) -> (amount -> pubkey, cached_at).
    keys: HashMap<(String, String), (HashMap<u64, String>, u64)>,
    ttl_secs: u64,
}

impl KeysetCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            keysets: HashMap::new(),
            keys: HashMap::new(),
            ttl_secs,
        }
    }

    pub fn get_keysets(&self, mint_url: &str) -> Option<&Vec<KeysetInfo>> {
        self.keysets
            .get(mint_url)
            .filter(|(_, at)| now_secs().saturating_sub(*at) < self.ttl_secs)
            .map(|(keysets, _)| keysets)
    }

    pub fn put_keysets(&mut self, mint_url: &str, keysets: Vec<KeysetInfo>) {
        self.keysets
            .insert(mint_url.to_string(), (keysets, now_secs()));
    }

    pub fn get_keys(&self, mint_url: &str, keyset_id: &str) -> Option<&HashMap<u64, String>> {
        self.keys
            .get(&(mint_url.to_string(), keyset_id.to_string()))
            .filter(|(_, at)| now_secs().saturating_sub(*at) < self.ttl_secs)
            .map(|(keys, _)| keys)
    }

    pub fn put_keys(&mut self, mint_url: &str, keyset_id: &str, keys: HashMap<u64, String>) {
        self.keys.insert(
            (mint_url.to_string(), keyset_id.to_string()),
            (keys, now_secs()),
        );
    }

    /// Fee rates (`input_fee_ppk`) per keyset id for a mint, from cache.
    pub fn fee_rates(&self, mint_url: &str) -> HashMap<String, u64> {
        self.get_keysets(mint_url)
            .map(|keysets| {
                keysets
                    .iter()
                    .map(|ks| (ks.id.clone(), ks.input_fee_ppk))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nostr::event::{encrypted_event, EventTemplate};
    use crate::wallet::types::RelayProof;

    fn keys() -> WalletKeys {
        WalletKeys::parse(&"66".repeat(32)).unwrap()
    }

    fn proof(amount: u64, tag: u8) -> Proof {
        Proof {
            id: "00ad268c4d1f5826".into(),
            amount,
            secret: hex::encode([tag; 32]),
            c: format!("02{}", "ef".repeat(32)),
            mint: "https://mint.a".into(),
            unit: "sat".into(),
        }
    }

    fn token_event(
        keys: &WalletKeys,
        proofs: &[Proof],
        del: &[&str],
        created_at: u64,
    ) -> Event {
        let content = TokenEventContent {
            mint: "https://mint.a".into(),
            unit: "sat".into(),
            proofs: proofs.iter().map(RelayProof::from_proof).collect(),
            del: del.iter().map(|s| s.to_string()).collect(),
        };
        let plaintext = serde_json::to_string(&content).unwrap();
        let ciphertext = crate::crypto::nip44::encrypt(
            &plaintext,
            keys.secret_key(),
            &keys.compressed_public_key(),
        )
        .unwrap();
        EventTemplate {
            kind: kind::TOKEN,
            tags: Vec::new(),
            content: ciphertext,
            created_at: Some(created_at),
        }
        .sign(keys)
    }

    #[test]
    fn test_fold_basic_balance() {
        let keys = keys();
        let events = vec![
            token_event(&keys, &[proof(1, 1), proof(2, 2)], &[], 100),
            token_event(&keys, &[proof(4, 3)], &[], 200),
        ];
        let folded = fold_wallet_events(&keys, &events);
        let state = folded.into_wallet_state();
        assert_eq!(state.balance(), 7);
        assert_eq!(state.proofs.len(), 3);
    }

    #[test]
    fn test_fold_order_independent() {
        let keys = keys();
        let e1 = token_event(&keys, &[proof(1, 1)], &[], 100);
        let e2 = token_event(&keys, &[proof(2, 2)], &[&e1.id], 200);
        let e3 = {
            let mut tags = vec![vec!["e".to_string(), e1.id.clone()]];
            tags.push(vec!["k".to_string(), "7375".to_string()]);
            EventTemplate {
                kind: kind::DELETE,
                tags,
                content: String::new(),
                created_at: Some(300),
            }
            .sign(&keys)
        };

        let forward = fold_wallet_events(&keys, &[e1.clone(), e2.clone(), e3.clone()]);
        let backward = fold_wallet_events(&keys, &[e3, e2, e1]);

        assert_eq!(forward.proofs.len(), backward.proofs.len());
        assert_eq!(
            forward.into_wallet_state().balance(),
            backward.into_wallet_state().balance()
        );
    }

    #[test]
    fn test_fold_del_field_supersedes_without_kind5() {
        let keys = keys();
        let old = token_event(&keys, &[proof(1, 1), proof(2, 2)], &[], 100);
        // Replacement keeps proof 2 only; no kind-5 was ever published.
        let replacement = token_event(&keys, &[proof(2, 2)], &[&old.id], 200);

        let folded = fold_wallet_events(&keys, &[old, replacement.clone()]);
        assert_eq!(folded.proofs.len(), 1);
        assert_eq!(folded.proofs[0].amount, 2);
        assert_eq!(
            folded.proof_to_event[&folded.proofs[0].fingerprint()],
            replacement.id
        );
    }

    #[test]
    fn test_fold_duplicate_proof_prefers_newer_event() {
        let keys = keys();
        // Crash between publish-new and delete-old: both events carry
        // proof 2.
        let shared = proof(2, 2);
        let old = token_event(&keys, &[shared.clone(), proof(1, 1)], &[], 100);
        let newer = token_event(&keys, &[shared.clone()], &[], 200);

        let folded = fold_wallet_events(&keys, &[old.clone(), newer.clone()]);
        // Proof 2 exists once, owned by the newer event; proof 1
        // survives from the old event.
        assert_eq!(folded.proofs.len(), 2);
        assert_eq!(folded.proof_to_event[&shared.fingerprint()], newer.id);
    }

    #[test]
    fn test_fold_ignores_foreign_events() {
        let keys = keys();
        let stranger = WalletKeys::parse(&"77".repeat(32)).unwrap();
        let foreign = token_event(&stranger, &[proof(64, 9)], &[], 100);
        let folded = fold_wallet_events(&keys, &[foreign]);
        assert!(folded.proofs.is_empty());
    }

    #[test]
    fn test_fold_reads_metadata() {
        let keys = keys();
        let rows = vec![
            vec!["privkey".to_string(), "aa".repeat(32)],
            vec!["mint".to_string(), "https://mint.a".to_string()],
            vec!["mint".to_string(), "https://mint.b".to_string()],
            vec!["mint".to_string(), "https://mint.a".to_string()],
            vec!["unit".to_string(), "sat".to_string()],
        ];
        let event = encrypted_event(
            &keys,
            kind::WALLET,
            &serde_json::to_string(&rows).unwrap(),
            Vec::new(),
        )
        .unwrap();
        let folded = fold_wallet_events(&keys, &[event]);
        let metadata = folded.metadata.unwrap();
        assert_eq!(metadata.mint_urls.len(), 2);
        assert_eq!(metadata.unit.as_deref(), Some("sat"));
        assert!(metadata.privkey.is_some());
    }

    #[test]
    fn test_cache_spent_never_expires() {
        let mut cache = ProofStateCache::new(1);
        cache.record("fp", ProofSpentState::Spent);
        cache.backdate("fp", 1_000_000);
        assert_eq!(cache.lookup("fp"), Some(ProofSpentState::Spent));
    }

    #[test]
    fn test_cache_unspent_expires() {
        let mut cache = ProofStateCache::new(300);
        cache.record("fp", ProofSpentState::Unspent);
        assert_eq!(cache.lookup("fp"), Some(ProofSpentState::Unspent));
        cache.backdate("fp", 301);
        assert_eq!(cache.lookup("fp"), None);
    }

    #[test]
    fn test_cache_partition() {
        let mut cache = ProofStateCache::new(300);
        let p1 = proof(1, 1);
        let p2 = proof(2, 2);
        let p3 = proof(4, 3);
        cache.record(&p1.fingerprint(), ProofSpentState::Unspent);
        cache.record(&p2.fingerprint(), ProofSpentState::Spent);

        let all = vec![p1.clone(), p2.clone(), p3.clone()];
        let (valid, dead, unknown) = cache.partition(&all);
        assert_eq!(valid.len(), 1);
        assert_eq!(dead.len(), 1);
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].fingerprint(), p3.fingerprint());
    }

    #[test]
    fn test_keyset_cache_ttl() {
        let mut cache = KeysetCache::new(300);
        cache.put_keysets(
            "https://mint.a",
            vec![KeysetInfo {
                id: "00aa".into(),
                unit: "sat".into(),
                active: true,
                input_fee_ppk: 100,
            }],
        );
        assert!(cache.get_keysets("https://mint.a").is_some());
        assert_eq!(cache.fee_rates("https://mint.a")["00aa"], 100);
        assert!(cache.get_keysets("https://mint.b").is_none());
    }
}
