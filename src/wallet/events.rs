//! NIP-60 event handling
//!
//! Construction and publication of the wallet's encrypted event kinds:
//! token bundles (7375), spending history (7376), quote trackers (7374),
//! wallet metadata (17375) and deletion requests (5). Home of the
//! durability rollover: the replacement token event is published first,
//! and only after at least one relay acknowledged it is the deletion for
//! the consumed events issued. At no interruption point is the newest
//! proof set missing from the log.

use crate::crypto::keys::WalletKeys;
use crate::nostr::event::{encrypted_event, Event, EventTemplate};
use crate::nostr::{kind, RelayPool};

use super::error::{WalletError, WalletResult};
use super::types::{
    Direction, HistoryEntry, Proof, QuoteTrackerContent, RelayProof, TokenEventContent,
};

/// Quote trackers expire after two weeks (NIP-40 tag).
const QUOTE_TRACKER_TTL_SECS: u64 = 14 * 24 * 60 * 60;

/// Event construction and publication bound to the holder key and relay
/// pool.
pub struct EventManager<'a> {
    keys: &'a WalletKeys,
    pool: &'a RelayPool,
    max_event_bytes: usize,
}

impl<'a> EventManager<'a> {
    pub fn new(keys: &'a WalletKeys, pool: &'a RelayPool, max_event_bytes: usize) -> Self {
        Self {
            keys,
            pool,
            max_event_bytes,
        }
    }

    // ───────────────────────── Token events (7375) ─────────────────────────

    /// Build the kind-7375 events for a proof set, splitting into several
    /// bundles when a single event would exceed the relay soft limit.
    /// Every bundle carries the same `del` set.
    pub fn build_token_events(
        &self,
        proofs: &[Proof],
        mint_url: &str,
        unit: &str,
        del: &[String],
        quote_id: Option<&str>,
    ) -> WalletResult<Vec<Event>> {
        if proofs.is_empty() {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        self.build_token_events_inner(proofs, mint_url, unit, del, quote_id, &mut events)?;
        Ok(events)
    }

    fn build_token_events_inner(
        &self,
        proofs: &[Proof],
        mint_url: &str,
        unit: &str,
        del: &[String],
        quote_id: Option<&str>,
        out: &mut Vec<Event>,
    ) -> WalletResult<()> {
        let event = self.build_single_token_event(proofs, mint_url, unit, del, quote_id)?;

        // NIP-44 padding is monotone in plaintext length, so halving the
        // proof list converges on bundles under the limit.
        if event.estimate_size() > self.max_event_bytes && proofs.len() > 1 {
            let mid = proofs.len() / 2;
            self.build_token_events_inner(&proofs[..mid], mint_url, unit, del, quote_id, out)?;
            self.build_token_events_inner(&proofs[mid..], mint_url, unit, del, quote_id, out)?;
            return Ok(());
        }

        if event.estimate_size() > self.max_event_bytes {
            log::warn!(
                "Token event {} exceeds the soft limit with a single proof ({} bytes)",
                event.id,
                event.estimate_size()
            );
        }
        out.push(event);
        Ok(())
    }

    fn build_single_token_event(
        &self,
        proofs: &[Proof],
        mint_url: &str,
        unit: &str,
        del: &[String],
        quote_id: Option<&str>,
    ) -> WalletResult<Event> {
        let content = TokenEventContent {
            mint: mint_url.to_string(),
            unit: unit.to_string(),
            proofs: proofs.iter().map(RelayProof::from_proof).collect(),
            del: del.to_vec(),
        };
        let plaintext = serde_json::to_string(&content)
            .map_err(|e| WalletError::Internal(format!("Token event serialization: {}", e)))?;

        let mut tags = Vec::new();
        if let Some(quote_id) = quote_id {
            tags.push(vec!["quote".to_string(), quote_id.to_string()]);
        }

        Ok(encrypted_event(self.keys, kind::TOKEN, &plaintext, tags)?)
    }

    /// Publish prebuilt token events; all must reach at least one relay.
    async fn publish_all(&self, events: &[Event]) -> WalletResult<Vec<String>> {
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            self.pool.publish(event).await?;
            ids.push(event.id.clone());
        }
        Ok(ids)
    }

    /// Durability rollover: publish the replacement token events carrying
    /// the surviving proofs, then request deletion of the consumed event
    /// ids. Publish strictly happens-before delete; a crash in between
    /// leaves duplicates that reconstruction deduplicates.
    pub async fn rollover(
        &self,
        new_proofs: &[Proof],
        mint_url: &str,
        unit: &str,
        consumed_event_ids: &[String],
        quote_id: Option<&str>,
    ) -> WalletResult<Vec<String>> {
        let events =
            self.build_token_events(new_proofs, mint_url, unit, consumed_event_ids, quote_id)?;

        let new_ids = self.publish_all(&events).await?;

        if !consumed_event_ids.is_empty() {
            // Best effort: the `del` field already supersedes these for
            // reconstruction; kind-5 is an optimization for relays that
            // honor it.
            if let Err(e) = self.publish_deletion(consumed_event_ids, kind::TOKEN).await {
                log::debug!(
                    "Deletion for {} superseded events failed (relay may not support kind-5): {}",
                    consumed_event_ids.len(),
                    e
                );
            }
        }

        Ok(new_ids)
    }

    // ───────────────────────── Deletions (5) ─────────────────────────

    /// Publish a kind-5 deletion referencing the given event ids.
    pub async fn publish_deletion(
        &self,
        event_ids: &[String],
        deleted_kind: u32,
    ) -> WalletResult<String> {
        let mut tags: Vec<Vec<String>> = event_ids
            .iter()
            .map(|id| vec!["e".to_string(), id.clone()])
            .collect();
        tags.push(vec!["k".to_string(), deleted_kind.to_string()]);

        let event = EventTemplate::new(kind::DELETE, String::new())
            .tags(tags)
            .sign(self.keys);
        self.pool.publish(&event).await?;
        Ok(event.id)
    }

    // ───────────────────────── History (7376) ─────────────────────────

    /// Publish an encrypted spending-history entry.
    pub async fn publish_history(
        &self,
        direction: Direction,
        amount: u64,
        unit: &str,
        fee: u64,
        created: &[String],
        destroyed: &[String],
    ) -> WalletResult<String> {
        let mut content: Vec<Vec<String>> = vec![
            vec!["direction".into(), direction.as_str().into()],
            vec!["amount".into(), amount.to_string()],
            vec!["unit".into(), unit.to_string()],
            vec!["fee".into(), fee.to_string()],
        ];
        for id in created {
            content.push(vec!["e".into(), id.clone(), String::new(), "created".into()]);
        }
        for id in destroyed {
            content.push(vec!["e".into(), id.clone(), String::new(), "destroyed".into()]);
        }

        let plaintext = serde_json::to_string(&content)
            .map_err(|e| WalletError::Internal(format!("History serialization: {}", e)))?;
        let event = encrypted_event(self.keys, kind::HISTORY, &plaintext, Vec::new())?;
        self.pool.publish(&event).await?;
        Ok(event.id)
    }

    /// Decrypt a fetched kind-7376 event into a history entry.
    pub fn parse_history_event(&self, event: &Event) -> Option<HistoryEntry> {
        let plaintext = match event.decrypt_content(self.keys) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("Could not decrypt history event {}: {}", event.id, e);
                return None;
            }
        };
        let rows: Vec<Vec<String>> = serde_json::from_str(&plaintext).ok()?;

        let mut direction = None;
        let mut amount = 0u64;
        let mut unit = "sat".to_string();
        let mut fee = 0u64;
        let mut created = Vec::new();
        let mut destroyed = Vec::new();

        for row in &rows {
            match (row.first().map(|s| s.as_str()), row.get(1)) {
                (Some("direction"), Some(value)) => direction = Direction::parse(value),
                (Some("amount"), Some(value)) => amount = value.parse().unwrap_or(0),
                (Some("unit"), Some(value)) => unit = value.clone(),
                (Some("fee"), Some(value)) => fee = value.parse().unwrap_or(0),
                (Some("e"), Some(id)) => match row.get(3).map(|s| s.as_str()) {
                    Some("created") => created.push(id.clone()),
                    Some("destroyed") => destroyed.push(id.clone()),
                    _ => {}
                },
                _ => {}
            }
        }

        Some(HistoryEntry {
            event_id: event.id.clone(),
            direction: direction?,
            amount,
            unit,
            fee,
            created,
            destroyed,
            created_at: event.created_at,
        })
    }

    // ───────────────────────── Quote trackers (7374) ─────────────────────────

    /// Publish an encrypted tracker for an open mint quote so an
    /// interrupted receive can be resumed from the log.
    pub async fn publish_quote_tracker(
        &self,
        quote_id: &str,
        mint_url: &str,
        amount: u64,
        expiry: Option<u64>,
    ) -> WalletResult<String> {
        let content = QuoteTrackerContent {
            quote: quote_id.to_string(),
            mint: mint_url.to_string(),
            amount,
            expiry,
        };
        let plaintext = serde_json::to_string(&content)
            .map_err(|e| WalletError::Internal(format!("Quote tracker serialization: {}", e)))?;

        let expiration = chrono::Utc::now().timestamp() as u64 + QUOTE_TRACKER_TTL_SECS;
        let tags = vec![
            vec!["mint".to_string(), mint_url.to_string()],
            vec!["expiration".to_string(), expiration.to_string()],
        ];

        let event = encrypted_event(self.keys, kind::QUOTE, &plaintext, tags)?;
        self.pool.publish(&event).await?;
        Ok(event.id)
    }

    /// Delete a quote tracker once its quote was minted or expired.
    pub async fn delete_quote_tracker(&self, tracker_event_id: &str) {
        if let Err(e) = self
            .publish_deletion(&[tracker_event_id.to_string()], kind::QUOTE)
            .await
        {
            log::debug!("Could not delete quote tracker {}: {}", tracker_event_id, e);
        }
    }

    // ───────────────────────── Wallet metadata (17375) ─────────────────────────

    /// Publish (replace) the wallet metadata event: auxiliary P2PK
    /// privkey, mint list and unit as encrypted pairs.
    pub async fn publish_wallet_metadata(
        &self,
        privkey_hex: &str,
        mint_urls: &[String],
        unit: &str,
    ) -> WalletResult<String> {
        let mut rows: Vec<Vec<String>> = vec![vec!["privkey".into(), privkey_hex.to_string()]];
        for mint in mint_urls {
            rows.push(vec!["mint".into(), mint.clone()]);
        }
        rows.push(vec!["unit".into(), unit.to_string()]);

        let plaintext = serde_json::to_string(&rows)
            .map_err(|e| WalletError::Internal(format!("Metadata serialization: {}", e)))?;
        let event = encrypted_event(self.keys, kind::WALLET, &plaintext, Vec::new())?;
        self.pool.publish(&event).await?;
        Ok(event.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fixture() -> (WalletKeys, RelayPool) {
        (
            WalletKeys::parse(&"42".repeat(32)).unwrap(),
            RelayPool::new(&[], Duration::from_millis(1)),
        )
    }

    fn proof(amount: u64, tag: u32) -> Proof {
        Proof {
            id: "00ad268c4d1f5826".into(),
            amount,
            secret: hex::encode([tag as u8; 32]),
            c: format!("02{}", "ab".repeat(32)),
            mint: "https://mint.example".into(),
            unit: "sat".into(),
        }
    }

    #[test]
    fn test_token_event_round_trips_through_encryption() {
        let (keys, pool) = fixture();
        let manager = EventManager::new(&keys, &pool, 60_000);
        let proofs = vec![proof(1, 1), proof(8, 2)];

        let events = manager
            .build_token_events(&proofs, "https://mint.example", "sat", &["old".into()], None)
            .unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, 7375);
        assert!(event.verify());

        let plaintext = event.decrypt_content(&keys).unwrap();
        let content: TokenEventContent = serde_json::from_str(&plaintext).unwrap();
        assert_eq!(content.mint, "https://mint.example");
        assert_eq!(content.del, vec!["old"]);
        assert_eq!(content.proofs.len(), 2);
        assert_eq!(content.proofs[1].secret_hex(), proofs[1].secret);
    }

    #[test]
    fn test_token_event_quote_tag() {
        let (keys, pool) = fixture();
        let manager = EventManager::new(&keys, &pool, 60_000);
        let events = manager
            .build_token_events(&[proof(4, 9)], "https://m", "sat", &[], Some("q-123"))
            .unwrap();
        assert_eq!(events[0].tag_value("quote"), Some("q-123"));
    }

    #[test]
    fn test_oversized_bundle_splits_sharing_del_set() {
        let (keys, pool) = fixture();
        // Tiny limit forces chunking.
        let manager = EventManager::new(&keys, &pool, 2_000);
        let proofs: Vec<Proof> = (0..24).map(|i| proof(1, i)).collect();

        let events = manager
            .build_token_events(&proofs, "https://m", "sat", &["superseded".into()], None)
            .unwrap();
        assert!(events.len() > 1, "expected bundle split");

        let mut recovered = 0;
        for event in &events {
            assert!(event.estimate_size() <= 2_000 || events.len() == 1);
            let content: TokenEventContent =
                serde_json::from_str(&event.decrypt_content(&keys).unwrap()).unwrap();
            assert_eq!(content.del, vec!["superseded"]);
            recovered += content.proofs.len();
        }
        assert_eq!(recovered, 24);
    }

    #[test]
    fn test_empty_proofs_build_no_events() {
        let (keys, pool) = fixture();
        let manager = EventManager::new(&keys, &pool, 60_000);
        assert!(manager
            .build_token_events(&[], "https://m", "sat", &[], None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_history_round_trip() {
        let (keys, pool) = fixture();
        let manager = EventManager::new(&keys, &pool, 60_000);

        // Build the event directly (publishing needs relays).
        let content = vec![
            vec!["direction".to_string(), "out".to_string()],
            vec!["amount".to_string(), "100".to_string()],
            vec!["unit".to_string(), "sat".to_string()],
            vec!["fee".to_string(), "2".to_string()],
            vec!["e".to_string(), "new1".to_string(), String::new(), "created".to_string()],
            vec!["e".to_string(), "old1".to_string(), String::new(), "destroyed".to_string()],
        ];
        let plaintext = serde_json::to_string(&content).unwrap();
        let event = encrypted_event(&keys, kind::HISTORY, &plaintext, Vec::new()).unwrap();

        let entry = manager.parse_history_event(&event).unwrap();
        assert_eq!(entry.direction, Direction::Out);
        assert_eq!(entry.amount, 100);
        assert_eq!(entry.fee, 2);
        assert_eq!(entry.created, vec!["new1"]);
        assert_eq!(entry.destroyed, vec!["old1"]);
    }

    #[test]
    fn test_history_parse_rejects_foreign_ciphertext() {
        let (keys, pool) = fixture();
        let manager = EventManager::new(&keys, &pool, 60_000);
        let other = WalletKeys::parse(&"55".repeat(32)).unwrap();
        let event = encrypted_event(&other, kind::HISTORY, "[]", Vec::new()).unwrap();
        assert!(manager.parse_history_event(&event).is_none());
    }
}
