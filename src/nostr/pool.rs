//! Relay pool
//!
//! The wallet publishes to and fetches from a set of relays. A pool-level
//! lock strictly orders multi-relay bursts from the wallet's vantage and a
//! minimum inter-burst interval protects against relay throttling. A
//! publish succeeds with a quorum of one acknowledgement; fetches return
//! the deduplicated union of whatever the relays produced in time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::event::{Event, Filter};
use super::kind;
use super::relay::{RelayConnection, RelayError};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const RATE_LIMIT_RETRIES: u32 = 3;
const MAX_DISCOVERED_RELAYS: usize = 8;
const MAX_RELAYS: usize = 16;

/// Pool of relay connections sharing the wallet's burst ordering.
pub struct RelayPool {
    relays: Mutex<Vec<Arc<RelayConnection>>>,
    /// Serializes every multi-relay operation.
    burst_lock: Mutex<()>,
    /// Completion time of the previous burst.
    last_burst: Mutex<Option<tokio::time::Instant>>,
    min_interval: Duration,
}

impl RelayPool {
    pub fn new(urls: &[String], min_interval: Duration) -> Self {
        let relays = urls
            .iter()
            .map(|url| Arc::new(RelayConnection::new(url.clone())))
            .collect();
        Self {
            relays: Mutex::new(relays),
            burst_lock: Mutex::new(()),
            last_burst: Mutex::new(None),
            min_interval,
        }
    }

    pub async fn relay_urls(&self) -> Vec<String> {
        self.relays.lock().await.iter().map(|r| r.url.clone()).collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.relays.lock().await.is_empty()
    }

    /// Add relays not already present, capped to a sane total.
    pub async fn add_relays(&self, urls: &[String]) {
        let mut relays = self.relays.lock().await;
        for url in urls {
            let normalized = url.trim_end_matches('/');
            if relays.len() >= MAX_RELAYS {
                break;
            }
            if !relays.iter().any(|r| r.url.trim_end_matches('/') == normalized) {
                relays.push(Arc::new(RelayConnection::new(url.clone())));
            }
        }
    }

    /// Wait out the minimum interval since the previous burst.
    async fn throttle(&self) {
        let mut last = self.last_burst.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(tokio::time::Instant::now());
    }

    /// Publish an event to every relay; succeed when at least one
    /// accepts. Rate-limit rejections retry with exponential backoff and
    /// jitter.
    pub async fn publish(&self, event: &Event) -> Result<usize, RelayError> {
        let _burst = self.burst_lock.lock().await;
        self.throttle().await;

        let relays = self.relays.lock().await.clone();
        if relays.is_empty() {
            return Err(RelayError::Unreachable("No relays configured".into()));
        }

        let mut accepted = 0usize;
        let mut last_error = RelayError::Unreachable("No relays tried".into());

        for relay in &relays {
            match self.publish_with_backoff(relay, event).await {
                Ok(()) => {
                    accepted += 1;
                    log::debug!("Relay {} accepted event {}", relay.url, event.id);
                }
                Err(e) => {
                    log::warn!("Relay {} failed for event {}: {}", relay.url, event.id, e);
                    last_error = e;
                }
            }
        }

        if accepted == 0 {
            return Err(last_error);
        }
        Ok(accepted)
    }

    async fn publish_with_backoff(
        &self,
        relay: &RelayConnection,
        event: &Event,
    ) -> Result<(), RelayError> {
        let mut delay = Duration::from_millis(500);
        for attempt in 0..=RATE_LIMIT_RETRIES {
            match relay.publish(event).await {
                Err(e) if e.is_rate_limited() && attempt < RATE_LIMIT_RETRIES => {
                    let jitter = Duration::from_millis(jitter_millis(250));
                    log::debug!(
                        "Relay {} rate-limited, retrying in {:?}",
                        relay.url,
                        delay + jitter
                    );
                    tokio::time::sleep(delay + jitter).await;
                    delay *= 2;
                }
                other => return other,
            }
        }
        unreachable!("loop always returns");
    }

    /// Fetch the union of events matching the filters across all relays,
    /// deduplicated by event id. Unreachable relays are skipped.
    pub async fn fetch(&self, filters: &[Filter]) -> Vec<Event> {
        self.fetch_with_timeout(filters, DEFAULT_FETCH_TIMEOUT).await
    }

    pub async fn fetch_with_timeout(&self, filters: &[Filter], timeout: Duration) -> Vec<Event> {
        let _burst = self.burst_lock.lock().await;
        self.throttle().await;

        let relays = self.relays.lock().await.clone();
        let mut seen: HashSet<String> = HashSet::new();
        let mut events = Vec::new();

        for relay in &relays {
            match relay.fetch(filters, timeout).await {
                Ok(batch) => {
                    for event in batch {
                        if seen.insert(event.id.clone()) {
                            events.push(event);
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Fetch from {} failed: {}", relay.url, e);
                }
            }
        }

        events
    }

    /// Discover additional relays from the holder's newest kind-10019
    /// recommendation event and merge them into the pool.
    pub async fn discover_relays(&self, pubkey: &str) -> Vec<String> {
        let filter = Filter::new()
            .author(pubkey)
            .kind(kind::RELAY_LIST)
            .limit(1);
        let mut events = self.fetch(&[filter]).await;
        events.sort_by_key(|e| std::cmp::Reverse(e.created_at));

        let Some(event) = events.first() else {
            return Vec::new();
        };

        let urls: Vec<String> = event
            .tags
            .iter()
            .filter(|t| t.first().map(|n| n.as_str()) == Some("relay"))
            .filter_map(|t| t.get(1))
            .take(MAX_DISCOVERED_RELAYS)
            .cloned()
            .collect();

        if !urls.is_empty() {
            log::info!("Discovered {} relays from kind-10019", urls.len());
            self.add_relays(&urls).await;
        }
        urls
    }

    /// Disconnect every relay.
    pub async fn disconnect_all(&self) {
        let relays = self.relays.lock().await.clone();
        for relay in &relays {
            relay.disconnect().await;
        }
    }
}

/// Uniform jitter in `0..=max` milliseconds.
fn jitter_millis(max: u64) -> u64 {
    use rand::Rng;
    rand::thread_rng().gen_range(0..=max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_holds_unique_relays() {
        let pool = RelayPool::new(
            &["wss://a.example".into(), "wss://b.example".into()],
            Duration::from_millis(10),
        );
        pool.add_relays(&["wss://a.example/".into(), "wss://c.example".into()])
            .await;
        let urls = pool.relay_urls().await;
        assert_eq!(urls.len(), 3);
        assert!(urls.contains(&"wss://c.example".to_string()));
    }

    #[tokio::test]
    async fn test_publish_without_relays_fails() {
        let pool = RelayPool::new(&[], Duration::from_millis(1));
        let keys = crate::crypto::keys::WalletKeys::parse(&"22".repeat(32)).unwrap();
        let event = crate::nostr::event::EventTemplate::new(1, "x".into()).sign(&keys);
        assert!(matches!(
            pool.publish(&event).await,
            Err(RelayError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_throttle_spaces_bursts() {
        let pool = RelayPool::new(&[], Duration::from_millis(40));
        let start = tokio::time::Instant::now();
        pool.throttle().await;
        pool.throttle().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_jitter_bounded() {
        for _ in 0..32 {
            assert!(jitter_millis(250) <= 250);
        }
    }
}
