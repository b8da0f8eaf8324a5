//! Stateless NIP-60 ecash wallet
//!
//! The wallet's only durable input is the holder's signing key; balance
//! and proofs are reconstructed from the relay set on demand. Every
//! state-changing operation runs under one engine mutex (preventing
//! concurrent double-selection of the same proof) and commits through the
//! durability rollover in [`events`].

pub mod denominations;
pub mod error;
pub mod events;
pub mod fees;
pub mod melt;
pub mod outputs;
pub mod receive;
pub mod redeem;
pub mod send;
pub mod state;
pub mod swap;
pub mod token;
pub mod transfer;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::crypto;
use crate::crypto::keys::WalletKeys;
use crate::mint::types::{KeysetInfo, ProofSpentState};
use crate::mint::MintClient;
use crate::nostr::event::Filter;
use crate::nostr::{kind, RelayPool};

use error::{WalletError, WalletResult};
use events::EventManager;
use state::{fold_wallet_events, KeysetCache, ProofStateCache};
use types::{HistoryEntry, Proof, WalletState};

/// Wallet configuration.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Ordered mint URLs; the first is the primary and the default
    /// target of cross-mint swaps.
    pub mint_urls: Vec<String>,
    /// Relay set used for both publish and fetch; auto-augmented by
    /// kind-10019 discovery.
    pub relay_urls: Vec<String>,
    /// Amount semantics for the wallet.
    pub unit: String,
    /// Spent-proof cache TTL in seconds.
    pub cache_ttl_seconds: u64,
    /// Token-event split threshold in bytes.
    pub max_event_bytes: usize,
    /// Minimum interval between multi-relay bursts.
    pub rate_limit_seconds: f64,
    /// Fetch existing state on construction.
    pub auto_init: bool,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            mint_urls: Vec::new(),
            relay_urls: Vec::new(),
            unit: "sat".to_string(),
            cache_ttl_seconds: 300,
            max_event_bytes: 60_000,
            rate_limit_seconds: 1.0,
            auto_init: true,
        }
    }
}

/// Normalize a mint URL: default scheme, strip trailing slashes,
/// lowercase the host.
pub fn normalize_mint_url(url: &str) -> String {
    let mut normalized = url.trim().to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }
    if !normalized.starts_with("http://") && !normalized.starts_with("https://") {
        normalized = format!("https://{}", normalized);
    }
    if let Ok(parsed) = url::Url::parse(&normalized) {
        if let Some(host) = parsed.host_str() {
            let lowered = host.to_lowercase();
            normalized = normalized.replacen(host, &lowered, 1);
        }
    }
    normalized
}

/// The wallet engine.
pub struct Wallet {
    pub(crate) keys: WalletKeys,
    pub(crate) config: WalletConfig,
    pub(crate) pool: RelayPool,
    /// Trusted mints; replaced when the metadata event disagrees.
    pub(crate) mint_urls: Mutex<Vec<String>>,
    pub(crate) mints: Mutex<HashMap<String, MintClient>>,
    /// Quote ids already minted, consulted before any `/v1/mint/bolt11`
    /// call to make confirmation idempotent.
    pub(crate) minted_quotes: Mutex<HashSet<String>>,
    pub(crate) proof_cache: Mutex<ProofStateCache>,
    pub(crate) keyset_cache: Mutex<KeysetCache>,
    /// Engine mutex: serializes proof-selection -> swap -> rollover
    /// windows.
    pub(crate) op_lock: Mutex<()>,
    /// Auxiliary P2PK key from the metadata event.
    pub(crate) wallet_privkey: Mutex<Option<String>>,
}

impl Wallet {
    /// Build a wallet without touching the network.
    pub fn new(keys: WalletKeys, mut config: WalletConfig) -> Self {
        config.mint_urls = config
            .mint_urls
            .iter()
            .map(|u| normalize_mint_url(u))
            .collect();
        let pool = RelayPool::new(
            &config.relay_urls,
            Duration::from_secs_f64(config.rate_limit_seconds.max(0.0)),
        );
        let mint_urls = config.mint_urls.clone();
        let cache_ttl = config.cache_ttl_seconds;
        Self {
            keys,
            config,
            pool,
            mint_urls: Mutex::new(mint_urls),
            mints: Mutex::new(HashMap::new()),
            minted_quotes: Mutex::new(HashSet::new()),
            proof_cache: Mutex::new(ProofStateCache::new(cache_ttl)),
            keyset_cache: Mutex::new(KeysetCache::new(cache_ttl)),
            op_lock: Mutex::new(()),
            wallet_privkey: Mutex::new(None),
        }
    }

    /// Build and initialize: discover relays when none were configured
    /// and, with `auto_init`, pull existing state from the log.
    pub async fn connect(keys: WalletKeys, config: WalletConfig) -> WalletResult<Self> {
        if !crate::mint::types::is_supported_unit(&config.unit) {
            return Err(WalletError::DisallowedUnit {
                unit: config.unit.clone(),
            });
        }
        let auto_init = config.auto_init;
        let wallet = Self::new(keys, config);

        if !wallet.pool.is_empty().await {
            wallet
                .pool
                .discover_relays(&wallet.keys.public_key_hex())
                .await;
        }

        if auto_init {
            // Missing state is fine for a fresh key; only transport
            // errors are worth a warning.
            if let Err(e) = wallet.fetch_state(false).await {
                log::warn!("Initial state fetch failed: {}", e);
            }
        }

        Ok(wallet)
    }

    pub fn public_key(&self) -> String {
        self.keys.public_key_hex()
    }

    pub fn unit(&self) -> &str {
        &self.config.unit
    }

    pub(crate) fn event_manager(&self) -> EventManager<'_> {
        EventManager::new(&self.keys, &self.pool, self.config.max_event_bytes)
    }

    /// The primary mint (first configured).
    pub async fn primary_mint_url(&self) -> WalletResult<String> {
        self.mint_urls
            .lock()
            .await
            .first()
            .cloned()
            .ok_or_else(|| WalletError::Internal("No mint URLs configured".into()))
    }

    pub async fn trusted_mints(&self) -> Vec<String> {
        self.mint_urls.lock().await.clone()
    }

    pub(crate) async fn is_trusted_mint(&self, mint_url: &str) -> bool {
        let normalized = normalize_mint_url(mint_url);
        self.mint_urls
            .lock()
            .await
            .iter()
            .any(|m| *m == normalized)
    }

    /// Get or create the HTTP client for a mint.
    pub(crate) async fn mint_client(&self, mint_url: &str) -> MintClient {
        let normalized = normalize_mint_url(mint_url);
        let mut mints = self.mints.lock().await;
        mints
            .entry(normalized.clone())
            .or_insert_with(|| MintClient::new(&normalized))
            .clone()
    }

    // ───────────────────────── Keyset plumbing ─────────────────────────

    /// Keyset metadata for a mint, cached.
    pub(crate) async fn keysets(&self, mint_url: &str) -> WalletResult<Vec<KeysetInfo>> {
        if let Some(cached) = self.keyset_cache.lock().await.get_keysets(mint_url) {
            return Ok(cached.clone());
        }
        let client = self.mint_client(mint_url).await;
        let keysets = client.get_keysets().await?;
        self.keyset_cache
            .lock()
            .await
            .put_keysets(mint_url, keysets.clone());
        Ok(keysets)
    }

    /// Fee rates per keyset id for a mint.
    pub(crate) async fn fee_rates(&self, mint_url: &str) -> WalletResult<HashMap<String, u64>> {
        Ok(self
            .keysets(mint_url)
            .await?
            .iter()
            .map(|ks| (ks.id.clone(), ks.input_fee_ppk))
            .collect())
    }

    /// The active keyset for the wallet's unit plus its key table.
    pub(crate) async fn active_keyset(
        &self,
        mint_url: &str,
    ) -> WalletResult<(KeysetInfo, HashMap<u64, String>)> {
        let keysets = self.keysets(mint_url).await?;
        let keyset = keysets
            .iter()
            .find(|ks| ks.active && ks.unit == self.config.unit)
            .cloned()
            .ok_or_else(|| WalletError::DisallowedUnit {
                unit: self.config.unit.clone(),
            })?;
        let keys = self.keyset_keys(mint_url, &keyset.id).await?;
        Ok((keyset, keys))
    }

    /// Key table for one keyset, cached; the derived id is checked
    /// against the mint's claim.
    pub(crate) async fn keyset_keys(
        &self,
        mint_url: &str,
        keyset_id: &str,
    ) -> WalletResult<HashMap<u64, String>> {
        if let Some(cached) = self.keyset_cache.lock().await.get_keys(mint_url, keyset_id) {
            return Ok(cached.clone());
        }
        let client = self.mint_client(mint_url).await;
        let keyset = client.get_keyset_keys(keyset_id).await?;
        let keys = keyset.amount_keys();
        if !crypto::validate_keyset_id(keyset_id, &keys) {
            log::warn!(
                "Keyset id {} does not match its key table on {}",
                keyset_id,
                mint_url
            );
        }
        self.keyset_cache
            .lock()
            .await
            .put_keys(mint_url, keyset_id, keys.clone());
        Ok(keys)
    }

    // ───────────────────────── State reconstruction ─────────────────────────

    /// Fetch the holder's wallet events from the relay union and fold
    /// them into the current state. With `check_proofs`, each proof's
    /// spent-state is validated against its mint through the cache;
    /// proofs the mint reports SPENT are dropped and their events marked
    /// for rollover.
    pub async fn fetch_state(&self, check_proofs: bool) -> WalletResult<WalletState> {
        let pubkey = self.keys.public_key_hex();
        let filter = Filter::new()
            .author(&pubkey)
            .kinds(&[kind::WALLET, kind::TOKEN, kind::DELETE]);
        let events = self.pool.fetch(&[filter]).await;

        let folded = fold_wallet_events(&self.keys, &events);

        // The metadata event's mint list is the source of truth.
        if let Some(metadata) = &folded.metadata {
            if !metadata.mint_urls.is_empty() {
                let normalized: Vec<String> = metadata
                    .mint_urls
                    .iter()
                    .map(|u| normalize_mint_url(u))
                    .collect();
                let mut mint_urls = self.mint_urls.lock().await;
                if *mint_urls != normalized {
                    log::info!(
                        "Adopting {} mint(s) from wallet metadata event",
                        normalized.len()
                    );
                    *mint_urls = normalized;
                }
            }
            if let Some(privkey) = &metadata.privkey {
                *self.wallet_privkey.lock().await = Some(privkey.clone());
            }
        }

        let mut state = folded.into_wallet_state();
        if check_proofs && !state.proofs.is_empty() {
            self.validate_state(&mut state).await;
        }
        Ok(state)
    }

    /// Validate proofs with their mints, dropping dead ones from the
    /// state and recording which events need a replacement.
    async fn validate_state(&self, state: &mut WalletState) {
        let proofs = std::mem::take(&mut state.proofs);
        let (valid, dropped) = self.validate_proofs(proofs).await;

        let mut rollover: HashSet<String> = HashSet::new();
        for fingerprint in &dropped {
            if let Some(event_id) = state.proof_to_event.get(fingerprint) {
                rollover.insert(event_id.clone());
            }
            state.proof_to_event.remove(fingerprint);
        }

        if !dropped.is_empty() {
            log::info!(
                "Dropped {} spent/pending proof(s) from reconstructed state",
                dropped.len()
            );
        }

        state.proofs = valid;
        state.events_needing_rollover = rollover.into_iter().collect();
    }

    /// Check proofs against their mints through the spent-proof cache.
    /// Returns (valid proofs, fingerprints of dropped proofs). Mint
    /// check failures fail open: unknown proofs stay valid but are not
    /// cached.
    pub(crate) async fn validate_proofs(
        &self,
        proofs: Vec<Proof>,
    ) -> (Vec<Proof>, Vec<String>) {
        let mut valid = Vec::new();
        let mut dropped = Vec::new();
        let mut to_check: Vec<Proof> = Vec::new();

        {
            let cache = self.proof_cache.lock().await;
            for proof in proofs {
                match cache.lookup(&proof.fingerprint()) {
                    Some(ProofSpentState::Unspent) => valid.push(proof),
                    Some(ProofSpentState::Spent) | Some(ProofSpentState::Pending) => {
                        dropped.push(proof.fingerprint())
                    }
                    None => to_check.push(proof),
                }
            }
        }

        // Group unknown proofs per mint; checkstate is batched per mint.
        let mut by_mint: HashMap<String, Vec<Proof>> = HashMap::new();
        for proof in to_check {
            by_mint.entry(proof.mint.clone()).or_default().push(proof);
        }

        for (mint_url, mint_proofs) in by_mint {
            let ys: Result<Vec<String>, _> = mint_proofs
                .iter()
                .map(|p| crypto::proof_y_value(&p.secret))
                .collect();
            let ys = match ys {
                Ok(ys) => ys,
                Err(e) => {
                    log::error!("Could not derive y-values for {}: {}", mint_url, e);
                    valid.extend(mint_proofs);
                    continue;
                }
            };

            let client = self.mint_client(&mint_url).await;
            match client.check_state(ys).await {
                Ok(response) => {
                    let mut cache = self.proof_cache.lock().await;
                    for (index, proof) in mint_proofs.into_iter().enumerate() {
                        let state = response
                            .states
                            .get(index)
                            .map(|entry| entry.state)
                            .unwrap_or(ProofSpentState::Unspent);
                        cache.record(&proof.fingerprint(), state);
                        match state {
                            ProofSpentState::Unspent => valid.push(proof),
                            ProofSpentState::Spent | ProofSpentState::Pending => {
                                dropped.push(proof.fingerprint())
                            }
                        }
                    }
                }
                Err(e) => {
                    // Fail open: a mint outage must not hide the balance.
                    log::warn!("checkstate against {} failed: {}", mint_url, e);
                    valid.extend(mint_proofs);
                }
            }
        }

        (valid, dropped)
    }

    // ───────────────────────── Balance views ─────────────────────────

    /// Current balance in the wallet's unit, validated against the
    /// mints.
    pub async fn balance(&self) -> WalletResult<u64> {
        let state = self.fetch_state(true).await?;
        Ok(state.balance_for_unit(&self.config.unit))
    }

    /// Balance per mint URL.
    pub async fn balance_by_mint(&self) -> WalletResult<HashMap<String, u64>> {
        let state = self.fetch_state(true).await?;
        Ok(state.balance_by_mint())
    }

    /// Number of live proofs per mint.
    pub async fn proof_count_by_mint(&self) -> WalletResult<HashMap<String, usize>> {
        let state = self.fetch_state(false).await?;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for proof in &state.proofs {
            *counts.entry(proof.mint.clone()).or_default() += 1;
        }
        Ok(counts)
    }

    // ───────────────────────── History ─────────────────────────

    /// Fetch and decrypt the wallet's spending history, newest first.
    pub async fn history(&self) -> WalletResult<Vec<HistoryEntry>> {
        let filter = Filter::new()
            .author(&self.keys.public_key_hex())
            .kind(kind::HISTORY);
        let events = self.pool.fetch(&[filter]).await;

        let manager = self.event_manager();
        let mut entries: Vec<HistoryEntry> = events
            .iter()
            .filter_map(|event| manager.parse_history_event(event))
            .collect();
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.created_at));
        Ok(entries)
    }

    // ───────────────────────── Initialization ─────────────────────────

    /// Publish the replaceable wallet metadata event. Generates the
    /// auxiliary P2PK privkey on first use.
    pub async fn initialize_wallet(&self) -> WalletResult<String> {
        let privkey = {
            let mut stored = self.wallet_privkey.lock().await;
            stored
                .get_or_insert_with(crate::crypto::keys::generate_privkey_hex)
                .clone()
        };
        let mint_urls = self.mint_urls.lock().await.clone();
        self.event_manager()
            .publish_wallet_metadata(&privkey, &mint_urls, &self.config.unit)
            .await
    }

    /// Republish events that reconstruction flagged as carrying dead
    /// proofs, minus the dead weight. Called opportunistically by the
    /// engine after operations.
    pub(crate) async fn rollover_flagged_events(&self, state: &WalletState) {
        if state.events_needing_rollover.is_empty() {
            return;
        }
        let manager = self.event_manager();

        for event_id in &state.events_needing_rollover {
            let survivors: Vec<Proof> = state
                .proofs
                .iter()
                .filter(|p| {
                    state.proof_to_event.get(&p.fingerprint()) == Some(event_id)
                })
                .cloned()
                .collect();

            let (mint, unit) = match survivors.first() {
                Some(p) => (p.mint.clone(), p.unit.clone()),
                // Everything in the event was spent: a bare deletion
                // suffices (no replacement to publish).
                None => {
                    if let Err(e) = manager
                        .publish_deletion(&[event_id.clone()], kind::TOKEN)
                        .await
                    {
                        log::debug!("Deletion of drained event {} failed: {}", event_id, e);
                    }
                    continue;
                }
            };

            if let Err(e) = manager
                .rollover(&survivors, &mint, &unit, &[event_id.clone()], None)
                .await
            {
                log::warn!("Rollover of event {} failed: {}", event_id, e);
            }
        }
    }

    /// Disconnect all relays.
    pub async fn close(&self) {
        self.pool.disconnect_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mint_url() {
        assert_eq!(
            normalize_mint_url("mint.example.com"),
            "https://mint.example.com"
        );
        assert_eq!(
            normalize_mint_url("https://mint.example.com/"),
            "https://mint.example.com"
        );
        assert_eq!(
            normalize_mint_url("https://MINT.Example.COM"),
            "https://mint.example.com"
        );
        assert_eq!(
            normalize_mint_url("  https://mint.example.com//  "),
            "https://mint.example.com"
        );
    }

    #[tokio::test]
    async fn test_wallet_construction_normalizes_mints() {
        let keys = WalletKeys::parse(&"33".repeat(32)).unwrap();
        let wallet = Wallet::new(
            keys,
            WalletConfig {
                mint_urls: vec!["Mint.Example.com/".into()],
                ..Default::default()
            },
        );
        assert_eq!(
            wallet.primary_mint_url().await.unwrap(),
            "https://mint.example.com"
        );
        assert!(wallet.is_trusted_mint("https://mint.example.com").await);
        assert!(!wallet.is_trusted_mint("https://other.example.com").await);
    }

    #[tokio::test]
    async fn test_mint_client_reuse() {
        let keys = WalletKeys::parse(&"33".repeat(32)).unwrap();
        let wallet = Wallet::new(keys, WalletConfig::default());
        let a = wallet.mint_client("https://mint.a/").await;
        let b = wallet.mint_client("https://mint.a").await;
        assert_eq!(a.url(), b.url());
        assert_eq!(wallet.mints.lock().await.len(), 1);
    }

    #[test]
    fn test_config_defaults() {
        let config = WalletConfig::default();
        assert_eq!(config.unit, "sat");
        assert_eq!(config.max_event_bytes, 60_000);
        assert_eq!(config.cache_ttl_seconds, 300);
        assert!(config.auto_init);
    }
}
