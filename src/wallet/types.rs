//! Wallet data types
//!
//! Proof and event payload structures shared across the wallet modules,
//! plus the transient reconstructed state snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default unit for proofs (per NIP-60, defaults to "sat").
pub fn default_unit() -> String {
    "sat".to_string()
}

/// A proof held by the wallet.
///
/// `secret` is kept as hex internally and on the mint wire; the relay
/// representation stores its base64 form (see [`Proof::to_relay`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Proof {
    /// Keyset id (hex).
    pub id: String,
    pub amount: u64,
    /// Secret, hex encoded.
    pub secret: String,
    /// Unblinded mint signature (compressed point hex).
    #[serde(rename = "C", alias = "c")]
    pub c: String,
    /// Owning mint URL. Not serialized inside token events; the event
    /// carries the mint once.
    #[serde(skip)]
    pub mint: String,
    /// Currency unit.
    #[serde(skip)]
    pub unit: String,
}

impl Proof {
    /// Fingerprint identifying a proof across events: `(secret, C)`.
    pub fn fingerprint(&self) -> String {
        format!("{}:{}", self.secret, self.c)
    }
}

/// Proof as embedded in a kind-7375 token event. The secret is stored
/// base64-encoded on the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayProof {
    #[serde(default)]
    pub id: String,
    pub amount: u64,
    /// Secret, base64 of the raw bytes (hex accepted for compatibility).
    pub secret: String,
    #[serde(rename = "C", alias = "c")]
    pub c: String,
}

impl RelayProof {
    /// Decode the stored secret to the internal hex form. Base64 is the
    /// NIP-60 format; bare hex is accepted from older events.
    pub fn secret_hex(&self) -> String {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine as _;
        match BASE64.decode(&self.secret) {
            Ok(bytes) if bytes.len() == 32 => hex::encode(bytes),
            _ => self.secret.clone(),
        }
    }

    pub fn from_proof(proof: &Proof) -> Self {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine as _;
        let secret = match hex::decode(&proof.secret) {
            Ok(bytes) => BASE64.encode(bytes),
            Err(_) => proof.secret.clone(),
        };
        Self {
            id: proof.id.clone(),
            amount: proof.amount,
            secret,
            c: proof.c.clone(),
        }
    }

    pub fn into_proof(&self, mint: &str, unit: &str) -> Proof {
        Proof {
            id: self.id.clone(),
            amount: self.amount,
            secret: self.secret_hex(),
            c: self.c.clone(),
            mint: mint.to_string(),
            unit: unit.to_string(),
        }
    }
}

/// Decrypted content of a kind-7375 token event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEventContent {
    pub mint: String,
    #[serde(default = "default_unit")]
    pub unit: String,
    pub proofs: Vec<RelayProof>,
    /// Event ids this bundle supersedes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub del: Vec<String>,
}

/// Decrypted content of a kind-7374 quote tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteTrackerContent {
    pub quote: String,
    pub mint: String,
    pub amount: u64,
    #[serde(default)]
    pub expiry: Option<u64>,
}

/// Direction of a spending-history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in" => Some(Self::In),
            "out" => Some(Self::Out),
            _ => None,
        }
    }
}

/// One decrypted kind-7376 spending-history entry.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub event_id: String,
    pub direction: Direction,
    pub amount: u64,
    pub unit: String,
    pub fee: u64,
    /// Token events created by the operation.
    pub created: Vec<String>,
    /// Token events destroyed by the operation.
    pub destroyed: Vec<String>,
    pub created_at: u64,
}

/// Mint quote handed back to the caller of a receive.
#[derive(Debug, Clone)]
pub struct MintQuoteInfo {
    pub quote_id: String,
    /// Bolt11 invoice for the payer.
    pub invoice: String,
    pub amount: u64,
    pub mint_url: String,
    pub expiry: Option<u64>,
    /// Relay event id of the kind-7374 tracker, deleted once minted.
    pub tracker_event_id: Option<String>,
}

/// Melt quote details used by the melt planner.
#[derive(Debug, Clone)]
pub struct MeltQuoteInfo {
    pub quote_id: String,
    pub amount: u64,
    pub fee_reserve: u64,
    pub mint_url: String,
    pub expiry: Option<u64>,
}

/// Transient wallet state, reconstructed on demand from relay events.
///
/// Never cached mutably: every operation folds a fresh snapshot and
/// models mutation as "publish new event + kind-5 for old".
#[derive(Debug, Clone, Default)]
pub struct WalletState {
    /// Live proofs, deduplicated by fingerprint.
    pub proofs: Vec<Proof>,
    /// proof fingerprint -> owning token event id.
    pub proof_to_event: HashMap<String, String>,
    /// Event ids whose bundles contained a proof the mint reports SPENT;
    /// the next rollover republishes them without the dead weight.
    pub events_needing_rollover: Vec<String>,
}

impl WalletState {
    /// Sum over live proofs.
    pub fn balance(&self) -> u64 {
        self.proofs.iter().map(|p| p.amount).sum()
    }

    /// Balance restricted to one unit.
    pub fn balance_for_unit(&self, unit: &str) -> u64 {
        self.proofs
            .iter()
            .filter(|p| p.unit == unit)
            .map(|p| p.amount)
            .sum()
    }

    /// Proofs grouped by mint URL.
    pub fn proofs_by_mint(&self) -> HashMap<String, Vec<Proof>> {
        let mut grouped: HashMap<String, Vec<Proof>> = HashMap::new();
        for proof in &self.proofs {
            grouped.entry(proof.mint.clone()).or_default().push(proof.clone());
        }
        grouped
    }

    /// Balance per mint URL.
    pub fn balance_by_mint(&self) -> HashMap<String, u64> {
        let mut balances: HashMap<String, u64> = HashMap::new();
        for proof in &self.proofs {
            *balances.entry(proof.mint.clone()).or_default() += proof.amount;
        }
        balances
    }

    /// Proofs grouped by keyset id.
    pub fn proofs_by_keyset(&self) -> HashMap<String, Vec<Proof>> {
        let mut grouped: HashMap<String, Vec<Proof>> = HashMap::new();
        for proof in &self.proofs {
            grouped.entry(proof.id.clone()).or_default().push(proof.clone());
        }
        grouped
    }

    /// Event ids owning any of the given proofs.
    pub fn owning_events(&self, proofs: &[Proof]) -> Vec<String> {
        let mut ids: Vec<String> = proofs
            .iter()
            .filter_map(|p| self.proof_to_event.get(&p.fingerprint()).cloned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proof(amount: u64, secret: &str, mint: &str) -> Proof {
        Proof {
            id: "00aa".into(),
            amount,
            secret: secret.into(),
            c: "02bb".into(),
            mint: mint.into(),
            unit: "sat".into(),
        }
    }

    #[test]
    fn test_relay_proof_secret_base64_round_trip() {
        let original = proof(8, &hex::encode([7u8; 32]), "https://mint.a");
        let relay = RelayProof::from_proof(&original);
        assert_ne!(relay.secret, original.secret);
        assert_eq!(relay.secret_hex(), original.secret);
        let back = relay.into_proof("https://mint.a", "sat");
        assert_eq!(back, original);
    }

    #[test]
    fn test_relay_proof_accepts_hex_secret() {
        let relay = RelayProof {
            id: "00aa".into(),
            amount: 1,
            secret: "ab".repeat(32),
            c: "02bb".into(),
        };
        // Not decodable as a 32-byte base64 string; treated as hex.
        assert_eq!(relay.secret_hex(), "ab".repeat(32));
    }

    #[test]
    fn test_state_balances() {
        let state = WalletState {
            proofs: vec![
                proof(1, "s1", "https://mint.a"),
                proof(2, "s2", "https://mint.a"),
                proof(4, "s3", "https://mint.b"),
            ],
            ..Default::default()
        };
        assert_eq!(state.balance(), 7);
        assert_eq!(state.balance_by_mint()["https://mint.a"], 3);
        assert_eq!(state.balance_by_mint()["https://mint.b"], 4);
        assert_eq!(state.balance_for_unit("sat"), 7);
        assert_eq!(state.balance_for_unit("usd"), 0);
    }

    #[test]
    fn test_owning_events_dedup() {
        let p1 = proof(1, "s1", "m");
        let p2 = proof(2, "s2", "m");
        let mut map = HashMap::new();
        map.insert(p1.fingerprint(), "e1".to_string());
        map.insert(p2.fingerprint(), "e1".to_string());
        let state = WalletState {
            proofs: vec![p1.clone(), p2.clone()],
            proof_to_event: map,
            ..Default::default()
        };
        assert_eq!(state.owning_events(&[p1, p2]), vec!["e1"]);
    }

    #[test]
    fn test_token_event_content_del_default() {
        let content: TokenEventContent =
            serde_json::from_str(r#"{"mint":"https://m","proofs":[]}"#).unwrap();
        assert!(content.del.is_empty());
        assert_eq!(content.unit, "sat");
    }
}
