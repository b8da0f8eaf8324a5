//! Mint wire types
//!
//! Request and response schemas for the NUT-00 .. NUT-08 endpoints,
//! matched at field level, plus keyset response validation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Currency units understood by the wallet per NUT-00.
pub const SUPPORTED_UNITS: &[&str] = &[
    "btc", "sat", "msat", "usd", "eur", "gbp", "jpy", "auth", "usdt", "usdc", "dai",
];

/// Check a unit string against the supported set.
pub fn is_supported_unit(unit: &str) -> bool {
    SUPPORTED_UNITS.contains(&unit)
}

/// Proof as sent to the mint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireProof {
    /// Keyset id (hex).
    pub id: String,
    pub amount: u64,
    /// Secret (hex string).
    pub secret: String,
    /// Unblinded signature (compressed point hex).
    #[serde(rename = "C")]
    pub c: String,
}

/// Blinded message submitted for signing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlindedMessage {
    pub amount: u64,
    /// Keyset id (hex).
    pub id: String,
    /// Blinded point (compressed hex).
    #[serde(rename = "B_")]
    pub b: String,
}

/// Blind signature returned by the mint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlindSignature {
    pub amount: u64,
    /// Keyset id (hex).
    pub id: String,
    /// Blinded signature (compressed hex).
    #[serde(rename = "C_")]
    pub c: String,
}

/// One keyset's key table from `GET /v1/keys[/{id}]`.
#[derive(Debug, Clone, Deserialize)]
pub struct KeysetKeys {
    pub id: String,
    pub unit: String,
    /// Amount -> compressed pubkey hex. Amounts arrive as JSON object
    /// keys (strings).
    pub keys: HashMap<String, String>,
}

impl KeysetKeys {
    /// Key table with numeric amounts.
    pub fn amount_keys(&self) -> HashMap<u64, String> {
        self.keys
            .iter()
            .filter_map(|(amount, pk)| amount.parse::<u64>().ok().map(|a| (a, pk.clone())))
            .collect()
    }

    /// Available denominations, ascending.
    pub fn denominations(&self) -> Vec<u64> {
        let mut denoms: Vec<u64> = self
            .keys
            .keys()
            .filter_map(|a| a.parse::<u64>().ok())
            .collect();
        denoms.sort_unstable();
        denoms
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeysResponse {
    pub keysets: Vec<KeysetKeys>,
}

/// Keyset metadata from `GET /v1/keysets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysetInfo {
    pub id: String,
    pub unit: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Fee per proof, per thousand. Some mints send this as a string or
    /// omit it; coerce to a non-negative integer.
    #[serde(default, deserialize_with = "deserialize_fee_ppk")]
    pub input_fee_ppk: u64,
}

fn default_active() -> bool {
    true
}

fn deserialize_fee_ppk<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0),
        serde_json::Value::String(s) => s.parse::<i64>().unwrap_or(0).max(0) as u64,
        _ => 0,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeysetsResponse {
    pub keysets: Vec<KeysetInfo>,
}

/// Mint-quote state machine: `UNPAID -> PAID -> ISSUED`, or expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MintQuoteState {
    Unpaid,
    Paid,
    Issued,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostMintQuoteRequest {
    pub unit: String,
    pub amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MintQuoteResponse {
    /// Quote id.
    pub quote: String,
    /// Bolt11 invoice to pay.
    pub request: String,
    #[serde(default)]
    pub amount: Option<u64>,
    #[serde(default)]
    pub unit: Option<String>,
    pub state: MintQuoteState,
    #[serde(default)]
    pub expiry: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostMintRequest {
    pub quote: String,
    pub outputs: Vec<BlindedMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MintResponse {
    pub signatures: Vec<BlindSignature>,
}

/// Melt-quote state machine: `UNPAID -> PENDING -> PAID` or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MeltQuoteState {
    Unpaid,
    Pending,
    Paid,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostMeltQuoteRequest {
    pub unit: String,
    /// Bolt11 invoice.
    pub request: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeltQuoteResponse {
    pub quote: String,
    pub amount: u64,
    pub fee_reserve: u64,
    pub state: MeltQuoteState,
    #[serde(default)]
    pub expiry: Option<u64>,
    #[serde(default)]
    pub payment_preimage: Option<String>,
    /// Blind signatures over the blank outputs, returning overpaid fees.
    #[serde(default)]
    pub change: Option<Vec<BlindSignature>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostMeltRequest {
    pub quote: String,
    pub inputs: Vec<WireProof>,
    /// Change outputs including NUT-08 blanks; ascending by amount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<BlindedMessage>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostSwapRequest {
    pub inputs: Vec<WireProof>,
    /// Must be ascending by amount.
    pub outputs: Vec<BlindedMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapResponse {
    pub signatures: Vec<BlindSignature>,
}

/// Proof state reported by `/v1/checkstate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProofSpentState {
    Unspent,
    Pending,
    Spent,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostCheckStateRequest {
    #[serde(rename = "Ys")]
    pub ys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProofStateEntry {
    #[serde(rename = "Y")]
    pub y: String,
    pub state: ProofSpentState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckStateResponse {
    pub states: Vec<ProofStateEntry>,
}

/// Validate that a pubkey is 33-byte compressed secp256k1 hex.
pub fn is_valid_compressed_pubkey(pubkey: &str) -> bool {
    pubkey.len() == 66
        && (pubkey.starts_with("02") || pubkey.starts_with("03"))
        && hex::decode(pubkey).is_ok()
}

/// Structural validation of a keys response per NUT-01: every embedded
/// pubkey must be a compressed secp256k1 point.
pub fn validate_keys_response(response: &KeysResponse) -> Result<(), String> {
    for (index, keyset) in response.keysets.iter().enumerate() {
        if keyset.id.is_empty() {
            return Err(format!("Keyset at index {} missing id", index));
        }
        for (amount, pubkey) in &keyset.keys {
            if amount.parse::<u64>().map(|a| a == 0).unwrap_or(true) {
                return Err(format!(
                    "Keyset {} has invalid amount '{}'",
                    keyset.id, amount
                ));
            }
            if !is_valid_compressed_pubkey(pubkey) {
                return Err(format!(
                    "Keyset {} has invalid pubkey for amount {}",
                    keyset.id, amount
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_proof_field_names() {
        let proof = WireProof {
            id: "00ab".into(),
            amount: 8,
            secret: "aa".into(),
            c: "02bb".into(),
        };
        let json = serde_json::to_value(&proof).unwrap();
        assert!(json.get("C").is_some());
        assert!(json.get("c").is_none());

        let msg = BlindedMessage {
            amount: 4,
            id: "00ab".into(),
            b: "02cc".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("B_").is_some());

        let sig: BlindSignature =
            serde_json::from_str(r#"{"amount":4,"id":"00ab","C_":"02dd"}"#).unwrap();
        assert_eq!(sig.c, "02dd");
    }

    #[test]
    fn test_fee_ppk_coercion() {
        let ks: KeysetInfo =
            serde_json::from_str(r#"{"id":"00aa","unit":"sat","active":true,"input_fee_ppk":"100"}"#)
                .unwrap();
        assert_eq!(ks.input_fee_ppk, 100);

        let ks: KeysetInfo =
            serde_json::from_str(r#"{"id":"00aa","unit":"sat","active":true,"input_fee_ppk":-5}"#)
                .unwrap();
        assert_eq!(ks.input_fee_ppk, 0);

        let ks: KeysetInfo = serde_json::from_str(r#"{"id":"00aa","unit":"sat"}"#).unwrap();
        assert_eq!(ks.input_fee_ppk, 0);
        assert!(ks.active);
    }

    #[test]
    fn test_quote_state_parsing() {
        assert_eq!(
            serde_json::from_str::<MintQuoteState>(r#""UNPAID""#).unwrap(),
            MintQuoteState::Unpaid
        );
        assert_eq!(
            serde_json::from_str::<MeltQuoteState>(r#""PENDING""#).unwrap(),
            MeltQuoteState::Pending
        );
        assert_eq!(
            serde_json::from_str::<ProofSpentState>(r#""SPENT""#).unwrap(),
            ProofSpentState::Spent
        );
    }

    #[test]
    fn test_keys_response_validation() {
        let valid_pk = format!("02{}", "ab".repeat(32));
        let mut keys = HashMap::new();
        keys.insert("1".to_string(), valid_pk.clone());
        let response = KeysResponse {
            keysets: vec![KeysetKeys {
                id: "00aa".into(),
                unit: "sat".into(),
                keys,
            }],
        };
        assert!(validate_keys_response(&response).is_ok());

        let mut bad = HashMap::new();
        bad.insert("1".to_string(), "04deadbeef".to_string());
        let response = KeysResponse {
            keysets: vec![KeysetKeys {
                id: "00aa".into(),
                unit: "sat".into(),
                keys: bad,
            }],
        };
        assert!(validate_keys_response(&response).is_err());
    }

    #[test]
    fn test_denominations_sorted() {
        let mut keys = HashMap::new();
        for amount in ["64", "1", "8"] {
            keys.insert(amount.to_string(), format!("02{}", "cd".repeat(32)));
        }
        let keyset = KeysetKeys {
            id: "00aa".into(),
            unit: "sat".into(),
            keys,
        };
        assert_eq!(keyset.denominations(), vec![1, 8, 64]);
        assert_eq!(keyset.amount_keys().len(), 3);
    }

    #[test]
    fn test_supported_units() {
        assert!(is_supported_unit("sat"));
        assert!(is_supported_unit("usd"));
        assert!(!is_supported_unit("doge"));
    }
}
