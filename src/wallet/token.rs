//! Token transport formats
//!
//! Serialization of proofs for hand-to-hand transfer. Two wire formats:
//! `cashuA` (v3, base64url JSON) and `cashuB` (v4, base64url CBOR).
//! Emission defaults to v4 with canonically ordered maps; decode accepts
//! either version and any CBOR map order.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine as _;
use ciborium::value::Value as Cbor;

use super::error::{WalletError, WalletResult};
use super::types::Proof;

/// Token format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVersion {
    /// `cashuA`, JSON.
    V3,
    /// `cashuB`, CBOR.
    V4,
}

impl TokenVersion {
    pub fn detect(token: &str) -> Option<Self> {
        let trimmed = token.trim();
        if trimmed.starts_with("cashuA") {
            Some(Self::V3)
        } else if trimmed.starts_with("cashuB") {
            Some(Self::V4)
        } else {
            None
        }
    }
}

/// Parsed token: one mint, one unit, its proofs.
#[derive(Debug, Clone)]
pub struct ParsedToken {
    pub mint_url: String,
    pub unit: String,
    pub proofs: Vec<Proof>,
    pub memo: Option<String>,
}

impl ParsedToken {
    pub fn total(&self) -> u64 {
        self.proofs.iter().map(|p| p.amount).sum()
    }
}

/// Serialize proofs for transport. `version` defaults to v4 at call
/// sites.
pub fn serialize_token(
    proofs: &[Proof],
    mint_url: &str,
    unit: &str,
    version: TokenVersion,
    memo: Option<&str>,
) -> WalletResult<String> {
    match version {
        TokenVersion::V3 => serialize_v3(proofs, mint_url, unit, memo),
        TokenVersion::V4 => serialize_v4(proofs, mint_url, unit),
    }
}

fn serialize_v3(
    proofs: &[Proof],
    mint_url: &str,
    unit: &str,
    memo: Option<&str>,
) -> WalletResult<String> {
    let token_proofs: Vec<serde_json::Value> = proofs
        .iter()
        .map(|p| {
            serde_json::json!({
                "id": p.id,
                "amount": p.amount,
                "secret": p.secret,
                "C": p.c,
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "token": [{"mint": mint_url, "proofs": token_proofs}],
        "unit": unit,
    });
    if let Some(memo) = memo {
        body["memo"] = serde_json::Value::String(memo.to_string());
    }

    let json = serde_json::to_string(&body)
        .map_err(|e| WalletError::Internal(format!("Token serialization failed: {}", e)))?;
    Ok(format!("cashuA{}", BASE64_URL.encode(json)))
}

fn serialize_v4(proofs: &[Proof], mint_url: &str, unit: &str) -> WalletResult<String> {
    // Group proofs by keyset; the keyset id is carried once per group as
    // raw bytes.
    let mut by_keyset: BTreeMap<String, Vec<&Proof>> = BTreeMap::new();
    for proof in proofs {
        by_keyset.entry(proof.id.clone()).or_default().push(proof);
    }

    let mut groups = Vec::new();
    for (keyset_id, keyset_proofs) in by_keyset {
        let id_bytes = hex::decode(&keyset_id)
            .map_err(|e| WalletError::InvalidToken {
                reason: format!("Keyset id is not hex: {}", e),
            })?;

        let entries: Vec<Cbor> = keyset_proofs
            .iter()
            .map(|p| {
                let c_bytes = hex::decode(&p.c).map_err(|e| WalletError::InvalidToken {
                    reason: format!("Signature is not hex: {}", e),
                })?;
                // Canonical order within the proof map: "a" < "c" < "s".
                Ok(Cbor::Map(vec![
                    (Cbor::Text("a".into()), Cbor::Integer(p.amount.into())),
                    (Cbor::Text("c".into()), Cbor::Bytes(c_bytes)),
                    (Cbor::Text("s".into()), Cbor::Text(p.secret.clone())),
                ]))
            })
            .collect::<WalletResult<_>>()?;

        groups.push(Cbor::Map(vec![
            (Cbor::Text("i".into()), Cbor::Bytes(id_bytes)),
            (Cbor::Text("p".into()), Cbor::Array(entries)),
        ]));
    }

    // Top-level canonical key order: "m" < "t" < "u".
    let body = Cbor::Map(vec![
        (Cbor::Text("m".into()), Cbor::Text(mint_url.to_string())),
        (Cbor::Text("t".into()), Cbor::Array(groups)),
        (Cbor::Text("u".into()), Cbor::Text(unit.to_string())),
    ]);

    let mut bytes = Vec::new();
    ciborium::ser::into_writer(&body, &mut bytes)
        .map_err(|e| WalletError::Internal(format!("CBOR serialization failed: {}", e)))?;
    Ok(format!("cashuB{}", BASE64_URL.encode(bytes)))
}

/// Parse a transport token of either version.
pub fn parse_token(token: &str) -> WalletResult<ParsedToken> {
    let trimmed = token.trim();
    match TokenVersion::detect(trimmed) {
        Some(TokenVersion::V3) => parse_v3(&trimmed[6..]),
        Some(TokenVersion::V4) => parse_v4(&trimmed[6..]),
        None => Err(WalletError::InvalidToken {
            reason: "Must start with 'cashuA' or 'cashuB'".into(),
        }),
    }
}

fn decode_base64url(encoded: &str) -> WalletResult<Vec<u8>> {
    // Tokens circulate both with and without padding.
    BASE64_URL
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| WalletError::InvalidToken {
            reason: format!("Invalid base64: {}", e),
        })
}

fn parse_v3(encoded: &str) -> WalletResult<ParsedToken> {
    let decoded = decode_base64url(encoded)?;
    let body: serde_json::Value =
        serde_json::from_slice(&decoded).map_err(|e| WalletError::InvalidToken {
            reason: format!("Invalid JSON: {}", e),
        })?;

    let entry = body
        .get("token")
        .and_then(|t| t.as_array())
        .and_then(|t| t.first())
        .ok_or_else(|| WalletError::InvalidToken {
            reason: "Missing token entry".into(),
        })?;
    let mint_url = entry
        .get("mint")
        .and_then(|m| m.as_str())
        .ok_or_else(|| WalletError::InvalidToken {
            reason: "Missing mint URL".into(),
        })?
        .to_string();
    let unit = body
        .get("unit")
        .and_then(|u| u.as_str())
        .unwrap_or("sat")
        .to_string();
    let memo = body
        .get("memo")
        .and_then(|m| m.as_str())
        .map(|m| m.to_string());

    let raw_proofs = entry
        .get("proofs")
        .and_then(|p| p.as_array())
        .ok_or_else(|| WalletError::InvalidToken {
            reason: "Missing proofs".into(),
        })?;

    let mut proofs = Vec::with_capacity(raw_proofs.len());
    for raw in raw_proofs {
        proofs.push(Proof {
            id: raw.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            amount: raw
                .get("amount")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| WalletError::InvalidToken {
                    reason: "Proof missing amount".into(),
                })?,
            secret: raw
                .get("secret")
                .and_then(|v| v.as_str())
                .ok_or_else(|| WalletError::InvalidToken {
                    reason: "Proof missing secret".into(),
                })?
                .to_string(),
            c: raw
                .get("C")
                .and_then(|v| v.as_str())
                .ok_or_else(|| WalletError::InvalidToken {
                    reason: "Proof missing C".into(),
                })?
                .to_string(),
            mint: mint_url.clone(),
            unit: unit.clone(),
        });
    }

    Ok(ParsedToken {
        mint_url,
        unit,
        proofs,
        memo,
    })
}

fn cbor_field<'a>(map: &'a [(Cbor, Cbor)], key: &str) -> Option<&'a Cbor> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

fn parse_v4(encoded: &str) -> WalletResult<ParsedToken> {
    let decoded = decode_base64url(encoded)?;
    let body: Cbor =
        ciborium::de::from_reader(decoded.as_slice()).map_err(|e| WalletError::InvalidToken {
            reason: format!("Invalid CBOR: {}", e),
        })?;

    let map = body.as_map().ok_or_else(|| WalletError::InvalidToken {
        reason: "Token body is not a map".into(),
    })?;

    let mint_url = cbor_field(map, "m")
        .and_then(|v| v.as_text())
        .ok_or_else(|| WalletError::InvalidToken {
            reason: "Missing mint URL".into(),
        })?
        .to_string();
    let unit = cbor_field(map, "u")
        .and_then(|v| v.as_text())
        .unwrap_or("sat")
        .to_string();
    let groups = cbor_field(map, "t")
        .and_then(|v| v.as_array())
        .ok_or_else(|| WalletError::InvalidToken {
            reason: "Missing token groups".into(),
        })?;

    let mut proofs = Vec::new();
    for group in groups {
        let group_map = group.as_map().ok_or_else(|| WalletError::InvalidToken {
            reason: "Token group is not a map".into(),
        })?;
        let keyset_id = cbor_field(group_map, "i")
            .and_then(|v| v.as_bytes())
            .map(hex::encode)
            .ok_or_else(|| WalletError::InvalidToken {
                reason: "Group missing keyset id".into(),
            })?;
        let entries = cbor_field(group_map, "p")
            .and_then(|v| v.as_array())
            .ok_or_else(|| WalletError::InvalidToken {
                reason: "Group missing proofs".into(),
            })?;

        for entry in entries {
            let entry_map = entry.as_map().ok_or_else(|| WalletError::InvalidToken {
                reason: "Proof entry is not a map".into(),
            })?;
            let amount = cbor_field(entry_map, "a")
                .and_then(|v| v.as_integer())
                .and_then(|i| u64::try_from(i).ok())
                .ok_or_else(|| WalletError::InvalidToken {
                    reason: "Proof missing amount".into(),
                })?;
            let secret = cbor_field(entry_map, "s")
                .and_then(|v| v.as_text())
                .ok_or_else(|| WalletError::InvalidToken {
                    reason: "Proof missing secret".into(),
                })?
                .to_string();
            let c = cbor_field(entry_map, "c")
                .and_then(|v| v.as_bytes())
                .map(hex::encode)
                .ok_or_else(|| WalletError::InvalidToken {
                    reason: "Proof missing signature".into(),
                })?;

            proofs.push(Proof {
                id: keyset_id.clone(),
                amount,
                secret,
                c,
                mint: mint_url.clone(),
                unit: unit.clone(),
            });
        }
    }

    Ok(ParsedToken {
        mint_url,
        unit,
        proofs,
        memo: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_proofs() -> Vec<Proof> {
        vec![
            Proof {
                id: "00ad268c4d1f5826".into(),
                amount: 1,
                secret: "9a".repeat(32),
                c: format!("02{}", "ab".repeat(32)),
                mint: "https://mint.example".into(),
                unit: "sat".into(),
            },
            Proof {
                id: "00ad268c4d1f5826".into(),
                amount: 8,
                secret: "7c".repeat(32),
                c: format!("03{}", "cd".repeat(32)),
                mint: "https://mint.example".into(),
                unit: "sat".into(),
            },
        ]
    }

    #[test]
    fn test_v3_round_trip() {
        let proofs = sample_proofs();
        let token = serialize_token(
            &proofs,
            "https://mint.example",
            "sat",
            TokenVersion::V3,
            Some("hello"),
        )
        .unwrap();
        assert!(token.starts_with("cashuA"));

        let parsed = parse_token(&token).unwrap();
        assert_eq!(parsed.mint_url, "https://mint.example");
        assert_eq!(parsed.unit, "sat");
        assert_eq!(parsed.memo.as_deref(), Some("hello"));
        assert_eq!(parsed.total(), 9);
        assert_eq!(parsed.proofs[0].secret, proofs[0].secret);
    }

    #[test]
    fn test_v4_round_trip() {
        let proofs = sample_proofs();
        let token =
            serialize_token(&proofs, "https://mint.example", "sat", TokenVersion::V4, None)
                .unwrap();
        assert!(token.starts_with("cashuB"));

        let parsed = parse_token(&token).unwrap();
        assert_eq!(parsed.mint_url, "https://mint.example");
        assert_eq!(parsed.total(), 9);
        assert_eq!(parsed.proofs.len(), 2);
        assert_eq!(parsed.proofs[1].c, proofs[1].c);
        assert_eq!(parsed.proofs[0].id, "00ad268c4d1f5826");
    }

    #[test]
    fn test_v4_accepts_any_map_order() {
        // Build a token with reversed key order ("u" before "t" before
        // "m", "s" before "a").
        let c_bytes = hex::decode(format!("02{}", "ab".repeat(32))).unwrap();
        let body = Cbor::Map(vec![
            (Cbor::Text("u".into()), Cbor::Text("sat".into())),
            (
                Cbor::Text("t".into()),
                Cbor::Array(vec![Cbor::Map(vec![
                    (
                        Cbor::Text("p".into()),
                        Cbor::Array(vec![Cbor::Map(vec![
                            (Cbor::Text("s".into()), Cbor::Text("ff".repeat(32))),
                            (Cbor::Text("c".into()), Cbor::Bytes(c_bytes)),
                            (Cbor::Text("a".into()), Cbor::Integer(4.into())),
                        ])]),
                    ),
                    (
                        Cbor::Text("i".into()),
                        Cbor::Bytes(hex::decode("00ad268c4d1f5826").unwrap()),
                    ),
                ])]),
            ),
            (Cbor::Text("m".into()), Cbor::Text("https://m.x".into())),
        ]);
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&body, &mut bytes).unwrap();
        let token = format!("cashuB{}", BASE64_URL.encode(bytes));

        let parsed = parse_token(&token).unwrap();
        assert_eq!(parsed.mint_url, "https://m.x");
        assert_eq!(parsed.proofs[0].amount, 4);
        assert_eq!(parsed.proofs[0].secret, "ff".repeat(32));
    }

    #[test]
    fn test_parse_accepts_padded_base64() {
        let token = serialize_token(
            &sample_proofs(),
            "https://mint.example",
            "sat",
            TokenVersion::V3,
            None,
        )
        .unwrap();
        let padded = format!("{}==", token);
        // Extra '=' just gets trimmed; body still parses.
        assert!(parse_token(&padded).is_ok());
    }

    #[test]
    fn test_parse_rejects_unknown_prefix() {
        assert!(matches!(
            parse_token("cashuC0000"),
            Err(WalletError::InvalidToken { .. })
        ));
        assert!(parse_token("definitely not a token").is_err());
    }

    #[test]
    fn test_v3_defaults_unit_to_sat() {
        let body = serde_json::json!({
            "token": [{"mint": "https://m.x", "proofs": [
                {"id": "00aa", "amount": 2, "secret": "aabb", "C": "02cc"}
            ]}]
        });
        let token = format!(
            "cashuA{}",
            BASE64_URL.encode(serde_json::to_string(&body).unwrap())
        );
        let parsed = parse_token(&token).unwrap();
        assert_eq!(parsed.unit, "sat");
        assert_eq!(parsed.proofs[0].mint, "https://m.x");
    }
}
