//! Cashu mint RPC client
//!
//! Stateless typed HTTP client for the mint endpoints the wallet uses.
//! 4xx responses surface immediately, annotated with the mint's NUT error
//! code when the body carries one; 5xx and transport errors retry with a
//! small exponential backoff.

pub mod types;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use types::{
    BlindedMessage, CheckStateResponse, KeysResponse, KeysetInfo, KeysetKeys, KeysetsResponse,
    MeltQuoteResponse, MintQuoteResponse, MintResponse, PostCheckStateRequest, PostMeltQuoteRequest,
    PostMeltRequest, PostMintQuoteRequest, PostMintRequest, PostSwapRequest, SwapResponse,
    WireProof,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_LIMIT: u32 = 3;

/// Error from a mint RPC call.
#[derive(Debug, Clone)]
pub enum MintError {
    /// HTTP status >= 400 with the response body; `code` is the NUT
    /// error code when the body carried one.
    Status {
        status: u16,
        body: String,
        code: Option<u16>,
    },
    /// Transport failure after retries.
    Network(String),
    /// Body did not match the expected schema.
    InvalidResponse(String),
    /// Keyset failed NUT-01 structural validation.
    InvalidKeyset(String),
}

impl std::fmt::Display for MintError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status { status, body, code } => match code {
                Some(code) => write!(f, "Mint returned {} (code {}): {}", status, code, body),
                None => write!(f, "Mint returned {}: {}", status, body),
            },
            Self::Network(msg) => write!(f, "Mint unreachable: {}", msg),
            Self::InvalidResponse(msg) => write!(f, "Invalid mint response: {}", msg),
            Self::InvalidKeyset(msg) => write!(f, "Invalid keyset: {}", msg),
        }
    }
}

impl std::error::Error for MintError {}

impl MintError {
    /// NUT error code, when the mint provided one.
    pub fn nut_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => *code,
            _ => None,
        }
    }

    /// Token already spent (11001) or pending (11002).
    pub fn is_token_spent(&self) -> bool {
        matches!(self.nut_code(), Some(11001) | Some(11002))
            || self.to_string().to_lowercase().contains("already spent")
    }

    /// Quote not yet paid (11006).
    pub fn is_quote_unpaid(&self) -> bool {
        self.nut_code() == Some(11006)
    }

    /// Quote expired (11007).
    pub fn is_quote_expired(&self) -> bool {
        self.nut_code() == Some(11007)
            || self.to_string().to_lowercase().contains("expired")
    }
}

/// HTTP client for one mint.
#[derive(Debug, Clone)]
pub struct MintClient {
    url: String,
    client: reqwest::Client,
}

impl MintClient {
    /// Build a client for a mint base URL. Trailing slashes are
    /// stripped.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, MintError> {
        self.request(reqwest::Method::GET, path, None::<&()>).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, MintError> {
        self.request(reqwest::Method::POST, path, Some(body)).await
    }

    async fn request<B: Serialize, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, MintError> {
        let url = format!("{}{}", self.url, path);
        let mut delay = Duration::from_millis(500);
        let mut last_error = MintError::Network("No attempt made".into());

        for attempt in 0..=RETRY_LIMIT {
            let mut builder = self
                .client
                .request(method.clone(), &url)
                .timeout(REQUEST_TIMEOUT);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = match builder.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = MintError::Network(e.to_string());
                    if attempt < RETRY_LIMIT {
                        log::debug!("Mint request {} failed ({}), retrying", url, e);
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| MintError::Network(e.to_string()))?;

            if status.is_server_error() {
                last_error = MintError::Status {
                    status: status.as_u16(),
                    body: text,
                    code: None,
                };
                if attempt < RETRY_LIMIT {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    continue;
                }
                break;
            }

            if status.is_client_error() {
                // 4xx surfaces immediately, annotated with the NUT code
                // when present.
                let code = serde_json::from_str::<serde_json::Value>(&text)
                    .ok()
                    .and_then(|v| v.get("code").and_then(|c| c.as_u64()))
                    .map(|c| c as u16);
                return Err(MintError::Status {
                    status: status.as_u16(),
                    body: text,
                    code,
                });
            }

            return serde_json::from_str(&text).map_err(|e| {
                MintError::InvalidResponse(format!("{} for body: {}", e, truncate(&text, 200)))
            });
        }

        Err(last_error)
    }

    // ───────────────────────── Keys & keysets ─────────────────────────

    /// Active keysets with their key tables (`GET /v1/keys`).
    pub async fn get_keys(&self) -> Result<Vec<KeysetKeys>, MintError> {
        let response: KeysResponse = self.get("/v1/keys").await?;
        types::validate_keys_response(&response).map_err(MintError::InvalidKeyset)?;
        Ok(response.keysets)
    }

    /// One keyset's key table (`GET /v1/keys/{id}`).
    pub async fn get_keyset_keys(&self, keyset_id: &str) -> Result<KeysetKeys, MintError> {
        let response: KeysResponse = self.get(&format!("/v1/keys/{}", keyset_id)).await?;
        types::validate_keys_response(&response).map_err(MintError::InvalidKeyset)?;
        response
            .keysets
            .into_iter()
            .find(|ks| ks.id == keyset_id)
            .ok_or_else(|| {
                MintError::InvalidKeyset(format!("Mint did not return keyset {}", keyset_id))
            })
    }

    /// Keyset metadata: active flag, unit, fee rate (`GET /v1/keysets`).
    pub async fn get_keysets(&self) -> Result<Vec<KeysetInfo>, MintError> {
        let response: KeysetsResponse = self.get("/v1/keysets").await?;
        Ok(response.keysets)
    }

    // ───────────────────────── Minting ─────────────────────────

    /// Request a Lightning invoice for minting.
    pub async fn create_mint_quote(
        &self,
        amount: u64,
        unit: &str,
    ) -> Result<MintQuoteResponse, MintError> {
        self.post(
            "/v1/mint/quote/bolt11",
            &PostMintQuoteRequest {
                unit: unit.to_string(),
                amount,
                description: None,
            },
        )
        .await
    }

    /// Poll a mint quote's state.
    pub async fn get_mint_quote(&self, quote_id: &str) -> Result<MintQuoteResponse, MintError> {
        self.get(&format!("/v1/mint/quote/bolt11/{}", quote_id)).await
    }

    /// Submit blinded outputs for a paid quote, receiving blind
    /// signatures.
    pub async fn mint(
        &self,
        quote_id: &str,
        outputs: Vec<BlindedMessage>,
    ) -> Result<MintResponse, MintError> {
        self.post(
            "/v1/mint/bolt11",
            &PostMintRequest {
                quote: quote_id.to_string(),
                outputs,
            },
        )
        .await
    }

    // ───────────────────────── Melting ─────────────────────────

    /// Quote the cost of paying an invoice; returns the fee reserve.
    pub async fn create_melt_quote(
        &self,
        invoice: &str,
        unit: &str,
    ) -> Result<MeltQuoteResponse, MintError> {
        self.post(
            "/v1/melt/quote/bolt11",
            &PostMeltQuoteRequest {
                unit: unit.to_string(),
                request: invoice.to_string(),
            },
        )
        .await
    }

    /// Poll a melt quote's state.
    pub async fn get_melt_quote(&self, quote_id: &str) -> Result<MeltQuoteResponse, MintError> {
        self.get(&format!("/v1/melt/quote/bolt11/{}", quote_id)).await
    }

    /// Pay the quoted invoice with proofs. `outputs` are change outputs
    /// including NUT-08 blanks for returned fees.
    pub async fn melt(
        &self,
        quote_id: &str,
        inputs: Vec<WireProof>,
        outputs: Option<Vec<BlindedMessage>>,
    ) -> Result<MeltQuoteResponse, MintError> {
        self.post(
            "/v1/melt/bolt11",
            &PostMeltRequest {
                quote: quote_id.to_string(),
                inputs,
                outputs,
            },
        )
        .await
    }

    // ───────────────────────── Swap & state ─────────────────────────

    /// Exchange input proofs for fresh outputs of the caller's choice.
    pub async fn swap(
        &self,
        inputs: Vec<WireProof>,
        outputs: Vec<BlindedMessage>,
    ) -> Result<SwapResponse, MintError> {
        self.post("/v1/swap", &PostSwapRequest { inputs, outputs }).await
    }

    /// Report UNSPENT/PENDING/SPENT for each submitted y-value.
    pub async fn check_state(&self, ys: Vec<String>) -> Result<CheckStateResponse, MintError> {
        self.post("/v1/checkstate", &PostCheckStateRequest { ys }).await
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_normalization() {
        let client = MintClient::new("https://mint.example.com///");
        assert_eq!(client.url(), "https://mint.example.com");
    }

    #[test]
    fn test_error_predicates() {
        let spent = MintError::Status {
            status: 400,
            body: "{\"code\":11001}".into(),
            code: Some(11001),
        };
        assert!(spent.is_token_spent());
        assert!(!spent.is_quote_expired());

        let expired = MintError::Status {
            status: 400,
            body: "quote expired".into(),
            code: Some(11007),
        };
        assert!(expired.is_quote_expired());

        let unpaid = MintError::Status {
            status: 400,
            body: String::new(),
            code: Some(11006),
        };
        assert!(unpaid.is_quote_unpaid());

        let network = MintError::Network("refused".into());
        assert_eq!(network.nut_code(), None);
        assert!(!network.is_token_spent());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo wörld", 5), "héllo");
        assert_eq!(truncate("ok", 200), "ok");
    }
}
