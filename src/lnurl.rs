//! LNURL-pay and Lightning-address resolution
//!
//! Resolves `user@host` addresses, bech32 `lnurl1...` strings and direct
//! URLs to a pay endpoint, requests invoices within the endpoint's
//! bounds, and parses bolt11 amounts from the invoice's human-readable
//! part.

use serde::{Deserialize, Serialize};

/// LNURL failures.
#[derive(Debug, Clone)]
pub enum LnurlError {
    InvalidAddress(String),
    InvalidLnurl(String),
    Fetch(String),
    Parse(String),
    AmountOutOfBounds { amount_msat: u64, min: u64, max: u64 },
    InvalidInvoice(String),
}

impl std::fmt::Display for LnurlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAddress(msg) => write!(f, "Invalid lightning address: {}", msg),
            Self::InvalidLnurl(msg) => write!(f, "Invalid LNURL: {}", msg),
            Self::Fetch(msg) => write!(f, "LNURL fetch failed: {}", msg),
            Self::Parse(msg) => write!(f, "LNURL parse failed: {}", msg),
            Self::AmountOutOfBounds { amount_msat, min, max } => write!(
                f,
                "Amount {} msat outside LNURL bounds ({} - {} msat)",
                amount_msat, min, max
            ),
            Self::InvalidInvoice(msg) => write!(f, "Invalid invoice: {}", msg),
        }
    }
}

impl std::error::Error for LnurlError {}

/// LNURL payRequest metadata.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayRequest {
    pub callback: String,
    pub min_sendable: u64,
    pub max_sendable: u64,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub tag: String,
}

/// Invoice response from the pay callback.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceResponse {
    /// Bolt11 payment request.
    pub pr: String,
}

/// Resolve any accepted LNURL input to the https endpoint to fetch.
///
/// `user@host` maps to `https://host/.well-known/lnurlp/user`; a
/// `lightning:` prefix is stripped first; `lnurl1...` is bech32-decoded;
/// direct `https://` URLs pass through.
pub fn resolve_lnurl_endpoint(input: &str) -> Result<String, LnurlError> {
    let trimmed = input
        .trim()
        .strip_prefix("lightning:")
        .unwrap_or(input.trim());

    if trimmed.contains('@') {
        let parts: Vec<&str> = trimmed.split('@').collect();
        if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(LnurlError::InvalidAddress(trimmed.to_string()));
        }
        return Ok(format!(
            "https://{}/.well-known/lnurlp/{}",
            parts[1], parts[0]
        ));
    }

    if trimmed.to_lowercase().starts_with("lnurl1") {
        let (hrp, data) = bech32::decode(&trimmed.to_lowercase())
            .map_err(|e| LnurlError::InvalidLnurl(e.to_string()))?;
        if hrp.as_str() != "lnurl" {
            return Err(LnurlError::InvalidLnurl(format!(
                "Unexpected prefix: {}",
                hrp.as_str()
            )));
        }
        return String::from_utf8(data).map_err(|e| LnurlError::InvalidLnurl(e.to_string()));
    }

    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        return Ok(trimmed.to_string());
    }

    Err(LnurlError::InvalidAddress(trimmed.to_string()))
}

/// Fetch payRequest metadata from the resolved endpoint.
pub async fn fetch_pay_request(endpoint: &str) -> Result<PayRequest, LnurlError> {
    let response = reqwest::get(endpoint)
        .await
        .map_err(|e| LnurlError::Fetch(e.to_string()))?;
    response
        .json::<PayRequest>()
        .await
        .map_err(|e| LnurlError::Parse(e.to_string()))
}

/// Request an invoice for `amount_msat` from the callback, enforcing the
/// endpoint's bounds first.
pub async fn request_invoice(
    pay_request: &PayRequest,
    amount_msat: u64,
) -> Result<String, LnurlError> {
    if amount_msat < pay_request.min_sendable || amount_msat > pay_request.max_sendable {
        return Err(LnurlError::AmountOutOfBounds {
            amount_msat,
            min: pay_request.min_sendable,
            max: pay_request.max_sendable,
        });
    }

    let separator = if pay_request.callback.contains('?') { '&' } else { '?' };
    let url = format!("{}{}amount={}", pay_request.callback, separator, amount_msat);

    let response = reqwest::get(&url)
        .await
        .map_err(|e| LnurlError::Fetch(e.to_string()))?;
    let invoice: InvoiceResponse = response
        .json()
        .await
        .map_err(|e| LnurlError::Parse(e.to_string()))?;
    Ok(invoice.pr)
}

/// Parse the amount in satoshis out of a bolt11 invoice's
/// human-readable part.
///
/// `lnbc<value><multiplier>...` with multipliers m (milli), u (micro),
/// n (nano), p (pico) applied to 1 BTC = 100_000_000 sat. An invoice
/// without an amount is an error for wallet purposes.
pub fn parse_invoice_amount_sat(invoice: &str) -> Result<u64, LnurlError> {
    let lowered = invoice.trim().to_lowercase();
    let stripped = lowered.strip_prefix("lightning:").unwrap_or(&lowered);

    let rest = stripped
        .strip_prefix("lnbc")
        .or_else(|| stripped.strip_prefix("lntbs"))
        .or_else(|| stripped.strip_prefix("lntb"))
        .ok_or_else(|| LnurlError::InvalidInvoice("Missing ln prefix".into()))?;

    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(LnurlError::InvalidInvoice(
            "Invoice carries no amount".into(),
        ));
    }
    let value: u64 = digits
        .parse()
        .map_err(|e| LnurlError::InvalidInvoice(format!("Bad amount: {}", e)))?;

    // 1 BTC = 100_000_000_000 msat; multipliers are m/u/n/p for
    // 1e-3 .. 1e-12 BTC. Pico amounts below one msat truncate.
    let msat = match rest.chars().nth(digits.len()) {
        Some('m') => value.checked_mul(100_000_000),
        Some('u') => value.checked_mul(100_000),
        Some('n') => value.checked_mul(100),
        Some('p') => Some(value / 10),
        // '1' is the bech32 separator: the value is whole BTC.
        _ => value.checked_mul(100_000_000_000),
    }
    .ok_or_else(|| LnurlError::InvalidInvoice("Amount overflow".into()))?;

    Ok(msat / 1000)
}
