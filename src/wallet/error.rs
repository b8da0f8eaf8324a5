//! Wallet error types
//!
//! Typed error handling for context preservation and error matching.
//! Transport and timing errors are recovered locally where possible;
//! value-safety errors (anything that could lose or duplicate proofs)
//! surface immediately and abort the operation before the rollover
//! commit point.

use std::fmt;

use crate::crypto::keys::KeyError;
use crate::crypto::nip44::Nip44Error;
use crate::crypto::CryptoError;
use crate::lnurl::LnurlError;
use crate::mint::MintError;
use crate::nostr::RelayError;

/// NUT error codes from the Cashu specification. These map to
/// standardized error responses from mints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NutErrorCode {
    TokenAlreadySpent = 11001,
    TokenPending = 11002,
    TransactionUnbalanced = 11003,
    UnsupportedUnit = 11004,
    MintingDisabled = 11005,
    QuoteNotPaid = 11006,
    QuoteExpired = 11007,
    QuotePending = 11008,
    BlindedMessageAlreadySigned = 11009,
    AmountOutOfLimitRange = 11010,
    DuplicateInputs = 11011,
    DuplicateOutputs = 11012,
    MultipleUnits = 11013,
    UnitMismatch = 11014,
    LightningError = 20001,
    InvoiceAlreadyPaid = 20002,
    Unknown = 65535,
}

impl NutErrorCode {
    pub fn from_code(code: u16) -> Self {
        match code {
            11001 => Self::TokenAlreadySpent,
            11002 => Self::TokenPending,
            11003 => Self::TransactionUnbalanced,
            11004 => Self::UnsupportedUnit,
            11005 => Self::MintingDisabled,
            11006 => Self::QuoteNotPaid,
            11007 => Self::QuoteExpired,
            11008 => Self::QuotePending,
            11009 => Self::BlindedMessageAlreadySigned,
            11010 => Self::AmountOutOfLimitRange,
            11011 => Self::DuplicateInputs,
            11012 => Self::DuplicateOutputs,
            11013 => Self::MultipleUnits,
            11014 => Self::UnitMismatch,
            20001 => Self::LightningError,
            20002 => Self::InvoiceAlreadyPaid,
            _ => Self::Unknown,
        }
    }

    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Whether a retry can plausibly succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TokenPending | Self::QuotePending | Self::LightningError | Self::Unknown
        )
    }

    /// Whether the inputs involved are permanently unusable.
    pub fn is_token_lost(&self) -> bool {
        matches!(self, Self::TokenAlreadySpent | Self::BlindedMessageAlreadySigned)
    }
}

impl fmt::Display for NutErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenAlreadySpent => write!(f, "Token already spent (11001)"),
            Self::TokenPending => write!(f, "Token pending (11002)"),
            Self::TransactionUnbalanced => write!(f, "Transaction unbalanced (11003)"),
            Self::UnsupportedUnit => write!(f, "Unsupported unit (11004)"),
            Self::MintingDisabled => write!(f, "Minting disabled (11005)"),
            Self::QuoteNotPaid => write!(f, "Quote not paid (11006)"),
            Self::QuoteExpired => write!(f, "Quote expired (11007)"),
            Self::QuotePending => write!(f, "Quote pending (11008)"),
            Self::BlindedMessageAlreadySigned => {
                write!(f, "Blinded message already signed (11009)")
            }
            Self::AmountOutOfLimitRange => write!(f, "Amount out of limit range (11010)"),
            Self::DuplicateInputs => write!(f, "Duplicate inputs (11011)"),
            Self::DuplicateOutputs => write!(f, "Duplicate outputs (11012)"),
            Self::MultipleUnits => write!(f, "Multiple units (11013)"),
            Self::UnitMismatch => write!(f, "Unit mismatch (11014)"),
            Self::LightningError => write!(f, "Lightning error (20001)"),
            Self::InvoiceAlreadyPaid => write!(f, "Invoice already paid (20002)"),
            Self::Unknown => write!(f, "Unknown error (65535)"),
        }
    }
}

/// Wallet error type.
#[derive(Debug)]
pub enum WalletError {
    // Policy
    InsufficientBalance { available: u64, required: u64 },
    InsufficientBalanceAtMint { mint_url: String, available: u64, required: u64 },
    UnknownMint { mint_url: String },
    DisallowedUnit { unit: String },
    InvalidInvoice { reason: String },
    InvalidToken { reason: String },

    // Quote lifecycle
    QuoteExpired { quote_id: String },
    QuoteUnpaid { quote_id: String },
    PaymentFailed { state: String },

    // Value safety
    AmountMismatch { expected: u64, actual: u64 },
    MissingMintKey { amount: u64 },
    /// The destination leg of a cross-mint swap failed; source change
    /// proofs survived and the transfer can be retried.
    CrossMintPartial { minted: u64, detail: String },

    // Collaborators
    Crypto(CryptoError),
    Cipher(Nip44Error),
    Keys(KeyError),
    Mint(MintError),
    Relay(RelayError),
    Lnurl(LnurlError),

    // Control flow
    Timeout(String),
    Cancelled,
    Internal(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientBalance { available, required } => {
                write!(f, "Insufficient balance: need {}, have {}", required, available)
            }
            Self::InsufficientBalanceAtMint {
                mint_url,
                available,
                required,
            } => write!(
                f,
                "Insufficient balance at {}: need {}, have {}",
                mint_url, required, available
            ),
            Self::UnknownMint { mint_url } => write!(f, "Mint not trusted: {}", mint_url),
            Self::DisallowedUnit { unit } => write!(f, "Unsupported currency unit: {}", unit),
            Self::InvalidInvoice { reason } => write!(f, "Invalid Lightning invoice: {}", reason),
            Self::InvalidToken { reason } => write!(f, "Invalid token: {}", reason),
            Self::QuoteExpired { quote_id } => write!(f, "Quote expired: {}", quote_id),
            Self::QuoteUnpaid { quote_id } => write!(f, "Quote unpaid: {}", quote_id),
            Self::PaymentFailed { state } => write!(f, "Lightning payment failed, state {}", state),
            Self::AmountMismatch { expected, actual } => {
                write!(f, "Amount mismatch: expected {}, got {}", expected, actual)
            }
            Self::MissingMintKey { amount } => {
                write!(f, "Mint has no key for denomination {}", amount)
            }
            Self::CrossMintPartial { minted, detail } => write!(
                f,
                "Cross-mint transfer incomplete ({} minted so far): {}",
                minted, detail
            ),
            Self::Crypto(e) => write!(f, "Cryptographic error: {}", e),
            Self::Cipher(e) => write!(f, "Encryption error: {}", e),
            Self::Keys(e) => write!(f, "Key error: {}", e),
            Self::Mint(e) => write!(f, "Mint error: {}", e),
            Self::Relay(e) => write!(f, "Relay error: {}", e),
            Self::Lnurl(e) => write!(f, "LNURL error: {}", e),
            Self::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Self::Cancelled => write!(f, "Operation cancelled"),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Crypto(e) => Some(e),
            Self::Cipher(e) => Some(e),
            Self::Keys(e) => Some(e),
            Self::Mint(e) => Some(e),
            Self::Relay(e) => Some(e),
            Self::Lnurl(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CryptoError> for WalletError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

impl From<Nip44Error> for WalletError {
    fn from(e: Nip44Error) -> Self {
        Self::Cipher(e)
    }
}

impl From<KeyError> for WalletError {
    fn from(e: KeyError) -> Self {
        Self::Keys(e)
    }
}

impl From<MintError> for WalletError {
    fn from(e: MintError) -> Self {
        Self::Mint(e)
    }
}

impl From<RelayError> for WalletError {
    fn from(e: RelayError) -> Self {
        Self::Relay(e)
    }
}

impl From<LnurlError> for WalletError {
    fn from(e: LnurlError) -> Self {
        Self::Lnurl(e)
    }
}

/// Result alias for wallet operations.
pub type WalletResult<T> = Result<T, WalletError>;

impl WalletError {
    /// NUT error code if this error carries one.
    pub fn nut_error_code(&self) -> Option<NutErrorCode> {
        match self {
            Self::QuoteExpired { .. } => Some(NutErrorCode::QuoteExpired),
            Self::QuoteUnpaid { .. } => Some(NutErrorCode::QuoteNotPaid),
            Self::Mint(e) => e.nut_code().map(NutErrorCode::from_code),
            _ => None,
        }
    }

    pub fn is_insufficient_funds(&self) -> bool {
        matches!(
            self,
            Self::InsufficientBalance { .. } | Self::InsufficientBalanceAtMint { .. }
        )
    }

    pub fn is_token_spent(&self) -> bool {
        match self {
            Self::Mint(e) => e.is_token_spent(),
            _ => false,
        }
    }

    pub fn is_quote_expired(&self) -> bool {
        match self {
            Self::QuoteExpired { .. } => true,
            Self::Mint(e) => e.is_quote_expired(),
            _ => false,
        }
    }

    /// Transport-level failure: recoverable locally by retrying.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Relay(RelayError::Unreachable(_))
                | Self::Relay(RelayError::Timeout)
                | Self::Mint(MintError::Network(_))
                | Self::Timeout(_)
        )
    }

    /// Value-safety failure: must abort before the rollover commit.
    pub fn is_value_safety(&self) -> bool {
        matches!(
            self,
            Self::AmountMismatch { .. }
                | Self::MissingMintKey { .. }
                | Self::Crypto(_)
                | Self::CrossMintPartial { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nut_code_round_trip() {
        for code in [11001u16, 11007, 20001, 42] {
            let parsed = NutErrorCode::from_code(code);
            if code == 42 {
                assert_eq!(parsed, NutErrorCode::Unknown);
            } else {
                assert_eq!(parsed.code(), code);
            }
        }
    }

    #[test]
    fn test_recoverability() {
        assert!(NutErrorCode::QuotePending.is_recoverable());
        assert!(!NutErrorCode::QuoteExpired.is_recoverable());
        assert!(NutErrorCode::TokenAlreadySpent.is_token_lost());
        assert!(!NutErrorCode::TokenPending.is_token_lost());
    }

    #[test]
    fn test_predicates() {
        let err = WalletError::InsufficientBalance {
            available: 10,
            required: 100,
        };
        assert!(err.is_insufficient_funds());
        assert!(!err.is_value_safety());

        let err = WalletError::Mint(MintError::Status {
            status: 400,
            body: String::new(),
            code: Some(11001),
        });
        assert!(err.is_token_spent());
        assert_eq!(err.nut_error_code(), Some(NutErrorCode::TokenAlreadySpent));

        let err = WalletError::AmountMismatch {
            expected: 10,
            actual: 9,
        };
        assert!(err.is_value_safety());

        let err = WalletError::Relay(RelayError::Timeout);
        assert!(err.is_connection_error());
    }
}
