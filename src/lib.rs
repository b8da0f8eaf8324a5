//! # cashew
//!
//! A stateless Chaumian ecash wallet whose persistent state lives on
//! Nostr relays (NIP-60) rather than on local disk. Given only a
//! long-lived signing key and a relay set, the wallet can:
//!
//! - receive value by paying a mint's Lightning invoice and obtaining
//!   blind-signed proofs,
//! - send value as a serialized `cashuA`/`cashuB` token,
//! - redeem received tokens by swapping them at the mint,
//! - pay Lightning invoices and addresses by melting proofs,
//! - reconstruct its complete balance from the relay network alone.
//!
//! Every state change commits through a durability rollover: the new
//! encrypted token event is published first and the superseded events
//! are deleted second, so no interruption point loses the newest proof
//! set.
//!
//! ```no_run
//! use cashew::{Wallet, WalletConfig, WalletKeys};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let keys = WalletKeys::parse("nsec1...")?;
//! let wallet = Wallet::connect(
//!     keys,
//!     WalletConfig {
//!         mint_urls: vec!["https://mint.example.com".into()],
//!         relay_urls: vec!["wss://relay.example.com".into()],
//!         ..Default::default()
//!     },
//! )
//! .await?;
//!
//! let quote = wallet.create_mint_quote(1000, None).await?;
//! println!("Pay this invoice: {}", quote.invoice);
//! wallet
//!     .await_mint_quote(&quote, std::time::Duration::from_secs(300))
//!     .await?;
//!
//! let token = wallet.send(100).await?;
//! println!("Give this to the recipient: {}", token);
//! # Ok(())
//! # }
//! ```

pub mod crypto;
pub mod lnurl;
pub mod mint;
pub mod nostr;
pub mod wallet;

pub use crypto::keys::WalletKeys;
pub use mint::{MintClient, MintError};
pub use nostr::{RelayError, RelayPool};
pub use wallet::error::{WalletError, WalletResult};
pub use wallet::melt::MeltResult;
pub use wallet::token::{parse_token, serialize_token, TokenVersion};
pub use wallet::types::{HistoryEntry, MintQuoteInfo, Proof, WalletState};
pub use wallet::{Wallet, WalletConfig};
