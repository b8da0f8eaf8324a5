//! Receive via Lightning (mint)
//!
//! Quote -> invoice -> poll -> confirm. Confirmation is at-most-once per
//! quote: the in-memory minted-quote set is consulted under the engine
//! mutex and extended *before* the token event is published, so
//! concurrent confirmations of the same quote produce exactly one
//! `/v1/mint/bolt11` call and one token event.

use std::time::Duration;

use crate::mint::types::MintQuoteState;
use crate::nostr::kind;

use super::denominations::optimal_split;
use super::error::{WalletError, WalletResult};
use super::outputs::OutputPlan;
use super::types::{Direction, MintQuoteInfo};
use super::Wallet;

/// Poll cadence: start at one second, back off gently, cap at five.
const POLL_INITIAL: Duration = Duration::from_secs(1);
const POLL_FACTOR: f64 = 1.2;
const POLL_MAX: Duration = Duration::from_secs(5);

impl Wallet {
    /// Create a mint quote for `amount` and publish its encrypted
    /// tracker. Returns the invoice for the payer plus the quote handle;
    /// drive it with [`Wallet::await_mint_quote`] or poll manually and
    /// call [`Wallet::confirm_mint_quote`].
    pub async fn create_mint_quote(
        &self,
        amount: u64,
        mint_url: Option<&str>,
    ) -> WalletResult<MintQuoteInfo> {
        let mint_url = match mint_url {
            Some(url) => super::normalize_mint_url(url),
            None => self.primary_mint_url().await?,
        };

        let client = self.mint_client(&mint_url).await;
        let quote = client
            .create_mint_quote(amount, &self.config.unit)
            .await?;

        let tracker_event_id = match self
            .event_manager()
            .publish_quote_tracker(&quote.quote, &mint_url, amount, quote.expiry)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                // The tracker is recovery metadata, not a precondition.
                log::warn!("Could not publish quote tracker: {}", e);
                None
            }
        };

        log::info!(
            "Created mint quote {} for {} {} at {}",
            quote.quote,
            amount,
            self.config.unit,
            mint_url
        );

        Ok(MintQuoteInfo {
            quote_id: quote.quote,
            invoice: quote.request,
            amount,
            mint_url,
            expiry: quote.expiry,
            tracker_event_id,
        })
    }

    /// Poll the quote until it is payable-confirmed, then mint. Returns
    /// the minted amount. The deadline is the caller's; expiry of the
    /// quote itself also ends the wait.
    pub async fn await_mint_quote(
        &self,
        quote: &MintQuoteInfo,
        deadline: Duration,
    ) -> WalletResult<u64> {
        let client = self.mint_client(&quote.mint_url).await;
        let started = tokio::time::Instant::now();
        let mut interval = POLL_INITIAL;

        loop {
            if started.elapsed() >= deadline {
                return Err(WalletError::Timeout(format!(
                    "Quote {} unpaid after {:?}",
                    quote.quote_id, deadline
                )));
            }

            let status = client.get_mint_quote(&quote.quote_id).await?;
            match status.state {
                MintQuoteState::Paid => return self.confirm_mint_quote(quote).await,
                MintQuoteState::Issued => {
                    // Already minted (idempotent path).
                    return self.confirm_mint_quote(quote).await;
                }
                MintQuoteState::Unpaid => {
                    if let Some(expiry) = status.expiry {
                        if chrono::Utc::now().timestamp() as u64 > expiry {
                            if let Some(tracker_id) = &quote.tracker_event_id {
                                self.event_manager().delete_quote_tracker(tracker_id).await;
                            }
                            return Err(WalletError::QuoteExpired {
                                quote_id: quote.quote_id.clone(),
                            });
                        }
                    }
                }
            }

            tokio::time::sleep(interval).await;
            interval = Duration::from_secs_f64(
                (interval.as_secs_f64() * POLL_FACTOR).min(POLL_MAX.as_secs_f64()),
            );
        }
    }

    /// Mint the proofs for a paid quote and commit them to the log.
    /// Idempotent: a quote already in the minted set returns success
    /// without touching the mint.
    pub async fn confirm_mint_quote(&self, quote: &MintQuoteInfo) -> WalletResult<u64> {
        let _engine = self.op_lock.lock().await;

        if self.minted_quotes.lock().await.contains(&quote.quote_id) {
            log::debug!("Quote {} already minted; idempotent success", quote.quote_id);
            return Ok(quote.amount);
        }

        let client = self.mint_client(&quote.mint_url).await;
        let status = client.get_mint_quote(&quote.quote_id).await?;
        match status.state {
            MintQuoteState::Unpaid => {
                return Err(WalletError::QuoteUnpaid {
                    quote_id: quote.quote_id.clone(),
                })
            }
            MintQuoteState::Issued => {
                // Issued by an earlier run of this wallet; nothing left
                // to claim.
                self.minted_quotes.lock().await.insert(quote.quote_id.clone());
                return Ok(quote.amount);
            }
            MintQuoteState::Paid => {}
        }

        let (keyset, keys) = self.active_keyset(&quote.mint_url).await?;
        let mut denominations: Vec<u64> = keys.keys().copied().collect();
        denominations.sort_unstable();

        let split = optimal_split(quote.amount, &denominations);
        let plan = OutputPlan::for_split(&split, &keyset.id)?;
        debug_assert!(plan.is_ascending());

        let response = client.mint(&quote.quote_id, plan.messages.clone()).await?;
        let proofs = plan.unblind(
            &response.signatures,
            &keys,
            &quote.mint_url,
            &self.config.unit,
        )?;
        let minted: u64 = proofs.iter().map(|p| p.amount).sum();

        // Into the minted set before publishing: a concurrent
        // confirmation racing past the entry check must short-circuit
        // rather than mint twice.
        self.minted_quotes.lock().await.insert(quote.quote_id.clone());

        let manager = self.event_manager();
        let new_ids = manager
            .rollover(
                &proofs,
                &quote.mint_url,
                &self.config.unit,
                &[],
                Some(&quote.quote_id),
            )
            .await?;

        if let Some(tracker_id) = &quote.tracker_event_id {
            manager.delete_quote_tracker(tracker_id).await;
        }

        if let Err(e) = manager
            .publish_history(Direction::In, minted, &self.config.unit, 0, &new_ids, &[])
            .await
        {
            log::warn!("Could not publish receive history: {}", e);
        }

        log::info!(
            "Minted {} {} from quote {}",
            minted,
            self.config.unit,
            quote.quote_id
        );
        Ok(minted)
    }

    /// Open mint-quote trackers from the log (kind 7374), for resuming
    /// receives across restarts.
    pub async fn pending_quotes(&self) -> WalletResult<Vec<MintQuoteInfo>> {
        let filter = crate::nostr::event::Filter::new()
            .author(&self.keys.public_key_hex())
            .kind(kind::QUOTE);
        let events = self.pool.fetch(&[filter]).await;

        let mut quotes = Vec::new();
        for event in &events {
            let Ok(plaintext) = event.decrypt_content(&self.keys) else {
                continue;
            };
            let Ok(content) =
                serde_json::from_str::<super::types::QuoteTrackerContent>(&plaintext)
            else {
                continue;
            };
            quotes.push(MintQuoteInfo {
                quote_id: content.quote,
                invoice: String::new(),
                amount: content.amount,
                mint_url: content.mint,
                expiry: content.expiry,
                tracker_event_id: Some(event.id.clone()),
            });
        }
        Ok(quotes)
    }
}
