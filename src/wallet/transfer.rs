//! Cross-mint transfers
//!
//! Moving value between mints is an atomic pair: mint quote on the
//! destination, melt on the source to pay its invoice, then claim the
//! destination quote. The melt leg only goes out once the quote math is
//! safe; if the destination leg fails afterwards the source change
//! survived the melt rollover and the engine surfaces
//! [`WalletError::CrossMintPartial`] instead of losing funds.

use std::time::Duration;

use super::error::{WalletError, WalletResult};
use super::fees;
use super::swap::wire_inputs_ascending;
use super::types::{Direction, Proof};
use super::Wallet;

/// Deadline for the destination quote to observe the melt payment.
const TRANSFER_CLAIM_DEADLINE: Duration = Duration::from_secs(120);

impl Wallet {
    /// Move `amount` from one trusted mint to another over Lightning.
    /// Returns the amount credited at the destination.
    pub async fn transfer_to_mint(
        &self,
        amount: u64,
        from_mint: &str,
        to_mint: &str,
    ) -> WalletResult<u64> {
        let from_mint = super::normalize_mint_url(from_mint);
        let to_mint = super::normalize_mint_url(to_mint);
        if from_mint == to_mint {
            return Err(WalletError::Internal(
                "Source and destination mint are the same".into(),
            ));
        }

        let quote = self.create_mint_quote(amount, Some(&to_mint)).await?;

        {
            let _engine = self.op_lock.lock().await;
            self.melt_locked(&quote.invoice, Some(&from_mint)).await?;
        }

        // Source leg committed. From here on a failure leaves the value
        // claimable at the destination, not lost; surface it as partial.
        match self.await_mint_quote(&quote, TRANSFER_CLAIM_DEADLINE).await {
            Ok(minted) => Ok(minted),
            Err(e) => Err(WalletError::CrossMintPartial {
                minted: 0,
                detail: format!(
                    "Melt at {} paid quote {} but claiming at {} failed: {}",
                    from_mint, quote.quote_id, to_mint, e
                ),
            }),
        }
    }

    /// Redeem foreign proofs by melting them at their own mint to pay an
    /// invoice minted at `target_mint`.
    ///
    /// The melt quote runs *before* anything is spent: when the foreign
    /// proofs cannot cover invoice + reserve + input fee the operation
    /// aborts with no value moved.
    pub(crate) async fn redeem_via_transfer(
        &self,
        proofs: &[Proof],
        source_mint: &str,
        target_mint: &str,
    ) -> WalletResult<(u64, String)> {
        let client = self.mint_client(source_mint).await;

        let fee_rates = match client.get_keysets().await {
            Ok(keysets) => keysets
                .into_iter()
                .map(|ks| (ks.id, ks.input_fee_ppk))
                .collect(),
            Err(_) => Default::default(),
        };
        let input_fee = fees::input_fee(proofs, &fee_rates);
        let total: u64 = proofs.iter().map(|p| p.amount).sum();

        // Leave headroom for the Lightning fee reserve; anything unspent
        // comes back as change on the melt.
        let reserve_estimate = (total / 100).max(2);
        let invoice_amount = total
            .checked_sub(input_fee + reserve_estimate)
            .filter(|a| *a > 0)
            .ok_or(WalletError::InsufficientBalance {
                available: total,
                required: input_fee + reserve_estimate + 1,
            })?;

        let quote = self
            .create_mint_quote(invoice_amount, Some(target_mint))
            .await?;

        let melt_quote = client
            .create_melt_quote(&quote.invoice, &self.config.unit)
            .await?;
        let need = melt_quote.amount + melt_quote.fee_reserve + input_fee;
        if total < need {
            // Abort before spending: nothing has moved yet.
            return Err(WalletError::InsufficientBalance {
                available: total,
                required: need,
            });
        }

        let melt_response = client
            .melt(
                &melt_quote.quote,
                wire_inputs_ascending(proofs),
                None,
            )
            .await?;
        match melt_response.state {
            crate::mint::types::MeltQuoteState::Paid
            | crate::mint::types::MeltQuoteState::Pending => {}
            other => {
                return Err(WalletError::PaymentFailed {
                    state: format!("{:?}", other),
                });
            }
        }

        match self.await_mint_quote(&quote, TRANSFER_CLAIM_DEADLINE).await {
            Ok(minted) => {
                if let Err(e) = self
                    .event_manager()
                    .publish_history(Direction::In, minted, &self.config.unit, total - minted, &[], &[])
                    .await
                {
                    log::warn!("Could not publish transfer history: {}", e);
                }
                Ok((minted, self.config.unit.clone()))
            }
            Err(e) => Err(WalletError::CrossMintPartial {
                minted: 0,
                detail: format!(
                    "Foreign proofs melted at {} but claiming at {} failed: {}",
                    source_mint, target_mint, e
                ),
            }),
        }
    }
}
