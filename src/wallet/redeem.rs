//! Redeem a received token
//!
//! Tokens from trusted mints are swapped for fresh proofs on the same
//! mint (the sender could double-spend until then). Tokens from unknown
//! mints are either rejected or routed through a cross-mint transfer to
//! the primary mint, per policy.

use super::error::{WalletError, WalletResult};
use super::fees;
use super::token::parse_token;
use super::types::Direction;
use super::Wallet;

impl Wallet {
    /// Redeem a `cashuA`/`cashuB` token into the wallet balance.
    /// Returns `(amount_added, unit)`; the amount is net of input fees.
    ///
    /// `auto_swap` controls the untrusted-mint policy: when set, foreign
    /// tokens are moved to the primary mint over Lightning; otherwise
    /// they are rejected.
    pub async fn redeem(&self, token: &str, auto_swap: bool) -> WalletResult<(u64, String)> {
        let parsed = parse_token(token)?;
        if parsed.proofs.is_empty() {
            return Err(WalletError::InvalidToken {
                reason: "Token carries no proofs".into(),
            });
        }
        if parsed.unit != self.config.unit {
            return Err(WalletError::DisallowedUnit {
                unit: parsed.unit.clone(),
            });
        }

        let mint_url = super::normalize_mint_url(&parsed.mint_url);
        if !self.is_trusted_mint(&mint_url).await {
            if !auto_swap {
                return Err(WalletError::UnknownMint { mint_url });
            }
            let target = self.primary_mint_url().await?;
            log::info!(
                "Token from untrusted mint {}; transferring to {}",
                mint_url,
                target
            );
            return self
                .redeem_via_transfer(&parsed.proofs, &mint_url, &target)
                .await;
        }

        let _engine = self.op_lock.lock().await;

        // Validate keyset membership before spending anything on a swap.
        let keysets = self.keysets(&mint_url).await?;
        for proof in &parsed.proofs {
            if !keysets.iter().any(|ks| ks.id == proof.id) {
                return Err(WalletError::InvalidToken {
                    reason: format!("Unknown keyset {} for mint {}", proof.id, mint_url),
                });
            }
        }

        let fee_rates = self.fee_rates(&mint_url).await?;
        let input_fee = fees::input_fee(&parsed.proofs, &fee_rates);
        let total = parsed.total();
        let output_amount =
            total
                .checked_sub(input_fee)
                .ok_or(WalletError::InsufficientBalance {
                    available: total,
                    required: input_fee,
                })?;

        let (_, keys) = self.active_keyset(&mint_url).await?;
        let mut denominations: Vec<u64> = keys.keys().copied().collect();
        denominations.sort_unstable();
        let split = super::denominations::optimal_split(output_amount, &denominations);

        let new_proofs = self
            .swap_to_split(&parsed.proofs, &split, &mint_url)
            .await?;

        let manager = self.event_manager();
        let new_ids = manager
            .rollover(&new_proofs, &mint_url, &self.config.unit, &[], None)
            .await?;

        if let Err(e) = manager
            .publish_history(
                Direction::In,
                output_amount,
                &self.config.unit,
                input_fee,
                &new_ids,
                &[],
            )
            .await
        {
            log::warn!("Could not publish redeem history: {}", e);
        }

        log::info!(
            "Redeemed {} {} at {} (fee {})",
            output_amount,
            self.config.unit,
            mint_url,
            input_fee
        );
        Ok((output_amount, self.config.unit.clone()))
    }
}
