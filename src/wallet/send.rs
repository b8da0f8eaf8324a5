//! Send as a serialized token
//!
//! Selects the minimal proofs covering the amount plus their input fee.
//! When the selection is not exact, one swap splits it into a send bundle
//! and a change bundle planned together as a single ascending output
//! list. The rollover keeps only the change; the send proofs leave the
//! wallet inside the returned token.

use std::collections::HashSet;

use super::denominations::optimal_split;
use super::error::{WalletError, WalletResult};
use super::fees;
use super::outputs::OutputPlan;
use super::swap::wire_inputs_ascending;
use super::token::{serialize_token, TokenVersion};
use super::types::{Direction, Proof};
use super::Wallet;

impl Wallet {
    /// Send `amount` as a v4 token from whichever trusted mint covers
    /// it.
    pub async fn send(&self, amount: u64) -> WalletResult<String> {
        self.send_with_options(amount, None, TokenVersion::V4, None).await
    }

    /// Send with an explicit source mint, token version and memo.
    pub async fn send_with_options(
        &self,
        amount: u64,
        mint_url: Option<&str>,
        version: TokenVersion,
        memo: Option<&str>,
    ) -> WalletResult<String> {
        if amount == 0 {
            return Err(WalletError::Internal("Cannot send zero".into()));
        }
        let _engine = self.op_lock.lock().await;

        let state = self.fetch_state(true).await?;
        self.rollover_flagged_events(&state).await;

        let unit_proofs: Vec<Proof> = state
            .proofs
            .iter()
            .filter(|p| p.unit == self.config.unit)
            .cloned()
            .collect();

        let mint_url = match mint_url {
            Some(url) => super::normalize_mint_url(url),
            None => select_mint_for_amount(&unit_proofs, amount, &self.config.unit)?,
        };

        let mint_proofs: Vec<Proof> = unit_proofs
            .iter()
            .filter(|p| p.mint == mint_url)
            .cloned()
            .collect();
        let mint_balance: u64 = mint_proofs.iter().map(|p| p.amount).sum();
        if mint_balance < amount {
            let total: u64 = unit_proofs.iter().map(|p| p.amount).sum();
            if total < amount {
                return Err(WalletError::InsufficientBalance {
                    available: total,
                    required: amount,
                });
            }
            return Err(WalletError::InsufficientBalanceAtMint {
                mint_url,
                available: mint_balance,
                required: amount,
            });
        }

        let fee_rates = self.fee_rates(&mint_url).await?;
        let selection = fees::select_proofs(&mint_proofs, amount, &fee_rates)?;
        let consumed_events = state.owning_events(&selection.proofs);

        let (send_proofs, change_proofs) = if selection.total() == amount {
            // Exact cover: the selected proofs travel as-is, no swap.
            (selection.proofs.clone(), Vec::new())
        } else {
            self.swap_for_send(&selection.proofs, amount, selection.fee, &mint_url)
                .await?
        };

        // Survivors of the consumed events that were not part of the
        // selection stay in the wallet alongside the change.
        let selected: HashSet<String> =
            selection.proofs.iter().map(|p| p.fingerprint()).collect();
        let mut kept: Vec<Proof> = state
            .proofs
            .iter()
            .filter(|p| {
                !selected.contains(&p.fingerprint())
                    && state
                        .proof_to_event
                        .get(&p.fingerprint())
                        .map(|id| consumed_events.contains(id))
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        kept.extend(change_proofs);

        let manager = self.event_manager();
        let new_ids = manager
            .rollover(&kept, &mint_url, &self.config.unit, &consumed_events, None)
            .await?;

        if let Err(e) = manager
            .publish_history(
                Direction::Out,
                amount,
                &self.config.unit,
                selection.fee,
                &new_ids,
                &consumed_events,
            )
            .await
        {
            log::warn!("Could not publish send history: {}", e);
        }

        log::info!(
            "Sending {} {} from {} ({} proof(s), fee {})",
            amount,
            self.config.unit,
            mint_url,
            send_proofs.len(),
            selection.fee
        );

        serialize_token(&send_proofs, &mint_url, &self.config.unit, version, memo)
    }

    /// Swap selected proofs into an exact send bundle plus change.
    /// Returns `(send_proofs, change_proofs)`.
    async fn swap_for_send(
        &self,
        selected: &[Proof],
        amount: u64,
        input_fee: u64,
        mint_url: &str,
    ) -> WalletResult<(Vec<Proof>, Vec<Proof>)> {
        let selected_total: u64 = selected.iter().map(|p| p.amount).sum();
        let output_total = selected_total
            .checked_sub(input_fee)
            .ok_or(WalletError::AmountMismatch {
                expected: selected_total,
                actual: input_fee,
            })?;
        let change_amount =
            output_total
                .checked_sub(amount)
                .ok_or(WalletError::InsufficientBalance {
                    available: output_total,
                    required: amount,
                })?;

        let (keyset, keys) = self.active_keyset(mint_url).await?;
        let mut denominations: Vec<u64> = keys.keys().copied().collect();
        denominations.sort_unstable();

        let send_plan = OutputPlan::for_split(&optimal_split(amount, &denominations), &keyset.id)?;
        let change_plan =
            OutputPlan::for_split(&optimal_split(change_amount, &denominations), &keyset.id)?;

        // One combined ascending list; the boundary survives by secret.
        let (merged, send_secrets) = send_plan.merge_with(change_plan);
        debug_assert!(merged.is_ascending());

        let client = self.mint_client(mint_url).await;
        let response = client
            .swap(wire_inputs_ascending(selected), merged.messages.clone())
            .await?;

        let proofs = merged.unblind(&response.signatures, &keys, mint_url, &self.config.unit)?;
        let (send_proofs, change_proofs) =
            OutputPlan::partition_by_secrets(proofs, &send_secrets);

        let send_total: u64 = send_proofs.iter().map(|p| p.amount).sum();
        if send_total != amount {
            return Err(WalletError::AmountMismatch {
                expected: amount,
                actual: send_total,
            });
        }
        Ok((send_proofs, change_proofs))
    }
}

/// Pick the mint with the highest balance that can cover `amount`.
fn select_mint_for_amount(
    proofs: &[Proof],
    amount: u64,
    unit: &str,
) -> WalletResult<String> {
    let mut balances: std::collections::HashMap<&str, u64> = std::collections::HashMap::new();
    for proof in proofs {
        *balances.entry(proof.mint.as_str()).or_default() += proof.amount;
    }

    balances
        .iter()
        .filter(|(_, &balance)| balance >= amount)
        .max_by_key(|(_, &balance)| balance)
        .map(|(mint, _)| mint.to_string())
        .ok_or_else(|| {
            let total: u64 = balances.values().sum();
            log::debug!(
                "No single mint covers {} {} (total {})",
                amount,
                unit,
                total
            );
            WalletError::InsufficientBalance {
                available: total,
                required: amount,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proof(amount: u64, mint: &str, tag: u8) -> Proof {
        Proof {
            id: "00aa".into(),
            amount,
            secret: hex::encode([tag; 32]),
            c: "02bb".into(),
            mint: mint.into(),
            unit: "sat".into(),
        }
    }

    #[test]
    fn test_select_mint_prefers_highest_balance() {
        let proofs = vec![
            proof(64, "https://mint.a", 1),
            proof(128, "https://mint.b", 2),
            proof(8, "https://mint.a", 3),
        ];
        assert_eq!(
            select_mint_for_amount(&proofs, 100, "sat").unwrap(),
            "https://mint.b"
        );
        // Both cover 50; b has more.
        assert_eq!(
            select_mint_for_amount(&proofs, 50, "sat").unwrap(),
            "https://mint.b"
        );
    }

    #[test]
    fn test_select_mint_insufficient_everywhere() {
        let proofs = vec![proof(4, "https://mint.a", 1)];
        assert!(matches!(
            select_mint_for_amount(&proofs, 100, "sat"),
            Err(WalletError::InsufficientBalance {
                available: 4,
                required: 100
            })
        ));
    }
}
