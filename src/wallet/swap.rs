//! Swap operations
//!
//! The shared path for exchanging input proofs against fresh outputs on
//! the same mint, used by send planning, redemption and denomination
//! consolidation. The balance equation is `inputs - input_fee = outputs`;
//! anything else aborts before the mint sees the request.

use std::collections::BTreeMap;

use crate::mint::types::WireProof;

use super::denominations::{optimal_split, split_total};
use super::error::{WalletError, WalletResult};
use super::outputs::OutputPlan;
use super::types::Proof;
use super::Wallet;

impl Wallet {
    /// Swap `inputs` at their mint into the exact denominations of
    /// `target_split`. Inputs are submitted ascending; outputs are
    /// planned ascending. Returns the fresh proofs.
    pub(crate) async fn swap_to_split(
        &self,
        inputs: &[Proof],
        target_split: &BTreeMap<u64, u64>,
        mint_url: &str,
    ) -> WalletResult<Vec<Proof>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let fee_rates = self.fee_rates(mint_url).await?;
        let input_fee = super::fees::input_fee(inputs, &fee_rates);
        let input_total: u64 = inputs.iter().map(|p| p.amount).sum();
        let target_total = split_total(target_split);

        let expected = input_total
            .checked_sub(input_fee)
            .ok_or(WalletError::AmountMismatch {
                expected: input_total,
                actual: input_fee,
            })?;
        if target_total != expected {
            return Err(WalletError::AmountMismatch {
                expected,
                actual: target_total,
            });
        }

        let (keyset, keys) = self.active_keyset(mint_url).await?;
        let plan = OutputPlan::for_split(target_split, &keyset.id)?;
        debug_assert!(plan.is_ascending());

        let client = self.mint_client(mint_url).await;
        let response = client
            .swap(wire_inputs_ascending(inputs), plan.messages.clone())
            .await?;

        if response.signatures.len() != plan.pending.len() {
            return Err(WalletError::Internal(format!(
                "Swap returned {} signatures for {} outputs",
                response.signatures.len(),
                plan.pending.len()
            )));
        }

        plan.unblind(&response.signatures, &keys, mint_url, &self.config.unit)
    }

    /// Swap a mint's live proofs into the greedy-optimal denomination
    /// multiset when they differ. Returns the number of proofs after
    /// consolidation; a no-op when already optimal.
    pub async fn consolidate(&self, mint_url: &str) -> WalletResult<usize> {
        let mint_url = super::normalize_mint_url(mint_url);
        let _engine = self.op_lock.lock().await;

        let state = self.fetch_state(true).await?;
        let proofs: Vec<Proof> = state
            .proofs
            .iter()
            .filter(|p| p.mint == mint_url && p.unit == self.config.unit)
            .cloned()
            .collect();
        if proofs.is_empty() {
            return Ok(0);
        }

        let fee_rates = self.fee_rates(&mint_url).await?;
        let fee = super::fees::input_fee(&proofs, &fee_rates);
        let total: u64 = proofs.iter().map(|p| p.amount).sum();
        let target = total.saturating_sub(fee);
        if target == 0 {
            return Ok(proofs.len());
        }

        let (_, keys) = self.active_keyset(&mint_url).await?;
        let denominations: Vec<u64> = {
            let mut denoms: Vec<u64> = keys.keys().copied().collect();
            denoms.sort_unstable();
            denoms
        };
        let optimal = optimal_split(target, &denominations);

        let mut current: BTreeMap<u64, u64> = BTreeMap::new();
        for proof in &proofs {
            *current.entry(proof.amount).or_insert(0) += 1;
        }
        if current == optimal && fee == 0 {
            log::debug!("Proofs at {} already optimally denominated", mint_url);
            return Ok(proofs.len());
        }

        let new_proofs = self.swap_to_split(&proofs, &optimal, &mint_url).await?;
        let consumed_events = state.owning_events(&proofs);
        let new_count = new_proofs.len();

        self.event_manager()
            .rollover(&new_proofs, &mint_url, &self.config.unit, &consumed_events, None)
            .await?;

        log::info!(
            "Consolidated {} proof(s) into {} at {}",
            proofs.len(),
            new_count,
            mint_url
        );
        Ok(new_count)
    }
}

/// Inputs for a request body, ascending by amount per NUT-03.
pub(crate) fn wire_inputs_ascending(proofs: &[Proof]) -> Vec<WireProof> {
    let mut sorted: Vec<&Proof> = proofs.iter().collect();
    sorted.sort_by_key(|p| p.amount);
    sorted
        .into_iter()
        .map(|p| WireProof {
            id: p.id.clone(),
            amount: p.amount,
            secret: p.secret.clone(),
            c: p.c.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_inputs_ascending() {
        let proofs: Vec<Proof> = [8u64, 1, 64, 2]
            .iter()
            .map(|&amount| Proof {
                id: "00aa".into(),
                amount,
                secret: format!("s{}", amount),
                c: "02bb".into(),
                mint: "m".into(),
                unit: "sat".into(),
            })
            .collect();
        let wire = wire_inputs_ascending(&proofs);
        let amounts: Vec<u64> = wire.iter().map(|p| p.amount).collect();
        assert_eq!(amounts, vec![1, 2, 8, 64]);
        assert_eq!(wire[0].secret, "s1");
    }
}
