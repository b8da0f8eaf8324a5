//! Blinded output planning
//!
//! Every request that carries blinded outputs emits them in ascending
//! amount order (NUT-03 privacy ordering). When one request mixes roles
//! (send + change, change + fee blanks), the plan keeps the combined list
//! sorted and remembers each role by the output's secret so the returned
//! signatures can be partitioned afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::crypto::{self, PendingOutput};
use crate::mint::types::{BlindSignature, BlindedMessage};

use super::error::{WalletError, WalletResult};
use super::types::Proof;

/// Blank outputs for a melt: the mint fills in amounts when returning
/// overpaid Lightning fees, so the requested amount is a placeholder.
const BLANK_OUTPUT_AMOUNT: u64 = 1;

/// A set of blinded outputs with their retained secrets, in request
/// order (ascending by amount).
#[derive(Debug, Clone, Default)]
pub struct OutputPlan {
    pub messages: Vec<BlindedMessage>,
    pub pending: Vec<PendingOutput>,
}

impl OutputPlan {
    /// Outputs for a denomination split, ascending.
    pub fn for_split(split: &BTreeMap<u64, u64>, keyset_id: &str) -> WalletResult<Self> {
        let mut plan = Self::default();
        // BTreeMap iterates ascending by denomination.
        for (&denom, &count) in split {
            for _ in 0..count {
                let (message, pending) = crypto::create_blinded_output(denom, keyset_id)?;
                plan.messages.push(message);
                plan.pending.push(pending);
            }
        }
        Ok(plan)
    }

    /// NUT-08 blank outputs: `max(ceil(log2(fee_reserve)), 1)` of them
    /// when a fee reserve exists, else none.
    pub fn blanks(fee_reserve: u64, keyset_id: &str) -> WalletResult<Self> {
        let count = blank_output_count(fee_reserve);
        let mut plan = Self::default();
        for _ in 0..count {
            let (message, pending) =
                crypto::create_blinded_output(BLANK_OUTPUT_AMOUNT, keyset_id)?;
            plan.messages.push(message);
            plan.pending.push(pending);
        }
        Ok(plan)
    }

    /// Merge plans into one ascending list, returning the merged plan and
    /// the secrets of `self`'s outputs for later partitioning.
    pub fn merge_with(self, other: OutputPlan) -> (OutputPlan, HashSet<String>) {
        let own_secrets: HashSet<String> =
            self.pending.iter().map(|p| p.secret.clone()).collect();

        let mut paired: Vec<(BlindedMessage, PendingOutput)> = self
            .messages
            .into_iter()
            .zip(self.pending)
            .chain(other.messages.into_iter().zip(other.pending))
            .collect();
        // Stable sort keeps equal-amount outputs in insertion order; the
        // mint never sees which side of the boundary an output is on.
        paired.sort_by_key(|(message, _)| message.amount);

        let mut merged = OutputPlan::default();
        for (message, pending) in paired {
            merged.messages.push(message);
            merged.pending.push(pending);
        }
        (merged, own_secrets)
    }

    pub fn total(&self) -> u64 {
        self.messages.iter().map(|m| m.amount).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Check the request-body invariant before submission.
    pub fn is_ascending(&self) -> bool {
        self.messages.windows(2).all(|w| w[0].amount <= w[1].amount)
    }

    /// Unblind returned signatures into proofs.
    ///
    /// Signatures correspond to outputs by index; a shorter response is
    /// accepted (melts only consume as many blanks as the returned fees
    /// need). Each proof's amount is the amount the mint signed, which
    /// for blanks differs from the placeholder.
    pub fn unblind(
        &self,
        signatures: &[BlindSignature],
        mint_keys: &HashMap<u64, String>,
        mint_url: &str,
        unit: &str,
    ) -> WalletResult<Vec<Proof>> {
        if signatures.len() > self.pending.len() {
            return Err(WalletError::Internal(format!(
                "Mint returned {} signatures for {} outputs",
                signatures.len(),
                self.pending.len()
            )));
        }

        let mut proofs = Vec::with_capacity(signatures.len());
        for (signature, pending) in signatures.iter().zip(&self.pending) {
            let mint_key_hex = mint_keys
                .get(&signature.amount)
                .ok_or(WalletError::MissingMintKey {
                    amount: signature.amount,
                })?;
            let mint_key = crypto::parse_point(mint_key_hex)?;
            let c_blinded = crypto::parse_point(&signature.c)?;
            let r = crypto::pending_blinding_factor(pending)?;
            let c = crypto::unblind_signature(&c_blinded, &r, &mint_key)?;

            proofs.push(Proof {
                id: signature.id.clone(),
                amount: signature.amount,
                secret: pending.secret.clone(),
                c: hex::encode(c.serialize()),
                mint: mint_url.to_string(),
                unit: unit.to_string(),
            });
        }
        Ok(proofs)
    }

    /// Split proofs into (matching, rest) by a secret set recorded at
    /// merge time.
    pub fn partition_by_secrets(
        proofs: Vec<Proof>,
        secrets: &HashSet<String>,
    ) -> (Vec<Proof>, Vec<Proof>) {
        proofs.into_iter().partition(|p| secrets.contains(&p.secret))
    }
}

/// Number of blank outputs for a fee reserve per NUT-08.
pub fn blank_output_count(fee_reserve: u64) -> usize {
    if fee_reserve == 0 {
        return 0;
    }
    let log = (fee_reserve as f64).log2().ceil() as usize;
    log.max(1)
}
