//! Melt: pay a Lightning invoice with proofs
//!
//! The mint quotes `amount + fee_reserve`; selection covers that plus the
//! input fee. Change outputs for the overshoot and NUT-08 blank outputs
//! for the returned Lightning fees go into one ascending output list.
//! Whatever the mint signs back (change and filled blanks) re-enters the
//! wallet in the same rollover that retires the consumed events.

use std::time::Duration;

use crate::lnurl;
use crate::mint::types::MeltQuoteState;

use super::denominations::optimal_split;
use super::error::{WalletError, WalletResult};
use super::fees;
use super::outputs::OutputPlan;
use super::swap::wire_inputs_ascending;
use super::types::{Direction, MeltQuoteInfo, Proof};
use super::Wallet;

/// How long to poll a melt stuck in PENDING before surfacing it.
const PENDING_DEADLINE: Duration = Duration::from_secs(60);
const PENDING_POLL: Duration = Duration::from_secs(2);

/// Outcome of a completed melt.
#[derive(Debug, Clone)]
pub struct MeltResult {
    /// Invoice amount paid.
    pub amount: u64,
    /// Actual cost above the invoice: Lightning fee kept by the mint
    /// plus input fees.
    pub fee_paid: u64,
    pub payment_preimage: Option<String>,
}

impl Wallet {
    /// Pay a bolt11 invoice from the mint with the largest balance (or
    /// an explicit one).
    pub async fn melt(
        &self,
        invoice: &str,
        mint_url: Option<&str>,
    ) -> WalletResult<MeltResult> {
        let _engine = self.op_lock.lock().await;
        self.melt_locked(invoice, mint_url).await
    }

    /// Melt body; assumes the engine mutex is held by the caller.
    pub(crate) async fn melt_locked(
        &self,
        invoice: &str,
        mint_url: Option<&str>,
    ) -> WalletResult<MeltResult> {
        let state = self.fetch_state(true).await?;
        self.rollover_flagged_events(&state).await;

        let mint_url = match mint_url {
            Some(url) => super::normalize_mint_url(url),
            None => {
                // Largest balance first; the quote decides whether it
                // suffices.
                state
                    .balance_by_mint()
                    .into_iter()
                    .max_by_key(|(_, balance)| *balance)
                    .map(|(mint, _)| mint)
                    .ok_or(WalletError::InsufficientBalance {
                        available: 0,
                        required: 1,
                    })?
            }
        };

        let client = self.mint_client(&mint_url).await;
        let quote_response = client
            .create_melt_quote(invoice, &self.config.unit)
            .await?;
        let quote = MeltQuoteInfo {
            quote_id: quote_response.quote.clone(),
            amount: quote_response.amount,
            fee_reserve: quote_response.fee_reserve,
            mint_url: mint_url.clone(),
            expiry: quote_response.expiry,
        };

        let need = quote.amount + quote.fee_reserve;
        let mint_proofs: Vec<Proof> = state
            .proofs
            .iter()
            .filter(|p| p.mint == mint_url && p.unit == self.config.unit)
            .cloned()
            .collect();

        let fee_rates = self.fee_rates(&mint_url).await?;
        let selection = fees::select_proofs(&mint_proofs, need, &fee_rates)?;
        let selected_total = selection.total();
        let change_amount = selection.change(need);

        // Change outputs plus blanks for the returned Lightning fees,
        // one ascending list. Roles survive by secret, though both sides
        // come back to the wallet.
        let (keyset, keys) = self.active_keyset(&mint_url).await?;
        let mut denominations: Vec<u64> = keys.keys().copied().collect();
        denominations.sort_unstable();

        let change_plan =
            OutputPlan::for_split(&optimal_split(change_amount, &denominations), &keyset.id)?;
        let blank_plan = OutputPlan::blanks(quote.fee_reserve, &keyset.id)?;
        let (outputs, _change_secrets) = change_plan.merge_with(blank_plan);
        debug_assert!(outputs.is_ascending());

        let melt_response = client
            .melt(
                &quote.quote_id,
                wire_inputs_ascending(&selection.proofs),
                (!outputs.is_empty()).then(|| outputs.messages.clone()),
            )
            .await?;

        let final_state = match melt_response.state {
            MeltQuoteState::Pending => self.poll_melt_pending(&client, &quote.quote_id).await?,
            _ => melt_response.clone(),
        };

        match final_state.state {
            MeltQuoteState::Paid => {}
            MeltQuoteState::Failed | MeltQuoteState::Unpaid => {
                return Err(WalletError::PaymentFailed {
                    state: format!("{:?}", final_state.state),
                });
            }
            MeltQuoteState::Pending => {
                return Err(WalletError::Timeout(format!(
                    "Melt {} still pending",
                    quote.quote_id
                )));
            }
        }

        // Unblind whatever change came back: planned change outputs and
        // blanks the mint filled with returned fees.
        let returned = final_state
            .change
            .as_deref()
            .or(melt_response.change.as_deref())
            .unwrap_or(&[]);
        let new_proofs = outputs.unblind(returned, &keys, &mint_url, &self.config.unit)?;
        let returned_total: u64 = new_proofs.iter().map(|p| p.amount).sum();

        // True cost above the invoice. A mint returning more than it was
        // given is a protocol violation, not free money.
        let fee_paid = selected_total
            .checked_sub(quote.amount + returned_total)
            .ok_or(WalletError::AmountMismatch {
                expected: selected_total,
                actual: quote.amount + returned_total,
            })?;

        let consumed_events = state.owning_events(&selection.proofs);
        let selected: std::collections::HashSet<String> =
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
        kept.extend(new_proofs);

        let manager = self.event_manager();
        let new_ids = manager
            .rollover(&kept, &mint_url, &self.config.unit, &consumed_events, None)
            .await?;

        if let Err(e) = manager
            .publish_history(
                Direction::Out,
                quote.amount,
                &self.config.unit,
                fee_paid,
                &new_ids,
                &consumed_events,
            )
            .await
        {
            log::warn!("Could not publish melt history: {}", e);
        }

        log::info!(
            "Melted {} {} via {} (fee {}, {} change proof(s))",
            quote.amount,
            self.config.unit,
            mint_url,
            fee_paid,
            returned.len()
        );

        Ok(MeltResult {
            amount: quote.amount,
            fee_paid,
            payment_preimage: final_state.payment_preimage,
        })
    }

    async fn poll_melt_pending(
        &self,
        client: &crate::mint::MintClient,
        quote_id: &str,
    ) -> WalletResult<crate::mint::types::MeltQuoteResponse> {
        let started = tokio::time::Instant::now();
        loop {
            let status = client.get_melt_quote(quote_id).await?;
            match status.state {
                MeltQuoteState::Pending if started.elapsed() < PENDING_DEADLINE => {
                    tokio::time::sleep(PENDING_POLL).await;
                }
                _ => return Ok(status),
            }
        }
    }

    /// Pay a Lightning address or LNURL. Resolves the endpoint, checks
    /// the sendable bounds, requests an invoice for `amount` and melts
    /// it. Returns the melt outcome.
    pub async fn send_to_lnurl(&self, address: &str, amount: u64) -> WalletResult<MeltResult> {
        if self.config.unit != "sat" && self.config.unit != "msat" {
            return Err(WalletError::DisallowedUnit {
                unit: self.config.unit.clone(),
            });
        }
        let amount_msat = if self.config.unit == "sat" {
            amount * 1000
        } else {
            amount
        };

        let endpoint = lnurl::resolve_lnurl_endpoint(address)?;
        let pay_request = lnurl::fetch_pay_request(&endpoint).await?;
        let invoice = lnurl::request_invoice(&pay_request, amount_msat).await?;

        // The endpoint must not hand us an invoice for a different
        // amount.
        let invoice_sat = lnurl::parse_invoice_amount_sat(&invoice)?;
        let expected_sat = amount_msat / 1000;
        if invoice_sat != expected_sat {
            return Err(WalletError::InvalidInvoice {
                reason: format!(
                    "LNURL endpoint returned invoice for {} sat, expected {}",
                    invoice_sat, expected_sat
                ),
            });
        }

        self.melt(&invoice, None).await
    }
}
