//! Event ledger aggregate: one sale ledger and its ticket registry.
//!
//! Both components of an event live in a single state so a primary purchase
//! (validate sale, mint, count) and a resale (quote, record fee, transfer
//! ownership) are applied in one reducer step. Nothing leaves the ledger
//! until that step is complete: refunds, resale proceeds and withdrawals are
//! returned as `Effect::Future` payouts and run by the store after the state
//! lock is released.
//!
//! Minting and fee recording are not actions. They happen only inside the
//! purchase and resale steps, with the component identities taken from the
//! state itself, so no caller can present them.
//!
//! A payout the gateway fails to deliver comes back as
//! [`LedgerAction::PayoutFailed`] and is credited to the recipient's unpaid
//! balance, claimable with [`LedgerAction::ClaimUnpaid`].

use crate::aggregates::sale::SaleState;
use crate::aggregates::tickets::TicketBookState;
use crate::error::LedgerError;
use crate::payment_gateway::{PaymentGateway, Payout, PayoutReason};
use crate::types::{
    Address, Amount, EventDetails, Phase, PrimaryPurchase, ResaleReceipt, SaleEntry, TicketId,
    TicketMetadata,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use ticket_resale_core::{effect::Effect, environment::Clock, reducer::Reducer, SmallVec};
use ticket_resale_macros::Action;

// ============================================================================
// Actions
// ============================================================================

/// Actions handled by an event ledger
#[derive(Action, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerAction {
    // ========== Sale ledger ==========
    /// Buy a ticket on the primary market
    #[command]
    PurchaseTicket {
        /// Buyer, becomes the ticket owner
        buyer: Address,
        /// Amount paid; excess is refunded
        payment: Amount,
    },

    /// Pay all accumulated revenue to the issuer
    #[command]
    WithdrawFunds {
        /// Must be the issuer
        caller: Address,
    },

    /// Open or close primary sales
    #[command]
    SetPhase {
        /// Must be the issuer
        caller: Address,
        /// New phase
        phase: Phase,
    },

    /// Overwrite event date, location and description
    #[command]
    SetEventDetails {
        /// Must be the issuer
        caller: Address,
        /// New details
        details: EventDetails,
    },

    // ========== Ticket registry ==========
    /// Open or replace a resale listing
    #[command]
    ListForSale {
        /// Must own the ticket
        caller: Address,
        /// Ticket to list
        ticket_id: TicketId,
        /// Price, at most the resale ceiling
        asking_price: Amount,
    },

    /// Withdraw a resale listing
    #[command]
    CancelListing {
        /// Must be the listing seller
        caller: Address,
        /// Listed ticket
        ticket_id: TicketId,
    },

    /// Buy a listed ticket
    #[command]
    PurchaseResale {
        /// Buyer, becomes the ticket owner
        buyer: Address,
        /// Listed ticket
        ticket_id: TicketId,
        /// Amount paid; excess is refunded
        payment: Amount,
    },

    /// Overwrite seat, type and date printed on a ticket
    #[command]
    SetTicketMetadata {
        /// Must be the issuer
        caller: Address,
        /// Ticket to update
        ticket_id: TicketId,
        /// New metadata
        metadata: TicketMetadata,
    },

    // ========== Payouts ==========
    /// Pay out the caller's unpaid balance
    #[command]
    ClaimUnpaid {
        /// Recipient of earlier failed payouts
        caller: Address,
    },

    /// A payout effect could not deliver its transfer
    #[event]
    PayoutFailed {
        /// The undelivered payout
        payout: Payout,
        /// Gateway error message
        reason: String,
    },
}

// ============================================================================
// State
// ============================================================================

/// Successful outcome of a ledger action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerReceipt {
    /// Primary purchase completed
    Purchased(PrimaryPurchase),
    /// Resale completed
    Resold(ResaleReceipt),
    /// Revenue or unpaid balance paid out
    PaidOut(Amount),
    /// Mutation applied, nothing to report
    Applied,
}

/// State of one event ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    /// Primary market
    pub sale: SaleState,
    /// Ownership and resale market
    pub tickets: TicketBookState,
    /// Payouts that failed, per recipient
    pub unpaid: HashMap<Address, Amount>,
    /// Outcome of the last command, taken by the caller under the store lock
    #[serde(skip)]
    pub last_outcome: Option<Result<LedgerReceipt, LedgerError>>,
}

impl LedgerState {
    /// Creates the ledger of a freshly created sale
    #[must_use]
    pub fn for_sale(entry: &SaleEntry) -> Self {
        Self {
            sale: SaleState::new(
                entry.sale_address,
                entry.tickets_address,
                entry.issuer,
                entry.config.clone(),
            ),
            tickets: TicketBookState::new(
                entry.tickets_address,
                entry.sale_address,
                entry.issuer,
                entry.config.resale_ceiling_percent,
                entry.config.resale_fee_bps,
            ),
            unpaid: HashMap::new(),
            last_outcome: None,
        }
    }

    /// Unpaid balance of `recipient`
    #[must_use]
    pub fn unpaid_balance(&self, recipient: Address) -> Amount {
        self.unpaid.get(&recipient).copied().unwrap_or_default()
    }

    /// Sum of all unpaid balances
    #[must_use]
    pub fn total_unpaid(&self) -> Option<Amount> {
        self.unpaid
            .values()
            .try_fold(Amount::ZERO, |sum, amount| sum.checked_add(*amount))
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for an event ledger
#[derive(Clone)]
pub struct LedgerEnvironment {
    /// Clock for listing timestamps
    pub clock: Arc<dyn Clock>,
    /// Gateway that executes payouts
    pub gateway: Arc<dyn PaymentGateway>,
}

impl LedgerEnvironment {
    /// Creates a new `LedgerEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { clock, gateway }
    }
}

// ============================================================================
// Reducer
// ============================================================================

type Outcome = Result<(LedgerReceipt, Vec<Payout>), LedgerError>;

/// Reducer for an event ledger
#[derive(Clone, Debug, Default)]
pub struct LedgerReducer;

impl LedgerReducer {
    /// Creates a new `LedgerReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Effect that delivers one payout and reports a failure back
    fn payout_effect(gateway: Arc<dyn PaymentGateway>, payout: Payout) -> Effect<LedgerAction> {
        Effect::future(async move {
            match gateway.transfer(payout.clone()).await {
                Ok(()) => None,
                Err(error) => Some(LedgerAction::PayoutFailed {
                    payout,
                    reason: error.to_string(),
                }),
            }
        })
    }

    fn purchase_ticket(state: &mut LedgerState, buyer: Address, payment: Amount) -> Outcome {
        let plan = state.sale.check_purchase(payment)?;
        let ticket_id = state
            .tickets
            .mint(state.sale.address, buyer, plan.price)?;
        state.sale.commit_purchase(plan);

        metrics::counter!("ledger.tickets.minted").increment(1);
        tracing::info!(
            %buyer,
            %ticket_id,
            price = %plan.price,
            refund = %plan.refund,
            sold = state.sale.tickets_sold,
            "Primary ticket purchased"
        );

        let payouts = refund(buyer, plan.refund).into_iter().collect();
        Ok((
            LedgerReceipt::Purchased(PrimaryPurchase {
                ticket_id,
                price: plan.price,
                refund: plan.refund,
            }),
            payouts,
        ))
    }

    fn purchase_resale(state: &mut LedgerState, buyer: Address, ticket_id: TicketId, payment: Amount) -> Outcome {
        let quote = state.tickets.quote_resale(buyer, ticket_id, payment)?;
        let fee = state
            .sale
            .check_secondary_fee(state.tickets.address, quote.fee)?;
        state.tickets.settle_resale(&quote)?;
        state.sale.commit_secondary_fee(fee);

        metrics::counter!("ledger.resales.completed").increment(1);
        metrics::counter!("ledger.fees.collected")
            .increment(u64::try_from(quote.fee.get()).unwrap_or(u64::MAX));
        tracing::info!(
            %ticket_id,
            seller = %quote.seller,
            %buyer,
            price = %quote.price,
            fee = %quote.fee,
            proceeds = %quote.proceeds,
            "Resale completed"
        );

        let mut payouts = Vec::with_capacity(2);
        if !quote.proceeds.is_zero() {
            payouts.push(Payout::new(quote.seller, quote.proceeds, PayoutReason::ResaleProceeds));
        }
        payouts.extend(refund(buyer, quote.refund));

        Ok((
            LedgerReceipt::Resold(ResaleReceipt {
                ticket_id,
                seller: quote.seller,
                buyer,
                price: quote.price,
                fee: quote.fee,
                proceeds: quote.proceeds,
                refund: quote.refund,
            }),
            payouts,
        ))
    }

    fn withdraw_funds(state: &mut LedgerState, caller: Address) -> Outcome {
        let amount = state.sale.withdraw(caller)?;

        metrics::counter!("ledger.withdrawals.total").increment(1);
        tracing::info!(issuer = %caller, %amount, "Revenue withdrawn");

        Ok((
            LedgerReceipt::PaidOut(amount),
            vec![Payout::new(caller, amount, PayoutReason::Withdrawal)],
        ))
    }

    fn claim_unpaid(state: &mut LedgerState, caller: Address) -> Outcome {
        let amount = state
            .unpaid
            .remove(&caller)
            .filter(|amount| !amount.is_zero())
            .ok_or(LedgerError::NothingToWithdraw)?;

        tracing::info!(recipient = %caller, %amount, "Unpaid balance claimed");

        Ok((
            LedgerReceipt::PaidOut(amount),
            vec![Payout::new(caller, amount, PayoutReason::UnpaidClaim)],
        ))
    }

    fn apply_payout_failure(state: &mut LedgerState, payout: &Payout, reason: &str) {
        let balance = state.unpaid.entry(payout.recipient).or_default();
        if let Some(credited) = balance.checked_add(payout.amount) {
            *balance = credited;
        } else {
            // Unreachable with real money supplies; keep the larger claim visible
            tracing::error!(recipient = %payout.recipient, amount = %payout.amount, "Unpaid balance overflow");
            *balance = Amount::new(u128::MAX);
        }

        metrics::counter!("ledger.payouts.failed").increment(1);
        tracing::warn!(
            recipient = %payout.recipient,
            amount = %payout.amount,
            reason = ?payout.reason,
            error = reason,
            "Payout failed, credited to unpaid balance"
        );
    }

    fn handle_command(state: &mut LedgerState, action: LedgerAction, env: &LedgerEnvironment) -> Outcome {
        let applied = |result: Result<(), LedgerError>| result.map(|()| (LedgerReceipt::Applied, Vec::new()));

        match action {
            LedgerAction::PurchaseTicket { buyer, payment } => Self::purchase_ticket(state, buyer, payment),
            LedgerAction::WithdrawFunds { caller } => Self::withdraw_funds(state, caller),
            LedgerAction::SetPhase { caller, phase } => applied(state.sale.set_phase(caller, phase)),
            LedgerAction::SetEventDetails { caller, details } => {
                applied(state.sale.set_details(caller, details))
            },
            LedgerAction::ListForSale {
                caller,
                ticket_id,
                asking_price,
            } => applied(
                state
                    .tickets
                    .list_for_sale(caller, ticket_id, asking_price, env.clock.now()),
            ),
            LedgerAction::CancelListing { caller, ticket_id } => {
                applied(state.tickets.cancel_listing(caller, ticket_id))
            },
            LedgerAction::PurchaseResale {
                buyer,
                ticket_id,
                payment,
            } => Self::purchase_resale(state, buyer, ticket_id, payment),
            LedgerAction::SetTicketMetadata {
                caller,
                ticket_id,
                metadata,
            } => applied(state.tickets.set_metadata(caller, ticket_id, metadata)),
            LedgerAction::ClaimUnpaid { caller } => Self::claim_unpaid(state, caller),
            LedgerAction::PayoutFailed { .. } => Ok((LedgerReceipt::Applied, Vec::new())),
        }
    }
}

/// Refund payout for a non-zero overpayment
fn refund(buyer: Address, amount: Amount) -> Option<Payout> {
    (!amount.is_zero()).then(|| Payout::new(buyer, amount, PayoutReason::Refund))
}

impl Reducer for LedgerReducer {
    type State = LedgerState;
    type Action = LedgerAction;
    type Environment = LedgerEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        // Feedback from payout effects never overwrites a caller's outcome
        if let LedgerAction::PayoutFailed { payout, reason } = &action {
            tracing::debug!(event = action.event_type(), "Applying payout failure");
            Self::apply_payout_failure(state, payout, reason);
            return SmallVec::new();
        }

        let name = action.name();
        match Self::handle_command(state, action, env) {
            Ok((receipt, payouts)) => {
                tracing::debug!(action = name, payouts = payouts.len(), "Ledger command applied");
                state.last_outcome = Some(Ok(receipt));
                payouts
                    .into_iter()
                    .map(|payout| Self::payout_effect(Arc::clone(&env.gateway), payout))
                    .collect()
            },
            Err(error) => {
                tracing::warn!(action = name, kind = error.kind(), %error, "Ledger command rejected");
                metrics::counter!("ledger.operations.rejected", "kind" => error.kind()).increment(1);
                state.last_outcome = Some(Err(error));
                SmallVec::new()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::payment_gateway::InMemoryGateway;
    use crate::types::{SaleConfig, SaleId, SaleStatus};
    use ticket_resale_testing::{assertions, test_clock, ReducerTest};

    const ISSUER: Address = Address::repeat_byte(0x11);
    const ALICE: Address = Address::repeat_byte(0xa1);
    const BOB: Address = Address::repeat_byte(0xb0);
    const SALE: Address = Address::repeat_byte(0x5a);
    const TICKETS: Address = Address::repeat_byte(0x7e);

    fn create_test_env() -> LedgerEnvironment {
        LedgerEnvironment::new(Arc::new(test_clock()), InMemoryGateway::new().shared())
    }

    fn ledger(capacity: u32) -> LedgerState {
        LedgerState::for_sale(&SaleEntry {
            sale_id: SaleId::new(0),
            issuer: ISSUER,
            sale_address: SALE,
            tickets_address: TICKETS,
            config: SaleConfig {
                name: "Summer Fest".to_string(),
                symbol: "SFT".to_string(),
                unit_price: Amount::new(100),
                capacity,
                resale_ceiling_percent: 150,
                resale_fee_bps: 1_000,
            },
            created_at: test_clock().now(),
        })
    }

    fn buy(buyer: Address, payment: u128) -> LedgerAction {
        LedgerAction::PurchaseTicket {
            buyer,
            payment: Amount::new(payment),
        }
    }

    fn first() -> TicketId {
        TicketId::FIRST
    }

    #[test]
    fn exact_payment_mints_without_payouts() {
        ReducerTest::new(LedgerReducer::new())
            .with_env(create_test_env())
            .given_state(ledger(10))
            .when_action(buy(ALICE, 100))
            .then_state(|state| {
                assert_eq!(state.sale.tickets_sold, 1);
                assert_eq!(state.sale.revenue.primary, Amount::new(100));
                assert_eq!(state.tickets.ticket(first()).unwrap().owner, ALICE);
                assert_eq!(
                    state.last_outcome,
                    Some(Ok(LedgerReceipt::Purchased(PrimaryPurchase {
                        ticket_id: first(),
                        price: Amount::new(100),
                        refund: Amount::ZERO,
                    })))
                );
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn overpayment_emits_refund() {
        ReducerTest::new(LedgerReducer::new())
            .with_env(create_test_env())
            .given_state(ledger(10))
            .when_action(buy(ALICE, 130))
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn last_seat_then_sold_out() {
        ReducerTest::new(LedgerReducer::new())
            .with_env(create_test_env())
            .given_state(ledger(1))
            .given_actions(vec![buy(ALICE, 100)])
            .when_action(buy(BOB, 100))
            .then_state(|state| {
                assert_eq!(state.sale.tickets_sold, 1);
                assert_eq!(state.sale.status(), SaleStatus::SoldOut);
                assert_eq!(state.tickets.total_supply(), 1);
                assert_eq!(state.last_outcome, Some(Err(LedgerError::SoldOut)));
            })
            .run();
    }

    #[test]
    fn closed_sale_rejects_purchases() {
        ReducerTest::new(LedgerReducer::new())
            .with_env(create_test_env())
            .given_state(ledger(10))
            .given_actions(vec![LedgerAction::SetPhase {
                caller: ISSUER,
                phase: Phase::Closed,
            }])
            .when_action(buy(ALICE, 100))
            .then_state(|state| {
                assert_eq!(state.last_outcome, Some(Err(LedgerError::NotActive)));
                assert_eq!(state.tickets.total_supply(), 0);
            })
            .run();
    }

    #[test]
    fn resale_commits_fee_and_ownership_before_payouts() {
        ReducerTest::new(LedgerReducer::new())
            .with_env(create_test_env())
            .given_state(ledger(10))
            .given_actions(vec![
                buy(ALICE, 100),
                LedgerAction::ListForSale {
                    caller: ALICE,
                    ticket_id: first(),
                    asking_price: Amount::new(150),
                },
            ])
            .when_action(LedgerAction::PurchaseResale {
                buyer: BOB,
                ticket_id: first(),
                payment: Amount::new(160),
            })
            .then_state(|state| {
                assert_eq!(state.tickets.ticket(first()).unwrap().owner, BOB);
                assert!(!state.tickets.is_listed(first()));
                assert_eq!(state.sale.revenue.secondary, Amount::new(15));
                let Some(Ok(LedgerReceipt::Resold(receipt))) = &state.last_outcome else {
                    panic!("expected resale receipt, got {:?}", state.last_outcome);
                };
                assert_eq!(receipt.proceeds, Amount::new(135));
                assert_eq!(receipt.refund, Amount::new(10));
            })
            .then_effects(|effects| {
                // Proceeds to the seller and the overpayment refund
                assertions::assert_effects_count(effects, 2);
            })
            .run();
    }

    #[test]
    fn failed_resale_changes_nothing() {
        ReducerTest::new(LedgerReducer::new())
            .with_env(create_test_env())
            .given_state(ledger(10))
            .given_actions(vec![
                buy(ALICE, 100),
                LedgerAction::ListForSale {
                    caller: ALICE,
                    ticket_id: first(),
                    asking_price: Amount::new(150),
                },
            ])
            .when_action(LedgerAction::PurchaseResale {
                buyer: BOB,
                ticket_id: first(),
                payment: Amount::new(149),
            })
            .then_state(|state| {
                assert!(matches!(
                    state.last_outcome,
                    Some(Err(LedgerError::InsufficientPayment { .. }))
                ));
                assert_eq!(state.tickets.ticket(first()).unwrap().owner, ALICE);
                assert!(state.tickets.is_listed(first()));
                assert_eq!(state.sale.revenue.secondary, Amount::ZERO);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn withdrawal_zeroes_revenue_and_emits_payout() {
        ReducerTest::new(LedgerReducer::new())
            .with_env(create_test_env())
            .given_state(ledger(10))
            .given_actions(vec![buy(ALICE, 100), buy(BOB, 100)])
            .when_action(LedgerAction::WithdrawFunds { caller: ISSUER })
            .then_state(|state| {
                assert_eq!(state.last_outcome, Some(Ok(LedgerReceipt::PaidOut(Amount::new(200)))));
                assert_eq!(state.sale.revenue.total(), Some(Amount::ZERO));
            })
            .then_effects(|effects| assertions::assert_effects_count(effects, 1))
            .run();
    }

    #[test]
    fn payout_failure_credits_unpaid_without_touching_outcome() {
        ReducerTest::new(LedgerReducer::new())
            .with_env(create_test_env())
            .given_state(ledger(10))
            .given_actions(vec![buy(ALICE, 100)])
            .when_action(LedgerAction::PayoutFailed {
                payout: Payout::new(BOB, Amount::new(42), PayoutReason::ResaleProceeds),
                reason: "rejected".to_string(),
            })
            .then_state(|state| {
                assert_eq!(state.unpaid_balance(BOB), Amount::new(42));
                assert!(matches!(
                    state.last_outcome,
                    Some(Ok(LedgerReceipt::Purchased(_)))
                ));
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn claim_unpaid_pays_once() {
        let mut state = ledger(10);
        state.unpaid.insert(BOB, Amount::new(42));

        ReducerTest::new(LedgerReducer::new())
            .with_env(create_test_env())
            .given_state(state)
            .given_actions(vec![LedgerAction::ClaimUnpaid { caller: BOB }])
            .when_action(LedgerAction::ClaimUnpaid { caller: BOB })
            .then_state(|state| {
                assert_eq!(state.unpaid_balance(BOB), Amount::ZERO);
                assert_eq!(state.last_outcome, Some(Err(LedgerError::NothingToWithdraw)));
            })
            .run();
    }

    #[test]
    fn action_names_and_kinds() {
        assert!(buy(ALICE, 1).is_command());
        let failed = LedgerAction::PayoutFailed {
            payout: Payout::new(BOB, Amount::new(1), PayoutReason::Refund),
            reason: String::new(),
        };
        assert!(failed.is_event());
        assert_eq!(failed.event_type(), "PayoutFailed.v1");
        assert_eq!(LedgerAction::WithdrawFunds { caller: ISSUER }.name(), "WithdrawFunds");
    }
}
