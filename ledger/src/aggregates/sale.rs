//! Sale ledger: the primary market of one event.
//!
//! Holds the sale's configuration, lifecycle phase, sold counter and the
//! revenue owed to the issuer. Purchases are split into a read-only check
//! ([`SaleState::check_purchase`]) and an infallible commit
//! ([`SaleState::commit_purchase`]) so the caller can mint the ticket in
//! between and still apply the purchase all-or-nothing. Resale fees follow
//! the same check / commit split.

use crate::error::LedgerError;
use crate::types::{Address, Amount, EventDetails, Phase, Revenue, SaleConfig, SaleStatus};
use serde::{Deserialize, Serialize};

/// Validated primary purchase, ready to commit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PurchasePlan {
    /// Price charged
    pub price: Amount,
    /// Overpayment to return
    pub refund: Amount,
    tickets_sold: u32,
    primary: Amount,
}

/// Validated resale fee, ready to credit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SecondaryFee {
    secondary: Amount,
}

/// State of a sale ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleState {
    /// Identity of this sale ledger
    pub address: Address,
    /// Identity of the bound ticket registry
    pub tickets_address: Address,
    /// Issuer that owns the sale
    pub issuer: Address,
    /// Immutable sale parameters
    pub config: SaleConfig,
    /// Stored phase
    pub phase: Phase,
    /// Tickets sold on the primary market
    pub tickets_sold: u32,
    /// Revenue not yet withdrawn
    pub revenue: Revenue,
    /// Issuer-maintained event details
    pub details: EventDetails,
}

impl SaleState {
    /// Creates an active sale with nothing sold
    #[must_use]
    pub fn new(address: Address, tickets_address: Address, issuer: Address, config: SaleConfig) -> Self {
        Self {
            address,
            tickets_address,
            issuer,
            config,
            phase: Phase::Active,
            tickets_sold: 0,
            revenue: Revenue::default(),
            details: EventDetails::default(),
        }
    }

    /// Derived status: sold out only while not closed
    #[must_use]
    pub fn status(&self) -> SaleStatus {
        match self.phase {
            Phase::Closed => SaleStatus::Closed,
            Phase::Active if self.tickets_sold >= self.config.capacity => SaleStatus::SoldOut,
            Phase::Active => SaleStatus::Active,
        }
    }

    /// Tickets still available on the primary market
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.config.capacity.saturating_sub(self.tickets_sold)
    }

    fn ensure_issuer(&self, caller: Address) -> Result<(), LedgerError> {
        if caller == self.issuer {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized)
        }
    }

    /// Validates a primary purchase without changing anything
    ///
    /// # Errors
    ///
    /// `NotActive` if closed, `SoldOut` if no ticket is left,
    /// `InsufficientPayment` if `payment` is below the unit price.
    pub fn check_purchase(&self, payment: Amount) -> Result<PurchasePlan, LedgerError> {
        if self.phase == Phase::Closed {
            return Err(LedgerError::NotActive);
        }
        if self.tickets_sold >= self.config.capacity {
            return Err(LedgerError::SoldOut);
        }

        let price = self.config.unit_price;
        let refund = payment
            .checked_sub(price)
            .ok_or(LedgerError::InsufficientPayment {
                required: price,
                supplied: payment,
            })?;

        let tickets_sold = self
            .tickets_sold
            .checked_add(1)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let primary = self
            .revenue
            .primary
            .checked_add(price)
            .ok_or(LedgerError::ArithmeticOverflow)?;

        Ok(PurchasePlan {
            price,
            refund,
            tickets_sold,
            primary,
        })
    }

    /// Applies a plan produced by [`SaleState::check_purchase`]
    pub const fn commit_purchase(&mut self, plan: PurchasePlan) {
        self.tickets_sold = plan.tickets_sold;
        self.revenue.primary = plan.primary;
    }

    /// Validates the issuer's share of a resale without crediting it
    ///
    /// Only the resale path of the owning event ledger calls this, with the
    /// bound ticket registry's identity.
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless `caller` is the bound ticket registry,
    /// `ArithmeticOverflow` if secondary revenue would overflow.
    pub(crate) fn check_secondary_fee(&self, caller: Address, amount: Amount) -> Result<SecondaryFee, LedgerError> {
        if caller != self.tickets_address {
            return Err(LedgerError::Unauthorized);
        }
        let secondary = self
            .revenue
            .secondary
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(SecondaryFee { secondary })
    }

    /// Credits a fee validated by [`SaleState::check_secondary_fee`]
    pub(crate) const fn commit_secondary_fee(&mut self, fee: SecondaryFee) {
        self.revenue.secondary = fee.secondary;
    }

    /// Zeroes both revenue counters and returns what they held
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless `caller` is the issuer, `NothingToWithdraw` if
    /// the total is zero.
    pub fn withdraw(&mut self, caller: Address) -> Result<Amount, LedgerError> {
        self.ensure_issuer(caller)?;

        let total = self.revenue.total().ok_or(LedgerError::ArithmeticOverflow)?;
        if total.is_zero() {
            return Err(LedgerError::NothingToWithdraw);
        }

        self.revenue = Revenue::default();
        Ok(total)
    }

    /// Sets the stored phase; setting the current phase again is allowed
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless `caller` is the issuer.
    pub fn set_phase(&mut self, caller: Address, phase: Phase) -> Result<(), LedgerError> {
        self.ensure_issuer(caller)?;
        self.phase = phase;
        Ok(())
    }

    /// Overwrites the event details
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless `caller` is the issuer.
    pub fn set_details(&mut self, caller: Address, details: EventDetails) -> Result<(), LedgerError> {
        self.ensure_issuer(caller)?;
        self.details = details;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ISSUER: Address = Address::repeat_byte(0x11);
    const SALE: Address = Address::repeat_byte(0x5a);
    const TICKETS: Address = Address::repeat_byte(0x7e);

    fn sale(capacity: u32) -> SaleState {
        SaleState::new(
            SALE,
            TICKETS,
            ISSUER,
            SaleConfig {
                name: "Summer Fest".to_string(),
                symbol: "SFT".to_string(),
                unit_price: Amount::new(100),
                capacity,
                resale_ceiling_percent: 150,
                resale_fee_bps: 1_000,
            },
        )
    }

    #[test]
    fn purchase_plan_commits_counters() {
        let mut state = sale(2);
        let plan = state.check_purchase(Amount::new(130)).unwrap();
        assert_eq!(plan.refund, Amount::new(30));
        // Checking alone changes nothing
        assert_eq!(state.tickets_sold, 0);

        state.commit_purchase(plan);
        assert_eq!(state.tickets_sold, 1);
        assert_eq!(state.revenue.primary, Amount::new(100));
        assert_eq!(state.remaining(), 1);
    }

    #[test]
    fn sold_out_is_derived_and_hidden_by_close() {
        let mut state = sale(1);
        let plan = state.check_purchase(Amount::new(100)).unwrap();
        state.commit_purchase(plan);

        assert_eq!(state.status(), SaleStatus::SoldOut);
        assert_eq!(state.check_purchase(Amount::new(100)), Err(LedgerError::SoldOut));

        state.set_phase(ISSUER, Phase::Closed).unwrap();
        assert_eq!(state.status(), SaleStatus::Closed);
        assert_eq!(state.check_purchase(Amount::new(100)), Err(LedgerError::NotActive));
    }

    #[test]
    fn underpayment_reports_both_amounts() {
        let state = sale(1);
        assert_eq!(
            state.check_purchase(Amount::new(99)),
            Err(LedgerError::InsufficientPayment {
                required: Amount::new(100),
                supplied: Amount::new(99),
            })
        );
    }

    #[test]
    fn only_ticket_registry_records_fees() {
        let mut state = sale(1);
        assert_eq!(
            state.check_secondary_fee(ISSUER, Amount::new(5)),
            Err(LedgerError::Unauthorized)
        );
        assert_eq!(
            state.check_secondary_fee(SALE, Amount::new(5)),
            Err(LedgerError::Unauthorized)
        );

        let fee = state.check_secondary_fee(TICKETS, Amount::new(5)).unwrap();
        // Checking alone credits nothing
        assert_eq!(state.revenue.secondary, Amount::ZERO);
        state.commit_secondary_fee(fee);
        assert_eq!(state.revenue.secondary, Amount::new(5));
    }

    #[test]
    fn fee_overflow_is_rejected() {
        let mut state = sale(1);
        state.revenue.secondary = Amount::new(u128::MAX);
        assert_eq!(
            state.check_secondary_fee(TICKETS, Amount::new(1)),
            Err(LedgerError::ArithmeticOverflow)
        );
    }

    #[test]
    fn withdraw_zeroes_revenue_once() {
        let mut state = sale(1);
        let fee = state.check_secondary_fee(TICKETS, Amount::new(15)).unwrap();
        state.commit_secondary_fee(fee);

        assert_eq!(state.withdraw(TICKETS), Err(LedgerError::Unauthorized));
        assert_eq!(state.withdraw(ISSUER), Ok(Amount::new(15)));
        assert_eq!(state.revenue, Revenue::default());
        assert_eq!(state.withdraw(ISSUER), Err(LedgerError::NothingToWithdraw));
    }

    #[test]
    fn details_are_issuer_only() {
        let mut state = sale(1);
        let details = EventDetails {
            date: "2025-07-01".to_string(),
            location: "Main Stage".to_string(),
            description: "Opening night".to_string(),
        };
        assert_eq!(
            state.set_details(SALE, details.clone()),
            Err(LedgerError::Unauthorized)
        );
        state.set_details(ISSUER, details.clone()).unwrap();
        assert_eq!(state.details, details);
    }
}
