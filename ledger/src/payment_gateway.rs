//! Outbound payments.
//!
//! Every transfer that leaves the ledger (refunds, resale proceeds, issuer
//! withdrawals, unpaid claims) goes through a [`PaymentGateway`]. The gateway
//! is the only place where code outside the ledger runs, and it may call back
//! into the ledger. Transfers are always started after the ledger has
//! committed its bookkeeping.

use crate::types::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Payment gateway error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Recipient refused the transfer
    #[error("Recipient {recipient} rejected the transfer")]
    Rejected {
        /// Refusing recipient
        recipient: Address,
    },
    /// Gateway could not process the transfer
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),
}

/// Why a payout is being made
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayoutReason {
    /// Overpayment returned to a buyer
    Refund,
    /// Seller's share of a resale
    ResaleProceeds,
    /// Issuer revenue withdrawal
    Withdrawal,
    /// Claim of a previously failed payout
    UnpaidClaim,
}

/// One outbound transfer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Who receives the money
    pub recipient: Address,
    /// How much
    pub amount: Amount,
    /// Why
    pub reason: PayoutReason,
}

impl Payout {
    /// Creates a payout
    #[must_use]
    pub const fn new(recipient: Address, amount: Amount, reason: PayoutReason) -> Self {
        Self {
            recipient,
            amount,
            reason,
        }
    }
}

/// Payment gateway trait
///
/// Note: Returns a boxed future instead of `async fn` to be dyn-compatible.
pub trait PaymentGateway: Send + Sync {
    /// Transfer `payout.amount` to `payout.recipient`
    ///
    /// # Errors
    ///
    /// Returns error if the transfer did not happen. The ledger then credits
    /// the amount to the recipient's unpaid balance.
    fn transfer(&self, payout: Payout) -> Pin<Box<dyn Future<Output = GatewayResult<()>> + Send + '_>>;
}

#[derive(Debug, Default)]
struct GatewayBook {
    balances: HashMap<Address, Amount>,
    transfers: Vec<Payout>,
    rejecting: HashSet<Address>,
}

/// In-memory gateway for development and testing
///
/// Keeps a balance per recipient and a log of completed transfers. Recipients
/// can be switched to reject transfers to simulate failing payouts.
#[derive(Clone, Debug, Default)]
pub struct InMemoryGateway {
    book: Arc<Mutex<GatewayBook>>,
}

impl InMemoryGateway {
    /// Creates an empty gateway
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared(&self) -> Arc<dyn PaymentGateway> {
        Arc::new(self.clone())
    }

    fn with_book<T>(&self, f: impl FnOnce(&mut GatewayBook) -> T) -> T {
        let mut book = self.book.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut book)
    }

    /// Make every future transfer to `recipient` fail
    pub fn reject(&self, recipient: Address) {
        self.with_book(|book| book.rejecting.insert(recipient));
    }

    /// Accept transfers to `recipient` again
    pub fn accept(&self, recipient: Address) {
        self.with_book(|book| book.rejecting.remove(&recipient));
    }

    /// Total received by `recipient`
    #[must_use]
    pub fn balance_of(&self, recipient: Address) -> Amount {
        self.with_book(|book| book.balances.get(&recipient).copied().unwrap_or_default())
    }

    /// Completed transfers, in completion order
    #[must_use]
    pub fn transfers(&self) -> Vec<Payout> {
        self.with_book(|book| book.transfers.clone())
    }

    /// Sum of all completed transfers
    #[must_use]
    pub fn total_paid(&self) -> Amount {
        self.with_book(|book| {
            book.transfers
                .iter()
                .fold(Amount::ZERO, |sum, payout| {
                    sum.checked_add(payout.amount).unwrap_or(Amount::new(u128::MAX))
                })
        })
    }
}

impl PaymentGateway for InMemoryGateway {
    fn transfer(&self, payout: Payout) -> Pin<Box<dyn Future<Output = GatewayResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.with_book(|book| {
                if book.rejecting.contains(&payout.recipient) {
                    tracing::warn!(
                        recipient = %payout.recipient,
                        amount = %payout.amount,
                        reason = ?payout.reason,
                        "Transfer rejected"
                    );
                    return Err(GatewayError::Rejected {
                        recipient: payout.recipient,
                    });
                }

                let balance = book.balances.entry(payout.recipient).or_default();
                *balance = balance
                    .checked_add(payout.amount)
                    .ok_or_else(|| GatewayError::Unavailable("recipient balance overflow".to_string()))?;

                tracing::debug!(
                    recipient = %payout.recipient,
                    amount = %payout.amount,
                    reason = ?payout.reason,
                    "Transfer completed"
                );
                book.transfers.push(payout);
                Ok(())
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transfers_credit_the_recipient() {
        let gateway = InMemoryGateway::new();
        let alice = Address::repeat_byte(0xa1);

        gateway
            .transfer(Payout::new(alice, Amount::new(40), PayoutReason::Refund))
            .await
            .unwrap();
        gateway
            .transfer(Payout::new(alice, Amount::new(2), PayoutReason::ResaleProceeds))
            .await
            .unwrap();

        assert_eq!(gateway.balance_of(alice), Amount::new(42));
        assert_eq!(gateway.transfers().len(), 2);
        assert_eq!(gateway.total_paid(), Amount::new(42));
    }

    #[tokio::test]
    async fn rejecting_recipients_fail_until_accepted() {
        let gateway = InMemoryGateway::new();
        let bob = Address::repeat_byte(0xb0);
        gateway.reject(bob);

        let payout = Payout::new(bob, Amount::new(7), PayoutReason::Withdrawal);
        let result = gateway.transfer(payout.clone()).await;
        assert_eq!(result, Err(GatewayError::Rejected { recipient: bob }));
        assert_eq!(gateway.balance_of(bob), Amount::ZERO);

        gateway.accept(bob);
        gateway.transfer(payout).await.unwrap();
        assert_eq!(gateway.balance_of(bob), Amount::new(7));
    }

    #[tokio::test]
    async fn clones_share_the_same_book() {
        let gateway = InMemoryGateway::new();
        let shared = gateway.shared();
        let carol = Address::repeat_byte(0xc0);

        shared
            .transfer(Payout::new(carol, Amount::new(5), PayoutReason::UnpaidClaim))
            .await
            .unwrap();

        assert_eq!(gateway.balance_of(carol), Amount::new(5));
    }
}
