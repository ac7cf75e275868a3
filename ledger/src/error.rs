//! Error types for ledger operations.

use crate::types::{Amount, TicketId};
use thiserror::Error;
use ticket_resale_runtime::StoreError;

/// Errors returned by registry, sale and ticket operations
///
/// Every mutating operation is all-or-nothing: when one of these is returned,
/// no state was changed and no payout was emitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Caller lacks the permission the operation requires
    #[error("Caller is not authorized for this operation")]
    Unauthorized,

    /// Sale configuration rejected at creation
    #[error("Invalid sale configuration: {0}")]
    InvalidConfig(String),

    /// Primary sales are closed
    #[error("Sale is not active")]
    NotActive,

    /// Every ticket has been sold
    #[error("Sale is sold out")]
    SoldOut,

    /// Payment below the required price
    #[error("Insufficient payment: required {required}, supplied {supplied}")]
    InsufficientPayment {
        /// Price to pay
        required: Amount,
        /// Amount offered
        supplied: Amount,
    },

    /// Caller does not own the ticket
    #[error("Caller does not own this ticket")]
    NotOwner,

    /// Caller is not the seller of the listing
    #[error("Caller is not the seller of this listing")]
    NotSeller,

    /// Ticket has no open resale order
    #[error("Ticket is not listed for sale")]
    NotListed,

    /// Asking price above the resale ceiling
    #[error("Resale price {asking} exceeds ceiling {ceiling}")]
    ResalePriceTooHigh {
        /// Requested price
        asking: Amount,
        /// Maximum allowed price
        ceiling: Amount,
    },

    /// Asking price of zero
    #[error("Price must be greater than zero")]
    InvalidPrice,

    /// Nothing accumulated to withdraw or claim
    #[error("Nothing to withdraw")]
    NothingToWithdraw,

    /// Ticket id was never minted
    #[error("Ticket {0} does not exist")]
    NoSuchTicket(TicketId),

    /// Buyer is the seller of the listing
    #[error("Cannot buy your own listing")]
    SelfPurchase,

    /// A counter or amount would overflow
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    /// No sale at the requested index or address
    #[error("Unknown sale")]
    UnknownSale,

    /// The runtime refused the operation (e.g. shutting down)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl LedgerError {
    /// Stable machine-readable name of the error kind
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::InvalidConfig(_) => "invalid_config",
            Self::NotActive => "not_active",
            Self::SoldOut => "sold_out",
            Self::InsufficientPayment { .. } => "insufficient_payment",
            Self::NotOwner => "not_owner",
            Self::NotSeller => "not_seller",
            Self::NotListed => "not_listed",
            Self::ResalePriceTooHigh { .. } => "resale_price_too_high",
            Self::InvalidPrice => "invalid_price",
            Self::NothingToWithdraw => "nothing_to_withdraw",
            Self::NoSuchTicket(_) => "no_such_ticket",
            Self::SelfPurchase => "self_purchase",
            Self::ArithmeticOverflow => "arithmetic_overflow",
            Self::UnknownSale => "unknown_sale",
            Self::Runtime(_) => "runtime",
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(error: StoreError) -> Self {
        Self::Runtime(error.to_string())
    }
}

/// Result alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
