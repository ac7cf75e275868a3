//! Aggregates of the ticket resale ledger.
//!
//! - [`registry`]: issuer authorization and the sale directory (its own store)
//! - [`ledger`]: one event's sale ledger and ticket registry (one store per event)
//! - [`sale`] and [`tickets`]: the two components composed by [`ledger`]

pub mod ledger;
pub mod registry;
pub mod sale;
pub mod tickets;

pub use ledger::{LedgerAction, LedgerEnvironment, LedgerReceipt, LedgerReducer, LedgerState};
pub use registry::{
    RegistryAction, RegistryEnvironment, RegistryReceipt, RegistryReducer, RegistryState, SaleLimits,
};
pub use sale::SaleState;
pub use tickets::{ResaleQuote, TicketBookState};
