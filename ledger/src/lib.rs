//! Ticket issuance and capped resale ledger.
//!
//! A registry owner authorizes issuers. An authorized issuer creates a sale,
//! which gets its own ledger: a primary market selling up to `capacity`
//! tickets at a fixed price, and a resale market where holders list tickets
//! at no more than a configured multiple of the price they were first sold
//! at. Every resale pays the issuer a fee in basis points and the seller the
//! rest.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐      create_sale      ┌──────────────────────────┐
//! │  TicketingService  │ ────────────────────► │  EventLedger (per sale)  │
//! │  registry store    │                       │  ┌────────┐ ┌──────────┐ │
//! │  directory         │                       │  │  sale  │ │ tickets  │ │
//! └────────────────────┘                       │  └────────┘ └──────────┘ │
//!                                              └────────────┬─────────────┘
//!                                                           │ payouts (effects)
//!                                                           ▼
//!                                                 ┌───────────────────┐
//!                                                 │  PaymentGateway   │
//!                                                 └───────────────────┘
//! ```
//!
//! Each aggregate is a pure reducer run by a `Store`. State changes happen
//! entirely under the store's write lock; money leaves only through payout
//! effects that run after the lock is released, so a gateway that calls
//! back into the ledger sees the committed state.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ticket_resale_ledger::{Address, Amount, InMemoryGateway, SaleConfig, TicketingService};
//!
//! # async fn example() -> Result<(), ticket_resale_ledger::LedgerError> {
//! let owner = Address::repeat_byte(0x01);
//! let issuer = Address::repeat_byte(0x02);
//! let gateway = InMemoryGateway::new();
//! let service = TicketingService::with_defaults(owner, gateway.shared());
//!
//! service.set_authorization(owner, issuer, true).await?;
//! let ledger = service
//!     .create_sale(
//!         issuer,
//!         SaleConfig {
//!             name: "Summer Fest".to_string(),
//!             symbol: "SFT".to_string(),
//!             unit_price: Amount::new(100),
//!             capacity: 10,
//!             resale_ceiling_percent: 150,
//!             resale_fee_bps: 1_000,
//!         },
//!     )
//!     .await?;
//!
//! let purchase = ledger.purchase_ticket(Address::repeat_byte(0x03), Amount::new(100)).await?;
//! assert_eq!(purchase.ticket_id.get(), 1);
//! # Ok(())
//! # }
//! ```

pub mod aggregates;
pub mod config;
pub mod error;
pub mod metrics;
pub mod payment_gateway;
pub mod service;
pub mod types;

pub use aggregates::{
    LedgerAction, LedgerEnvironment, LedgerReceipt, LedgerReducer, LedgerState, RegistryAction,
    RegistryEnvironment, RegistryReceipt, RegistryReducer, RegistryState, SaleLimits,
};
pub use config::{ConfigError, LedgerConfig};
pub use error::{LedgerError, LedgerResult};
pub use payment_gateway::{GatewayError, InMemoryGateway, PaymentGateway, Payout, PayoutReason};
pub use service::{EventLedger, TicketingService};
pub use types::{
    Address, Amount, EventDetails, Listing, Phase, PrimaryPurchase, ResaleReceipt, Revenue,
    SaleConfig, SaleEntry, SaleId, SaleStatus, Ticket, TicketId, TicketMetadata,
};
