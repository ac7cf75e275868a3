//! Service facade over the registry and event ledger stores.
//!
//! [`TicketingService`] owns the registry store and one [`EventLedger`] per
//! created sale. Every operation takes the caller identity explicitly and
//! returns `Result<_, LedgerError>`.
//!
//! Mutations go through [`Store::send_with`], which reads the reducer's
//! outcome under the same write lock that applied it. The facade then waits
//! for the payouts emitted by that call, so when a method returns, its
//! refunds and transfers have been attempted and any failure has already
//! been credited to an unpaid balance.

use crate::aggregates::{
    LedgerAction, LedgerEnvironment, LedgerReceipt, LedgerReducer, LedgerState, RegistryAction,
    RegistryEnvironment, RegistryReceipt, RegistryReducer, RegistryState, SaleLimits,
};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::payment_gateway::PaymentGateway;
use crate::types::{
    Address, Amount, EventDetails, Listing, Phase, PrimaryPurchase, ResaleReceipt, Revenue,
    SaleConfig, SaleEntry, SaleId, SaleStatus, TicketId, TicketMetadata,
};
use std::sync::Arc;
use std::time::Duration;
use ticket_resale_core::environment::{Clock, SystemClock};
use ticket_resale_runtime::{Store, StoreConfig};
use tokio::sync::RwLock;

/// Store running one event ledger
pub type LedgerStore = Store<LedgerState, LedgerAction, LedgerEnvironment, LedgerReducer>;

/// Store running the registry
pub type RegistryStore = Store<RegistryState, RegistryAction, RegistryEnvironment, RegistryReducer>;

fn unexpected(receipt: &LedgerReceipt) -> LedgerError {
    LedgerError::Runtime(format!("unexpected ledger receipt: {receipt:?}"))
}

// ============================================================================
// Event ledger handle
// ============================================================================

/// Handle to the sale ledger and ticket registry of one event
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct EventLedger {
    entry: Arc<SaleEntry>,
    store: LedgerStore,
}

impl std::fmt::Debug for EventLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLedger")
            .field("sale_id", &self.entry.sale_id)
            .field("sale_address", &self.entry.sale_address)
            .finish_non_exhaustive()
    }
}

impl EventLedger {
    /// Starts the store for a directory entry
    #[must_use]
    pub fn new(entry: SaleEntry, env: LedgerEnvironment, store_config: StoreConfig) -> Self {
        let state = LedgerState::for_sale(&entry);
        Self {
            entry: Arc::new(entry),
            store: Store::with_config(state, LedgerReducer::new(), env, store_config),
        }
    }

    /// Directory entry this ledger was created from
    #[must_use]
    pub fn entry(&self) -> &SaleEntry {
        &self.entry
    }

    /// Directory index
    #[must_use]
    pub fn sale_id(&self) -> SaleId {
        self.entry.sale_id
    }

    /// Identity of the sale ledger component
    #[must_use]
    pub fn sale_address(&self) -> Address {
        self.entry.sale_address
    }

    /// Identity of the ticket registry component
    #[must_use]
    pub fn tickets_address(&self) -> Address {
        self.entry.tickets_address
    }

    /// Issuer of the sale
    #[must_use]
    pub fn issuer(&self) -> Address {
        self.entry.issuer
    }

    /// Sale configuration
    #[must_use]
    pub fn config(&self) -> &SaleConfig {
        &self.entry.config
    }

    /// Applies a command and waits for the payouts it emitted
    async fn execute(&self, action: LedgerAction) -> LedgerResult<LedgerReceipt> {
        let (outcome, mut handle) = self
            .store
            .send_with(action, |state| state.last_outcome.take())
            .await?;
        let receipt = outcome
            .ok_or_else(|| LedgerError::Runtime("ledger recorded no outcome".to_string()))??;
        handle.wait().await;
        Ok(receipt)
    }

    async fn apply(&self, action: LedgerAction) -> LedgerResult<()> {
        self.execute(action).await.map(|_| ())
    }

    // ========== Sale ledger operations ==========

    /// Buys a ticket on the primary market, refunding any overpayment
    ///
    /// # Errors
    ///
    /// `NotActive`, `SoldOut` or `InsufficientPayment`.
    #[tracing::instrument(skip(self), fields(sale = %self.entry.sale_address))]
    pub async fn purchase_ticket(&self, buyer: Address, payment: Amount) -> LedgerResult<PrimaryPurchase> {
        match self.execute(LedgerAction::PurchaseTicket { buyer, payment }).await? {
            LedgerReceipt::Purchased(purchase) => Ok(purchase),
            other => Err(unexpected(&other)),
        }
    }

    /// Pays all accumulated revenue to the issuer
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless `caller` is the issuer, `NothingToWithdraw`.
    #[tracing::instrument(skip(self), fields(sale = %self.entry.sale_address))]
    pub async fn withdraw_funds(&self, caller: Address) -> LedgerResult<Amount> {
        match self.execute(LedgerAction::WithdrawFunds { caller }).await? {
            LedgerReceipt::PaidOut(amount) => Ok(amount),
            other => Err(unexpected(&other)),
        }
    }

    /// Opens or closes primary sales
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless `caller` is the issuer.
    pub async fn set_phase(&self, caller: Address, phase: Phase) -> LedgerResult<()> {
        self.apply(LedgerAction::SetPhase { caller, phase }).await
    }

    /// Overwrites event date, location and description
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless `caller` is the issuer.
    pub async fn set_event_details(&self, caller: Address, details: EventDetails) -> LedgerResult<()> {
        self.apply(LedgerAction::SetEventDetails { caller, details }).await
    }

    /// Tickets sold on the primary market
    pub async fn tickets_sold(&self) -> u32 {
        self.store.state(|s| s.sale.tickets_sold).await
    }

    /// Capacity of the sale
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.entry.config.capacity
    }

    /// Tickets left on the primary market
    pub async fn remaining(&self) -> u32 {
        self.store.state(|s| s.sale.remaining()).await
    }

    /// Derived sale status
    pub async fn status(&self) -> SaleStatus {
        self.store.state(|s| s.sale.status()).await
    }

    /// Revenue not yet withdrawn
    pub async fn revenue(&self) -> Revenue {
        self.store.state(|s| s.sale.revenue).await
    }

    /// Issuer-maintained event details
    pub async fn event_details(&self) -> EventDetails {
        self.store.state(|s| s.sale.details.clone()).await
    }

    // ========== Ticket registry operations ==========

    /// Opens or replaces a resale listing
    ///
    /// # Errors
    ///
    /// `NoSuchTicket`, `NotOwner`, `InvalidPrice` or `ResalePriceTooHigh`.
    pub async fn list_for_sale(&self, caller: Address, ticket_id: TicketId, asking_price: Amount) -> LedgerResult<()> {
        self.apply(LedgerAction::ListForSale {
            caller,
            ticket_id,
            asking_price,
        })
        .await
    }

    /// Withdraws a resale listing
    ///
    /// # Errors
    ///
    /// `NotListed` or `NotSeller`.
    pub async fn cancel_listing(&self, caller: Address, ticket_id: TicketId) -> LedgerResult<()> {
        self.apply(LedgerAction::CancelListing { caller, ticket_id }).await
    }

    /// Buys a listed ticket, paying the seller and the issuer's fee
    ///
    /// # Errors
    ///
    /// `NotListed`, `SelfPurchase` or `InsufficientPayment`.
    #[tracing::instrument(skip(self), fields(sale = %self.entry.sale_address))]
    pub async fn purchase_resale(&self, buyer: Address, ticket_id: TicketId, payment: Amount) -> LedgerResult<ResaleReceipt> {
        match self
            .execute(LedgerAction::PurchaseResale {
                buyer,
                ticket_id,
                payment,
            })
            .await?
        {
            LedgerReceipt::Resold(receipt) => Ok(receipt),
            other => Err(unexpected(&other)),
        }
    }

    /// Overwrites a ticket's metadata
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless `caller` is the issuer, `NoSuchTicket`.
    pub async fn set_ticket_metadata(&self, caller: Address, ticket_id: TicketId, metadata: TicketMetadata) -> LedgerResult<()> {
        self.apply(LedgerAction::SetTicketMetadata {
            caller,
            ticket_id,
            metadata,
        })
        .await
    }

    /// Highest asking price allowed for a ticket
    ///
    /// # Errors
    ///
    /// `NoSuchTicket` if never minted.
    pub async fn max_resale_price(&self, ticket_id: TicketId) -> LedgerResult<Amount> {
        self.store.state(|s| s.tickets.max_resale_price(ticket_id)).await
    }

    /// Current owner of a ticket
    ///
    /// # Errors
    ///
    /// `NoSuchTicket` if never minted.
    pub async fn owner_of(&self, ticket_id: TicketId) -> LedgerResult<Address> {
        self.store
            .state(|s| s.tickets.ticket(ticket_id).map(|ticket| ticket.owner))
            .await
    }

    /// Price a ticket was first sold at
    ///
    /// # Errors
    ///
    /// `NoSuchTicket` if never minted.
    pub async fn original_price(&self, ticket_id: TicketId) -> LedgerResult<Amount> {
        self.store
            .state(|s| s.tickets.ticket(ticket_id).map(|ticket| ticket.original_price))
            .await
    }

    /// Open listing of a ticket, if any
    ///
    /// # Errors
    ///
    /// `NoSuchTicket` if never minted.
    pub async fn listing(&self, ticket_id: TicketId) -> LedgerResult<Option<Listing>> {
        self.store
            .state(|s| s.tickets.ticket(ticket_id).map(|ticket| ticket.listing.clone()))
            .await
    }

    /// Metadata of a ticket
    ///
    /// # Errors
    ///
    /// `NoSuchTicket` if never minted.
    pub async fn ticket_metadata(&self, ticket_id: TicketId) -> LedgerResult<TicketMetadata> {
        self.store
            .state(|s| s.tickets.ticket(ticket_id).map(|ticket| ticket.metadata.clone()))
            .await
    }

    /// Number of tickets held by `owner`
    pub async fn balance_of(&self, owner: Address) -> usize {
        self.store.state(|s| s.tickets.balance_of(owner)).await
    }

    /// Ids held by `owner`, ascending
    pub async fn tickets_of(&self, owner: Address) -> Vec<TicketId> {
        self.store.state(|s| s.tickets.tickets_of(owner)).await
    }

    /// Number of tickets ever minted
    pub async fn total_supply(&self) -> usize {
        self.store.state(|s| s.tickets.total_supply()).await
    }

    /// Ids currently listed, ascending
    pub async fn active_listings(&self) -> Vec<TicketId> {
        self.store.state(|s| s.tickets.active_listings()).await
    }

    /// Resale ceiling multiplier, in percent
    #[must_use]
    pub fn resale_ceiling_percent(&self) -> u32 {
        self.entry.config.resale_ceiling_percent
    }

    /// Issuer's resale fee, in basis points
    #[must_use]
    pub fn resale_fee_bps(&self) -> u16 {
        self.entry.config.resale_fee_bps
    }

    // ========== Payouts ==========

    /// Pays out the caller's unpaid balance
    ///
    /// # Errors
    ///
    /// `NothingToWithdraw` if the balance is zero.
    pub async fn claim_unpaid(&self, caller: Address) -> LedgerResult<Amount> {
        match self.execute(LedgerAction::ClaimUnpaid { caller }).await? {
            LedgerReceipt::PaidOut(amount) => Ok(amount),
            other => Err(unexpected(&other)),
        }
    }

    /// Unpaid balance of `recipient`
    pub async fn unpaid_balance(&self, recipient: Address) -> Amount {
        self.store.state(|s| s.unpaid_balance(recipient)).await
    }

    /// Copy of the whole ledger state
    pub async fn snapshot(&self) -> LedgerState {
        self.store.state(Clone::clone).await
    }

    /// Stops accepting commands and waits for in-flight payouts
    ///
    /// # Errors
    ///
    /// `Runtime` if payouts are still running after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> LedgerResult<()> {
        self.store.shutdown(timeout).await.map_err(LedgerError::from)
    }
}

// ============================================================================
// Registry facade
// ============================================================================

/// Entry point: issuer authorization, sale creation and the sale directory
pub struct TicketingService {
    registry: RegistryStore,
    ledgers: RwLock<Vec<EventLedger>>,
    clock: Arc<dyn Clock>,
    gateway: Arc<dyn PaymentGateway>,
    config: LedgerConfig,
}

impl TicketingService {
    /// Creates a registry owned by `owner`
    #[must_use]
    pub fn new(owner: Address, config: LedgerConfig, clock: Arc<dyn Clock>, gateway: Arc<dyn PaymentGateway>) -> Self {
        let limits = SaleLimits {
            fee_cap_bps: config.fee_cap_bps,
            max_capacity: config.max_capacity,
        };
        let registry = Store::with_config(
            RegistryState::new(owner),
            RegistryReducer::new(),
            RegistryEnvironment::new(Arc::clone(&clock), limits),
            StoreConfig::default().with_shutdown_timeout(config.shutdown_timeout),
        );

        tracing::info!(%owner, fee_cap_bps = config.fee_cap_bps, "Ticketing registry started");

        Self {
            registry,
            ledgers: RwLock::new(Vec::new()),
            clock,
            gateway,
            config,
        }
    }

    /// Creates a registry with default configuration and the system clock
    #[must_use]
    pub fn with_defaults(owner: Address, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self::new(owner, LedgerConfig::default(), Arc::new(SystemClock), gateway)
    }

    /// Configuration the service runs with
    #[must_use]
    pub const fn config(&self) -> &LedgerConfig {
        &self.config
    }

    async fn send_registry(&self, action: RegistryAction) -> LedgerResult<RegistryReceipt> {
        let (outcome, _) = self
            .registry
            .send_with(action, |state| state.last_outcome.take())
            .await?;
        outcome.ok_or_else(|| LedgerError::Runtime("registry recorded no outcome".to_string()))?
    }

    /// Registry owner
    pub async fn owner(&self) -> Address {
        self.registry.state(|s| s.owner).await
    }

    /// Grants or revokes an issuer's right to create sales
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless `caller` is the registry owner.
    pub async fn set_authorization(&self, caller: Address, issuer: Address, authorized: bool) -> LedgerResult<()> {
        self.send_registry(RegistryAction::SetAuthorization {
            caller,
            issuer,
            authorized,
        })
        .await
        .map(|_| ())
    }

    /// Returns true if `issuer` may create sales
    pub async fn is_authorized(&self, issuer: Address) -> bool {
        self.registry.state(|s| s.is_authorized(issuer)).await
    }

    /// Creates a sale and starts its ledger
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless `caller` is an authorized issuer,
    /// `InvalidConfig` for a rejected configuration.
    #[tracing::instrument(skip(self, config), fields(name = %config.name))]
    pub async fn create_sale(&self, caller: Address, config: SaleConfig) -> LedgerResult<EventLedger> {
        // Held across the registry call so the directory and the handles stay aligned
        let mut ledgers = self.ledgers.write().await;

        let RegistryReceipt::SaleCreated(entry) = self
            .send_registry(RegistryAction::CreateSale { caller, config })
            .await?
        else {
            return Err(LedgerError::Runtime("registry did not create a sale".to_string()));
        };

        let ledger = EventLedger::new(
            entry,
            LedgerEnvironment::new(Arc::clone(&self.clock), Arc::clone(&self.gateway)),
            StoreConfig::default().with_shutdown_timeout(self.config.shutdown_timeout),
        );
        ledgers.push(ledger.clone());
        Ok(ledger)
    }

    /// Handle for a sale the registry directory resolved
    ///
    /// Handles are pushed in directory order under the ledgers write lock,
    /// which `create_sale` holds across the registry call.
    async fn ledger_for(&self, sale_id: Option<SaleId>) -> LedgerResult<EventLedger> {
        let index = sale_id
            .and_then(|id| usize::try_from(id.get()).ok())
            .ok_or(LedgerError::UnknownSale)?;
        self.ledgers
            .read()
            .await
            .get(index)
            .cloned()
            .ok_or(LedgerError::UnknownSale)
    }

    /// Number of sales created
    pub async fn sales_count(&self) -> usize {
        self.registry.state(RegistryState::sales_count).await
    }

    /// Ledger at directory index `index`
    ///
    /// # Errors
    ///
    /// `UnknownSale` if out of range.
    pub async fn sale_at(&self, index: usize) -> LedgerResult<EventLedger> {
        let sale_id = self.registry.state(|s| s.sale_at(index).map(|e| e.sale_id)).await;
        self.ledger_for(sale_id).await
    }

    /// Ledger owning the sale or ticket registry identity `address`
    ///
    /// # Errors
    ///
    /// `UnknownSale` if no sale has that identity.
    pub async fn sale_by_address(&self, address: Address) -> LedgerResult<EventLedger> {
        let sale_id = self
            .registry
            .state(|s| s.sale_by_address(address).map(|e| e.sale_id))
            .await;
        self.ledger_for(sale_id).await
    }

    /// Ledgers created by `issuer`, in creation order
    pub async fn sales_by_issuer(&self, issuer: Address) -> Vec<EventLedger> {
        let sale_ids = self.registry.state(|s| s.sales_by_issuer(issuer)).await;
        let ledgers = self.ledgers.read().await;
        sale_ids
            .into_iter()
            .filter_map(|id| usize::try_from(id.get()).ok())
            .filter_map(|index| ledgers.get(index).cloned())
            .collect()
    }

    /// Directory entries, in creation order
    pub async fn directory(&self) -> Vec<SaleEntry> {
        self.registry.state(|s| s.directory().to_vec()).await
    }

    /// Shuts down every ledger and the registry
    ///
    /// Each store gets the configured timeout. All stores are asked to stop
    /// even if an earlier one times out; the first error is returned.
    ///
    /// # Errors
    ///
    /// `Runtime` if a store still had payouts running after the timeout.
    pub async fn shutdown(&self) -> LedgerResult<()> {
        let timeout = self.config.shutdown_timeout;
        let mut first_error = None;

        for ledger in self.ledgers.read().await.iter() {
            if let Err(error) = ledger.shutdown(timeout).await {
                tracing::error!(sale = %ledger.sale_address(), %error, "Ledger shutdown failed");
                first_error.get_or_insert(error);
            }
        }
        if let Err(error) = self.registry.shutdown(timeout).await {
            first_error.get_or_insert(LedgerError::from(error));
        }

        first_error.map_or(Ok(()), Err)
    }
}
