//! Registry aggregate: issuer authorization and the sale directory.
//!
//! The registry owner toggles which issuers may open sales. An authorized
//! issuer creates a sale with a validated [`SaleConfig`]; the registry assigns
//! the sale's two component identities and appends the entry to an
//! append-only directory. Existing sales are never touched.
//!
//! The directory is the only index of sales. Lookups by position, address or
//! issuer resolve here and the service maps the resulting [`SaleId`] to its
//! running ledger.

use crate::error::LedgerError;
use crate::types::{
    Address, SaleConfig, SaleEntry, SaleId, FEE_HARD_CAP_BPS, MIN_RESALE_CEILING_PERCENT,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use ticket_resale_core::{effect::Effect, environment::Clock, reducer::Reducer, SmallVec};
use ticket_resale_macros::Action;

/// Address tag of sale ledger components
pub const SALE_ADDRESS_TAG: u8 = 0x5a;

/// Address tag of ticket registry components
pub const TICKETS_ADDRESS_TAG: u8 = 0x7e;

// ============================================================================
// Actions
// ============================================================================

/// Actions handled by the registry
#[derive(Action, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryAction {
    /// Grant or revoke an issuer's right to create sales
    #[command]
    SetAuthorization {
        /// Must be the registry owner
        caller: Address,
        /// Issuer being toggled
        issuer: Address,
        /// New value
        authorized: bool,
    },

    /// Create a new sale
    #[command]
    CreateSale {
        /// Must be an authorized issuer
        caller: Address,
        /// Sale parameters
        config: SaleConfig,
    },
}

// ============================================================================
// State
// ============================================================================

/// Outcome of the last registry action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryReceipt {
    /// Authorization updated
    AuthorizationSet,
    /// Sale created
    SaleCreated(SaleEntry),
}

/// State of the registry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryState {
    /// Registry owner, fixed at construction
    pub owner: Address,
    authorized: HashMap<Address, bool>,
    directory: Vec<SaleEntry>,
    /// Outcome of the last action, taken by the caller under the store lock
    #[serde(skip)]
    pub last_outcome: Option<Result<RegistryReceipt, LedgerError>>,
}

impl RegistryState {
    /// Creates an empty registry owned by `owner`
    #[must_use]
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            authorized: HashMap::new(),
            directory: Vec::new(),
            last_outcome: None,
        }
    }

    /// Returns true if `issuer` may create sales (default false)
    #[must_use]
    pub fn is_authorized(&self, issuer: Address) -> bool {
        self.authorized.get(&issuer).copied().unwrap_or(false)
    }

    /// Number of sales created
    #[must_use]
    pub fn sales_count(&self) -> usize {
        self.directory.len()
    }

    /// Directory entry at `index`
    #[must_use]
    pub fn sale_at(&self, index: usize) -> Option<&SaleEntry> {
        self.directory.get(index)
    }

    /// Directory entry whose sale or ticket registry has `address`
    #[must_use]
    pub fn sale_by_address(&self, address: Address) -> Option<&SaleEntry> {
        self.directory
            .iter()
            .find(|entry| entry.sale_address == address || entry.tickets_address == address)
    }

    /// Sales created by `issuer`, in creation order
    #[must_use]
    pub fn sales_by_issuer(&self, issuer: Address) -> Vec<SaleId> {
        self.directory
            .iter()
            .filter(|entry| entry.issuer == issuer)
            .map(|entry| entry.sale_id)
            .collect()
    }

    /// The whole directory, in creation order
    #[must_use]
    pub fn directory(&self) -> &[SaleEntry] {
        &self.directory
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Limits applied to new sale configurations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLimits {
    /// Highest allowed resale fee, never above [`FEE_HARD_CAP_BPS`]
    pub fee_cap_bps: u16,
    /// Largest allowed capacity
    pub max_capacity: u32,
}

impl Default for SaleLimits {
    fn default() -> Self {
        Self {
            fee_cap_bps: FEE_HARD_CAP_BPS,
            max_capacity: u32::MAX,
        }
    }
}

/// Environment dependencies for the registry
#[derive(Clone)]
pub struct RegistryEnvironment {
    /// Clock for creation timestamps
    pub clock: Arc<dyn Clock>,
    /// Configuration limits
    pub limits: SaleLimits,
}

impl RegistryEnvironment {
    /// Creates a new `RegistryEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, limits: SaleLimits) -> Self {
        Self { clock, limits }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the registry
#[derive(Clone, Debug, Default)]
pub struct RegistryReducer;

impl RegistryReducer {
    /// Creates a new `RegistryReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a sale configuration against the limits
    fn validate_config(config: &SaleConfig, limits: SaleLimits) -> Result<(), LedgerError> {
        let fee_cap = limits.fee_cap_bps.min(FEE_HARD_CAP_BPS);

        if config.name.trim().is_empty() {
            return Err(LedgerError::InvalidConfig("name must not be empty".to_string()));
        }
        if config.symbol.trim().is_empty() {
            return Err(LedgerError::InvalidConfig("symbol must not be empty".to_string()));
        }
        if config.unit_price.is_zero() {
            return Err(LedgerError::InvalidConfig("unit price must be greater than zero".to_string()));
        }
        if config.capacity == 0 {
            return Err(LedgerError::InvalidConfig("capacity must be greater than zero".to_string()));
        }
        if config.capacity > limits.max_capacity {
            return Err(LedgerError::InvalidConfig(format!(
                "capacity {} exceeds limit {}",
                config.capacity, limits.max_capacity
            )));
        }
        if config.resale_ceiling_percent < MIN_RESALE_CEILING_PERCENT {
            return Err(LedgerError::InvalidConfig(format!(
                "resale ceiling {}% is below {MIN_RESALE_CEILING_PERCENT}%",
                config.resale_ceiling_percent
            )));
        }
        if config.resale_fee_bps > fee_cap {
            return Err(LedgerError::InvalidConfig(format!(
                "resale fee {} bps exceeds cap {fee_cap} bps",
                config.resale_fee_bps
            )));
        }
        // The ceiling of the first ticket must be representable
        if config.unit_price.percent(config.resale_ceiling_percent).is_none() {
            return Err(LedgerError::InvalidConfig("resale ceiling overflows".to_string()));
        }
        Ok(())
    }

    fn set_authorization(
        state: &mut RegistryState,
        caller: Address,
        issuer: Address,
        authorized: bool,
    ) -> Result<RegistryReceipt, LedgerError> {
        if caller != state.owner {
            return Err(LedgerError::Unauthorized);
        }
        state.authorized.insert(issuer, authorized);
        tracing::info!(%issuer, authorized, "Issuer authorization updated");
        Ok(RegistryReceipt::AuthorizationSet)
    }

    fn create_sale(
        state: &mut RegistryState,
        caller: Address,
        config: SaleConfig,
        env: &RegistryEnvironment,
    ) -> Result<RegistryReceipt, LedgerError> {
        if !state.is_authorized(caller) {
            return Err(LedgerError::Unauthorized);
        }
        Self::validate_config(&config, env.limits)?;

        let index = u64::try_from(state.directory.len()).map_err(|_| LedgerError::ArithmeticOverflow)?;
        let entry = SaleEntry {
            sale_id: SaleId::new(index),
            issuer: caller,
            sale_address: Address::derive(SALE_ADDRESS_TAG, index),
            tickets_address: Address::derive(TICKETS_ADDRESS_TAG, index),
            config,
            created_at: env.clock.now(),
        };
        state.directory.push(entry.clone());

        metrics::counter!("ledger.sales.created").increment(1);
        tracing::info!(
            sale_id = %entry.sale_id,
            issuer = %entry.issuer,
            sale = %entry.sale_address,
            name = %entry.config.name,
            capacity = entry.config.capacity,
            "Sale created"
        );
        Ok(RegistryReceipt::SaleCreated(entry))
    }
}

impl Reducer for RegistryReducer {
    type State = RegistryState;
    type Action = RegistryAction;
    type Environment = RegistryEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        let name = action.name();
        let outcome = match action {
            RegistryAction::SetAuthorization {
                caller,
                issuer,
                authorized,
            } => Self::set_authorization(state, caller, issuer, authorized),
            RegistryAction::CreateSale { caller, config } => {
                Self::create_sale(state, caller, config, env)
            },
        };

        if let Err(error) = &outcome {
            tracing::warn!(action = name, kind = error.kind(), %error, "Registry action rejected");
            metrics::counter!("ledger.operations.rejected", "kind" => error.kind()).increment(1);
        }
        state.last_outcome = Some(outcome);

        SmallVec::new()
    }
}
