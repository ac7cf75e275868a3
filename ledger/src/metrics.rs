//! Business metrics for the ticket resale ledger.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `ledger.sales.created` - Sales created through the registry
//! - `ledger.tickets.minted` - Tickets minted on the primary market
//! - `ledger.resales.completed` - Resales settled on the secondary market
//! - `ledger.fees.collected` - Issuer fees collected on resales, in the smallest unit
//! - `ledger.withdrawals.total` - Issuer revenue withdrawals
//! - `ledger.payouts.failed` - Transfers credited to unpaid balances instead
//! - `ledger.operations.rejected{kind}` - Operations refused, by error kind

use metrics::describe_counter;

/// Register descriptions for all ledger metrics.
///
/// Call once at startup, after installing a recorder.
pub fn register_ledger_metrics() {
    describe_counter!("ledger.sales.created", "Sales created through the registry");
    describe_counter!("ledger.tickets.minted", "Tickets minted on the primary market");
    describe_counter!("ledger.resales.completed", "Resales settled on the secondary market");
    describe_counter!(
        "ledger.fees.collected",
        "Issuer fees collected on resales, in the smallest currency unit"
    );
    describe_counter!("ledger.withdrawals.total", "Issuer revenue withdrawals");
    describe_counter!(
        "ledger.payouts.failed",
        "Transfers that failed and were credited to unpaid balances"
    );
    describe_counter!("ledger.operations.rejected", "Operations refused, by error kind");

    tracing::info!("Ledger metrics registered");
}
