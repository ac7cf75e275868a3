//! Ticket resale demo binary
//!
//! Runs one sale end to end against the in-memory gateway: authorization,
//! primary purchases, a capped resale and the issuer's withdrawal.

use anyhow::Context;
use ticket_resale_ledger::metrics::register_ledger_metrics;
use ticket_resale_ledger::{
    Address, Amount, InMemoryGateway, LedgerConfig, SaleConfig, TicketingService,
};
use ticket_resale_runtime::metrics::MetricsRecorder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = LedgerConfig::from_env().context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let recorder = MetricsRecorder::install().context("Failed to install metrics recorder")?;
    register_ledger_metrics();

    println!("=== Ticket Resale Ledger Demo ===\n");

    let owner = Address::repeat_byte(0x01);
    let issuer = Address::repeat_byte(0x02);
    let alice = Address::repeat_byte(0x0a);
    let bob = Address::repeat_byte(0x0b);
    let carol = Address::repeat_byte(0x0c);

    let gateway = InMemoryGateway::new();
    let service = TicketingService::new(
        owner,
        config,
        std::sync::Arc::new(ticket_resale_core::environment::SystemClock),
        gateway.shared(),
    );

    service.set_authorization(owner, issuer, true).await?;
    println!("Authorized issuer {issuer}");

    let ledger = service
        .create_sale(
            issuer,
            SaleConfig {
                name: "Summer Fest".to_string(),
                symbol: "SFT".to_string(),
                unit_price: Amount::new(100),
                capacity: 10,
                resale_ceiling_percent: 150,
                resale_fee_bps: 1_000,
            },
        )
        .await?;
    println!(
        "Created sale #{} at {} (tickets at {})",
        ledger.sale_id(),
        ledger.sale_address(),
        ledger.tickets_address()
    );

    let first = ledger.purchase_ticket(alice, Amount::new(100)).await?;
    let second = ledger.purchase_ticket(bob, Amount::new(120)).await?;
    println!(
        "Alice bought ticket {}, Bob bought ticket {} (refunded {})",
        first.ticket_id, second.ticket_id, second.refund
    );

    let ceiling = ledger.max_resale_price(first.ticket_id).await?;
    ledger.list_for_sale(alice, first.ticket_id, ceiling).await?;
    println!("Alice listed ticket {} at the ceiling of {ceiling}", first.ticket_id);

    let resale = ledger.purchase_resale(carol, first.ticket_id, ceiling).await?;
    println!(
        "Carol bought ticket {}: seller gets {}, issuer fee {}",
        resale.ticket_id, resale.proceeds, resale.fee
    );

    let withdrawn = ledger.withdraw_funds(issuer).await?;
    println!("Issuer withdrew {withdrawn}");
    println!(
        "Status: {} ({} sold, {} remaining)",
        ledger.status().await,
        ledger.tickets_sold().await,
        ledger.remaining().await
    );

    println!("\nDirectory:");
    println!("{}", serde_json::to_string_pretty(&service.directory().await)?);

    println!("\nPayouts:");
    for payout in gateway.transfers() {
        println!("  {:?} {} -> {}", payout.reason, payout.amount, payout.recipient);
    }

    service.shutdown().await?;

    if let Some(rendered) = recorder.render() {
        println!("\nMetrics:\n{rendered}");
    }

    Ok(())
}
