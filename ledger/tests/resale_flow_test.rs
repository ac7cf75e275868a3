//! End-to-end flows through the service facade.
//!
//! Each test runs a full registry plus event ledger against the in-memory
//! gateway: authorization, primary sales, resales, withdrawals and the
//! handling of failing or re-entrant payout recipients.
//!
//! Run with: `cargo test --test resale_flow_test`

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use ticket_resale_ledger::payment_gateway::{GatewayError, GatewayResult};
use ticket_resale_ledger::{
    Address, Amount, EventDetails, EventLedger, InMemoryGateway, LedgerConfig, LedgerError,
    PaymentGateway, Payout, PayoutReason, Phase, Revenue, SaleConfig, SaleStatus, TicketId,
    TicketMetadata, TicketingService,
};
use ticket_resale_core::environment::Clock;
use ticket_resale_testing::{helpers::init_test_tracing, test_clock};

const OWNER: Address = Address::repeat_byte(0x01);
const ISSUER: Address = Address::repeat_byte(0x02);
const ALICE: Address = Address::repeat_byte(0x0a);
const BOB: Address = Address::repeat_byte(0x0b);
const CAROL: Address = Address::repeat_byte(0x0c);

fn festival() -> SaleConfig {
    SaleConfig {
        name: "Summer Fest".to_string(),
        symbol: "SFT".to_string(),
        unit_price: Amount::new(100),
        capacity: 10,
        resale_ceiling_percent: 150,
        resale_fee_bps: 1_000,
    }
}

fn service_with(gateway: Arc<dyn PaymentGateway>) -> TicketingService {
    init_test_tracing();
    TicketingService::new(OWNER, LedgerConfig::default(), Arc::new(test_clock()), gateway)
}

async fn open_sale(service: &TicketingService) -> EventLedger {
    service.set_authorization(OWNER, ISSUER, true).await.unwrap();
    service.create_sale(ISSUER, festival()).await.unwrap()
}

#[tokio::test]
async fn test_full_sale_and_resale_scenario() {
    let gateway = InMemoryGateway::new();
    let service = service_with(gateway.shared());
    let ledger = open_sale(&service).await;

    let first = ledger.purchase_ticket(ALICE, Amount::new(100)).await.unwrap();
    let second = ledger.purchase_ticket(ALICE, Amount::new(100)).await.unwrap();
    let third = ledger.purchase_ticket(BOB, Amount::new(100)).await.unwrap();
    assert_eq!(first.ticket_id, TicketId::new(1));
    assert_eq!(second.ticket_id, TicketId::new(2));
    assert_eq!(third.ticket_id, TicketId::new(3));
    assert_eq!(ledger.tickets_sold().await, 3);
    assert_eq!(ledger.remaining().await, 7);
    assert_eq!(ledger.tickets_of(ALICE).await, vec![TicketId::new(1), TicketId::new(2)]);
    assert_eq!(ledger.balance_of(ALICE).await, 2);

    assert_eq!(ledger.max_resale_price(first.ticket_id).await.unwrap(), Amount::new(150));
    ledger.list_for_sale(ALICE, first.ticket_id, Amount::new(150)).await.unwrap();
    assert_eq!(ledger.active_listings().await, vec![first.ticket_id]);

    let resale = ledger
        .purchase_resale(CAROL, first.ticket_id, Amount::new(150))
        .await
        .unwrap();
    assert_eq!(resale.fee, Amount::new(15));
    assert_eq!(resale.proceeds, Amount::new(135));
    assert_eq!(ledger.owner_of(first.ticket_id).await.unwrap(), CAROL);
    assert_eq!(ledger.tickets_of(ALICE).await, vec![TicketId::new(2)]);
    assert_eq!(ledger.tickets_of(CAROL).await, vec![TicketId::new(1)]);
    assert_eq!(ledger.tickets_of(BOB).await, vec![TicketId::new(3)]);
    assert_eq!(ledger.balance_of(ALICE).await, 1);
    assert!(ledger.active_listings().await.is_empty());
    assert_eq!(gateway.balance_of(ALICE), Amount::new(135));

    let revenue = ledger.revenue().await;
    assert_eq!(revenue.primary, Amount::new(300));
    assert_eq!(revenue.secondary, Amount::new(15));
    assert_eq!(revenue.total(), Some(Amount::new(315)));

    assert_eq!(ledger.withdraw_funds(ISSUER).await.unwrap(), Amount::new(315));
    let revenue = ledger.revenue().await;
    assert_eq!(revenue.primary, Amount::ZERO);
    assert_eq!(revenue.secondary, Amount::ZERO);
    assert_eq!(revenue.total(), Some(Amount::ZERO));
    assert_eq!(gateway.balance_of(ISSUER), Amount::new(315));

    assert_eq!(
        ledger.withdraw_funds(ISSUER).await,
        Err(LedgerError::NothingToWithdraw)
    );
}

#[tokio::test]
async fn test_unauthorized_issuer_then_authorized() {
    let service = service_with(InMemoryGateway::new().shared());

    assert_eq!(
        service.create_sale(ISSUER, festival()).await.unwrap_err(),
        LedgerError::Unauthorized
    );
    assert_eq!(
        service.set_authorization(ISSUER, ISSUER, true).await,
        Err(LedgerError::Unauthorized)
    );
    assert!(!service.is_authorized(ISSUER).await);

    service.set_authorization(OWNER, ISSUER, true).await.unwrap();
    assert!(service.is_authorized(ISSUER).await);

    let ledger = service.create_sale(ISSUER, festival()).await.unwrap();
    assert_eq!(service.sales_count().await, 1);
    assert_eq!(service.owner().await, OWNER);

    let by_index = service.sale_at(0).await.unwrap();
    assert_eq!(by_index.sale_address(), ledger.sale_address());
    let by_address = service.sale_by_address(ledger.tickets_address()).await.unwrap();
    assert_eq!(by_address.sale_id(), ledger.sale_id());
    assert_eq!(service.sales_by_issuer(ISSUER).await.len(), 1);
    assert_eq!(service.sale_at(1).await.unwrap_err(), LedgerError::UnknownSale);

    let directory = service.directory().await;
    assert_eq!(directory.len(), 1);
    assert_eq!(directory[0].issuer, ISSUER);
    assert_eq!(directory[0].created_at, test_clock().now());

    // Revoking stops new sales but leaves the existing one running
    service.set_authorization(OWNER, ISSUER, false).await.unwrap();
    assert_eq!(
        service.create_sale(ISSUER, festival()).await.unwrap_err(),
        LedgerError::Unauthorized
    );
    assert!(ledger.purchase_ticket(ALICE, Amount::new(100)).await.is_ok());
}

#[tokio::test]
async fn test_directory_lookups_resolve_running_ledgers() {
    let service = service_with(InMemoryGateway::new().shared());
    let other_issuer = Address::repeat_byte(0x03);
    service.set_authorization(OWNER, ISSUER, true).await.unwrap();
    service.set_authorization(OWNER, other_issuer, true).await.unwrap();

    let first = service.create_sale(ISSUER, festival()).await.unwrap();
    let second = service.create_sale(other_issuer, festival()).await.unwrap();
    let third = service.create_sale(ISSUER, festival()).await.unwrap();
    assert_eq!(service.sales_count().await, 3);

    let ids: Vec<_> = service
        .sales_by_issuer(ISSUER)
        .await
        .iter()
        .map(EventLedger::sale_id)
        .collect();
    assert_eq!(ids, vec![first.sale_id(), third.sale_id()]);

    // Lookups hand back the same running store, not a copy
    let found = service.sale_by_address(second.sale_address()).await.unwrap();
    found.purchase_ticket(ALICE, Amount::new(100)).await.unwrap();
    assert_eq!(second.tickets_sold().await, 1);
    assert_eq!(service.sale_at(1).await.unwrap().tickets_sold().await, 1);

    assert_eq!(
        service.sale_by_address(ALICE).await.unwrap_err(),
        LedgerError::UnknownSale
    );
    assert!(service.sales_by_issuer(BOB).await.is_empty());
}

#[tokio::test]
async fn test_invalid_configs_are_rejected() {
    let service = service_with(InMemoryGateway::new().shared());
    service.set_authorization(OWNER, ISSUER, true).await.unwrap();

    let cases = [
        SaleConfig {
            unit_price: Amount::ZERO,
            ..festival()
        },
        SaleConfig {
            capacity: 0,
            ..festival()
        },
        SaleConfig {
            resale_ceiling_percent: 99,
            ..festival()
        },
        SaleConfig {
            resale_fee_bps: 3_001,
            ..festival()
        },
        SaleConfig {
            name: "  ".to_string(),
            ..festival()
        },
    ];

    for config in cases {
        let error = service.create_sale(ISSUER, config).await.unwrap_err();
        assert_eq!(error.kind(), "invalid_config");
    }
    assert_eq!(service.sales_count().await, 0);
    assert!(service.directory().await.is_empty());
}

#[tokio::test]
async fn test_capacity_and_phase() {
    let service = service_with(InMemoryGateway::new().shared());
    service.set_authorization(OWNER, ISSUER, true).await.unwrap();
    let ledger = service
        .create_sale(
            ISSUER,
            SaleConfig {
                capacity: 2,
                ..festival()
            },
        )
        .await
        .unwrap();

    ledger.purchase_ticket(ALICE, Amount::new(100)).await.unwrap();
    ledger.purchase_ticket(BOB, Amount::new(100)).await.unwrap();
    assert_eq!(ledger.status().await, SaleStatus::SoldOut);
    assert_eq!(
        ledger.purchase_ticket(CAROL, Amount::new(100)).await,
        Err(LedgerError::SoldOut)
    );
    assert_eq!(ledger.total_supply().await, 2);

    assert_eq!(
        ledger.set_phase(ALICE, Phase::Closed).await,
        Err(LedgerError::Unauthorized)
    );
    ledger.set_phase(ISSUER, Phase::Closed).await.unwrap();
    ledger.set_phase(ISSUER, Phase::Closed).await.unwrap();
    assert_eq!(ledger.status().await, SaleStatus::Closed);
    assert_eq!(
        ledger.purchase_ticket(CAROL, Amount::new(100)).await,
        Err(LedgerError::NotActive)
    );

    // Resale keeps working after the primary market closes
    ledger.list_for_sale(ALICE, TicketId::new(1), Amount::new(120)).await.unwrap();
    ledger
        .purchase_resale(CAROL, TicketId::new(1), Amount::new(120))
        .await
        .unwrap();
    assert_eq!(ledger.owner_of(TicketId::new(1)).await.unwrap(), CAROL);
}

#[tokio::test]
async fn test_listing_bounds_and_cancellation() {
    let service = service_with(InMemoryGateway::new().shared());
    let ledger = open_sale(&service).await;
    let id = ledger.purchase_ticket(ALICE, Amount::new(100)).await.unwrap().ticket_id;

    assert_eq!(
        ledger.list_for_sale(ALICE, id, Amount::new(151)).await,
        Err(LedgerError::ResalePriceTooHigh {
            asking: Amount::new(151),
            ceiling: Amount::new(150),
        })
    );
    assert_eq!(
        ledger.list_for_sale(ALICE, id, Amount::ZERO).await,
        Err(LedgerError::InvalidPrice)
    );
    assert_eq!(
        ledger.list_for_sale(BOB, id, Amount::new(120)).await,
        Err(LedgerError::NotOwner)
    );
    assert_eq!(
        ledger.list_for_sale(ALICE, TicketId::new(9), Amount::new(120)).await,
        Err(LedgerError::NoSuchTicket(TicketId::new(9)))
    );

    ledger.list_for_sale(ALICE, id, Amount::new(120)).await.unwrap();
    ledger.list_for_sale(ALICE, id, Amount::new(150)).await.unwrap();
    let listing = ledger.listing(id).await.unwrap().unwrap();
    assert_eq!(listing.asking_price, Amount::new(150));
    assert_eq!(listing.seller, ALICE);

    assert_eq!(ledger.cancel_listing(BOB, id).await, Err(LedgerError::NotSeller));
    ledger.cancel_listing(ALICE, id).await.unwrap();
    assert_eq!(ledger.listing(id).await.unwrap(), None);
    assert_eq!(ledger.owner_of(id).await.unwrap(), ALICE);
    assert_eq!(ledger.cancel_listing(ALICE, id).await, Err(LedgerError::NotListed));
    assert_eq!(
        ledger.purchase_resale(BOB, id, Amount::new(150)).await,
        Err(LedgerError::NotListed)
    );
}

#[tokio::test]
async fn test_resale_rejections_leave_state_untouched() {
    let gateway = InMemoryGateway::new();
    let service = service_with(gateway.shared());
    let ledger = open_sale(&service).await;
    let id = ledger.purchase_ticket(ALICE, Amount::new(100)).await.unwrap().ticket_id;
    ledger.list_for_sale(ALICE, id, Amount::new(140)).await.unwrap();

    let before = ledger.snapshot().await;

    assert_eq!(
        ledger.purchase_resale(ALICE, id, Amount::new(140)).await,
        Err(LedgerError::SelfPurchase)
    );
    assert_eq!(
        ledger.purchase_resale(BOB, id, Amount::new(139)).await,
        Err(LedgerError::InsufficientPayment {
            required: Amount::new(140),
            supplied: Amount::new(139),
        })
    );

    assert_eq!(ledger.snapshot().await, before);
    assert!(gateway.transfers().is_empty());
}

#[tokio::test]
async fn test_overpayment_is_refunded_exactly() {
    let gateway = InMemoryGateway::new();
    let service = service_with(gateway.shared());
    let ledger = open_sale(&service).await;

    let purchase = ledger.purchase_ticket(ALICE, Amount::new(175)).await.unwrap();
    assert_eq!(purchase.price, Amount::new(100));
    assert_eq!(purchase.refund, Amount::new(75));
    assert_eq!(gateway.balance_of(ALICE), Amount::new(75));
    assert_eq!(ledger.revenue().await.primary, Amount::new(100));

    ledger.list_for_sale(ALICE, purchase.ticket_id, Amount::new(130)).await.unwrap();
    let resale = ledger
        .purchase_resale(BOB, purchase.ticket_id, Amount::new(200))
        .await
        .unwrap();
    assert_eq!(resale.refund, Amount::new(70));
    assert_eq!(gateway.balance_of(BOB), Amount::new(70));
    assert_eq!(gateway.balance_of(ALICE), Amount::new(75 + 117));
    assert_eq!(ledger.revenue().await.secondary, Amount::new(13));
}

#[tokio::test]
async fn test_rejecting_recipient_is_credited_and_can_claim() {
    let gateway = InMemoryGateway::new();
    let service = service_with(gateway.shared());
    let ledger = open_sale(&service).await;

    let id = ledger.purchase_ticket(ALICE, Amount::new(100)).await.unwrap().ticket_id;
    ledger.list_for_sale(ALICE, id, Amount::new(150)).await.unwrap();

    gateway.reject(ALICE);
    let resale = ledger.purchase_resale(BOB, id, Amount::new(150)).await.unwrap();

    // Ownership moved even though the seller's transfer bounced
    assert_eq!(ledger.owner_of(id).await.unwrap(), BOB);
    assert_eq!(ledger.unpaid_balance(ALICE).await, resale.proceeds);
    assert_eq!(gateway.balance_of(ALICE), Amount::ZERO);

    assert_eq!(
        ledger.claim_unpaid(BOB).await,
        Err(LedgerError::NothingToWithdraw)
    );

    gateway.accept(ALICE);
    assert_eq!(ledger.claim_unpaid(ALICE).await.unwrap(), Amount::new(135));
    assert_eq!(ledger.unpaid_balance(ALICE).await, Amount::ZERO);
    assert_eq!(gateway.balance_of(ALICE), Amount::new(135));

    let last = gateway.transfers().pop().unwrap();
    assert_eq!(last.reason, PayoutReason::UnpaidClaim);
}

#[tokio::test]
async fn test_rejected_withdrawal_is_not_lost() {
    let gateway = InMemoryGateway::new();
    let service = service_with(gateway.shared());
    let ledger = open_sale(&service).await;
    ledger.purchase_ticket(ALICE, Amount::new(100)).await.unwrap();

    gateway.reject(ISSUER);
    assert_eq!(ledger.withdraw_funds(ISSUER).await.unwrap(), Amount::new(100));
    assert_eq!(ledger.revenue().await, Revenue::default());
    assert_eq!(ledger.unpaid_balance(ISSUER).await, Amount::new(100));

    gateway.accept(ISSUER);
    assert_eq!(ledger.claim_unpaid(ISSUER).await.unwrap(), Amount::new(100));
    assert_eq!(gateway.balance_of(ISSUER), Amount::new(100));
}

/// Gateway that tries to withdraw again from inside the issuer's transfer
struct ReentrantGateway {
    inner: InMemoryGateway,
    ledger: OnceLock<EventLedger>,
    reentry: Arc<std::sync::Mutex<Option<Result<Amount, LedgerError>>>>,
}

impl PaymentGateway for ReentrantGateway {
    fn transfer(&self, payout: Payout) -> Pin<Box<dyn Future<Output = GatewayResult<()>> + Send + '_>> {
        Box::pin(async move {
            if payout.reason == PayoutReason::Withdrawal {
                if let Some(ledger) = self.ledger.get() {
                    let again = ledger.withdraw_funds(payout.recipient).await;
                    *self.reentry.lock().unwrap() = Some(again);
                }
            }
            self.inner.transfer(payout).await
        })
    }
}

#[tokio::test]
async fn test_reentrant_withdrawal_sees_zero_revenue() {
    let reentry = Arc::new(std::sync::Mutex::new(None));
    let gateway = Arc::new(ReentrantGateway {
        inner: InMemoryGateway::new(),
        ledger: OnceLock::new(),
        reentry: Arc::clone(&reentry),
    });
    let service = service_with(Arc::clone(&gateway) as Arc<dyn PaymentGateway>);
    let ledger = open_sale(&service).await;
    gateway.ledger.set(ledger.clone()).unwrap();

    ledger.purchase_ticket(ALICE, Amount::new(100)).await.unwrap();
    ledger.purchase_ticket(BOB, Amount::new(100)).await.unwrap();

    assert_eq!(ledger.withdraw_funds(ISSUER).await.unwrap(), Amount::new(200));
    assert_eq!(
        reentry.lock().unwrap().clone(),
        Some(Err(LedgerError::NothingToWithdraw))
    );
    assert_eq!(gateway.inner.balance_of(ISSUER), Amount::new(200));
}

#[tokio::test]
async fn test_supply_and_revenue_only_grow_through_payments() {
    let gateway = InMemoryGateway::new();
    let service = service_with(gateway.shared());
    service.set_authorization(OWNER, ISSUER, true).await.unwrap();
    let ledger = service
        .create_sale(
            ISSUER,
            SaleConfig {
                capacity: 1,
                ..festival()
            },
        )
        .await
        .unwrap();

    let id = ledger.purchase_ticket(ALICE, Amount::new(100)).await.unwrap().ticket_id;
    assert_eq!(
        ledger.purchase_ticket(BOB, Amount::new(100)).await.unwrap_err(),
        LedgerError::SoldOut
    );

    // Resale moves the existing ticket and credits exactly its fee
    ledger.list_for_sale(ALICE, id, Amount::new(150)).await.unwrap();
    ledger.purchase_resale(BOB, id, Amount::new(150)).await.unwrap();
    assert_eq!(ledger.total_supply().await, 1);
    assert_eq!(ledger.tickets_sold().await, 1);
    assert_eq!(ledger.tickets_of(BOB).await, vec![id]);

    // Component identities grant nothing on the caller-facing operations
    for identity in [ledger.sale_address(), ledger.tickets_address()] {
        assert_eq!(
            ledger.withdraw_funds(identity).await,
            Err(LedgerError::Unauthorized)
        );
        assert_eq!(
            ledger.set_phase(identity, Phase::Closed).await,
            Err(LedgerError::Unauthorized)
        );
    }

    assert_eq!(ledger.withdraw_funds(ISSUER).await.unwrap(), Amount::new(115));
    assert_eq!(gateway.balance_of(ISSUER), Amount::new(115));
    assert_eq!(ledger.total_supply().await, 1);
}

#[tokio::test]
async fn test_metadata_is_issuer_only() {
    let service = service_with(InMemoryGateway::new().shared());
    let ledger = open_sale(&service).await;
    let id = ledger.purchase_ticket(ALICE, Amount::new(100)).await.unwrap().ticket_id;

    let metadata = TicketMetadata {
        seat_info: "Row A, Seat 12".to_string(),
        ticket_type: "VIP".to_string(),
        event_date: "2025-07-01".to_string(),
    };
    assert_eq!(
        ledger.set_ticket_metadata(ALICE, id, metadata.clone()).await,
        Err(LedgerError::Unauthorized)
    );
    ledger.set_ticket_metadata(ISSUER, id, metadata.clone()).await.unwrap();
    assert_eq!(ledger.ticket_metadata(id).await.unwrap(), metadata);

    let details = EventDetails {
        date: "2025-07-01".to_string(),
        location: "Main Stage".to_string(),
        description: "Opening night".to_string(),
    };
    ledger.set_event_details(ISSUER, details.clone()).await.unwrap();
    assert_eq!(ledger.event_details().await, details);
    assert_eq!(ledger.resale_ceiling_percent(), 150);
    assert_eq!(ledger.resale_fee_bps(), 1_000);
}

/// Gateway that takes a while and then refuses every transfer
struct SlowRejectingGateway;

impl PaymentGateway for SlowRejectingGateway {
    fn transfer(&self, payout: Payout) -> Pin<Box<dyn Future<Output = GatewayResult<()>> + Send + '_>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err(GatewayError::Rejected {
                recipient: payout.recipient,
            })
        })
    }
}

#[tokio::test]
async fn test_failed_payout_during_shutdown_is_credited() {
    let service = service_with(Arc::new(SlowRejectingGateway));
    let ledger = open_sale(&service).await;
    ledger.purchase_ticket(ALICE, Amount::new(100)).await.unwrap();

    let (withdrawn, stopped) = tokio::join!(ledger.withdraw_funds(ISSUER), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        service.shutdown().await
    });

    assert_eq!(withdrawn.unwrap(), Amount::new(100));
    stopped.unwrap();
    assert_eq!(ledger.revenue().await, Revenue::default());
    assert_eq!(ledger.unpaid_balance(ISSUER).await, Amount::new(100));
}

#[tokio::test]
async fn test_shutdown_rejects_further_operations() {
    let service = service_with(InMemoryGateway::new().shared());
    let ledger = open_sale(&service).await;

    service.shutdown().await.unwrap();

    let error = ledger.purchase_ticket(ALICE, Amount::new(100)).await.unwrap_err();
    assert_eq!(error.kind(), "runtime");
    assert!(ledger.shutdown(Duration::from_millis(10)).await.is_ok());
}
