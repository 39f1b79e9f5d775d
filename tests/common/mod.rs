#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ConnectOptions, Database};
use sea_orm_migration::MigratorTrait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use storefront_api::db::DbPool;
use storefront_api::entities::coupon::{self, CouponType};
use storefront_api::entities::product::{self, ProductStatus};
use storefront_api::errors::ServiceError;
use storefront_api::events::{Event, EventSender};
use storefront_api::migrator::Migrator;
use storefront_api::notifications::{
    AvailabilityNotice, NotificationError, Notifier, OrderConfirmation, ShippingNotice,
};
use storefront_api::payments::{PaymentGateway, SessionHandle, SessionRequest};
use storefront_api::services::{CheckoutService, OrderStatusService, ReconciliationService};

pub const WEBHOOK_SECRET: &str = "whsec_integration_test_secret";

/// In-memory sqlite. A single connection keeps every query on the same
/// database instance.
pub async fn setup_db() -> Arc<DbPool> {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_string());
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt)
        .await
        .expect("in-memory database should connect");
    Migrator::up(&db, None)
        .await
        .expect("migrations should apply");
    Arc::new(db)
}

pub struct ProductSeed {
    pub name: String,
    pub weight: String,
    pub status: ProductStatus,
    pub stock: i32,
    pub original_price: Decimal,
    pub current_price: Decimal,
    pub has_promo: bool,
    pub promo_limit: Option<i32>,
    pub promo_sold: i32,
    pub pre_order_limit: Option<i32>,
    pub pre_order_count: i32,
    pub available_date: Option<DateTime<Utc>>,
}

impl Default for ProductSeed {
    fn default() -> Self {
        Self {
            name: "Wildflower Honey".to_string(),
            weight: "250g".to_string(),
            status: ProductStatus::InStock,
            stock: 10,
            original_price: dec!(12.90),
            current_price: dec!(12.90),
            has_promo: false,
            promo_limit: None,
            promo_sold: 0,
            pre_order_limit: None,
            pre_order_count: 0,
            available_date: None,
        }
    }
}

pub async fn seed_product(db: &DbPool, seed: ProductSeed) -> product::Model {
    product::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(seed.name),
        weight: Set(seed.weight),
        status: Set(seed.status),
        stock: Set(seed.stock),
        original_price: Set(seed.original_price),
        current_price: Set(seed.current_price),
        has_promo: Set(seed.has_promo),
        promo_limit: Set(seed.promo_limit),
        promo_sold: Set(seed.promo_sold),
        pre_order_limit: Set(seed.pre_order_limit),
        pre_order_count: Set(seed.pre_order_count),
        available_date: Set(seed.available_date),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("product seed should insert")
}

pub struct CouponSeed {
    pub code: String,
    pub coupon_type: CouponType,
    pub value: Decimal,
    pub min_order: Option<Decimal>,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Default for CouponSeed {
    fn default() -> Self {
        Self {
            code: "WELCOME10".to_string(),
            coupon_type: CouponType::Percentage,
            value: dec!(10),
            min_order: None,
            max_uses: None,
            used_count: 0,
            expires_at: None,
            is_active: true,
        }
    }
}

pub async fn seed_coupon(db: &DbPool, seed: CouponSeed) -> coupon::Model {
    coupon::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(seed.code),
        coupon_type: Set(seed.coupon_type),
        value: Set(seed.value),
        min_order: Set(seed.min_order),
        max_uses: Set(seed.max_uses),
        used_count: Set(seed.used_count),
        expires_at: Set(seed.expires_at),
        is_active: Set(seed.is_active),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("coupon seed should insert")
}

/// Gateway stub that hands out deterministic session ids and records
/// every request it saw.
#[derive(Default)]
pub struct MockGateway {
    counter: AtomicUsize,
    pub requests: Mutex<Vec<SessionRequest>>,
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_session(&self, req: SessionRequest) -> Result<SessionHandle, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let session_id = format!("cs_test_{:06}", n);
        self.requests
            .lock()
            .expect("gateway mutex")
            .push(req);
        Ok(SessionHandle {
            url: format!("https://pay.example.com/{}", session_id),
            session_id,
        })
    }
}

/// Notifier that counts deliveries per template.
#[derive(Default)]
pub struct RecordingNotifier {
    pub confirmations: Mutex<Vec<OrderConfirmation>>,
    pub availability: Mutex<Vec<AvailabilityNotice>>,
    pub shipping: Mutex<Vec<ShippingNotice>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn order_confirmation(&self, msg: OrderConfirmation) -> Result<(), NotificationError> {
        self.confirmations.lock().expect("notifier mutex").push(msg);
        Ok(())
    }

    async fn availability_notice(&self, msg: AvailabilityNotice) -> Result<(), NotificationError> {
        self.availability.lock().expect("notifier mutex").push(msg);
        Ok(())
    }

    async fn shipping_notice(&self, msg: ShippingNotice) -> Result<(), NotificationError> {
        self.shipping.lock().expect("notifier mutex").push(msg);
        Ok(())
    }
}

/// Fully wired service stack over an in-memory database.
pub struct TestEnv {
    pub db: Arc<DbPool>,
    pub checkout: CheckoutService,
    pub reconciliation: ReconciliationService,
    pub order_status: OrderStatusService,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<RecordingNotifier>,
    _event_rx: mpsc::Receiver<Event>,
}

pub async fn setup_env() -> TestEnv {
    let db = setup_db().await;
    let (tx, rx) = mpsc::channel(64);
    let events = EventSender::new(tx);
    let gateway = Arc::new(MockGateway::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let checkout = CheckoutService::new(
        db.clone(),
        gateway.clone(),
        events.clone(),
        "http://localhost:3000".to_string(),
    );
    let order_status = OrderStatusService::new(db.clone(), notifier.clone(), events.clone());
    let reconciliation = ReconciliationService::new(
        db.clone(),
        notifier.clone(),
        events,
        WEBHOOK_SECRET.to_string(),
        300,
    );

    TestEnv {
        db,
        checkout,
        reconciliation,
        order_status,
        gateway,
        notifier,
        _event_rx: rx,
    }
}

/// sqlite stores decimals through f64, so money assertions compare at
/// cent precision.
pub fn cents(value: Decimal) -> Decimal {
    value.round_dp(2)
}
