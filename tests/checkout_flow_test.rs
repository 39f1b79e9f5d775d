mod common;

use chrono::{Duration, Utc};
use assert_matches::assert_matches;
use common::*;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use storefront_api::entities::order::{self, OrderStatus};
use storefront_api::entities::order_item;
use storefront_api::entities::product;
use storefront_api::entities::coupon;
use storefront_api::errors::ServiceError;
use storefront_api::payments::signature;
use storefront_api::services::checkout::{CheckoutRequest, CustomerInfo};
use storefront_api::services::pricing::CartLine;
use storefront_api::services::reconciliation::ReconcileOutcome;

fn customer() -> CustomerInfo {
    CustomerInfo {
        email: "claire@example.com".to_string(),
        first_name: "Claire".to_string(),
        last_name: "Martin".to_string(),
        phone: None,
        address: Some("12 rue des Abeilles".to_string()),
        city: Some("Lyon".to_string()),
        postal_code: Some("69003".to_string()),
        country: Some("FR".to_string()),
    }
}

fn request(items: Vec<CartLine>, coupon_code: Option<&str>) -> CheckoutRequest {
    CheckoutRequest {
        items,
        customer: customer(),
        coupon_code: coupon_code.map(str::to_string),
    }
}

#[tokio::test]
async fn checkout_creates_pending_order_with_snapshots() {
    let env = setup_env().await;
    let honey = seed_product(
        &env.db,
        ProductSeed {
            current_price: dec!(20.00),
            original_price: dec!(20.00),
            ..Default::default()
        },
    )
    .await;

    let outcome = env
        .checkout
        .create_checkout(request(
            vec![CartLine {
                product_id: honey.id,
                quantity: 2,
                unit_price: Some(dec!(20.00)),
            }],
            None,
        ))
        .await
        .expect("checkout should succeed");

    assert!(outcome.order_number.starts_with("ORD-"));
    assert!(outcome.session_id.starts_with("cs_test_"));
    // 40.00 subtotal is under the free-shipping threshold.
    assert_eq!(cents(outcome.total), dec!(45.90));

    let saved = order::Entity::find_by_id(outcome.order_id)
        .one(env.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.status, OrderStatus::Pending);
    assert_eq!(saved.email, "claire@example.com");
    assert_eq!(cents(saved.subtotal), dec!(40.00));
    assert_eq!(cents(saved.shipping), dec!(5.90));
    assert_eq!(cents(saved.discount), dec!(0));
    assert!(saved.paid_at.is_none());
    assert_eq!(saved.payment_session_id.as_deref(), Some(outcome.session_id.as_str()));

    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(outcome.order_id))
        .all(env.db.as_ref())
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].product_name, honey.name);
    assert_eq!(items[0].product_weight, honey.weight);
    assert_eq!(items[0].quantity, 2);

    // No reservation at checkout time.
    let after = product::Entity::find_by_id(honey.id)
        .one(env.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.stock, 10);
}

#[tokio::test]
async fn checkout_at_threshold_ships_free() {
    let env = setup_env().await;
    let honey = seed_product(
        &env.db,
        ProductSeed {
            current_price: dec!(25.00),
            original_price: dec!(25.00),
            ..Default::default()
        },
    )
    .await;

    let outcome = env
        .checkout
        .create_checkout(request(
            vec![CartLine {
                product_id: honey.id,
                quantity: 2,
                unit_price: None,
            }],
            None,
        ))
        .await
        .unwrap();
    assert_eq!(cents(outcome.total), dec!(50.00));
}

#[tokio::test]
async fn tampered_price_is_rejected_without_side_effects() {
    let env = setup_env().await;
    let honey = seed_product(&env.db, ProductSeed::default()).await;

    let err = env
        .checkout
        .create_checkout(request(
            vec![CartLine {
                product_id: honey.id,
                quantity: 1,
                unit_price: Some(dec!(0.01)),
            }],
            None,
        ))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PriceMismatch(_));

    assert_eq!(
        order::Entity::find().all(env.db.as_ref()).await.unwrap().len(),
        0
    );
    assert!(env.gateway.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn insufficient_stock_rejected_at_checkout() {
    let env = setup_env().await;
    let honey = seed_product(
        &env.db,
        ProductSeed {
            stock: 1,
            ..Default::default()
        },
    )
    .await;

    let err = env
        .checkout
        .create_checkout(request(
            vec![CartLine {
                product_id: honey.id,
                quantity: 3,
                unit_price: None,
            }],
            None,
        ))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));
}

#[tokio::test]
async fn unusable_coupon_is_dropped_silently() {
    let env = setup_env().await;
    let honey = seed_product(
        &env.db,
        ProductSeed {
            current_price: dec!(30.00),
            original_price: dec!(30.00),
            ..Default::default()
        },
    )
    .await;
    seed_coupon(
        &env.db,
        CouponSeed {
            code: "OLD".to_string(),
            expires_at: Some(Utc::now() - Duration::days(1)),
            ..Default::default()
        },
    )
    .await;

    let outcome = env
        .checkout
        .create_checkout(request(
            vec![CartLine {
                product_id: honey.id,
                quantity: 1,
                unit_price: None,
            }],
            Some("OLD"),
        ))
        .await
        .expect("bad coupon must not block checkout");
    assert_eq!(cents(outcome.total), dec!(35.90));

    let saved = order::Entity::find_by_id(outcome.order_id)
        .one(env.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.coupon_code, None);
    assert_eq!(cents(saved.discount), dec!(0));
}

#[tokio::test]
async fn stale_pending_orders_are_swept() {
    let env = setup_env().await;
    let honey = seed_product(&env.db, ProductSeed::default()).await;

    let stale_id = Uuid::new_v4();
    order::ActiveModel {
        id: Set(stale_id),
        order_number: Set("ORD-20250101-OLD001".to_string()),
        status: Set(OrderStatus::Pending),
        email: Set("claire@example.com".to_string()),
        first_name: Set("Claire".to_string()),
        last_name: Set("Martin".to_string()),
        phone: Set(None),
        address: Set(None),
        city: Set(None),
        postal_code: Set(None),
        country: Set(None),
        subtotal: Set(dec!(10)),
        shipping: Set(dec!(5.90)),
        discount: Set(dec!(0)),
        coupon_code: Set(None),
        total: Set(dec!(15.90)),
        payment_session_id: Set(Some("cs_test_stale".to_string())),
        payment_intent_id: Set(None),
        is_pre_order: Set(false),
        estimated_delivery: Set(None),
        notification_sent: Set(false),
        paid_at: Set(None),
        shipped_at: Set(None),
        delivered_at: Set(None),
        created_at: Set(Utc::now() - Duration::minutes(10)),
        updated_at: Set(None),
    }
    .insert(env.db.as_ref())
    .await
    .unwrap();

    env.checkout
        .create_checkout(request(
            vec![CartLine {
                product_id: honey.id,
                quantity: 1,
                unit_price: None,
            }],
            None,
        ))
        .await
        .unwrap();

    assert!(order::Entity::find_by_id(stale_id)
        .one(env.db.as_ref())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn reconciliation_commits_stock_and_coupon_exactly_once() {
    let env = setup_env().await;
    let honey = seed_product(
        &env.db,
        ProductSeed {
            stock: 5,
            current_price: dec!(60.00),
            original_price: dec!(60.00),
            ..Default::default()
        },
    )
    .await;
    let code = seed_coupon(
        &env.db,
        CouponSeed {
            max_uses: Some(3),
            ..Default::default()
        },
    )
    .await;

    let outcome = env
        .checkout
        .create_checkout(request(
            vec![CartLine {
                product_id: honey.id,
                quantity: 2,
                unit_price: None,
            }],
            Some("welcome10"),
        ))
        .await
        .unwrap();
    // 120.00 subtotal, free shipping, 10% off.
    assert_eq!(cents(outcome.total), dec!(108.00));

    let first = env
        .reconciliation
        .reconcile_session(&outcome.session_id, Some("pi_123"))
        .await
        .unwrap();
    assert_eq!(
        first,
        ReconcileOutcome::Completed {
            order_number: outcome.order_number.clone()
        }
    );

    let paid = order::Entity::find_by_id(outcome.order_id)
        .one(env.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert!(paid.paid_at.is_some());
    assert_eq!(paid.payment_intent_id.as_deref(), Some("pi_123"));

    let after = product::Entity::find_by_id(honey.id)
        .one(env.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.stock, 3);

    let used = coupon::Entity::find_by_id(code.id)
        .one(env.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(used.used_count, 1);
    assert_eq!(env.notifier.confirmations.lock().unwrap().len(), 1);

    // Redelivery of the same confirmation changes nothing.
    let second = env
        .reconciliation
        .reconcile_session(&outcome.session_id, Some("pi_123"))
        .await
        .unwrap();
    assert_eq!(second, ReconcileOutcome::AlreadyProcessed);

    let after = product::Entity::find_by_id(honey.id)
        .one(env.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.stock, 3);
    let used = coupon::Entity::find_by_id(code.id)
        .one(env.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(used.used_count, 1);
    assert_eq!(env.notifier.confirmations.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn oversell_at_confirmation_clamps_stock_to_zero() {
    let env = setup_env().await;
    let honey = seed_product(
        &env.db,
        ProductSeed {
            stock: 5,
            current_price: dec!(10.00),
            original_price: dec!(10.00),
            ..Default::default()
        },
    )
    .await;

    let first = env
        .checkout
        .create_checkout(request(
            vec![CartLine {
                product_id: honey.id,
                quantity: 3,
                unit_price: None,
            }],
            None,
        ))
        .await
        .unwrap();
    let mut second_request = request(
        vec![CartLine {
            product_id: honey.id,
            quantity: 3,
            unit_price: None,
        }],
        None,
    );
    second_request.customer.email = "marc@example.com".to_string();
    let second = env.checkout.create_checkout(second_request).await.unwrap();

    env.reconciliation
        .reconcile_session(&first.session_id, None)
        .await
        .unwrap();
    env.reconciliation
        .reconcile_session(&second.session_id, None)
        .await
        .unwrap();

    // Both payments stand; the ledger clamps instead of going negative.
    let after = product::Entity::find_by_id(honey.id)
        .one(env.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.stock, 0);
    for outcome in [&first, &second] {
        let paid = order::Entity::find_by_id(outcome.order_id)
            .one(env.db.as_ref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
    }
}

#[tokio::test]
async fn orphan_confirmation_is_acknowledged() {
    let env = setup_env().await;
    let outcome = env
        .reconciliation
        .reconcile_session("cs_test_unknown", None)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::OrphanSession);
}

#[tokio::test]
async fn signed_event_roundtrip_and_rejection() {
    let env = setup_env().await;
    let honey = seed_product(&env.db, ProductSeed::default()).await;
    let checkout = env
        .checkout
        .create_checkout(request(
            vec![CartLine {
                product_id: honey.id,
                quantity: 1,
                unit_price: None,
            }],
            None,
        ))
        .await
        .unwrap();

    let payload = serde_json::json!({
        "type": "checkout.session.completed",
        "data": { "object": { "id": checkout.session_id, "payment_intent": "pi_evt" } }
    })
    .to_string();

    let header = signature::sign(WEBHOOK_SECRET, payload.as_bytes(), Utc::now().timestamp());
    let outcome = env
        .reconciliation
        .process_event(payload.as_bytes(), &header)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Completed {
            order_number: checkout.order_number
        }
    );

    // Same payload signed with the wrong secret is discarded unprocessed.
    let forged = signature::sign("whsec_wrong_secret_000000", payload.as_bytes(), Utc::now().timestamp());
    let err = env
        .reconciliation
        .process_event(payload.as_bytes(), &forged)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidSignature);
}

#[tokio::test]
async fn unconsumed_event_types_are_ignored() {
    let env = setup_env().await;
    let payload = serde_json::json!({
        "type": "payment_intent.created",
        "data": { "object": { "id": "cs_test_x", "payment_intent": null } }
    })
    .to_string();
    let header = signature::sign(WEBHOOK_SECRET, payload.as_bytes(), Utc::now().timestamp());
    let outcome = env
        .reconciliation
        .process_event(payload.as_bytes(), &header)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Ignored);
}
