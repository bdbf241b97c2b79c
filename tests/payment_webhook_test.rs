mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use checkout_engine::{
    entities::order::{CustomerType, OrderStatus, PaymentMethod, PaymentStatus},
    entities::payment_attempt::{self, AttemptStatus, Entity as AttemptEntity},
    errors::ServiceError,
    events::Event,
    gateway::event_checksum,
    services::orders::CheckoutReceipt,
    services::payments::{CreateAttemptRequest, WebhookEvent},
};
use common::{item, json_body, order_request, GatewayScript, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use serde_json::{json, Value};

const EVENTS_SECRET: &str = "test_events_secret";

async fn gateway_order(app: &TestApp) -> CheckoutReceipt {
    app.checkout(order_request(
        CustomerType::Retail,
        PaymentMethod::Gateway,
        vec![item("jersey-home", "M", 1, dec!(85000))],
    ))
    .await
}

async fn start_attempt(app: &TestApp, order: &CheckoutReceipt) -> String {
    app.services()
        .payments
        .create_attempt(CreateAttemptRequest {
            order_id: order.order_id,
            amount_in_cents: 10_000_000,
            method: "NEQUI".into(),
            customer_email: "cliente@example.co".into(),
            customer_name: "Laura Gómez".into(),
            customer_phone: Some("3001234567".into()),
            document_type: "CC".into(),
            document_id: "1017123456".into(),
            user_type: None,
            financial_institution_code: None,
            card_token: None,
            installments: None,
            redirect_url: None,
        })
        .await
        .expect("attempt should start")
        .reference
}

fn transaction_event(reference: &str, status: &str) -> Value {
    json!({
        "event": "transaction.updated",
        "data": {
            "transaction": {
                "id": format!("tx-{}", reference),
                "reference": reference,
                "status": status,
                "amount_in_cents": 10_000_000
            }
        },
        "sent_at": "2024-05-01T12:00:00.000Z"
    })
}

fn signed(mut payload: Value, secret: &str) -> Value {
    let timestamp = 1_714_564_800_i64;
    let tx = &payload["data"]["transaction"];
    let values = vec![
        tx["id"].as_str().unwrap().to_string(),
        tx["status"].as_str().unwrap().to_string(),
        tx["amount_in_cents"].to_string(),
    ];
    let checksum = event_checksum(&values, timestamp, secret);
    payload["signature"] = json!({
        "properties": ["transaction.id", "transaction.status", "transaction.amount_in_cents"],
        "checksum": checksum
    });
    payload["timestamp"] = json!(timestamp);
    payload
}

async fn deliver(app: &TestApp, payload: Value) -> Result<checkout_engine::services::payments::ReconcileOutcome, ServiceError> {
    let event = WebhookEvent::from_value(payload)?;
    app.services().payments.reconcile(event).await
}

#[tokio::test]
async fn approval_settles_order_and_replays_are_ignored() {
    let app = TestApp::new().await;
    let order = gateway_order(&app).await;
    let reference = start_attempt(&app, &order).await;
    app.drain_events();

    let outcome = deliver(&app, transaction_event(&reference, "APPROVED")).await.unwrap();
    assert!(outcome.applied);
    assert_eq!(outcome.status, AttemptStatus::Paid);

    let stored = app.services().orders.find_order(order.order_id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.order_status, OrderStatus::Confirmed);

    let events = app.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::PaymentReconciled { status, .. } if status == "paid"
    )));

    let replay = deliver(&app, transaction_event(&reference, "APPROVED")).await.unwrap();
    assert!(!replay.applied);
    assert_eq!(replay.status, AttemptStatus::Paid);
    assert!(app.drain_events().is_empty());
}

#[tokio::test]
async fn out_of_order_and_contradicting_events_change_nothing() {
    let app = TestApp::new().await;
    let order = gateway_order(&app).await;
    let reference = start_attempt(&app, &order).await;

    deliver(&app, transaction_event(&reference, "DECLINED")).await.unwrap();

    let late_pending = deliver(&app, transaction_event(&reference, "PENDING")).await.unwrap();
    assert!(!late_pending.applied);
    let contradicting = deliver(&app, transaction_event(&reference, "APPROVED")).await.unwrap();
    assert!(!contradicting.applied);
    assert_eq!(contradicting.status, AttemptStatus::Failed);

    let stored = app.services().orders.find_order(order.order_id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Failed);
}

#[tokio::test]
async fn webhook_overrides_a_client_report() {
    let app = TestApp::new().await;
    let order = gateway_order(&app).await;
    let reference = start_attempt(&app, &order).await;

    let reported = app
        .services()
        .payments
        .mark_completed(&reference, "DECLINED")
        .await
        .unwrap();
    assert_eq!(reported.status, AttemptStatus::Failed);

    let outcome = deliver(&app, transaction_event(&reference, "APPROVED")).await.unwrap();
    assert!(outcome.applied);

    let stored = app.services().orders.find_order(order.order_id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
}

async fn expire_and_replace(app: &TestApp, order: &CheckoutReceipt) -> (String, String) {
    app.gateway.push(GatewayScript::Timeout);
    let old = start_attempt(app, order).await;
    AttemptEntity::update_many()
        .col_expr(
            payment_attempt::Column::CreatedAt,
            Expr::value(Utc::now() - Duration::hours(1)),
        )
        .filter(payment_attempt::Column::Reference.eq(old.as_str()))
        .exec(&*app.state.db)
        .await
        .unwrap();
    let current = start_attempt(app, order).await;
    (old, current)
}

#[tokio::test]
async fn superseded_attempts_do_not_move_the_order_unless_paid() {
    let app = TestApp::new().await;
    let order = gateway_order(&app).await;
    let (old, current) = expire_and_replace(&app, &order).await;

    // recorded on the attempt, but the order follows its current attempt
    let declined = deliver(&app, transaction_event(&old, "DECLINED")).await.unwrap();
    assert!(declined.applied);
    assert_eq!(declined.status, AttemptStatus::Failed);
    let stored = app.services().orders.find_order(order.order_id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert_eq!(stored.latest_payment_reference.as_deref(), Some(current.as_str()));

    deliver(&app, transaction_event(&current, "APPROVED")).await.unwrap();
    let stored = app.services().orders.find_order(order.order_id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn late_failure_never_unpays_an_order() {
    let app = TestApp::new().await;
    let order = gateway_order(&app).await;
    let (old, current) = expire_and_replace(&app, &order).await;

    deliver(&app, transaction_event(&current, "APPROVED")).await.unwrap();
    let declined = deliver(&app, transaction_event(&old, "DECLINED")).await.unwrap();
    assert!(declined.applied);

    let stored = app.services().orders.find_order(order.order_id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.order_status, OrderStatus::Confirmed);
}

#[tokio::test]
async fn payment_on_an_expired_attempt_still_settles_the_order() {
    let app = TestApp::new().await;
    let order = gateway_order(&app).await;
    let (old, _current) = expire_and_replace(&app, &order).await;

    let outcome = deliver(&app, transaction_event(&old, "APPROVED")).await.unwrap();
    assert!(outcome.applied);

    let stored = app.services().orders.find_order(order.order_id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.latest_payment_reference.as_deref(), Some(old.as_str()));
}

#[tokio::test]
async fn unknown_reference_and_malformed_bodies_are_rejected() {
    let app = TestApp::new().await;

    assert_matches!(
        deliver(&app, transaction_event("RUN-NOPE", "APPROVED")).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        WebhookEvent::from_value(json!({"data": {"transaction": {"id": "1", "reference": "", "status": "APPROVED"}}})),
        Err(ServiceError::ValidationError(_))
    );

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(json!({"event": "transaction.updated", "data": {}})),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn checksum_is_enforced_when_an_events_secret_is_configured() {
    let app = TestApp::with_config(|cfg| cfg.payments.events_secret = Some(EVENTS_SECRET.into())).await;
    let order = gateway_order(&app).await;
    let reference = start_attempt(&app, &order).await;

    let unsigned = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(transaction_event(&reference, "APPROVED")),
            None,
        )
        .await;
    assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

    let forged = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(signed(transaction_event(&reference, "APPROVED"), "wrong-secret")),
            None,
        )
        .await;
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);

    let genuine = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(signed(transaction_event(&reference, "APPROVED"), EVENTS_SECRET)),
            None,
        )
        .await;
    assert_eq!(genuine.status(), StatusCode::OK);
    let body = json_body(genuine).await;
    assert_eq!(body["data"]["applied"], true);
    assert_eq!(body["data"]["status"], "paid");

    let stored = app.services().orders.find_order(order.order_id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
}
