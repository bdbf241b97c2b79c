#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::Duration;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use checkout_engine::{
    auth::JwtAuth,
    config::AppConfig,
    db::{self, DbConfig},
    entities::order::{CustomerType, PaymentMethod, ShippingAddress},
    events::{Event, EventSender},
    gateway::{
        FinancialInstitution, GatewayError, GatewayTransaction, PaymentGateway, TransactionRequest,
    },
    handlers::AppServices,
    services::orders::{CheckoutReceipt, CreateOrderRequest, OrderItemRequest},
    AppState,
};

pub const INTEGRITY_SECRET: &str = "test_integrity_secret";
pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// What the fake gateway answers to the next `create_transaction`
#[derive(Debug, Clone)]
pub enum GatewayScript {
    Accept { status: &'static str },
    AcceptWithRedirect { status: &'static str, url: &'static str },
    Timeout,
    Reject { status: u16, message: &'static str },
    Malformed,
}

/// In-process gateway; answers `PENDING` unless a script says otherwise
#[derive(Default)]
pub struct FakeGateway {
    script: Mutex<VecDeque<GatewayScript>>,
    pub requests: Mutex<Vec<TransactionRequest>>,
    pub acceptance_calls: Mutex<u32>,
    pub fail_acceptance: Mutex<bool>,
}

impl FakeGateway {
    pub fn push(&self, step: GatewayScript) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn last_request(&self) -> Option<TransactionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn acceptance_token(&self) -> Result<String, GatewayError> {
        let mut calls = self.acceptance_calls.lock().unwrap();
        *calls += 1;
        if *self.fail_acceptance.lock().unwrap() {
            return Err(GatewayError::Transport("merchant endpoint down".into()));
        }
        Ok(format!("acceptance-{}", *calls))
    }

    async fn create_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(GatewayScript::Accept { status: "PENDING" });

        let tx_id = format!("tx-{}", request.reference);
        match step {
            GatewayScript::Accept { status } => Ok(GatewayTransaction {
                id: tx_id.clone(),
                status: status.to_string(),
                redirect_url: None,
                raw: json!({"data": {"id": tx_id, "status": status}}),
            }),
            GatewayScript::AcceptWithRedirect { status, url } => Ok(GatewayTransaction {
                id: tx_id.clone(),
                status: status.to_string(),
                redirect_url: Some(url.to_string()),
                raw: json!({"data": {"id": tx_id, "status": status}}),
            }),
            GatewayScript::Timeout => Err(GatewayError::Timeout),
            GatewayScript::Reject { status, message } => Err(GatewayError::Rejected {
                status,
                message: message.to_string(),
                payload: json!({"error": {"type": "INPUT_VALIDATION_ERROR", "reason": message}}),
            }),
            GatewayScript::Malformed => Err(GatewayError::Malformed("missing data.id".into())),
        }
    }

    async fn financial_institutions(&self) -> Result<Vec<FinancialInstitution>, GatewayError> {
        Ok(vec![FinancialInstitution {
            financial_institution_code: "1007".into(),
            financial_institution_name: "BANCOLOMBIA".into(),
        }])
    }
}

/// Application state on a fresh in-memory SQLite database
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    token: String,
    events: Mutex<mpsc::Receiver<Event>>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.payments.integrity_secret = Some(INTEGRITY_SECRET.to_string());
        cfg.payments.public_key = "pub_test_abc".to_string();
        adjust(&mut cfg);

        let pool = db::establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(512);
        let event_sender = Arc::new(EventSender::new(event_tx));

        let gateway = Arc::new(FakeGateway::default());
        let services = AppServices::new(db_arc.clone(), event_sender.clone(), &cfg, gateway.clone());

        let auth = Arc::new(JwtAuth::new(&cfg.jwt_secret));
        let token = auth
            .issue("admin@test", &["admin"], Duration::hours(1))
            .expect("sign admin token");

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
            auth,
        };
        let router = checkout_engine::app_router(state.clone());

        Self {
            router,
            state,
            gateway,
            token,
            events: Mutex::new(event_rx),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn services(&self) -> &AppServices {
        &self.state.services
    }

    /// Everything emitted since the last call
    pub fn drain_events(&self) -> Vec<Event> {
        let mut rx = self.events.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for authenticated JSON requests.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    pub async fn checkout(&self, request: CreateOrderRequest) -> CheckoutReceipt {
        self.services()
            .orders
            .create_order(request)
            .await
            .expect("checkout should succeed")
    }
}

pub async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

pub fn address(name: &str, phone: &str) -> ShippingAddress {
    ShippingAddress {
        full_name: name.to_string(),
        phone: phone.to_string(),
        email: "cliente@example.co".to_string(),
        address: "Carrera 43A # 1-50".to_string(),
        city: "Medellín".to_string(),
        department: "Antioquia".to_string(),
        document_type: "CC".to_string(),
        document_id: "1017123456".to_string(),
        postal_code: None,
        notes: None,
    }
}

pub fn item(product_id: &str, size: &str, quantity: i32, unit_price: Decimal) -> OrderItemRequest {
    OrderItemRequest {
        product_id: product_id.to_string(),
        product_code: None,
        product_name: format!("Camiseta {}", product_id),
        variant: "local".to_string(),
        size: size.to_string(),
        quantity,
        unit_price,
        customizations: Vec::new(),
    }
}

pub fn order_request(
    customer_type: CustomerType,
    payment_method: PaymentMethod,
    items: Vec<OrderItemRequest>,
) -> CreateOrderRequest {
    CreateOrderRequest {
        customer_type,
        items,
        shipping_address: address("Laura Gómez", "300 123 4567"),
        payment_method,
        discount_code: None,
        size_confirmation: true,
        notes: None,
        shipping_cost: None,
        subtotal: None,
        total: None,
    }
}
