use crate::{
    config::PaymentsConfig,
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, OrderStatus, PaymentMethod, PaymentStatus},
    entities::payment_attempt::{self, AttemptStatus, Entity as AttemptEntity, StatusSource},
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    gateway::{
        event_checksum, integrity_signature, is_bank_redirect, CustomerData, FinancialInstitution,
        GatewayError, PaymentGateway, PaymentMethodData, TransactionRequest,
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{
    sea_query::{Condition, Expr},
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

const CARD_WIDGET_METHOD: &str = "CARD_WIDGET";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAttemptRequest {
    pub order_id: Uuid,
    #[validate(range(min = 1, message = "El monto debe ser positivo"))]
    pub amount_in_cents: i64,
    /// Gateway method type: PSE, CARD, NEQUI, BANCOLOMBIA_TRANSFER, ...
    #[serde(alias = "payment_method")]
    #[validate(length(min = 2, max = 40))]
    pub method: String,
    #[validate(email(message = "El correo electrónico no es válido"))]
    pub customer_email: String,
    #[validate(length(min = 2, message = "El nombre es obligatorio"))]
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[validate(length(min = 1, message = "El tipo de documento es obligatorio"))]
    pub document_type: String,
    #[validate(length(min = 4, message = "El número de documento es obligatorio"))]
    pub document_id: String,
    /// PSE: 0 natural person, 1 company
    #[serde(default)]
    pub user_type: Option<i32>,
    #[serde(default)]
    pub financial_institution_code: Option<String>,
    #[serde(default)]
    pub card_token: Option<String>,
    #[serde(default)]
    pub installments: Option<i32>,
    #[serde(default)]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterAttemptRequest {
    pub order_id: Uuid,
    #[validate(length(min = 4, max = 64, message = "Referencia inválida"))]
    pub reference: String,
    #[validate(range(min = 1))]
    pub amount_in_cents: i64,
    #[serde(default)]
    pub method: Option<String>,
}

/// Result of starting an attempt; `status == Initiated` means the gateway has not answered yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub order_id: Uuid,
    pub reference: String,
    pub status: AttemptStatus,
    pub gateway_transaction_id: Option<String>,
    pub gateway_status: Option<String>,
    pub redirect_url: Option<String>,
}

impl From<&payment_attempt::Model> for AttemptOutcome {
    fn from(attempt: &payment_attempt::Model) -> Self {
        Self {
            order_id: attempt.order_id,
            reference: attempt.reference.clone(),
            status: attempt.status,
            gateway_transaction_id: attempt.gateway_transaction_id.clone(),
            gateway_status: attempt.gateway_status.clone(),
            redirect_url: attempt.redirect_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSignature {
    pub properties: Vec<String>,
    pub checksum: String,
}

/// Event notification as posted by the gateway. Only `data.transaction` is interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub event: Option<String>,
    pub data: Value,
    #[serde(default)]
    pub signature: Option<WebhookSignature>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookTransaction {
    pub id: String,
    pub reference: String,
    pub status: String,
}

impl WebhookEvent {
    /// Parses an untrusted body; anything without `data.transaction.{id, reference, status}` is rejected.
    pub fn from_value(payload: Value) -> Result<Self, ServiceError> {
        let event: WebhookEvent = serde_json::from_value(payload)
            .map_err(|e| ServiceError::ValidationError(format!("Invalid webhook payload: {}", e)))?;
        let tx = event.transaction()?;
        if tx.reference.trim().is_empty() || tx.status.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Webhook transaction without reference or status".into(),
            ));
        }
        Ok(event)
    }

    pub fn transaction(&self) -> Result<WebhookTransaction, ServiceError> {
        serde_json::from_value(self.data["transaction"].clone()).map_err(|e| {
            ServiceError::ValidationError(format!("Invalid webhook transaction: {}", e))
        })
    }

    /// Value of a dotted property path (`transaction.status`) under `data`, as signed
    fn property(&self, path: &str) -> String {
        let value = path
            .split('.')
            .fold(&self.data, |node, key| &node[key]);
        match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    pub reference: String,
    pub status: AttemptStatus,
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentVerification {
    pub reference: String,
    pub status: String,
    pub gateway_status: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingCheck {
    pub has_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayPublicConfig {
    pub public_key: String,
    pub currency: String,
    pub country: String,
    pub api_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardWidgetSignature {
    pub reference: String,
    pub amount_in_cents: i64,
    pub currency: String,
    pub public_key: String,
    pub signature: String,
}

/// Gateway-side facts recorded alongside a status change
#[derive(Debug, Default)]
struct GatewayFields {
    transaction_id: Option<String>,
    gateway_status: Option<String>,
    response: Option<Value>,
    redirect_url: Option<String>,
}

/// Whether an attempt in `current` (last set by `current_source`) may move to `next`.
///
/// Moves only go up in rank. A terminal status may be replaced only by a webhook,
/// and only when it was a client report or a local expiry.
pub fn transition_allowed(
    current: AttemptStatus,
    current_source: StatusSource,
    next: AttemptStatus,
    next_source: StatusSource,
) -> bool {
    if next.rank() > current.rank() {
        return true;
    }
    next_source == StatusSource::Webhook
        && next.is_terminal()
        && current.is_terminal()
        && current != next
        && (current_source == StatusSource::Client || current == AttemptStatus::Expired)
}

/// `{prefix}{unix millis}{8 upper-case hex}`
pub fn generate_reference(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("{}{}{}", prefix, now.timestamp_millis(), suffix)
}

fn expected_cents(total: Decimal) -> Option<i64> {
    (total * Decimal::ONE_HUNDRED).round().to_i64()
}

/// Drives payment attempts against the gateway and reconciles their outcome
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    config: PaymentsConfig,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentService {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        config: PaymentsConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            config,
            event_sender,
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }

    async fn find_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Orden no encontrada".into()))
    }

    async fn find_attempt(&self, reference: &str) -> Result<Option<payment_attempt::Model>, ServiceError> {
        Ok(AttemptEntity::find()
            .filter(payment_attempt::Column::Reference.eq(reference))
            .one(&*self.db_pool)
            .await?)
    }

    async fn require_attempt(&self, reference: &str) -> Result<payment_attempt::Model, ServiceError> {
        self.find_attempt(reference)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment attempt {} not found", reference)))
    }

    async fn in_flight(&self, order_id: Uuid) -> Result<Option<payment_attempt::Model>, ServiceError> {
        Ok(AttemptEntity::find()
            .filter(payment_attempt::Column::OrderId.eq(order_id))
            .filter(payment_attempt::Column::Status.is_in(AttemptStatus::NON_TERMINAL))
            .order_by_desc(payment_attempt::Column::CreatedAt)
            .one(&*self.db_pool)
            .await?)
    }

    /// Checks shared by both entry points: order exists, is payable, amount matches.
    async fn payable_order(&self, order_id: Uuid, amount_in_cents: i64) -> Result<order::Model, ServiceError> {
        let order = self.find_order(order_id).await?;

        if order.payment_method == PaymentMethod::CashOnDelivery {
            return Err(ServiceError::InvalidOperation(
                "La orden se paga contra entrega".into(),
            ));
        }
        if order.payment_status.is_settled() {
            return Err(ServiceError::InvalidOperation("La orden ya fue pagada".into()));
        }
        if order.payment_status == PaymentStatus::Cancelled || order.order_status == OrderStatus::Cancelled {
            return Err(ServiceError::InvalidOperation("La orden fue cancelada".into()));
        }
        if expected_cents(order.total_amount) != Some(amount_in_cents) {
            warn!(%order_id, amount_in_cents, total = %order.total_amount, "payment amount does not match order total");
            return Err(ServiceError::ValidationError(
                "El monto no coincide con el total del pedido".into(),
            ));
        }
        Ok(order)
    }

    /// Expires stale attempts for the order, then refuses if one is still in flight.
    async fn guard_in_flight(&self, order_id: Uuid) -> Result<(), ServiceError> {
        self.expire_stale_attempts(Some(order_id)).await?;
        if let Some(active) = self.in_flight(order_id).await? {
            info!(%order_id, reference = %active.reference, "payment attempt already in flight");
            return Err(ServiceError::PaymentInFlight {
                reference: active.reference,
            });
        }
        Ok(())
    }

    /// Inserts a fresh attempt holding the order's in-flight slot.
    async fn insert_attempt(
        &self,
        order_id: Uuid,
        reference: &str,
        amount_in_cents: i64,
        method: &str,
        status: AttemptStatus,
        customer_email: Option<String>,
    ) -> Result<payment_attempt::Model, ServiceError> {
        let now = Utc::now();
        let attempt = payment_attempt::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            reference: Set(reference.to_string()),
            amount_in_cents: Set(amount_in_cents),
            currency: Set(self.config.currency.clone()),
            payment_method: Set(method.to_string()),
            status: Set(status),
            status_source: Set(StatusSource::Coordinator),
            gateway_transaction_id: Set(None),
            gateway_status: Set(None),
            gateway_response: Set(None),
            redirect_url: Set(None),
            in_flight_key: Set(Some(order_id.to_string())),
            customer_email: Set(customer_email),
            client_status: Set(None),
            completed_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match attempt.insert(&*self.db_pool).await {
            Ok(model) => Ok(model),
            Err(e) if is_unique_violation(&e) => {
                if let Some(active) = self.in_flight(order_id).await? {
                    Err(ServiceError::PaymentInFlight {
                        reference: active.reference,
                    })
                } else {
                    Err(ServiceError::DuplicateReference(reference.to_string()))
                }
            }
            Err(e) => {
                error!(error = %e, reference, "Failed to persist payment attempt");
                Err(ServiceError::DatabaseError(e))
            }
        }
    }

    /// Points the order at its newest attempt; a settled order keeps its payment status.
    async fn link_order(&self, order: &order::Model, reference: &str) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;

        OrderEntity::update_many()
            .col_expr(order::Column::LatestPaymentReference, Expr::value(reference))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order.id))
            .exec(&txn)
            .await?;

        OrderEntity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Pending))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::PaymentStatus.is_not_in([PaymentStatus::Paid, PaymentStatus::Confirmed]))
            .exec(&txn)
            .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to link payment attempt to order");
            ServiceError::DatabaseError(e)
        })
    }

    /// Starts a gateway transaction for an order.
    ///
    /// The attempt row is written before the gateway is called, so every outbound
    /// transaction has a local record even if this process dies mid-call.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, method = %request.method))]
    pub async fn create_attempt(&self, request: CreateAttemptRequest) -> Result<AttemptOutcome, ServiceError> {
        request.validate()?;
        let method = request.method.trim().to_uppercase();

        let bank_redirect = is_bank_redirect(&method);
        if bank_redirect && self.config.integrity_secret.is_none() {
            error!("integrity secret missing; bank-redirect payments disabled");
            return Err(ServiceError::ServiceUnavailable(
                "Pagos por transferencia bancaria no disponibles".into(),
            ));
        }
        if method == "PSE"
            && request
                .financial_institution_code
                .as_deref()
                .map_or(true, |c| c.trim().is_empty())
        {
            return Err(ServiceError::ValidationError(
                "Selecciona tu banco para pagar con PSE".into(),
            ));
        }

        let order = self.payable_order(request.order_id, request.amount_in_cents).await?;
        self.guard_in_flight(order.id).await?;

        let acceptance_token = self.gateway.acceptance_token().await.map_err(|e| {
            error!(error = %e, "could not obtain acceptance token");
            ServiceError::ExternalServiceError(e.to_string())
        })?;

        let reference = generate_reference(&self.config.reference_prefix, Utc::now());
        let attempt = self
            .insert_attempt(
                order.id,
                &reference,
                request.amount_in_cents,
                &method,
                AttemptStatus::Initiated,
                Some(request.customer_email.clone()),
            )
            .await?;
        self.link_order(&order, &reference).await?;
        counter!("checkout.payments.attempts", 1);
        self.emit(Event::PaymentAttemptCreated {
            order_id: order.id,
            reference: reference.clone(),
        })
        .await;

        let signature = self
            .config
            .integrity_secret
            .as_deref()
            .map(|secret| integrity_signature(&reference, request.amount_in_cents, &self.config.currency, secret));

        let mut payment_method = PaymentMethodData {
            method_type: method.clone(),
            ..Default::default()
        };
        match method.as_str() {
            "PSE" => {
                payment_method.user_type = Some(request.user_type.unwrap_or(0));
                payment_method.user_legal_id_type = Some(request.document_type.clone());
                payment_method.user_legal_id = Some(request.document_id.clone());
                payment_method.financial_institution_code = request.financial_institution_code.clone();
                payment_method.payment_description = Some(format!("Pedido {}", order.order_number));
            }
            "CARD" => {
                payment_method.token = request.card_token.clone();
                payment_method.installments = Some(request.installments.unwrap_or(1));
            }
            _ => {}
        }

        let redirect_url = request
            .redirect_url
            .clone()
            .or_else(|| Some(self.config.redirect_url.clone()))
            .filter(|u| !u.trim().is_empty());

        let transaction = TransactionRequest {
            acceptance_token,
            amount_in_cents: request.amount_in_cents,
            currency: self.config.currency.clone(),
            signature,
            customer_email: request.customer_email.clone(),
            reference: reference.clone(),
            payment_method,
            redirect_url,
            customer_data: Some(CustomerData {
                phone_number: request.customer_phone.clone(),
                full_name: request.customer_name.clone(),
                legal_id: request.document_id.clone(),
                legal_id_type: request.document_type.clone(),
            }),
        };

        match self.gateway.create_transaction(&transaction).await {
            Ok(tx) => {
                let next = AttemptStatus::from_gateway(&tx.status);
                let fields = GatewayFields {
                    transaction_id: Some(tx.id.clone()),
                    gateway_status: Some(tx.status.clone()),
                    response: Some(tx.raw.clone()),
                    redirect_url: tx.redirect_url.clone(),
                };
                OrderEntity::update_many()
                    .col_expr(order::Column::GatewayTransactionId, Expr::value(tx.id.clone()))
                    .filter(order::Column::Id.eq(order.id))
                    .filter(order::Column::LatestPaymentReference.eq(reference.as_str()))
                    .exec(&*self.db_pool)
                    .await?;

                let updated = match self.transition(&attempt, next, StatusSource::Gateway, fields).await? {
                    Some(updated) => {
                        if updated.status.is_terminal() {
                            self.apply_to_order(&updated).await?;
                        }
                        updated
                    }
                    None => self.require_attempt(&reference).await?,
                };

                info!(reference = %reference, transaction_id = %tx.id, status = %updated.status, "payment attempt accepted by gateway");
                Ok(AttemptOutcome::from(&updated))
            }
            Err(GatewayError::Timeout) => {
                warn!(reference = %reference, "gateway timed out; attempt left initiated");
                counter!("checkout.payments.gateway_timeouts", 1);
                Ok(AttemptOutcome::from(&attempt))
            }
            Err(GatewayError::Rejected {
                status,
                message,
                payload,
            }) => {
                warn!(reference = %reference, http_status = status, %message, "gateway rejected transaction");
                self.mark_failed(&attempt, Some(payload)).await?;
                Err(ServiceError::PaymentFailed(message))
            }
            Err(e) => {
                error!(reference = %reference, error = %e, "gateway call failed");
                self.mark_failed(&attempt, None).await?;
                Err(ServiceError::ExternalServiceError(e.to_string()))
            }
        }
    }

    async fn mark_failed(&self, attempt: &payment_attempt::Model, payload: Option<Value>) -> Result<(), ServiceError> {
        counter!("checkout.payments.failed", 1);
        let failed = self
            .transition(
                attempt,
                AttemptStatus::Failed,
                StatusSource::Gateway,
                GatewayFields {
                    response: payload,
                    ..Default::default()
                },
            )
            .await?;
        if let Some(failed) = failed {
            self.apply_to_order(&failed).await?;
        }
        Ok(())
    }

    /// Conditional status write; returns the updated row, or `None` when the
    /// transition is not allowed from the stored state (including replays).
    async fn transition(
        &self,
        attempt: &payment_attempt::Model,
        next: AttemptStatus,
        source: StatusSource,
        fields: GatewayFields,
    ) -> Result<Option<payment_attempt::Model>, ServiceError> {
        let lower: Vec<AttemptStatus> = [
            AttemptStatus::Initiated,
            AttemptStatus::Pending,
            AttemptStatus::Paid,
            AttemptStatus::Failed,
            AttemptStatus::Cancelled,
            AttemptStatus::Expired,
        ]
        .into_iter()
        .filter(|s| s.rank() < next.rank())
        .collect();

        let mut allowed = Condition::any();
        if !lower.is_empty() {
            allowed = allowed.add(payment_attempt::Column::Status.is_in(lower));
        }
        if source == StatusSource::Webhook && next.is_terminal() {
            allowed = allowed.add(
                Condition::all()
                    .add(payment_attempt::Column::Status.ne(next))
                    .add(
                        Condition::any()
                            .add(
                                Condition::all()
                                    .add(payment_attempt::Column::StatusSource.eq(StatusSource::Client))
                                    .add(payment_attempt::Column::Status.is_not_in(AttemptStatus::NON_TERMINAL)),
                            )
                            .add(payment_attempt::Column::Status.eq(AttemptStatus::Expired)),
                    ),
            );
        }
        if allowed.is_empty() {
            return Ok(None);
        }

        let mut update = AttemptEntity::update_many()
            .col_expr(payment_attempt::Column::Status, Expr::value(next))
            .col_expr(payment_attempt::Column::StatusSource, Expr::value(source))
            .col_expr(payment_attempt::Column::UpdatedAt, Expr::value(Utc::now()));
        if next.is_terminal() {
            update = update.col_expr(payment_attempt::Column::InFlightKey, Expr::value(None::<String>));
        }
        if let Some(tx_id) = fields.transaction_id {
            update = update.col_expr(payment_attempt::Column::GatewayTransactionId, Expr::value(tx_id));
        }
        if let Some(gateway_status) = fields.gateway_status {
            update = update.col_expr(payment_attempt::Column::GatewayStatus, Expr::value(gateway_status));
        }
        if let Some(response) = fields.response {
            update = update.col_expr(payment_attempt::Column::GatewayResponse, Expr::value(response));
        }
        if let Some(url) = fields.redirect_url {
            update = update.col_expr(payment_attempt::Column::RedirectUrl, Expr::value(url));
        }

        let result = update
            .filter(payment_attempt::Column::Reference.eq(attempt.reference.as_str()))
            .filter(allowed)
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 0 {
            return Ok(None);
        }
        Ok(Some(self.require_attempt(&attempt.reference).await?))
    }

    /// Carries an attempt's new status over to its order.
    ///
    /// Only a payment moves a settled order; other outcomes only touch the order when
    /// they come from its latest attempt.
    async fn apply_to_order(&self, attempt: &payment_attempt::Model) -> Result<(), ServiceError> {
        let Some(order) = OrderEntity::find_by_id(attempt.order_id).one(&*self.db_pool).await? else {
            warn!(reference = %attempt.reference, order_id = %attempt.order_id, "attempt references a missing order");
            return Ok(());
        };

        let is_latest = order.latest_payment_reference.as_deref() == Some(attempt.reference.as_str());
        let mut active: order::ActiveModel = order.clone().into();
        match attempt.status {
            AttemptStatus::Paid => {
                active.payment_status = Set(PaymentStatus::Paid);
                if order.order_status == OrderStatus::Pending {
                    active.order_status = Set(OrderStatus::Confirmed);
                }
                active.latest_payment_reference = Set(Some(attempt.reference.clone()));
                if attempt.gateway_transaction_id.is_some() {
                    active.gateway_transaction_id = Set(attempt.gateway_transaction_id.clone());
                }
            }
            _ if order.payment_status.is_settled() || !is_latest => return Ok(()),
            AttemptStatus::Failed => active.payment_status = Set(PaymentStatus::Failed),
            AttemptStatus::Cancelled => active.payment_status = Set(PaymentStatus::Cancelled),
            AttemptStatus::Pending => active.payment_status = Set(PaymentStatus::Pending),
            AttemptStatus::Initiated | AttemptStatus::Expired => return Ok(()),
        }

        let updated = active.update(&*self.db_pool).await?;
        self.emit(Event::OrderStatusChanged {
            order_id: updated.id,
            payment_status: updated.payment_status.to_string(),
            order_status: updated.order_status.to_string(),
        })
        .await;
        Ok(())
    }

    fn verify_checksum(&self, event: &WebhookEvent) -> Result<(), ServiceError> {
        let Some(secret) = self.config.events_secret.as_deref() else {
            return Ok(());
        };
        let signature = event
            .signature
            .as_ref()
            .ok_or_else(|| ServiceError::Unauthorized("Missing webhook signature".into()))?;
        let timestamp = event
            .timestamp
            .ok_or_else(|| ServiceError::Unauthorized("Missing webhook timestamp".into()))?;

        let values: Vec<String> = signature.properties.iter().map(|p| event.property(p)).collect();
        let expected = event_checksum(&values, timestamp, secret);
        if !expected.eq_ignore_ascii_case(signature.checksum.trim()) {
            warn!("webhook checksum mismatch");
            return Err(ServiceError::Unauthorized("Invalid webhook checksum".into()));
        }
        Ok(())
    }

    /// Applies a gateway event. Replays and out-of-order lower-rank updates change nothing.
    #[instrument(skip(self, event), fields(event = event.event.as_deref().unwrap_or("unknown")))]
    pub async fn reconcile(&self, event: WebhookEvent) -> Result<ReconcileOutcome, ServiceError> {
        self.verify_checksum(&event)?;
        let tx = event.transaction()?;
        counter!("checkout.payments.webhooks", 1);

        let attempt = self.require_attempt(tx.reference.trim()).await?;
        let next = AttemptStatus::from_gateway(&tx.status);

        if !transition_allowed(attempt.status, attempt.status_source, next, StatusSource::Webhook) {
            info!(reference = %attempt.reference, current = %attempt.status, incoming = %next, "webhook ignored");
            return Ok(ReconcileOutcome {
                reference: attempt.reference,
                status: attempt.status,
                applied: false,
            });
        }

        let fields = GatewayFields {
            transaction_id: Some(tx.id.clone()),
            gateway_status: Some(tx.status.clone()),
            response: Some(event.data.clone()),
            redirect_url: None,
        };
        let Some(updated) = self.transition(&attempt, next, StatusSource::Webhook, fields).await? else {
            // lost a race with a concurrent delivery of the same or a higher-ranked event
            let current = self.require_attempt(&attempt.reference).await?;
            return Ok(ReconcileOutcome {
                reference: current.reference,
                status: current.status,
                applied: false,
            });
        };

        self.apply_to_order(&updated).await?;
        info!(reference = %updated.reference, status = %updated.status, "payment reconciled");
        self.emit(Event::PaymentReconciled {
            order_id: updated.order_id,
            reference: updated.reference.clone(),
            status: updated.status.to_string(),
        })
        .await;

        Ok(ReconcileOutcome {
            reference: updated.reference,
            status: updated.status,
            applied: true,
        })
    }

    /// Records an attempt whose reference the client generated (hosted widget flows).
    #[instrument(skip(self, request), fields(order_id = %request.order_id, reference = %request.reference))]
    pub async fn register_external_attempt(
        &self,
        request: RegisterAttemptRequest,
    ) -> Result<payment_attempt::Model, ServiceError> {
        request.validate()?;
        let reference = request.reference.trim().to_string();

        if self.find_attempt(&reference).await?.is_some() {
            warn!(reference = %reference, "payment reference reused");
            return Err(ServiceError::DuplicateReference(reference));
        }

        let order = self.payable_order(request.order_id, request.amount_in_cents).await?;
        self.guard_in_flight(order.id).await?;

        let method = request
            .method
            .as_deref()
            .map(|m| m.trim().to_uppercase())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| CARD_WIDGET_METHOD.to_string());
        let attempt = self
            .insert_attempt(
                order.id,
                &reference,
                request.amount_in_cents,
                &method,
                AttemptStatus::Pending,
                Some(order.shipping_address.email.clone()),
            )
            .await?;
        self.link_order(&order, &reference).await?;

        counter!("checkout.payments.attempts", 1);
        info!(reference = %reference, "external payment attempt registered");
        self.emit(Event::PaymentAttemptCreated {
            order_id: order.id,
            reference,
        })
        .await;
        Ok(attempt)
    }

    /// Client-reported outcome after returning from the bank. Lower trust than the webhook:
    /// an approval only moves the attempt to `pending`.
    #[instrument(skip(self))]
    pub async fn mark_completed(
        &self,
        reference: &str,
        client_status: &str,
    ) -> Result<payment_attempt::Model, ServiceError> {
        let attempt = self.require_attempt(reference).await?;
        let reported = client_status.trim().to_uppercase();

        let mut active: payment_attempt::ActiveModel = attempt.clone().into();
        active.client_status = Set(Some(reported.clone()));
        active.completed_at = Set(Some(Utc::now()));
        active.updated_at = Set(Utc::now());
        let attempt = active.update(&*self.db_pool).await?;

        let next = match AttemptStatus::from_gateway(&reported) {
            AttemptStatus::Paid => AttemptStatus::Pending,
            other => other,
        };
        match self.transition(&attempt, next, StatusSource::Client, GatewayFields::default()).await? {
            Some(updated) => {
                if updated.status.is_terminal() {
                    self.apply_to_order(&updated).await?;
                }
                Ok(updated)
            }
            None => Ok(attempt),
        }
    }

    pub async fn verify(&self, reference: &str) -> Result<PaymentVerification, ServiceError> {
        let attempt = self.require_attempt(reference).await?;
        Ok(PaymentVerification {
            reference: attempt.reference,
            status: attempt.status.gateway_label().to_string(),
            gateway_status: attempt.gateway_status,
            created_at: attempt.created_at,
        })
    }

    pub async fn check_pending(&self, order_id: Uuid) -> Result<PendingCheck, ServiceError> {
        self.expire_stale_attempts(Some(order_id)).await?;
        Ok(match self.in_flight(order_id).await? {
            Some(active) => PendingCheck {
                has_pending: true,
                reference: Some(active.reference),
                created_at: Some(active.created_at),
                message: Some("Tu pago está siendo procesado, espera unos minutos.".into()),
            },
            None => PendingCheck {
                has_pending: false,
                reference: None,
                created_at: None,
                message: None,
            },
        })
    }

    /// Marks non-terminal attempts older than the configured timeout as expired,
    /// releasing their order's in-flight slot. Returns how many were expired.
    #[instrument(skip(self))]
    pub async fn expire_stale_attempts(&self, order_id: Option<Uuid>) -> Result<u64, ServiceError> {
        let now = Utc::now();
        let cutoff = now - self.config.attempt_timeout();

        let mut update = AttemptEntity::update_many()
            .col_expr(payment_attempt::Column::Status, Expr::value(AttemptStatus::Expired))
            .col_expr(payment_attempt::Column::StatusSource, Expr::value(StatusSource::Coordinator))
            .col_expr(payment_attempt::Column::InFlightKey, Expr::value(None::<String>))
            .col_expr(payment_attempt::Column::UpdatedAt, Expr::value(now))
            .filter(payment_attempt::Column::Status.is_in(AttemptStatus::NON_TERMINAL))
            .filter(payment_attempt::Column::CreatedAt.lt(cutoff));
        if let Some(order_id) = order_id {
            update = update.filter(payment_attempt::Column::OrderId.eq(order_id));
        }

        let expired = update.exec(&*self.db_pool).await?.rows_affected;
        if expired > 0 {
            counter!("checkout.payments.expired", expired);
            info!(expired, "stale payment attempts expired");
        }
        Ok(expired)
    }

    pub fn gateway_config(&self) -> GatewayPublicConfig {
        GatewayPublicConfig {
            public_key: self.config.public_key.clone(),
            currency: self.config.currency.clone(),
            country: self.config.country.clone(),
            api_url: self.config.api_url.clone(),
        }
    }

    /// Signs a hosted-widget payment and registers its attempt
    #[instrument(skip(self))]
    pub async fn card_widget_signature(
        &self,
        order_id: Uuid,
        reference: &str,
        amount_in_cents: i64,
    ) -> Result<CardWidgetSignature, ServiceError> {
        let Some(secret) = self.config.integrity_secret.clone() else {
            error!("integrity secret missing; card widget cannot be signed");
            return Err(ServiceError::ServiceUnavailable(
                "Pagos con tarjeta no disponibles".into(),
            ));
        };

        let attempt = self
            .register_external_attempt(RegisterAttemptRequest {
                order_id,
                reference: reference.to_string(),
                amount_in_cents,
                method: Some(CARD_WIDGET_METHOD.to_string()),
            })
            .await?;

        Ok(CardWidgetSignature {
            signature: integrity_signature(&attempt.reference, amount_in_cents, &attempt.currency, &secret),
            reference: attempt.reference,
            amount_in_cents,
            currency: attempt.currency,
            public_key: self.config.public_key.clone(),
        })
    }

    /// PSE bank list; an unreachable gateway yields an empty list
    pub async fn financial_institutions(&self) -> Vec<FinancialInstitution> {
        match self.gateway.financial_institutions().await {
            Ok(list) => list,
            Err(e) => {
                error!(error = %e, "Error fetching PSE banks");
                Vec::new()
            }
        }
    }
}
