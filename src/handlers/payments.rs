use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::payment_attempt;
use crate::gateway::FinancialInstitution;
use crate::services::payments::{
    AttemptOutcome, CardWidgetSignature, CreateAttemptRequest, GatewayPublicConfig,
    PaymentVerification, PendingCheck, RegisterAttemptRequest,
};
use crate::{errors::ServiceError, ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct CardWidgetRequest {
    pub order_id: Uuid,
    pub reference: String,
    pub amount_in_cents: i64,
}

pub async fn gateway_config(State(state): State<AppState>) -> ApiResult<GatewayPublicConfig> {
    Ok(Json(ApiResponse::success(
        state.services.payments.gateway_config(),
    )))
}

pub async fn financial_institutions(
    State(state): State<AppState>,
) -> ApiResult<Vec<FinancialInstitution>> {
    Ok(Json(ApiResponse::success(
        state.services.payments.financial_institutions().await,
    )))
}

/// Starts a payment for an order; `202` while the gateway has not answered yet
pub async fn create_attempt(
    State(state): State<AppState>,
    Json(request): Json<CreateAttemptRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AttemptOutcome>>), ServiceError> {
    let outcome = state.services.payments.create_attempt(request).await?;
    let status = if outcome.status.is_terminal() || outcome.gateway_transaction_id.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(ApiResponse::success(outcome))))
}

pub async fn register_attempt(
    State(state): State<AppState>,
    Json(request): Json<RegisterAttemptRequest>,
) -> Result<(StatusCode, Json<ApiResponse<payment_attempt::Model>>), ServiceError> {
    let attempt = state
        .services
        .payments
        .register_external_attempt(request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(attempt))))
}

pub async fn card_widget_signature(
    State(state): State<AppState>,
    Json(request): Json<CardWidgetRequest>,
) -> ApiResult<CardWidgetSignature> {
    let signed = state
        .services
        .payments
        .card_widget_signature(request.order_id, &request.reference, request.amount_in_cents)
        .await?;
    Ok(Json(ApiResponse::success(signed)))
}

pub async fn verify_attempt(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> ApiResult<PaymentVerification> {
    Ok(Json(ApiResponse::success(
        state.services.payments.verify(&reference).await?,
    )))
}

/// Shopper returned from the bank and reports what the bank page said
pub async fn complete_attempt(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Json(request): Json<CompleteRequest>,
) -> ApiResult<AttemptOutcome> {
    let attempt = state
        .services
        .payments
        .mark_completed(&reference, &request.status)
        .await?;
    Ok(Json(ApiResponse::success(AttemptOutcome::from(&attempt))))
}

pub async fn check_pending(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<PendingCheck> {
    Ok(Json(ApiResponse::success(
        state.services.payments.check_pending(order_id).await?,
    )))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/config", get(gateway_config))
        .route("/financial-institutions", get(financial_institutions))
        .route("/attempts", post(create_attempt))
        .route("/attempts/register", post(register_attempt))
        .route("/attempts/:reference", get(verify_attempt))
        .route("/attempts/:reference/complete", post(complete_attempt))
        .route("/card-widget-signature", post(card_widget_signature))
        .route("/orders/:order_id/pending", get(check_pending))
}
