use axum::{extract::State, response::Json};
use serde_json::Value;
use tracing::info;

use crate::services::payments::{ReconcileOutcome, WebhookEvent};
use crate::{ApiResponse, ApiResult, AppState};

// POST /api/v1/payments/webhook
//
// Unauthenticated; the checksum inside the body is verified when an events secret is configured.
// Replays answer 200 with `applied: false` so the gateway stops retrying.
pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> ApiResult<ReconcileOutcome> {
    let event = WebhookEvent::from_value(payload)?;
    let outcome = state.services.payments.reconcile(event).await?;
    info!(reference = %outcome.reference, status = %outcome.status, applied = outcome.applied, "payment webhook handled");
    Ok(Json(ApiResponse::success(outcome)))
}
