use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::entities::{discount_code, discount_redemption};
use crate::services::discounts::{DiscountQuote, NewDiscountCode};
use crate::{errors::ServiceError, ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ValidateCodeRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteOutcome {
    pub id: Uuid,
    /// false when the code had redemptions and was only deactivated
    pub deleted: bool,
}

pub async fn validate_code(
    State(state): State<AppState>,
    Json(request): Json<ValidateCodeRequest>,
) -> ApiResult<DiscountQuote> {
    let quote = state
        .services
        .discounts
        .validate(&request.code, Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(quote)))
}

pub async fn list_codes(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Vec<discount_code::Model>> {
    Ok(Json(ApiResponse::success(
        state.services.discounts.list_codes().await?,
    )))
}

pub async fn create_code(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(request): Json<NewDiscountCode>,
) -> Result<(StatusCode, Json<ApiResponse<discount_code::Model>>), ServiceError> {
    let code = state.services.discounts.create_code(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(code))))
}

pub async fn get_code(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<discount_code::Model> {
    Ok(Json(ApiResponse::success(
        state.services.discounts.get_code(id).await?,
    )))
}

pub async fn deactivate_code(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<discount_code::Model> {
    Ok(Json(ApiResponse::success(
        state.services.discounts.deactivate_code(id).await?,
    )))
}

pub async fn delete_code(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<DeleteOutcome> {
    let deleted = state.services.discounts.delete_code(id).await?;
    Ok(Json(ApiResponse::success(DeleteOutcome { id, deleted })))
}

pub async fn list_redemptions(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<discount_redemption::Model>> {
    Ok(Json(ApiResponse::success(
        state.services.discounts.redemptions(id).await?,
    )))
}

pub fn discount_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_codes).post(create_code))
        .route("/validate", post(validate_code))
        .route("/:id", get(get_code).delete(delete_code))
        .route("/:id/deactivate", post(deactivate_code))
        .route("/:id/redemptions", get(list_redemptions))
}
