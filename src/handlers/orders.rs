use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::entities::order::{self, OrderStatus, PaymentStatus};
use crate::services::orders::{
    CheckoutReceipt, CreateOrderRequest, OrderFilter, OrderPatch, OrderWithItems,
};
use crate::services::pickup_tokens::PickupSummary;
use crate::{errors::ServiceError, ApiResponse, ApiResult, AppState, PaginatedResponse};

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidateTokenRequest {
    pub token: String,
    #[serde(default)]
    pub order_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PickupTokenResponse {
    pub order_id: Uuid,
    pub pickup_token: String,
}

/// Public checkout
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutReceipt>>), ServiceError> {
    let receipt = state.services.orders.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(receipt))))
}

pub async fn list_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<OrderListQuery>,
) -> ApiResult<PaginatedResponse<order::Model>> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, 100);
    let filter = OrderFilter {
        status: query.status,
        payment_status: query.payment_status,
    };

    let (items, total) = state.services.orders.list_orders(filter, page, limit).await?;
    let total_pages = (total + limit - 1) / limit;
    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page,
        limit,
        total_pages,
    })))
}

pub async fn get_order(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderWithItems> {
    let order = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn patch_order(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<OrderPatch>,
) -> ApiResult<order::Model> {
    let order = state.services.orders.patch_order(id, patch).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn update_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<order::Model> {
    let order = state.services.orders.update_status(id, &request.status).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn delete_order(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    tracing::info!(order_id = %id, admin = %admin.subject, "order delete requested");
    state.services.orders.purge_order(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Public: the courier checks a token before handing over the parcel
pub async fn validate_pickup_token(
    State(state): State<AppState>,
    Json(request): Json<ValidateTokenRequest>,
) -> ApiResult<PickupSummary> {
    let summary = state
        .services
        .pickup_tokens
        .validate(&request.token, request.order_number.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(summary)))
}

pub async fn issue_pickup_token(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ApiResponse<PickupTokenResponse>>), ServiceError> {
    let token = state.services.pickup_tokens.issue_for_order(id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(PickupTokenResponse {
            order_id: id,
            pickup_token: token,
        })),
    ))
}

pub async fn consume_pickup_token(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<order::Model> {
    let order = state.services.pickup_tokens.consume(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route(
            "/orders/:id",
            get(get_order).patch(patch_order).delete(delete_order),
        )
        .route("/orders/:id/status", put(update_status))
        .route("/orders/:id/pickup-token", post(issue_pickup_token))
        .route("/orders/:id/pickup-token/consume", post(consume_pickup_token))
        .route("/pickup-tokens/validate", post(validate_pickup_token))
}
