use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::entities::{inventory_batch, inventory_entry};
use crate::services::inventory::{
    BarcodeBatches, BatchFilter, BatchListing, BatchPatch, NewBatch, NewInventoryEntry,
    StockAdjustment, StockMatrix,
};
use crate::{errors::ServiceError, ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct EntryQuery {
    pub product_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProductStock {
    pub product_id: String,
    pub stock: StockMatrix,
}

/// Public: storefront size availability for a product
pub async fn product_stock(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> ApiResult<ProductStock> {
    let stock = state.services.inventory.stock_for_product(&product_id).await?;
    Ok(Json(ApiResponse::success(ProductStock { product_id, stock })))
}

pub async fn adjust_stock(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(adjustments): Json<Vec<StockAdjustment>>,
) -> Result<StatusCode, ServiceError> {
    if adjustments.is_empty() {
        return Err(ServiceError::ValidationError("No adjustments given".into()));
    }
    state.services.inventory.adjust(&adjustments).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn record_entry(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(entry): Json<NewInventoryEntry>,
) -> Result<(StatusCode, Json<ApiResponse<inventory_entry::Model>>), ServiceError> {
    let entry = state.services.inventory.record_entry(entry).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(entry))))
}

pub async fn list_entries(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<EntryQuery>,
) -> ApiResult<Vec<inventory_entry::Model>> {
    let entries = state
        .services
        .inventory
        .list_entries(query.product_id.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(entries)))
}

pub async fn create_batch(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(batch): Json<NewBatch>,
) -> Result<(StatusCode, Json<ApiResponse<inventory_batch::Model>>), ServiceError> {
    let batch = state.services.inventory.create_batch(batch).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(batch))))
}

pub async fn list_batches(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(filter): Query<BatchFilter>,
) -> ApiResult<BatchListing> {
    Ok(Json(ApiResponse::success(
        state.services.inventory.list_batches(filter).await?,
    )))
}

pub async fn get_batch(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<inventory_batch::Model> {
    Ok(Json(ApiResponse::success(
        state.services.inventory.get_batch(id).await?,
    )))
}

pub async fn update_batch(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<BatchPatch>,
) -> ApiResult<inventory_batch::Model> {
    Ok(Json(ApiResponse::success(
        state.services.inventory.update_batch(id, patch).await?,
    )))
}

pub async fn delete_batch(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state.services.inventory.delete_batch(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn batches_by_barcode(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(barcode): Path<String>,
) -> ApiResult<BarcodeBatches> {
    Ok(Json(ApiResponse::success(
        state.services.inventory.batches_by_barcode(&barcode).await?,
    )))
}

pub fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route("/adjustments", post(adjust_stock))
        .route("/entries", get(list_entries).post(record_entry))
        .route("/batches", get(list_batches).post(create_batch))
        .route(
            "/batches/:id",
            get(get_batch).patch(update_batch).delete(delete_batch),
        )
        .route("/batches/barcode/:barcode", get(batches_by_barcode))
        .route("/:product_id", get(product_stock))
}
