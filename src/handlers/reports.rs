use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::AdminUser;
use crate::services::reports::{ProfitReport, SalesReport};
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct SalesQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub async fn sales_report(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<SalesQuery>,
) -> ApiResult<SalesReport> {
    Ok(Json(ApiResponse::success(
        state.services.reports.sales(query.from, query.to).await?,
    )))
}

pub async fn profit_report(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<ProfitReport> {
    Ok(Json(ApiResponse::success(
        state.services.reports.profit().await?,
    )))
}

pub fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/sales", get(sales_report))
        .route("/profit", get(profit_report))
}
