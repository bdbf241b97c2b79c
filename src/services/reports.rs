use crate::{
    db::DbPool,
    entities::inventory_batch::{self, Entity as BatchEntity},
    entities::order::{self, Entity as OrderEntity, PaymentStatus},
    errors::ServiceError,
    services::inventory::margin,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};

const SETTLED: [PaymentStatus; 2] = [PaymentStatus::Paid, PaymentStatus::Confirmed];

/// Paid orders in a period
#[derive(Debug, Serialize, Deserialize)]
pub struct SalesReport {
    pub total_sales: Decimal,
    pub total_orders: usize,
    pub orders: Vec<order::Model>,
}

/// Revenue from paid orders against what was spent on stock
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfitReport {
    pub total_revenue: Decimal,
    pub total_investment: Decimal,
    pub total_profit: Decimal,
    pub profit_margin: Decimal,
    pub paid_orders: usize,
}

#[derive(Clone)]
pub struct ReportService {
    db_pool: Arc<DbPool>,
}

impl ReportService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Settled orders created within `[from, to]`, newest first
    #[instrument(skip(self))]
    pub async fn sales(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<SalesReport, ServiceError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(ServiceError::ValidationError(
                    "`from` must not be after `to`".into(),
                ));
            }
        }

        let mut query = OrderEntity::find().filter(order::Column::PaymentStatus.is_in(SETTLED));
        if let Some(from) = from {
            query = query.filter(order::Column::CreatedAt.gte(from));
        }
        if let Some(to) = to {
            query = query.filter(order::Column::CreatedAt.lte(to));
        }

        let orders = query
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to load paid orders");
                ServiceError::DatabaseError(e)
            })?;

        let total_sales = orders.iter().map(|o| o.total_amount).sum();
        info!(orders = orders.len(), %total_sales, "sales report generated");
        Ok(SalesReport {
            total_sales,
            total_orders: orders.len(),
            orders,
        })
    }

    #[instrument(skip(self))]
    pub async fn profit(&self) -> Result<ProfitReport, ServiceError> {
        let db = &*self.db_pool;

        let totals: Vec<Decimal> = OrderEntity::find()
            .select_only()
            .column(order::Column::TotalAmount)
            .filter(order::Column::PaymentStatus.is_in(SETTLED))
            .into_tuple()
            .all(db)
            .await?;

        let investments: Vec<Decimal> = BatchEntity::find()
            .select_only()
            .column(inventory_batch::Column::TotalInvestment)
            .into_tuple()
            .all(db)
            .await?;

        let total_revenue: Decimal = totals.iter().copied().sum();
        let total_investment: Decimal = investments.into_iter().sum();
        let total_profit = total_revenue - total_investment;

        Ok(ProfitReport {
            total_revenue,
            total_investment,
            total_profit,
            profit_margin: margin(total_profit, total_investment),
            paid_orders: totals.len(),
        })
    }
}
