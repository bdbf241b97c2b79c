use crate::{
    db::DbPool,
    entities::inventory_batch::{self, BatchStatus, Entity as BatchEntity},
    entities::inventory_entry::{self, Entity as EntryEntity},
    entities::inventory_stock::{self, Entity as StockEntity},
    entities::order_item,
    errors::ServiceError,
    events::{Event, EventSender},
    services::MAX_PRICE,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Signed change to one stock cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub product_id: String,
    pub variant: String,
    pub size: String,
    pub delta: i32,
}

impl StockAdjustment {
    /// One negative adjustment per line of an order
    pub fn for_sold_items(items: &[order_item::Model]) -> Vec<StockAdjustment> {
        items
            .iter()
            .map(|item| StockAdjustment {
                product_id: item.product_id.clone(),
                variant: item.variant.clone(),
                size: item.size.clone(),
                delta: -item.quantity,
            })
            .collect()
    }
}

/// Cell addressed by a batch receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTarget {
    pub product_id: String,
    pub variant: String,
    pub size: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewInventoryEntry {
    #[validate(length(min = 1))]
    pub product_id: String,
    pub product_code: Option<String>,
    #[validate(length(min = 1))]
    pub variant: String,
    #[validate(length(min = 1))]
    pub size: String,
    #[validate(range(min = 1, message = "La cantidad debe ser mayor a cero"))]
    pub quantity: i32,
    pub entry_price: Option<Decimal>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewBatch {
    #[validate(length(min = 1, message = "El código de barras es obligatorio"))]
    pub barcode: String,
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    pub gender: Option<String>,
    pub garment_type: Option<String>,
    pub team: Option<String>,
    #[validate(range(min = 0))]
    pub quantity: i32,
    pub entry_price: Decimal,
    pub selling_price: Decimal,
    pub notes: Option<String>,
    /// When present, the batch quantity is also received into this stock cell
    pub stock_target: Option<StockTarget>,
}

/// Fields an administrator may change on a batch; anything else is rejected
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BatchPatch {
    pub barcode: Option<String>,
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    pub gender: Option<String>,
    pub garment_type: Option<String>,
    pub team: Option<String>,
    #[validate(range(min = 0))]
    pub quantity: Option<i32>,
    pub entry_price: Option<Decimal>,
    pub selling_price: Option<Decimal>,
    pub status: Option<BatchStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchFilter {
    pub barcode: Option<String>,
    pub gender: Option<String>,
    pub garment_type: Option<String>,
    pub status: Option<BatchStatus>,
}

/// Derived money fields of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Profitability {
    pub total_investment: Decimal,
    pub projected_revenue: Decimal,
    pub projected_profit: Decimal,
    pub profit_margin: Decimal,
}

/// `profit / investment × 100`, two decimals, zero when nothing was invested.
/// Saturates instead of overflowing on a near-zero investment.
pub fn margin(profit: Decimal, investment: Decimal) -> Decimal {
    if investment.is_zero() {
        return Decimal::ZERO;
    }
    profit
        .checked_div(investment)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map(|m| m.round_dp(2))
        .unwrap_or(if profit.is_sign_negative() {
            Decimal::MIN
        } else {
            Decimal::MAX
        })
}

pub fn profitability(
    quantity: i32,
    entry_price: Decimal,
    selling_price: Decimal,
) -> Result<Profitability, ServiceError> {
    let too_large =
        || ServiceError::ValidationError("Los valores del lote son demasiado altos".into());
    let qty = Decimal::from(quantity);
    let total_investment = qty.checked_mul(entry_price).ok_or_else(too_large)?;
    let projected_revenue = qty.checked_mul(selling_price).ok_or_else(too_large)?;
    let projected_profit = projected_revenue
        .checked_sub(total_investment)
        .ok_or_else(too_large)?;
    Ok(Profitability {
        total_investment,
        projected_revenue,
        projected_profit,
        profit_margin: margin(projected_profit, total_investment),
    })
}

fn check_batch_prices(entry_price: Decimal, selling_price: Decimal) -> Result<(), ServiceError> {
    let in_range = |price: Decimal| price >= Decimal::ZERO && price <= MAX_PRICE;
    if in_range(entry_price) && in_range(selling_price) {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(
            "Los precios deben estar entre 0 y el máximo permitido".into(),
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total_batches: usize,
    pub total_units: i64,
    pub total_investment: Decimal,
    pub total_projected_revenue: Decimal,
    pub total_projected_profit: Decimal,
    pub overall_profit_margin: Decimal,
}

impl BatchSummary {
    pub fn from_batches(batches: &[inventory_batch::Model]) -> Self {
        let mut summary = batches.iter().fold(BatchSummary::default(), |mut acc, b| {
            acc.total_batches += 1;
            acc.total_units += i64::from(b.quantity);
            acc.total_investment += b.total_investment;
            acc.total_projected_revenue += b.projected_revenue;
            acc.total_projected_profit += b.projected_profit;
            acc
        });
        summary.overall_profit_margin =
            margin(summary.total_projected_profit, summary.total_investment);
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchListing {
    pub batches: Vec<inventory_batch::Model>,
    pub summary: BatchSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct BarcodeBatches {
    pub barcode: String,
    pub batches: Vec<inventory_batch::Model>,
    pub summary: BatchSummary,
    pub avg_entry_price: Decimal,
    pub avg_selling_price: Decimal,
}

/// variant → size → units
pub type StockMatrix = BTreeMap<String, BTreeMap<String, i32>>;

/// Stock counts, receipts and cost lots
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Applies every adjustment as `quantity = quantity + delta`, creating missing cells.
    ///
    /// There is no availability check; a negative count is the oversell signal.
    /// Callers pass their open transaction so an order's adjustments commit with it.
    pub async fn apply_adjustments<C: ConnectionTrait>(
        conn: &C,
        adjustments: &[StockAdjustment],
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        for adj in adjustments.iter().filter(|a| a.delta != 0) {
            let cell = inventory_stock::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_id: Set(adj.product_id.clone()),
                variant: Set(adj.variant.clone()),
                size: Set(adj.size.clone()),
                quantity: Set(adj.delta),
                updated_at: Set(now),
            };

            StockEntity::insert(cell)
                .on_conflict(
                    OnConflict::columns([
                        inventory_stock::Column::ProductId,
                        inventory_stock::Column::Variant,
                        inventory_stock::Column::Size,
                    ])
                    .value(
                        inventory_stock::Column::Quantity,
                        Expr::col((StockEntity, inventory_stock::Column::Quantity)).add(adj.delta),
                    )
                    .value(inventory_stock::Column::UpdatedAt, Expr::value(now))
                    .to_owned(),
                )
                .exec_without_returning(conn)
                .await
                .map_err(|e| {
                    error!(error = %e, product_id = %adj.product_id, "Failed to adjust stock");
                    ServiceError::DatabaseError(e)
                })?;
        }
        Ok(())
    }

    /// Takes the sold units of an order out of stock
    pub async fn decrement_for_order<C: ConnectionTrait>(
        conn: &C,
        items: &[order_item::Model],
    ) -> Result<(), ServiceError> {
        Self::apply_adjustments(conn, &StockAdjustment::for_sold_items(items)).await
    }

    /// Adjusts stock in its own transaction
    #[instrument(skip(self, adjustments), fields(count = adjustments.len()))]
    pub async fn adjust(&self, adjustments: &[StockAdjustment]) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;
        Self::apply_adjustments(&txn, adjustments).await?;
        txn.commit().await?;

        if let Some(sender) = &self.event_sender {
            for adj in adjustments.iter().filter(|a| a.delta != 0) {
                sender
                    .send_or_log(Event::InventoryAdjusted {
                        product_id: adj.product_id.clone(),
                        variant: adj.variant.clone(),
                        size: adj.size.clone(),
                        delta: adj.delta,
                    })
                    .await;
            }
        }
        Ok(())
    }

    pub async fn stock_level(&self, product_id: &str, variant: &str, size: &str) -> Result<i32, ServiceError> {
        let cell = StockEntity::find()
            .filter(inventory_stock::Column::ProductId.eq(product_id))
            .filter(inventory_stock::Column::Variant.eq(variant))
            .filter(inventory_stock::Column::Size.eq(size))
            .one(&*self.db_pool)
            .await?;
        Ok(cell.map_or(0, |c| c.quantity))
    }

    pub async fn stock_for_product(&self, product_id: &str) -> Result<StockMatrix, ServiceError> {
        let cells = StockEntity::find()
            .filter(inventory_stock::Column::ProductId.eq(product_id))
            .all(&*self.db_pool)
            .await?;

        let mut matrix = StockMatrix::new();
        for cell in cells {
            matrix
                .entry(cell.variant)
                .or_default()
                .insert(cell.size, cell.quantity);
        }
        Ok(matrix)
    }

    /// Logs a manual receipt and adds its units to stock, atomically
    #[instrument(skip(self, entry), fields(product_id = %entry.product_id, quantity = entry.quantity))]
    pub async fn record_entry(&self, entry: NewInventoryEntry) -> Result<inventory_entry::Model, ServiceError> {
        entry.validate()?;

        let txn = self.db_pool.begin().await?;
        let model = inventory_entry::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(entry.product_id.clone()),
            product_code: Set(entry.product_code),
            variant: Set(entry.variant.clone()),
            size: Set(entry.size.clone()),
            quantity: Set(entry.quantity),
            entry_price: Set(entry.entry_price),
            notes: Set(entry.notes),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        Self::apply_adjustments(
            &txn,
            &[StockAdjustment {
                product_id: entry.product_id,
                variant: entry.variant,
                size: entry.size,
                delta: entry.quantity,
            }],
        )
        .await?;
        txn.commit().await?;

        info!(entry_id = %model.id, "inventory entry recorded");
        Ok(model)
    }

    pub async fn list_entries(&self, product_id: Option<&str>) -> Result<Vec<inventory_entry::Model>, ServiceError> {
        let mut query = EntryEntity::find().order_by_desc(inventory_entry::Column::CreatedAt);
        if let Some(product_id) = product_id {
            query = query.filter(inventory_entry::Column::ProductId.eq(product_id));
        }
        Ok(query.all(&*self.db_pool).await?)
    }

    #[instrument(skip(self, batch), fields(barcode = %batch.barcode, quantity = batch.quantity))]
    pub async fn create_batch(&self, batch: NewBatch) -> Result<inventory_batch::Model, ServiceError> {
        batch.validate()?;
        check_batch_prices(batch.entry_price, batch.selling_price)?;

        let now = Utc::now();
        let figures = profitability(batch.quantity, batch.entry_price, batch.selling_price)?;

        let txn = self.db_pool.begin().await?;
        let model = inventory_batch::ActiveModel {
            id: Set(Uuid::new_v4()),
            barcode: Set(batch.barcode.trim().to_string()),
            product_code: Set(batch.product_code),
            product_name: Set(batch.product_name),
            gender: Set(batch.gender),
            garment_type: Set(batch.garment_type),
            team: Set(batch.team),
            quantity: Set(batch.quantity),
            entry_price: Set(batch.entry_price),
            selling_price: Set(batch.selling_price),
            total_investment: Set(figures.total_investment),
            projected_revenue: Set(figures.projected_revenue),
            projected_profit: Set(figures.projected_profit),
            profit_margin: Set(figures.profit_margin),
            status: Set(BatchStatus::Active),
            notes: Set(batch.notes),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        if let Some(target) = batch.stock_target {
            Self::apply_adjustments(
                &txn,
                &[StockAdjustment {
                    product_id: target.product_id,
                    variant: target.variant,
                    size: target.size,
                    delta: batch.quantity,
                }],
            )
            .await?;
        }
        txn.commit().await?;

        info!(batch_id = %model.id, margin = %model.profit_margin, "inventory batch created");
        Ok(model)
    }

    pub async fn get_batch(&self, id: Uuid) -> Result<inventory_batch::Model, ServiceError> {
        BatchEntity::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", id)))
    }

    /// Applies the patch and recomputes the derived money fields
    #[instrument(skip(self, patch))]
    pub async fn update_batch(&self, id: Uuid, patch: BatchPatch) -> Result<inventory_batch::Model, ServiceError> {
        patch.validate()?;
        let current = self.get_batch(id).await?;

        let quantity = patch.quantity.unwrap_or(current.quantity);
        let entry_price = patch.entry_price.unwrap_or(current.entry_price);
        let selling_price = patch.selling_price.unwrap_or(current.selling_price);
        check_batch_prices(entry_price, selling_price)?;
        let figures = profitability(quantity, entry_price, selling_price)?;

        let mut active: inventory_batch::ActiveModel = current.into();
        if let Some(barcode) = patch.barcode {
            active.barcode = Set(barcode.trim().to_string());
        }
        if let Some(v) = patch.product_code {
            active.product_code = Set(Some(v));
        }
        if let Some(v) = patch.product_name {
            active.product_name = Set(Some(v));
        }
        if let Some(v) = patch.gender {
            active.gender = Set(Some(v));
        }
        if let Some(v) = patch.garment_type {
            active.garment_type = Set(Some(v));
        }
        if let Some(v) = patch.team {
            active.team = Set(Some(v));
        }
        if let Some(v) = patch.status {
            active.status = Set(v);
        }
        if let Some(v) = patch.notes {
            active.notes = Set(Some(v));
        }
        active.quantity = Set(quantity);
        active.entry_price = Set(entry_price);
        active.selling_price = Set(selling_price);
        active.total_investment = Set(figures.total_investment);
        active.projected_revenue = Set(figures.projected_revenue);
        active.projected_profit = Set(figures.projected_profit);
        active.profit_margin = Set(figures.profit_margin);
        active.updated_at = Set(Utc::now());

        Ok(active.update(&*self.db_pool).await?)
    }

    pub async fn delete_batch(&self, id: Uuid) -> Result<(), ServiceError> {
        let result = BatchEntity::delete_by_id(id).exec(&*self.db_pool).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Batch {} not found", id)));
        }
        info!(batch_id = %id, "inventory batch deleted");
        Ok(())
    }

    pub async fn list_batches(&self, filter: BatchFilter) -> Result<BatchListing, ServiceError> {
        let mut query = BatchEntity::find().order_by_desc(inventory_batch::Column::CreatedAt);
        if let Some(barcode) = filter.barcode {
            query = query.filter(inventory_batch::Column::Barcode.eq(barcode));
        }
        if let Some(gender) = filter.gender {
            query = query.filter(inventory_batch::Column::Gender.eq(gender));
        }
        if let Some(garment_type) = filter.garment_type {
            query = query.filter(inventory_batch::Column::GarmentType.eq(garment_type));
        }
        if let Some(status) = filter.status {
            query = query.filter(inventory_batch::Column::Status.eq(status));
        }

        let batches = query.all(&*self.db_pool).await?;
        let summary = BatchSummary::from_batches(&batches);
        Ok(BatchListing { batches, summary })
    }

    pub async fn batches_by_barcode(&self, barcode: &str) -> Result<BarcodeBatches, ServiceError> {
        let listing = self
            .list_batches(BatchFilter {
                barcode: Some(barcode.trim().to_string()),
                ..Default::default()
            })
            .await?;

        let units = Decimal::from(listing.summary.total_units);
        let (avg_entry_price, avg_selling_price) = if units.is_zero() {
            (Decimal::ZERO, Decimal::ZERO)
        } else {
            (
                (listing.summary.total_investment / units).round_dp(2),
                (listing.summary.total_projected_revenue / units).round_dp(2),
            )
        };

        Ok(BarcodeBatches {
            barcode: barcode.trim().to_string(),
            batches: listing.batches,
            summary: listing.summary,
            avg_entry_price,
            avg_selling_price,
        })
    }
}
