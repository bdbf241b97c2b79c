use crate::{
    db::DbPool,
    entities::discount_redemption::{self, Entity as RedemptionEntity},
    entities::order::{
        self, ActiveModel as OrderActiveModel, CustomerType, Entity as OrderEntity, OrderStatus,
        PaymentMethod, PaymentStatus, ShippingAddress,
    },
    entities::order_item::{self, Customization, CustomizationList, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        discounts::{customer_fingerprint, DiscountService},
        inventory::InventoryService,
        pickup_tokens,
        shipping::ShippingPolicy,
        MAX_PRICE,
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// One cart line as submitted at checkout
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderItemRequest {
    #[validate(length(min = 1, message = "El producto es obligatorio"))]
    pub product_id: String,
    #[serde(default)]
    pub product_code: Option<String>,
    #[validate(length(min = 1, message = "El nombre del producto es obligatorio"))]
    pub product_name: String,
    #[validate(length(min = 1, message = "La versión es obligatoria"))]
    pub variant: String,
    #[validate(length(min = 1, message = "La talla es obligatoria"))]
    pub size: String,
    #[validate(range(min = 1, max = 10000, message = "La cantidad debe ser al menos 1"))]
    pub quantity: i32,
    pub unit_price: Decimal,
    #[serde(default)]
    pub customizations: Vec<Customization>,
}

impl OrderItemRequest {
    /// `quantity × (unit_price + Σ customization surcharges)`, `None` on overflow
    pub fn line_total(&self) -> Option<Decimal> {
        let unit = self
            .customizations
            .iter()
            .try_fold(self.unit_price, |acc, c| acc.checked_add(c.price_delta))?;
        Decimal::from(self.quantity).checked_mul(unit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub customer_type: CustomerType,
    #[validate(length(min = 1, message = "El carrito está vacío"))]
    pub items: Vec<OrderItemRequest>,
    #[validate]
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub discount_code: Option<String>,
    #[serde(default)]
    pub size_confirmation: bool,
    #[serde(default)]
    pub notes: Option<String>,
    /// Caller-computed shipping; honoured per shipping configuration
    #[serde(default)]
    pub shipping_cost: Option<Decimal>,
    /// Caller-computed subtotal; only compared against the computed one
    #[serde(default)]
    pub subtotal: Option<Decimal>,
    /// Caller-computed total; only compared against the computed one
    #[serde(default, alias = "total_amount")]
    pub total: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub order_id: Uuid,
    pub order_number: String,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub shipping_cost: Decimal,
    pub total_amount: Decimal,
    pub pickup_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Administrative edit of an order; totals and statuses are not patchable
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct OrderPatch {
    pub notes: Option<String>,
    #[validate]
    pub shipping_address: Option<ShippingAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
}

/// Field writes produced by an administrative status request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    pub payment_status: Option<PaymentStatus>,
    pub order_status: Option<OrderStatus>,
}

impl StatusUpdate {
    /// Maps a requested status onto the payment and fulfilment fields it sets.
    pub fn for_requested(requested: &str) -> Result<Self, ServiceError> {
        let requested = requested.trim().to_lowercase();
        let (payment_status, order_status) = match requested.as_str() {
            "pending" => (Some(PaymentStatus::Pending), None),
            "paid" => (Some(PaymentStatus::Paid), Some(OrderStatus::Confirmed)),
            "confirmed" => (Some(PaymentStatus::Confirmed), Some(OrderStatus::Processing)),
            "failed" => (Some(PaymentStatus::Failed), None),
            "delivered" => (Some(PaymentStatus::Paid), Some(OrderStatus::Delivered)),
            "cancelled" => (Some(PaymentStatus::Cancelled), Some(OrderStatus::Cancelled)),
            "processing" | "shipped" => (None, OrderStatus::from_str(&requested).ok()),
            other => {
                return Err(ServiceError::ValidationError(format!(
                    "Unknown order status '{}'",
                    other
                )))
            }
        };
        Ok(Self {
            payment_status,
            order_status,
        })
    }
}

/// `ORD-YYYYMMDD-XXXXXXXX`, the suffix taken from a random UUID
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}

/// Checkout and order bookkeeping
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    shipping: ShippingPolicy,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        shipping: ShippingPolicy,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            shipping,
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }

    fn validate_request(request: &CreateOrderRequest) -> Result<(), ServiceError> {
        request.validate()?;
        for item in &request.items {
            item.validate()?;
            if item.unit_price < Decimal::ZERO || item.unit_price > MAX_PRICE {
                return Err(ServiceError::ValidationError(format!(
                    "Precio inválido para {}",
                    item.product_name
                )));
            }
            if item.customizations.iter().any(|c| c.price_delta.abs() > MAX_PRICE) {
                return Err(ServiceError::ValidationError(format!(
                    "Recargo inválido para {}",
                    item.product_name
                )));
            }
            if item.line_total().map_or(true, |total| total < Decimal::ZERO) {
                return Err(ServiceError::ValidationError(format!(
                    "Total de línea inválido para {}",
                    item.product_name
                )));
            }
        }
        if request.shipping_cost.map_or(false, |c| c < Decimal::ZERO) {
            return Err(ServiceError::ValidationError(
                "El costo de envío no puede ser negativo".into(),
            ));
        }
        if request.shipping_cost.map_or(false, |c| c > MAX_PRICE) {
            return Err(ServiceError::ValidationError(
                "Costo de envío inválido".into(),
            ));
        }
        Ok(())
    }

    fn order_too_large() -> ServiceError {
        ServiceError::ValidationError("El valor del pedido es demasiado alto".into())
    }

    fn subtotal(items: &[OrderItemRequest]) -> Result<Decimal, ServiceError> {
        items.iter().try_fold(Decimal::ZERO, |acc, item| {
            item.line_total()
                .and_then(|line| acc.checked_add(line))
                .ok_or_else(Self::order_too_large)
        })
    }

    /// Turns a cart into a persisted order.
    ///
    /// Discount redemption, order rows and stock decrements share one transaction; nothing
    /// is written when any step fails. Notifications go out only after commit.
    #[instrument(skip(self, request), fields(customer_type = %request.customer_type, payment_method = %request.payment_method, items = request.items.len()))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<CheckoutReceipt, ServiceError> {
        Self::validate_request(&request)?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let subtotal = Self::subtotal(&request.items)?;
        let total_units: u32 = request
            .items
            .iter()
            .map(|i| u32::try_from(i.quantity).unwrap_or(0))
            .sum();

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start checkout transaction");
            ServiceError::DatabaseError(e)
        })?;

        let discount_code = request
            .discount_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(crate::services::discounts::normalize_code);

        let discount_amount = match &discount_code {
            Some(code) => {
                let fingerprint = customer_fingerprint(&request.shipping_address);
                DiscountService::redeem(&txn, code, &fingerprint, subtotal, order_id, now).await?
            }
            None => Decimal::ZERO,
        };

        let shipping_cost =
            self.shipping
                .cost(request.customer_type, total_units, request.shipping_cost);
        let total_amount = subtotal
            .checked_sub(discount_amount)
            .and_then(|t| t.checked_add(shipping_cost))
            .ok_or_else(Self::order_too_large)?;
        if total_amount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "El descuento supera el valor del pedido".into(),
            ));
        }

        if let Some(claimed) = request.subtotal.filter(|s| *s != subtotal) {
            warn!(%claimed, computed = %subtotal, "client subtotal differs from computed subtotal");
        }
        if let Some(claimed) = request.total.filter(|t| *t != total_amount) {
            warn!(%claimed, computed = %total_amount, "client total differs from computed total");
        }

        let pickup_token = match request.payment_method {
            PaymentMethod::CashOnDelivery => Some(pickup_tokens::generate()),
            _ => None,
        };
        let order_number = generate_order_number(now);

        let order_model = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            customer_type: Set(request.customer_type),
            subtotal: Set(subtotal),
            discount_code: Set(discount_code),
            discount_amount: Set(discount_amount),
            shipping_cost: Set(shipping_cost),
            total_amount: Set(total_amount),
            shipping_address: Set(request.shipping_address.clone()),
            payment_method: Set(request.payment_method),
            payment_status: Set(PaymentStatus::Pending),
            order_status: Set(OrderStatus::Pending),
            size_confirmation: Set(request.size_confirmation),
            pickup_token: Set(pickup_token.clone()),
            pickup_token_used: Set(false),
            latest_payment_reference: Set(None),
            gateway_transaction_id: Set(None),
            notes: Set(request.notes.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, %order_id, "Failed to insert order");
            ServiceError::DatabaseError(e)
        })?;

        let mut items = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let line_total = item.line_total().ok_or_else(Self::order_too_large)?;
            let line = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id.clone()),
                product_code: Set(item.product_code.clone()),
                product_name: Set(item.product_name.clone()),
                variant: Set(item.variant.clone()),
                size: Set(item.size.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                customizations: Set(CustomizationList(item.customizations.clone())),
                line_total: Set(line_total),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(line);
        }

        InventoryService::decrement_for_order(&txn, &items).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to commit checkout transaction");
            ServiceError::DatabaseError(e)
        })?;

        counter!("checkout.orders.created", 1);
        info!(%order_id, order_number = %order_number, total = %total_amount, "order created");

        self.emit(Event::OrderCreated {
            order_id,
            order_number: order_number.clone(),
            total_amount,
        })
        .await;
        if let Some(token) = &pickup_token {
            self.emit(Event::PickupTokenIssued {
                order_id,
                order_number: order_number.clone(),
                email: order_model.shipping_address.email.clone(),
                token: token.clone(),
            })
            .await;
        }

        Ok(CheckoutReceipt {
            order_id,
            order_number,
            subtotal,
            discount_amount,
            shipping_cost,
            total_amount,
            pickup_token,
        })
    }

    pub async fn find_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        let order = self.find_order(order_id).await?;
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?;
        Ok(OrderWithItems { order, items })
    }

    /// Newest first; `page` is 1-based
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        filter: OrderFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let mut query = OrderEntity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = filter.status {
            query = query.filter(order::Column::OrderStatus.eq(status));
        }
        if let Some(payment_status) = filter.payment_status {
            query = query.filter(order::Column::PaymentStatus.eq(payment_status));
        }

        let paginator = query.paginate(&*self.db_pool, limit.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    #[instrument(skip(self, patch))]
    pub async fn patch_order(&self, order_id: Uuid, patch: OrderPatch) -> Result<order::Model, ServiceError> {
        patch.validate()?;
        let order = self.find_order(order_id).await?;

        let mut active: OrderActiveModel = order.into();
        if let Some(notes) = patch.notes {
            active.notes = Set(Some(notes));
        }
        if let Some(address) = patch.shipping_address {
            active.shipping_address = Set(address);
        }
        Ok(active.update(&*self.db_pool).await?)
    }

    /// Applies the status mapping table
    #[instrument(skip(self))]
    pub async fn update_status(&self, order_id: Uuid, requested: &str) -> Result<order::Model, ServiceError> {
        let update = StatusUpdate::for_requested(requested)?;
        let order = self.find_order(order_id).await?;

        let mut active: OrderActiveModel = order.into();
        if let Some(payment_status) = update.payment_status {
            active.payment_status = Set(payment_status);
        }
        if let Some(order_status) = update.order_status {
            active.order_status = Set(order_status);
        }
        let updated = active.update(&*self.db_pool).await?;

        info!(%order_id, requested, payment_status = %updated.payment_status, order_status = %updated.order_status, "order status updated");
        self.emit(Event::OrderStatusChanged {
            order_id,
            payment_status: updated.payment_status.to_string(),
            order_status: updated.order_status.to_string(),
        })
        .await;
        Ok(updated)
    }

    /// Administrative delete of an order with its lines and redemption rows.
    /// Payment attempts are kept as the record of money movement.
    #[instrument(skip(self))]
    pub async fn purge_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;
        OrderItemEntity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        RedemptionEntity::delete_many()
            .filter(discount_redemption::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        let result = OrderEntity::delete_by_id(order_id).exec(&txn).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }
        txn.commit().await?;

        warn!(%order_id, "order purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case("pending", Some(PaymentStatus::Pending), None)]
    #[case("paid", Some(PaymentStatus::Paid), Some(OrderStatus::Confirmed))]
    #[case("confirmed", Some(PaymentStatus::Confirmed), Some(OrderStatus::Processing))]
    #[case("failed", Some(PaymentStatus::Failed), None)]
    #[case("delivered", Some(PaymentStatus::Paid), Some(OrderStatus::Delivered))]
    #[case("cancelled", Some(PaymentStatus::Cancelled), Some(OrderStatus::Cancelled))]
    #[case("processing", None, Some(OrderStatus::Processing))]
    #[case("SHIPPED", None, Some(OrderStatus::Shipped))]
    fn status_mapping_table(
        #[case] requested: &str,
        #[case] payment: Option<PaymentStatus>,
        #[case] fulfilment: Option<OrderStatus>,
    ) {
        let update = StatusUpdate::for_requested(requested).unwrap();
        assert_eq!(update.payment_status, payment);
        assert_eq!(update.order_status, fulfilment);
    }

    #[test]
    fn unknown_status_is_a_validation_error() {
        assert!(matches!(
            StatusUpdate::for_requested("refunded"),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn line_total_includes_customizations() {
        let item = OrderItemRequest {
            product_id: "p".into(),
            product_code: None,
            product_name: "Camiseta".into(),
            variant: "local".into(),
            size: "L".into(),
            quantity: 2,
            unit_price: dec!(85000),
            customizations: vec![
                Customization {
                    name: "nombre".into(),
                    value: Some("PÉREZ".into()),
                    price_delta: dec!(15000),
                },
                Customization {
                    name: "parche".into(),
                    value: None,
                    price_delta: dec!(5000),
                },
            ],
        };
        assert_eq!(item.line_total(), Some(dec!(210000)));
    }

    #[test]
    fn line_total_overflow_is_none() {
        let mut item = OrderItemRequest {
            product_id: "p".into(),
            product_code: None,
            product_name: "Camiseta".into(),
            variant: "local".into(),
            size: "L".into(),
            quantity: 2,
            unit_price: Decimal::MAX,
            customizations: Vec::new(),
        };
        assert_eq!(item.line_total(), None);

        item.quantity = 1;
        item.customizations.push(Customization {
            name: "nombre".into(),
            value: None,
            price_delta: dec!(1),
        });
        assert_eq!(item.line_total(), None);
    }

    #[test]
    fn order_number_format() {
        let now = DateTime::parse_from_rfc3339("2024-03-05T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let number = generate_order_number(now);
        let re = regex::Regex::new(r"^ORD-20240305-[0-9A-F]{8}$").unwrap();
        assert!(re.is_match(&number), "{}", number);
    }

    #[test]
    fn order_patch_rejects_total_edits() {
        assert!(serde_json::from_str::<OrderPatch>(r#"{"total_amount": 1}"#).is_err());
        assert!(serde_json::from_str::<OrderPatch>(r#"{"notes": "llamar antes"}"#).is_ok());
    }
}
