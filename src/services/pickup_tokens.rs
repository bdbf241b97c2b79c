use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, OrderStatus, PaymentMethod, PaymentStatus},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use metrics::counter;
use rand::{rngs::OsRng, Rng};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const TOKEN_PREFIX: &str = "COD-";
const TOKEN_LEN: usize = 8;
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// `COD-` followed by eight upper-case alphanumerics from the OS generator
pub fn generate() -> String {
    let mut rng = OsRng;
    let suffix: String = (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", TOKEN_PREFIX, suffix)
}

/// What the delivery person sees after scanning a valid token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickupSummary {
    pub valid: bool,
    pub order_id: Uuid,
    pub order_number: String,
    pub customer_name: String,
    pub total_amount: Decimal,
    pub items_count: i64,
}

#[derive(Clone)]
pub struct PickupTokenService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl PickupTokenService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }

    async fn load_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Issues a token for a cash-on-delivery order that has none yet. Tokens are never reissued.
    #[instrument(skip(self))]
    pub async fn issue_for_order(&self, order_id: Uuid) -> Result<String, ServiceError> {
        let token = generate();
        let result = OrderEntity::update_many()
            .col_expr(order::Column::PickupToken, Expr::value(token.clone()))
            .col_expr(order::Column::PickupTokenUsed, Expr::value(false))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentMethod.eq(PaymentMethod::CashOnDelivery))
            .filter(order::Column::PickupToken.is_null())
            .exec(&*self.db_pool)
            .await?;

        let order = self.load_order(order_id).await?;
        if result.rows_affected == 0 {
            return Err(if order.payment_method != PaymentMethod::CashOnDelivery {
                ServiceError::InvalidOperation("Esta orden no es contra entrega".into())
            } else {
                ServiceError::Conflict(format!(
                    "Order {} already has a pickup token",
                    order.order_number
                ))
            });
        }

        info!(order_number = %order.order_number, "pickup token issued");
        self.emit(Event::PickupTokenIssued {
            order_id,
            order_number: order.order_number.clone(),
            email: order.shipping_address.email.clone(),
            token: token.clone(),
        })
        .await;
        Ok(token)
    }

    /// Looks a token up (optionally scoped to an order number) without consuming it
    #[instrument(skip(self, token))]
    pub async fn validate(
        &self,
        token: &str,
        order_number: Option<&str>,
    ) -> Result<PickupSummary, ServiceError> {
        let token = token.trim().to_uppercase();
        if token.is_empty() {
            return Err(ServiceError::ValidationError("Token requerido".into()));
        }

        let mut query = OrderEntity::find().filter(order::Column::PickupToken.eq(token));
        if let Some(number) = order_number
            .map(|n| n.trim().to_uppercase())
            .filter(|n| !n.is_empty())
        {
            query = query.filter(order::Column::OrderNumber.eq(number));
        }

        let order = query
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Token inválido o no encontrado".into()))?;

        if order.pickup_token_used {
            return Err(ServiceError::PickupTokenUsed(order.order_number));
        }

        let items_count = items_count(&*self.db_pool, order.id).await?;
        Ok(PickupSummary {
            valid: true,
            order_id: order.id,
            order_number: order.order_number,
            customer_name: order.shipping_address.full_name,
            total_amount: order.total_amount,
            items_count,
        })
    }

    /// Marks the token used; this is also the delivery and payment confirmation.
    #[instrument(skip(self))]
    pub async fn consume(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(order::Column::PickupTokenUsed, Expr::value(true))
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Paid))
            .col_expr(order::Column::OrderStatus, Expr::value(OrderStatus::Delivered))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PickupToken.is_not_null())
            .filter(order::Column::PickupTokenUsed.eq(false))
            .exec(&*self.db_pool)
            .await?;

        let order = self.load_order(order_id).await?;
        if result.rows_affected == 0 {
            if order.pickup_token.is_none() {
                return Err(ServiceError::InvalidOperation(
                    "La orden no tiene código de entrega".into(),
                ));
            }
            warn!(order_number = %order.order_number, "pickup token consumed twice");
            return Err(ServiceError::PickupTokenUsed(order.order_number));
        }

        counter!("checkout.pickup_tokens.consumed", 1);
        info!(order_number = %order.order_number, "pickup token consumed, order delivered");
        self.emit(Event::PickupTokenConsumed {
            order_id,
            order_number: order.order_number.clone(),
        })
        .await;
        Ok(order)
    }
}

/// Units across all lines of an order
pub(crate) async fn items_count<C: ConnectionTrait>(conn: &C, order_id: Uuid) -> Result<i64, ServiceError> {
    let quantities: Vec<i32> = OrderItemEntity::find()
        .select_only()
        .column(order_item::Column::Quantity)
        .filter(order_item::Column::OrderId.eq(order_id))
        .into_tuple()
        .all(conn)
        .await?;
    Ok(quantities.into_iter().map(i64::from).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn token_has_expected_shape() {
        let re = regex::Regex::new(r"^COD-[A-Z0-9]{8}$").unwrap();
        for _ in 0..200 {
            assert!(re.is_match(&generate()));
        }
    }

    #[test]
    fn tokens_do_not_repeat_in_practice() {
        let tokens: HashSet<String> = (0..1000).map(|_| generate()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    proptest! {
        #[test]
        fn every_suffix_char_is_from_the_alphabet(_seed in 0u8..50) {
            let token = generate();
            prop_assert!(token.starts_with(TOKEN_PREFIX));
            prop_assert!(token[TOKEN_PREFIX.len()..].bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
        }
    }
}
