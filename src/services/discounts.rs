use crate::{
    db::DbPool,
    entities::discount_code::{self, DiscountType, Entity as DiscountCodeEntity, UsageClass},
    entities::discount_redemption::{self, Entity as RedemptionEntity},
    entities::order::ShippingAddress,
    errors::{is_unique_violation, DiscountRejection, ServiceError},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Condition, Expr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// What a valid code is worth, resolved before any redemption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountQuote {
    pub code: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub usage_class: UsageClass,
}

impl DiscountQuote {
    /// Discount for `subtotal`. Fixed amounts are not clamped to the subtotal.
    pub fn amount(&self, subtotal: Decimal) -> Decimal {
        match self.discount_type {
            DiscountType::Percentage => (subtotal * (self.value / Decimal::ONE_HUNDRED)).round_dp(2),
            DiscountType::Fixed => self.value,
        }
    }
}

impl From<&discount_code::Model> for DiscountQuote {
    fn from(model: &discount_code::Model) -> Self {
        Self {
            code: model.code.clone(),
            discount_type: model.discount_type,
            value: model.value,
            usage_class: model.usage_class,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewDiscountCode {
    #[validate(length(min = 3, max = 40, message = "El código debe tener entre 3 y 40 caracteres"))]
    pub code: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    #[serde(default = "default_usage_class")]
    pub usage_class: UsageClass,
    #[validate(range(min = 1))]
    pub max_uses: Option<i32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_usage_class() -> UsageClass {
    UsageClass::Normal
}

fn default_active() -> bool {
    true
}

/// Codes are matched trimmed and upper-cased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Identity used for once-per-customer codes: `name|phone digits|address`.
pub fn customer_fingerprint(address: &ShippingAddress) -> String {
    let phone: String = address.phone.chars().filter(|c| c.is_ascii_digit()).collect();
    format!(
        "{}|{}|{}",
        address.full_name.trim().to_lowercase(),
        phone,
        address.address.trim().to_lowercase()
    )
}

/// Rejection checks in their fixed order: missing/inactive/not-yet-valid, expired, exhausted.
pub fn check_code(
    model: Option<&discount_code::Model>,
    now: DateTime<Utc>,
) -> Result<(), DiscountRejection> {
    let model = match model {
        Some(m) if m.active && m.valid_from <= now => m,
        _ => return Err(DiscountRejection::NotFound),
    };

    if model.valid_until.map_or(false, |until| until < now) {
        return Err(DiscountRejection::Expired);
    }

    if model.max_uses.map_or(false, |max| model.current_uses >= max) {
        return Err(DiscountRejection::Exhausted);
    }

    Ok(())
}

/// Discount code evaluation and atomic redemption
#[derive(Clone)]
pub struct DiscountService {
    db_pool: Arc<DbPool>,
}

impl DiscountService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    async fn find_by_code<C: ConnectionTrait>(
        conn: &C,
        code: &str,
    ) -> Result<Option<discount_code::Model>, ServiceError> {
        DiscountCodeEntity::find()
            .filter(discount_code::Column::Code.eq(normalize_code(code)))
            .one(conn)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to look up discount code");
                ServiceError::DatabaseError(e)
            })
    }

    /// Read-only check, used by the storefront before checkout
    #[instrument(skip(self))]
    pub async fn validate(&self, code: &str, now: DateTime<Utc>) -> Result<DiscountQuote, ServiceError> {
        if code.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "El código de descuento es obligatorio".into(),
            ));
        }

        let model = Self::find_by_code(&*self.db_pool, code).await?;
        check_code(model.as_ref(), now)?;
        // check_code only passes on Some
        model
            .as_ref()
            .map(DiscountQuote::from)
            .ok_or(ServiceError::Discount(DiscountRejection::NotFound))
    }

    /// Redeems `code` inside the caller's transaction and returns the discount amount.
    ///
    /// The use counter only moves through a conditional increment, so concurrent
    /// checkouts can never push it past `max_uses`. For normal codes the unique
    /// `(discount_code_id, dedupe_key)` index is the last word on per-customer reuse.
    #[instrument(skip(conn, fingerprint), fields(order_id = %order_id))]
    pub async fn redeem<C: ConnectionTrait>(
        conn: &C,
        code: &str,
        fingerprint: &str,
        subtotal: Decimal,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Decimal, ServiceError> {
        let model = Self::find_by_code(conn, code).await?;
        check_code(model.as_ref(), now)?;
        let model = model.ok_or(ServiceError::Discount(DiscountRejection::NotFound))?;

        let dedupe_key = match model.usage_class {
            UsageClass::Normal => Some(fingerprint.to_string()),
            UsageClass::Authorized => None,
        };

        if let Some(key) = &dedupe_key {
            let used = RedemptionEntity::find()
                .filter(discount_redemption::Column::DiscountCodeId.eq(model.id))
                .filter(discount_redemption::Column::DedupeKey.eq(key.as_str()))
                .count(conn)
                .await?;
            if used > 0 {
                info!(code = %model.code, "discount code already used by this customer");
                return Err(DiscountRejection::AlreadyUsed.into());
            }
        }

        Self::claim_use(conn, &model, now).await?;

        let redemption = discount_redemption::ActiveModel {
            id: Set(Uuid::new_v4()),
            discount_code_id: Set(model.id),
            order_id: Set(order_id),
            fingerprint: Set(fingerprint.to_string()),
            dedupe_key: Set(dedupe_key),
            redeemed_at: Set(now),
        };
        if let Err(e) = redemption.insert(conn).await {
            if is_unique_violation(&e) {
                return Err(DiscountRejection::AlreadyUsed.into());
            }
            error!(error = %e, "Failed to record discount redemption");
            return Err(ServiceError::DatabaseError(e));
        }

        let amount = DiscountQuote::from(&model).amount(subtotal);
        counter!("checkout.discounts.redeemed", 1);
        info!(code = %model.code, %amount, "discount code redeemed");
        Ok(amount)
    }

    /// Takes one use of `model` with a single conditional increment.
    ///
    /// The `current_uses < max_uses` guard is evaluated by the database, so a stale
    /// `model` (read before another checkout took the last use) yields `Exhausted`.
    pub async fn claim_use<C: ConnectionTrait>(
        conn: &C,
        model: &discount_code::Model,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let claimed = DiscountCodeEntity::update_many()
            .col_expr(
                discount_code::Column::CurrentUses,
                Expr::col(discount_code::Column::CurrentUses).add(1),
            )
            .col_expr(discount_code::Column::UpdatedAt, Expr::value(now))
            .filter(discount_code::Column::Id.eq(model.id))
            .filter(
                Condition::any()
                    .add(discount_code::Column::MaxUses.is_null())
                    .add(
                        Expr::col(discount_code::Column::CurrentUses)
                            .lt(Expr::col(discount_code::Column::MaxUses)),
                    ),
            )
            .exec(conn)
            .await?;

        if claimed.rows_affected == 0 {
            warn!(code = %model.code, "discount code exhausted under contention");
            return Err(DiscountRejection::Exhausted.into());
        }
        Ok(())
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_code(&self, request: NewDiscountCode) -> Result<discount_code::Model, ServiceError> {
        request.validate()?;

        match request.discount_type {
            DiscountType::Percentage if request.value <= Decimal::ZERO || request.value > Decimal::ONE_HUNDRED => {
                return Err(ServiceError::ValidationError(
                    "El porcentaje debe estar entre 0 y 100".into(),
                ));
            }
            DiscountType::Fixed if request.value <= Decimal::ZERO => {
                return Err(ServiceError::ValidationError(
                    "El valor del descuento debe ser positivo".into(),
                ));
            }
            _ => {}
        }

        let now = Utc::now();
        let valid_from = request.valid_from.unwrap_or(now);
        if request.valid_until.map_or(false, |until| until <= valid_from) {
            return Err(ServiceError::ValidationError(
                "La fecha de expiración debe ser posterior al inicio".into(),
            ));
        }

        let code = normalize_code(&request.code);
        let model = discount_code::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            discount_type: Set(request.discount_type),
            value: Set(request.value),
            usage_class: Set(request.usage_class),
            max_uses: Set(request.max_uses),
            current_uses: Set(0),
            valid_from: Set(valid_from),
            valid_until: Set(request.valid_until),
            active: Set(request.active),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model.insert(&*self.db_pool).await.map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict(format!("Discount code {} already exists", code))
            } else {
                error!(error = %e, "Failed to create discount code");
                ServiceError::DatabaseError(e)
            }
        })
    }

    pub async fn list_codes(&self) -> Result<Vec<discount_code::Model>, ServiceError> {
        Ok(DiscountCodeEntity::find()
            .order_by_desc(discount_code::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }

    pub async fn get_code(&self, id: Uuid) -> Result<discount_code::Model, ServiceError> {
        DiscountCodeEntity::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Discount code {} not found", id)))
    }

    pub async fn deactivate_code(&self, id: Uuid) -> Result<discount_code::Model, ServiceError> {
        let model = self.get_code(id).await?;
        let mut active: discount_code::ActiveModel = model.into();
        active.active = Set(false);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db_pool).await?)
    }

    /// Removes an unused code. Codes with redemption history are deactivated instead,
    /// so the history stays intact. Returns whether the row was deleted.
    #[instrument(skip(self))]
    pub async fn delete_code(&self, id: Uuid) -> Result<bool, ServiceError> {
        let model = self.get_code(id).await?;
        let redemptions = RedemptionEntity::find()
            .filter(discount_redemption::Column::DiscountCodeId.eq(model.id))
            .count(&*self.db_pool)
            .await?;

        if redemptions > 0 {
            self.deactivate_code(id).await?;
            info!(code = %model.code, redemptions, "discount code deactivated");
            return Ok(false);
        }

        DiscountCodeEntity::delete_by_id(id)
            .exec(&*self.db_pool)
            .await?;
        info!(code = %model.code, "discount code deleted");
        Ok(true)
    }

    /// Redemption history of one code
    pub async fn redemptions(&self, id: Uuid) -> Result<Vec<discount_redemption::Model>, ServiceError> {
        Ok(RedemptionEntity::find()
            .filter(discount_redemption::Column::DiscountCodeId.eq(id))
            .order_by_asc(discount_redemption::Column::RedeemedAt)
            .all(&*self.db_pool)
            .await?)
    }
}
