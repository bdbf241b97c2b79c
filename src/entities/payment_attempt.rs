use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, Display)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptStatus {
    #[sea_orm(string_value = "initiated")]
    Initiated,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "expired")]
    Expired,
}

impl AttemptStatus {
    pub const NON_TERMINAL: [AttemptStatus; 2] = [AttemptStatus::Initiated, AttemptStatus::Pending];

    pub fn is_terminal(&self) -> bool {
        !Self::NON_TERMINAL.contains(self)
    }

    /// Position in the attempt lifecycle; transitions only move to a higher rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Initiated => 0,
            Self::Pending => 1,
            Self::Paid | Self::Failed | Self::Cancelled | Self::Expired => 2,
        }
    }

    /// Maps the gateway's status vocabulary; unknown values are treated as still pending.
    pub fn from_gateway(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "APPROVED" => Self::Paid,
            "DECLINED" | "ERROR" => Self::Failed,
            "VOIDED" => Self::Cancelled,
            _ => Self::Pending,
        }
    }

    /// Upper-case label in the gateway's vocabulary
    pub fn gateway_label(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Pending => "PENDING",
            Self::Paid => "APPROVED",
            Self::Failed => "DECLINED",
            Self::Cancelled => "VOIDED",
            Self::Expired => "EXPIRED",
        }
    }
}

/// Who last moved the attempt; the webhook outranks a client report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, Display)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StatusSource {
    #[sea_orm(string_value = "coordinator")]
    Coordinator,
    #[sea_orm(string_value = "gateway")]
    Gateway,
    #[sea_orm(string_value = "webhook")]
    Webhook,
    #[sea_orm(string_value = "client")]
    Client,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_attempts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    #[sea_orm(unique)]
    pub reference: String,
    pub amount_in_cents: i64,
    pub currency: String,
    pub payment_method: String,
    pub status: AttemptStatus,
    pub status_source: StatusSource,
    pub gateway_transaction_id: Option<String>,
    pub gateway_status: Option<String>,
    #[sea_orm(column_type = "Json", nullable)]
    pub gateway_response: Option<Json>,
    pub redirect_url: Option<String>,
    /// Holds the order id while the attempt is non-terminal; unique, so one in-flight attempt per order
    #[sea_orm(unique)]
    pub in_flight_key: Option<String>,
    pub customer_email: Option<String>,
    pub client_status: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
