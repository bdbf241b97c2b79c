use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::{error::DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Human-readable, localized error description
    pub message: String,
    /// Machine-readable reason code
    pub code: String,
    /// Whether the caller may retry (with a fresh payment attempt)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

/// Reasons a discount code can be refused at checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DiscountRejection {
    NotFound,
    Expired,
    Exhausted,
    AlreadyUsed,
}

impl DiscountRejection {
    pub fn localized(&self) -> &'static str {
        match self {
            Self::NotFound => "Código de descuento inválido o inactivo",
            Self::Expired => "El código de descuento ha expirado",
            Self::Exhausted => "El código de descuento ha alcanzado su límite de usos",
            Self::AlreadyUsed => "Ya utilizaste este código de descuento",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Discount code rejected: {0}")]
    Discount(DiscountRejection),

    #[error("Payment reference already used: {0}")]
    DuplicateReference(String),

    #[error("Payment attempt {reference} is still in flight")]
    PaymentInFlight { reference: String },

    #[error("Pickup token already used for order {0}")]
    PickupTokenUsed(String),

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<DiscountRejection> for ServiceError {
    fn from(reason: DiscountRejection) -> Self {
        ServiceError::Discount(reason)
    }
}

/// True when the store refused a write because of a unique index.
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) | Self::Discount(DiscountRejection::NotFound) => {
                StatusCode::NOT_FOUND
            }
            Self::ValidationError(_) | Self::InvalidOperation(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_)
            | Self::Discount(_)
            | Self::DuplicateReference(_)
            | Self::PaymentInFlight { .. }
            | Self::PickupTokenUsed(_) => StatusCode::CONFLICT,
            Self::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Machine-readable reason code
    pub fn reason_code(&self) -> String {
        match self {
            Self::DatabaseError(_) => "database_error".into(),
            Self::NotFound(_) => "not_found".into(),
            Self::ValidationError(_) => "validation_error".into(),
            Self::InvalidOperation(_) => "invalid_operation".into(),
            Self::BadRequest(_) => "bad_request".into(),
            Self::Unauthorized(_) => "unauthorized".into(),
            Self::Forbidden(_) => "forbidden".into(),
            Self::Conflict(_) => "conflict".into(),
            Self::Discount(reason) => format!("discount_{}", reason),
            Self::DuplicateReference(_) => "duplicate_reference".into(),
            Self::PaymentInFlight { .. } => "payment_in_flight".into(),
            Self::PickupTokenUsed(_) => "pickup_token_used".into(),
            Self::PaymentFailed(_) => "payment_failed".into(),
            Self::ExternalServiceError(_) => "gateway_error".into(),
            Self::ServiceUnavailable(_) => "service_unavailable".into(),
            Self::InternalError(_) => "internal_error".into(),
        }
    }

    /// For payment failures: can the shopper start a new attempt right away?
    pub fn retryable(&self) -> Option<bool> {
        match self {
            Self::PaymentFailed(_) | Self::ExternalServiceError(_) => Some(true),
            Self::PaymentInFlight { .. } => Some(false),
            _ => None,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => "Error interno del servidor".into(),
            Self::Discount(reason) => reason.localized().into(),
            Self::PaymentInFlight { .. } => {
                "Ya hay un pago en proceso para este pedido. Espera a que finalice antes de intentar de nuevo."
                    .into()
            }
            Self::DuplicateReference(_) => "La referencia de pago ya fue utilizada".into(),
            Self::PickupTokenUsed(_) => "Este código de entrega ya fue utilizado".into(),
            Self::PaymentFailed(msg) => format!("El pago fue rechazado: {}", msg),
            Self::ExternalServiceError(_) => {
                "No fue posible comunicarse con la pasarela de pagos. Intenta de nuevo.".into()
            }
            Self::ServiceUnavailable(msg) => format!("Servicio no disponible: {}", msg),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            code: self.reason_code(),
            retryable: self.retryable(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.code, "not_found");
    }

    #[tokio::test]
    async fn in_flight_payment_is_reported_as_not_retryable() {
        let response = ServiceError::PaymentInFlight {
            reference: "RUN1".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.retryable, Some(false));
        assert_eq!(payload.code, "payment_in_flight");
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Discount(DiscountRejection::NotFound).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::Discount(DiscountRejection::Exhausted).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::DuplicateReference("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::PaymentFailed("x".into()).status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ServiceError::ExternalServiceError("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn internal_details_are_hidden() {
        assert_eq!(
            ServiceError::InternalError("pool exhausted".into()).response_message(),
            "Error interno del servidor"
        );
        assert_eq!(
            ServiceError::NotFound("Order not found".into()).response_message(),
            "Not found: Order not found"
        );
    }

    #[test]
    fn discount_reason_codes_are_specific() {
        assert_eq!(
            ServiceError::Discount(DiscountRejection::AlreadyUsed).reason_code(),
            "discount_already_used"
        );
        assert_eq!(
            ServiceError::from(DiscountRejection::Expired).response_message(),
            "El código de descuento ha expirado"
        );
    }
}
