//! Card / bank payment gateway contract.
//!
//! The coordinator only talks to [`PaymentGateway`]; [`wompi::WompiGateway`] is the
//! HTTP implementation used in production.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod wompi;

pub use wompi::WompiGateway;

/// Payment methods that redirect the shopper to their bank and must be signed
pub const BANK_REDIRECT_METHODS: [&str; 2] = ["PSE", "BANCOLOMBIA_TRANSFER"];

pub fn is_bank_redirect(method: &str) -> bool {
    BANK_REDIRECT_METHODS
        .iter()
        .any(|m| m.eq_ignore_ascii_case(method))
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway did not answer in time")]
    Timeout,

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway rejected the request ({status}): {message}")]
    Rejected {
        status: u16,
        message: String,
        payload: serde_json::Value,
    },

    #[error("unexpected gateway response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::Malformed(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// Method-specific part of a transaction request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethodData {
    #[serde(rename = "type")]
    pub method_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_legal_id_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_legal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub financial_institution_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installments: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub full_name: String,
    pub legal_id: String,
    pub legal_id_type: String,
}

/// Body of `POST /transactions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub acceptance_token: String,
    pub amount_in_cents: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub customer_email: String,
    pub reference: String,
    pub payment_method: PaymentMethodData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_data: Option<CustomerData>,
}

/// Transaction as acknowledged by the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayTransaction {
    pub id: String,
    /// Gateway vocabulary (PENDING, APPROVED, ...)
    pub status: String,
    /// Bank page the shopper must visit, for redirect methods
    pub redirect_url: Option<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialInstitution {
    pub financial_institution_code: String,
    pub financial_institution_name: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Fresh presigned acceptance credential; must not be reused across attempts
    async fn acceptance_token(&self) -> Result<String, GatewayError>;

    async fn create_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<GatewayTransaction, GatewayError>;

    async fn financial_institutions(&self) -> Result<Vec<FinancialInstitution>, GatewayError>;
}

/// `hex(sha256(reference ‖ amount_in_cents ‖ currency ‖ secret))`
pub fn integrity_signature(
    reference: &str,
    amount_in_cents: i64,
    currency: &str,
    secret: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(reference.as_bytes());
    hasher.update(amount_in_cents.to_string().as_bytes());
    hasher.update(currency.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Checksum of an event notification: the listed property values, then the
/// timestamp, then the events secret, concatenated and hashed.
pub fn event_checksum(values: &[String], timestamp: i64, secret: &str) -> String {
    let mut hasher = Sha256::new();
    for value in values {
        hasher.update(value.as_bytes());
    }
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_signature_is_sha256_of_concatenation() {
        let expected = hex::encode(Sha256::digest(b"RUN123450000COPtest_integrity"));
        assert_eq!(
            integrity_signature("RUN1234", 50000, "COP", "test_integrity"),
            expected
        );
        assert_eq!(expected.len(), 64);
    }

    #[test]
    fn signature_depends_on_every_component() {
        let base = integrity_signature("RUN1", 100, "COP", "s");
        assert_ne!(base, integrity_signature("RUN2", 100, "COP", "s"));
        assert_ne!(base, integrity_signature("RUN1", 101, "COP", "s"));
        assert_ne!(base, integrity_signature("RUN1", 100, "USD", "s"));
        assert_ne!(base, integrity_signature("RUN1", 100, "COP", "t"));
    }

    #[test]
    fn bank_redirect_methods_are_case_insensitive() {
        assert!(is_bank_redirect("PSE"));
        assert!(is_bank_redirect("bancolombia_transfer"));
        assert!(!is_bank_redirect("CARD"));
        assert!(!is_bank_redirect("NEQUI"));
    }

    #[test]
    fn transaction_request_omits_absent_fields() {
        let request = TransactionRequest {
            acceptance_token: "tok".into(),
            amount_in_cents: 100,
            currency: "COP".into(),
            signature: None,
            customer_email: "a@b.co".into(),
            reference: "RUN1".into(),
            payment_method: PaymentMethodData {
                method_type: "NEQUI".into(),
                ..Default::default()
            },
            redirect_url: None,
            customer_data: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("signature").is_none());
        assert_eq!(json["payment_method"]["type"], "NEQUI");
        assert!(json["payment_method"].get("financial_institution_code").is_none());
    }
}
