use super::{FinancialInstitution, GatewayError, GatewayTransaction, PaymentGateway, TransactionRequest};
use crate::config::PaymentsConfig;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Wompi REST client
#[derive(Clone)]
pub struct WompiGateway {
    client: reqwest::Client,
    base_url: String,
    public_key: String,
}

impl WompiGateway {
    pub fn new(base_url: impl Into<String>, public_key: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            public_key: public_key.into(),
        })
    }

    pub fn from_config(config: &PaymentsConfig) -> Result<Self, GatewayError> {
        Self::new(
            config.api_url.clone(),
            config.public_key.clone(),
            config.gateway_timeout(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Reads the body as JSON; non-2xx answers become `Rejected`.
    async fn read_json(response: reqwest::Response) -> Result<Value, GatewayError> {
        let status = response.status();
        let body = response.text().await?;
        let payload: Value = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body).map_err(|e| {
                if status.is_success() {
                    GatewayError::Malformed(format!("invalid JSON: {}", e))
                } else {
                    GatewayError::Rejected {
                        status: status.as_u16(),
                        message: body.clone(),
                        payload: Value::Null,
                    }
                }
            })?
        };

        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: rejection_message(&payload),
                payload,
            });
        }

        Ok(payload)
    }
}

/// Pulls a readable reason out of `{"error": {"type", "reason" | "messages"}}`.
fn rejection_message(payload: &Value) -> String {
    let error = &payload["error"];
    if let Some(reason) = error["reason"].as_str() {
        return reason.to_string();
    }
    if let Some(messages) = error["messages"].as_object() {
        let joined = messages
            .iter()
            .map(|(field, msgs)| match msgs.as_array() {
                Some(list) => format!(
                    "{}: {}",
                    field,
                    list.iter()
                        .filter_map(|m| m.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                None => format!("{}: {}", field, msgs),
            })
            .collect::<Vec<_>>()
            .join("; ");
        if !joined.is_empty() {
            return joined;
        }
    }
    error["type"]
        .as_str()
        .unwrap_or("transaction rejected")
        .to_string()
}

fn parse_transaction(payload: Value) -> Result<GatewayTransaction, GatewayError> {
    let data = &payload["data"];
    let id = data["id"]
        .as_str()
        .map(str::to_string)
        .or_else(|| data["id"].as_i64().map(|n| n.to_string()))
        .ok_or_else(|| GatewayError::Malformed("missing data.id".into()))?;
    let status = data["status"]
        .as_str()
        .ok_or_else(|| GatewayError::Malformed("missing data.status".into()))?
        .to_string();
    let redirect_url = data["payment_method"]["extra"]["async_payment_url"]
        .as_str()
        .or_else(|| data["redirect_url"].as_str())
        .map(str::to_string);

    Ok(GatewayTransaction {
        id,
        status,
        redirect_url,
        raw: payload,
    })
}

#[async_trait]
impl PaymentGateway for WompiGateway {
    #[instrument(skip(self))]
    async fn acceptance_token(&self) -> Result<String, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("/merchants/{}", self.public_key)))
            .send()
            .await?;
        let payload = Self::read_json(response).await?;

        payload["data"]["presigned_acceptance"]["acceptance_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                error!("merchant response without presigned acceptance");
                GatewayError::Malformed("missing presigned_acceptance.acceptance_token".into())
            })
    }

    #[instrument(skip(self, request), fields(reference = %request.reference, method = %request.payment_method.method_type))]
    async fn create_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<GatewayTransaction, GatewayError> {
        let response = self
            .client
            .post(self.url("/transactions"))
            .bearer_auth(&self.public_key)
            .json(request)
            .send()
            .await?;

        let payload = match Self::read_json(response).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "transaction not accepted");
                return Err(e);
            }
        };

        let transaction = parse_transaction(payload)?;
        info!(transaction_id = %transaction.id, status = %transaction.status, "transaction created");
        Ok(transaction)
    }

    #[instrument(skip(self))]
    async fn financial_institutions(&self) -> Result<Vec<FinancialInstitution>, GatewayError> {
        let response = self
            .client
            .get(self.url("/pse/financial_institutions"))
            .bearer_auth(&self.public_key)
            .send()
            .await?;
        let payload = Self::read_json(response).await?;

        serde_json::from_value(payload["data"].clone())
            .map_err(|e| GatewayError::Malformed(format!("financial institutions: {}", e)))
    }
}
