/// Payment provider client
///
/// The billing manager talks to the provider through the `PaymentProvider`
/// trait. `HttpPaymentProvider` speaks the Paystack REST API.
use crate::{
    config::BillingConfig,
    error::{AppError, AppResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Transaction to open at the provider
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub email: String,
    /// Minor currency unit
    pub amount: i64,
    pub reference: String,
    pub callback_url: String,
    pub metadata: TransactionMetadata,
}

/// Metadata attached at initialize time and echoed back by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    #[serde(default)]
    pub school_id: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
}

/// Hosted checkout created by the provider
#[derive(Debug, Clone, Deserialize)]
pub struct Checkout {
    pub authorization_url: String,
    pub reference: String,
}

/// Provider's view of a transaction
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderTransaction {
    /// `success`, `failed`, `abandoned`, ...
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub gateway_response: Option<String>,
    #[serde(default)]
    pub customer: Option<ProviderCustomer>,
    #[serde(default)]
    pub authorization: Option<ProviderAuthorization>,
    #[serde(default, deserialize_with = "lenient_metadata")]
    pub metadata: Option<TransactionMetadata>,
}

impl ProviderTransaction {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// A definitive non-success answer (unknown reference, declined, ...)
    pub fn rejected(reference: &str, message: impl Into<String>) -> Self {
        Self {
            status: "failed".to_string(),
            reference: reference.to_string(),
            gateway_response: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn customer_code(&self) -> Option<&str> {
        self.customer.as_ref().and_then(|c| c.customer_code.as_deref())
    }

    pub fn authorization_code(&self) -> Option<&str> {
        self.authorization
            .as_ref()
            .and_then(|a| a.authorization_code.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderCustomer {
    #[serde(default)]
    pub customer_code: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderAuthorization {
    #[serde(default)]
    pub authorization_code: Option<String>,
}

/// Metadata sometimes arrives as a JSON-encoded string, or as `""` when empty
fn lenient_metadata<'de, D>(deserializer: D) -> Result<Option<TransactionMetadata>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Object(_) => serde_json::from_value(value).ok(),
        serde_json::Value::String(s) => serde_json::from_str(&s).ok(),
        _ => None,
    })
}

/// Payment provider operations
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Open a hosted checkout; errors become `PaymentInitFailed`
    async fn initialize(&self, request: &CheckoutRequest) -> AppResult<Checkout>;

    /// Ask the provider for the authoritative state of a transaction
    ///
    /// `Ok` carries a definitive provider answer (including rejections);
    /// `Err` means the provider could not be asked.
    async fn verify(&self, reference: &str) -> AppResult<ProviderTransaction>;
}

/// Response envelope used by every provider endpoint
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

/// Paystack-compatible HTTP client
pub struct HttpPaymentProvider {
    http_client: Client,
    base_url: String,
    secret_key: String,
}

impl HttpPaymentProvider {
    pub fn new(config: &BillingConfig) -> AppResult<Self> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn initialize(&self, request: &CheckoutRequest) -> AppResult<Checkout> {
        let url = format!("{}/transaction/initialize", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::PaymentInitFailed(format!("Provider unreachable: {}", e)))?;

        let http_status = response.status();
        let envelope: Envelope<Checkout> = response.json().await.map_err(|e| {
            AppError::PaymentInitFailed(format!(
                "Unreadable provider response ({}): {}",
                http_status, e
            ))
        })?;

        match envelope.data {
            Some(checkout) if envelope.status => Ok(checkout),
            _ => Err(AppError::PaymentInitFailed(envelope.message)),
        }
    }

    async fn verify(&self, reference: &str) -> AppResult<ProviderTransaction> {
        let url = format!("{}/transaction/verify/{}", self.base_url, reference);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| AppError::VerificationFailed(format!("Provider unreachable: {}", e)))?;

        let http_status = response.status();
        if http_status.is_server_error() {
            return Err(AppError::VerificationFailed(format!(
                "Provider returned {}",
                http_status
            )));
        }

        let envelope: Envelope<ProviderTransaction> = response.json().await.map_err(|e| {
            AppError::VerificationFailed(format!("Unreadable provider response: {}", e))
        })?;

        match envelope.data {
            Some(transaction) if envelope.status => Ok(transaction),
            _ => Ok(ProviderTransaction::rejected(reference, envelope.message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verify_envelope() {
        let body = r#"{
            "status": true,
            "message": "Verification successful",
            "data": {
                "status": "success",
                "reference": "BNC_1_abc",
                "amount": 4999900,
                "channel": "card",
                "paid_at": "2024-03-01T10:00:00.000Z",
                "customer": {"customer_code": "CUS_1", "email": "a@b.c"},
                "authorization": {"authorization_code": "AUTH_1"},
                "metadata": "{\"school_id\":\"s1\",\"plan\":\"premium\",\"interval\":\"monthly\"}"
            }
        }"#;
        let envelope: Envelope<ProviderTransaction> = serde_json::from_str(body).unwrap();
        let tx = envelope.data.unwrap();

        assert!(tx.is_success());
        assert_eq!(tx.amount, 4_999_900);
        assert_eq!(tx.customer_code(), Some("CUS_1"));
        assert_eq!(tx.authorization_code(), Some("AUTH_1"));
        assert_eq!(tx.metadata.unwrap().plan.as_deref(), Some("premium"));
    }

    #[test]
    fn test_empty_metadata_is_none() {
        let tx: ProviderTransaction =
            serde_json::from_str(r#"{"status": "failed", "metadata": ""}"#).unwrap();
        assert!(!tx.is_success());
        assert!(tx.metadata.is_none());
    }

    #[test]
    fn test_rejected_transaction() {
        let tx = ProviderTransaction::rejected("BNC_x", "Transaction reference not found");
        assert!(!tx.is_success());
        assert_eq!(tx.reference, "BNC_x");
    }
}
