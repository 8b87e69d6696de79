/// Provider webhook signature and event payloads
use crate::{
    billing::provider::ProviderTransaction,
    error::{AppError, AppResult},
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the hex HMAC-SHA512 of the raw request body
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Hex HMAC-SHA512 of `body` under `secret`
pub fn compute_signature(secret: &str, body: &[u8]) -> AppResult<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("Invalid webhook secret: {}", e)))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check the signature header against the exact raw body bytes
///
/// The comparison is constant-time. A missing or non-hex header is an
/// invalid signature.
pub fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> AppResult<()> {
    let expected = signature
        .map(str::trim)
        .and_then(|s| hex::decode(s).ok())
        .ok_or(AppError::InvalidSignature)?;

    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("Invalid webhook secret: {}", e)))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| AppError::InvalidSignature)
}

/// Webhook event envelope
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Events the billing manager acts on
#[derive(Debug, Clone)]
pub enum BillingEvent {
    ChargeSuccess(ProviderTransaction),
    SubscriptionDisable { customer_code: Option<String> },
    Ignored(String),
}

impl WebhookEvent {
    /// Classify the event; payloads that do not fit their event kind are ignored
    pub fn classify(self) -> BillingEvent {
        match self.event.as_str() {
            "charge.success" => match serde_json::from_value::<ProviderTransaction>(self.data) {
                Ok(mut transaction) => {
                    if transaction.status.is_empty() {
                        transaction.status = "success".to_string();
                    }
                    BillingEvent::ChargeSuccess(transaction)
                }
                Err(e) => BillingEvent::Ignored(format!("charge.success without transaction: {}", e)),
            },
            "subscription.disable" => BillingEvent::SubscriptionDisable {
                customer_code: self
                    .data
                    .get("customer")
                    .and_then(|c| c.get("customer_code"))
                    .and_then(|c| c.as_str())
                    .map(str::to_string),
            },
            other => BillingEvent::Ignored(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sk_test_secret";

    #[test]
    fn test_signature_round_trip() {
        let body = br#"{"event":"charge.success"}"#;
        let signature = compute_signature(SECRET, body).unwrap();
        assert_eq!(signature.len(), 128);
        assert!(verify_signature(SECRET, body, Some(&signature)).is_ok());
    }

    #[test]
    fn test_signature_covers_exact_bytes() {
        let body = br#"{"event":"charge.success"}"#;
        let signature = compute_signature(SECRET, body).unwrap();

        // Same JSON, different whitespace
        let reformatted = br#"{ "event": "charge.success" }"#;
        assert!(matches!(
            verify_signature(SECRET, reformatted, Some(&signature)),
            Err(AppError::InvalidSignature)
        ));
        assert!(matches!(
            verify_signature("other-secret", body, Some(&signature)),
            Err(AppError::InvalidSignature)
        ));
        assert!(matches!(
            verify_signature(SECRET, body, None),
            Err(AppError::InvalidSignature)
        ));
        assert!(matches!(
            verify_signature(SECRET, body, Some("not-hex")),
            Err(AppError::InvalidSignature)
        ));
    }

    #[test]
    fn test_classify_events() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"event":"charge.success","data":{"reference":"BNC_1","amount":100,"status":"success"}}"#,
        )
        .unwrap();
        assert!(matches!(event.classify(), BillingEvent::ChargeSuccess(tx) if tx.reference == "BNC_1"));

        let event: WebhookEvent = serde_json::from_str(
            r#"{"event":"subscription.disable","data":{"customer":{"customer_code":"CUS_9"}}}"#,
        )
        .unwrap();
        assert!(matches!(
            event.classify(),
            BillingEvent::SubscriptionDisable { customer_code: Some(code) } if code == "CUS_9"
        ));

        let event: WebhookEvent =
            serde_json::from_str(r#"{"event":"transfer.success","data":{}}"#).unwrap();
        assert!(matches!(event.classify(), BillingEvent::Ignored(_)));
    }
}
