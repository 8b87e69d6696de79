/// Billing and subscription system
///
/// Initializes payment-provider transactions, verifies them when the user
/// returns from checkout, and reconciles Payment/Subscription state from
/// provider webhooks.

mod manager;
pub mod provider;
pub mod webhook;

pub use manager::{billing_period, BillingManager, InitializedPayment, WebhookOutcome};
pub use provider::{HttpPaymentProvider, PaymentProvider};

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Billing cadence of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
        }
    }

    pub fn from_str(s: &str) -> AppResult<Self> {
        match s.to_lowercase().as_str() {
            "monthly" => Ok(BillingInterval::Monthly),
            "yearly" => Ok(BillingInterval::Yearly),
            _ => Err(AppError::Validation(format!("Invalid billing interval: {}", s))),
        }
    }

    /// Calendar months covered by one billing period
    pub fn months(&self) -> u32 {
        match self {
            BillingInterval::Monthly => 1,
            BillingInterval::Yearly => 12,
        }
    }
}

/// Lifecycle of one provider transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            _ => Err(AppError::Internal(format!("Unknown payment status: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            _ => Err(AppError::Internal(format!("Unknown subscription status: {}", s))),
        }
    }
}

/// Price of one plan, in the provider's minor currency unit (kobo)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPrice {
    pub monthly: i64,
    pub yearly: i64,
}

/// Plan name to price mapping, loaded once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanTable {
    plans: BTreeMap<String, PlanPrice>,
}

impl Default for PlanTable {
    fn default() -> Self {
        let mut plans = BTreeMap::new();
        plans.insert(
            "basic".to_string(),
            PlanPrice {
                monthly: 1_999_900,
                yearly: 19_999_000,
            },
        );
        plans.insert(
            "premium".to_string(),
            PlanPrice {
                monthly: 4_999_900,
                yearly: 49_999_000,
            },
        );
        plans.insert(
            "enterprise".to_string(),
            PlanPrice {
                monthly: 9_999_900,
                yearly: 99_999_000,
            },
        );
        Self { plans }
    }
}

impl PlanTable {
    /// Parse a table such as `{"premium": {"monthly": 4999900, "yearly": 49999000}}`
    pub fn from_json(json: &str) -> AppResult<Self> {
        let plans: BTreeMap<String, PlanPrice> = serde_json::from_str(json)
            .map_err(|e| AppError::Validation(format!("Invalid plan table: {}", e)))?;

        if plans
            .values()
            .any(|price| price.monthly <= 0 || price.yearly <= 0)
        {
            return Err(AppError::Validation(
                "Plan prices must be positive".to_string(),
            ));
        }

        Ok(Self {
            plans: plans
                .into_iter()
                .map(|(name, price)| (name.to_lowercase(), price))
                .collect(),
        })
    }

    /// Amount for a plan at an interval, if the plan exists
    pub fn price(&self, plan: &str, interval: BillingInterval) -> Option<i64> {
        self.plans
            .get(&plan.to_lowercase())
            .map(|price| match interval {
                BillingInterval::Monthly => price.monthly,
                BillingInterval::Yearly => price.yearly,
            })
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

/// Payment row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub reference: String,
    pub school_id: String,
    pub account_id: String,
    pub plan: String,
    pub interval: BillingInterval,
    pub amount: i64,
    pub status: PaymentStatus,
    pub channel: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    /// When this payment was credited to the subscription
    pub applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Subscription row (one per school)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub school_id: String,
    pub plan: String,
    pub interval: BillingInterval,
    pub status: SubscriptionStatus,
    pub amount: i64,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub next_payment_date: DateTime<Utc>,
    pub provider_customer_code: Option<String>,
    pub provider_authorization_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Initialize payment request
#[derive(Debug, Clone, Deserialize)]
pub struct InitializePaymentRequest {
    pub plan: Option<String>,
    pub interval: Option<String>,
}

/// Initialize payment response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializePaymentResponse {
    pub authorization_url: String,
    pub reference: String,
}
