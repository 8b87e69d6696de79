/// Billing manager: payment initialization, verification and webhook reconciliation
use crate::{
    billing::{
        provider::{CheckoutRequest, PaymentProvider, ProviderTransaction, TransactionMetadata},
        webhook::{self, BillingEvent, WebhookEvent},
        BillingInterval, Payment, PaymentStatus, PlanTable, Subscription, SubscriptionStatus,
    },
    config::BillingConfig,
    account::Role,
    crypto,
    db::models::Account,
    error::{AppError, AppResult},
};
use chrono::{DateTime, Months, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

/// A pending payment plus where to send the payer
#[derive(Debug, Clone)]
pub struct InitializedPayment {
    pub payment: Payment,
    pub authorization_url: String,
}

/// What a webhook delivery changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    PaymentFinalized,
    /// Payment was no longer pending (duplicate delivery or verify got there first)
    AlreadyProcessed,
    SubscriptionsCancelled(u64),
    Ignored,
}

/// End of a billing period starting at `start`, in calendar months
pub fn billing_period(start: DateTime<Utc>, interval: BillingInterval) -> AppResult<DateTime<Utc>> {
    start
        .checked_add_months(Months::new(interval.months()))
        .ok_or_else(|| AppError::Internal("Billing period out of range".to_string()))
}

/// Billing manager
pub struct BillingManager {
    db: SqlitePool,
    provider: Arc<dyn PaymentProvider>,
    plans: PlanTable,
    callback_url: String,
    webhook_secret: String,
}

impl BillingManager {
    pub fn new(db: SqlitePool, provider: Arc<dyn PaymentProvider>, config: &BillingConfig) -> Self {
        Self {
            db,
            provider,
            plans: config.plans.clone(),
            callback_url: config.callback_url.clone(),
            webhook_secret: config.secret_key.clone(),
        }
    }

    /// Open a provider checkout for a plan and record a pending payment
    ///
    /// Nothing is written when the provider refuses.
    pub async fn initialize(
        &self,
        account: &Account,
        plan: Option<&str>,
        interval: Option<&str>,
    ) -> AppResult<InitializedPayment> {
        let school_id = self.billing_school(account).await?;

        let plan = plan
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .ok_or(AppError::MissingField("plan"))?;
        let interval = interval
            .map(str::trim)
            .filter(|i| !i.is_empty())
            .ok_or(AppError::MissingField("interval"))
            .and_then(BillingInterval::from_str)?;
        let amount = self
            .plans
            .price(&plan, interval)
            .ok_or_else(|| AppError::NotFound(format!("Unknown plan: {}", plan)))?;

        let reference = generate_reference();

        let checkout = self
            .provider
            .initialize(&CheckoutRequest {
                email: account.email.clone(),
                amount,
                reference: reference.clone(),
                callback_url: self.callback_url.clone(),
                metadata: TransactionMetadata {
                    school_id: Some(school_id.clone()),
                    plan: Some(plan.clone()),
                    interval: Some(interval.as_str().to_string()),
                },
            })
            .await
            .map_err(|e| match e {
                AppError::PaymentInitFailed(msg) => AppError::PaymentInitFailed(msg),
                other => AppError::PaymentInitFailed(other.to_string()),
            })?;

        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            reference,
            school_id,
            account_id: account.id.clone(),
            plan,
            interval,
            amount,
            status: PaymentStatus::Pending,
            channel: None,
            paid_at: None,
            applied_at: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO payment (id, reference, school_id, account_id, plan, interval, amount, status, channel, paid_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL, ?9)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.reference)
        .bind(&payment.school_id)
        .bind(&payment.account_id)
        .bind(&payment.plan)
        .bind(payment.interval.as_str())
        .bind(payment.amount)
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .execute(&self.db)
        .await?;

        tracing::info!(
            reference = %payment.reference,
            school_id = %payment.school_id,
            plan = %payment.plan,
            interval = payment.interval.as_str(),
            amount = payment.amount,
            "Payment initialized"
        );

        Ok(InitializedPayment {
            payment,
            authorization_url: checkout.authorization_url,
        })
    }

    /// Confirm a payment with the provider and activate the school's subscription
    ///
    /// Each payment is credited to the subscription once. Verifying a payment
    /// that was already applied returns the subscription unchanged.
    pub async fn verify(&self, account: &Account, reference: Option<&str>) -> AppResult<Subscription> {
        let school_id = self.billing_school(account).await?;
        let reference = reference
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or(AppError::MissingField("reference"))?;

        let payment = self.get_payment(reference).await?;
        if payment.school_id != school_id {
            return Err(AppError::Authorization(
                "Payment belongs to another school".to_string(),
            ));
        }
        if payment.status == PaymentStatus::Failed {
            return Err(AppError::VerificationFailed(
                "Payment has already failed".to_string(),
            ));
        }
        if payment.applied_at.is_some() {
            tracing::debug!(reference, "Payment already applied, returning current subscription");
            return self.current_subscription(&payment.school_id).await;
        }

        let transaction = self.provider.verify(reference).await?;

        if !transaction.is_success() || transaction.amount != payment.amount {
            let reason = if transaction.is_success() {
                format!(
                    "Amount mismatch: expected {}, provider reported {}",
                    payment.amount, transaction.amount
                )
            } else {
                transaction
                    .gateway_response
                    .clone()
                    .unwrap_or_else(|| format!("Provider status: {}", transaction.status))
            };

            let flipped = sqlx::query(
                "UPDATE payment SET status = 'failed' WHERE reference = ?1 AND status = 'pending'",
            )
            .bind(reference)
            .execute(&self.db)
            .await?
            .rows_affected();

            tracing::warn!(reference, flipped = flipped > 0, reason = %reason, "Payment verification failed");
            return Err(AppError::VerificationFailed(reason));
        }

        warn_on_metadata_mismatch(&payment, &transaction);

        let now = Utc::now();
        let period_end = billing_period(now, payment.interval)?;

        let mut tx = self.db.begin().await?;

        // Claims the payment for this call: pending or webhook-settled, not yet applied
        let claimed = sqlx::query(
            r#"
            UPDATE payment
            SET status = 'success',
                channel = COALESCE(channel, ?1),
                paid_at = COALESCE(paid_at, ?2),
                applied_at = ?3
            WHERE reference = ?4
              AND status IN ('pending', 'success')
              AND applied_at IS NULL
            "#,
        )
        .bind(&transaction.channel)
        .bind(transaction.paid_at.unwrap_or(now))
        .bind(now)
        .bind(reference)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return match self.get_payment(reference).await?.status {
                PaymentStatus::Failed => Err(AppError::VerificationFailed(
                    "Payment has already failed".to_string(),
                )),
                _ => self.current_subscription(&payment.school_id).await,
            };
        }

        sqlx::query(
            r#"
            INSERT INTO subscription (
                id, school_id, plan, interval, status, amount,
                current_period_start, current_period_end, next_payment_date,
                provider_customer_code, provider_authorization_code, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?6, ?7, ?7, ?8, ?9, ?6, ?6)
            ON CONFLICT(school_id) DO UPDATE SET
                plan = excluded.plan,
                interval = excluded.interval,
                status = excluded.status,
                amount = excluded.amount,
                current_period_start = excluded.current_period_start,
                current_period_end = excluded.current_period_end,
                next_payment_date = excluded.next_payment_date,
                provider_customer_code = COALESCE(excluded.provider_customer_code, subscription.provider_customer_code),
                provider_authorization_code = COALESCE(excluded.provider_authorization_code, subscription.provider_authorization_code),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&payment.school_id)
        .bind(&payment.plan)
        .bind(payment.interval.as_str())
        .bind(payment.amount)
        .bind(now)
        .bind(period_end)
        .bind(transaction.customer_code())
        .bind(transaction.authorization_code())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            reference,
            school_id = %payment.school_id,
            plan = %payment.plan,
            period_end = %period_end,
            "Payment verified, subscription active"
        );

        self.current_subscription(&payment.school_id).await
    }

    /// Authenticate and apply a provider webhook delivery
    ///
    /// Anything past the signature check is acknowledged, including payloads
    /// we cannot parse, so the provider does not keep retrying them.
    pub async fn handle_webhook(&self, body: &[u8], signature: Option<&str>) -> AppResult<WebhookOutcome> {
        if let Err(e) = webhook::verify_signature(&self.webhook_secret, body, signature) {
            tracing::warn!("Rejected webhook with invalid signature");
            return Err(e);
        }

        let event: WebhookEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Ignoring malformed webhook payload: {}", e);
                return Ok(WebhookOutcome::Ignored);
            }
        };

        match event.classify() {
            BillingEvent::ChargeSuccess(transaction) => self.apply_charge_success(&transaction).await,
            BillingEvent::SubscriptionDisable { customer_code: Some(code) } => {
                let cancelled = sqlx::query(
                    r#"
                    UPDATE subscription SET status = 'cancelled', updated_at = ?1
                    WHERE provider_customer_code = ?2 AND status = 'active'
                    "#,
                )
                .bind(Utc::now())
                .bind(&code)
                .execute(&self.db)
                .await?
                .rows_affected();

                tracing::info!(customer_code = %code, cancelled, "Subscriptions disabled by provider");
                Ok(WebhookOutcome::SubscriptionsCancelled(cancelled))
            }
            BillingEvent::SubscriptionDisable { customer_code: None } => {
                tracing::warn!("subscription.disable without customer code");
                Ok(WebhookOutcome::Ignored)
            }
            BillingEvent::Ignored(kind) => {
                tracing::debug!(event = %kind, "Ignoring webhook event");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn apply_charge_success(&self, transaction: &ProviderTransaction) -> AppResult<WebhookOutcome> {
        let recorded_amount: Option<i64> = sqlx::query_scalar(
            "SELECT amount FROM payment WHERE reference = ?1 AND status = 'pending'",
        )
        .bind(&transaction.reference)
        .fetch_optional(&self.db)
        .await?;

        let Some(recorded_amount) = recorded_amount else {
            tracing::debug!(reference = %transaction.reference, "charge.success for non-pending or unknown payment");
            return Ok(WebhookOutcome::AlreadyProcessed);
        };

        if transaction.amount != recorded_amount {
            tracing::warn!(
                reference = %transaction.reference,
                expected = recorded_amount,
                reported = transaction.amount,
                "charge.success amount differs from recorded payment, leaving it pending"
            );
            return Ok(WebhookOutcome::Ignored);
        }

        let result = sqlx::query(
            r#"
            UPDATE payment SET status = 'success', channel = ?1, paid_at = ?2
            WHERE reference = ?3 AND status = 'pending' AND amount = ?4
            "#,
        )
        .bind(&transaction.channel)
        .bind(transaction.paid_at.unwrap_or_else(Utc::now))
        .bind(&transaction.reference)
        .bind(recorded_amount)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(reference = %transaction.reference, "Payment settled concurrently");
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        tracing::info!(reference = %transaction.reference, "Payment finalized by webhook");
        Ok(WebhookOutcome::PaymentFinalized)
    }

    /// Cancel the school's active subscription locally
    pub async fn cancel(&self, account: &Account) -> AppResult<Subscription> {
        let school_id = self.billing_school(account).await?;

        let result = sqlx::query(
            r#"
            UPDATE subscription SET status = 'cancelled', updated_at = ?1
            WHERE school_id = ?2 AND status = 'active'
            "#,
        )
        .bind(Utc::now())
        .bind(&school_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("No active subscription".to_string()));
        }

        tracing::info!(school_id = %school_id, cancelled_by = %account.id, "Subscription cancelled");

        self.get_subscription(&school_id)
            .await?
            .ok_or_else(|| AppError::NotFound("No active subscription".to_string()))
    }

    /// Subscription of the caller's school, if any
    pub async fn subscription_for(&self, account: &Account) -> AppResult<Option<Subscription>> {
        let school_id = self.billing_school(account).await?;
        self.get_subscription(&school_id).await
    }

    async fn current_subscription(&self, school_id: &str) -> AppResult<Subscription> {
        self.get_subscription(school_id)
            .await?
            .ok_or_else(|| AppError::NotFound("No subscription".to_string()))
    }

    /// School whose billing the account may manage
    ///
    /// Admins manage their school. Teachers only manage a school with no
    /// admin, which is their personal classroom.
    async fn billing_school(&self, account: &Account) -> AppResult<String> {
        if !account.role.can_manage_billing() {
            return Err(AppError::Authorization(
                "Only admins and teachers can manage billing".to_string(),
            ));
        }
        let school_id = account
            .school_id
            .clone()
            .ok_or_else(|| AppError::Authorization("Account has no school".to_string()))?;

        if account.role == Role::Teacher {
            let admins: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM account WHERE school_id = ?1 AND role = 'ADMIN'",
            )
            .bind(&school_id)
            .fetch_one(&self.db)
            .await?;

            if admins > 0 {
                return Err(AppError::Authorization(
                    "Billing for this school is managed by its admins".to_string(),
                ));
            }
        }

        Ok(school_id)
    }

    pub async fn get_subscription(&self, school_id: &str) -> AppResult<Option<Subscription>> {
        let row = sqlx::query("SELECT * FROM subscription WHERE school_id = ?1")
            .bind(school_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(subscription_from_row).transpose()
    }

    pub async fn get_payment(&self, reference: &str) -> AppResult<Payment> {
        let row = sqlx::query("SELECT * FROM payment WHERE reference = ?1")
            .bind(reference)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AppError::PaymentNotFound)?;

        payment_from_row(&row)
    }
}

/// `BNC_<unix millis>_<random hex>`
fn generate_reference() -> String {
    format!(
        "BNC_{}_{}",
        Utc::now().timestamp_millis(),
        crypto::random_hex(8)
    )
}

fn warn_on_metadata_mismatch(payment: &Payment, transaction: &ProviderTransaction) {
    let Some(metadata) = &transaction.metadata else {
        return;
    };

    let plan_differs = metadata
        .plan
        .as_deref()
        .is_some_and(|plan| !plan.eq_ignore_ascii_case(&payment.plan));
    let interval_differs = metadata
        .interval
        .as_deref()
        .is_some_and(|interval| !interval.eq_ignore_ascii_case(payment.interval.as_str()));
    let school_differs = metadata
        .school_id
        .as_deref()
        .is_some_and(|school| school != payment.school_id);

    if plan_differs || interval_differs || school_differs {
        tracing::warn!(
            reference = %payment.reference,
            recorded_plan = %payment.plan,
            recorded_interval = payment.interval.as_str(),
            provider_metadata = ?metadata,
            "Provider metadata disagrees with recorded payment; using recorded values"
        );
    }
}

fn payment_from_row(row: &SqliteRow) -> AppResult<Payment> {
    let interval: String = row.try_get("interval")?;
    let status: String = row.try_get("status")?;
    Ok(Payment {
        id: row.try_get("id")?,
        reference: row.try_get("reference")?,
        school_id: row.try_get("school_id")?,
        account_id: row.try_get("account_id")?,
        plan: row.try_get("plan")?,
        interval: BillingInterval::from_str(&interval)?,
        amount: row.try_get("amount")?,
        status: PaymentStatus::from_str(&status)?,
        channel: row.try_get("channel")?,
        paid_at: row.try_get("paid_at")?,
        applied_at: row.try_get("applied_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn subscription_from_row(row: &SqliteRow) -> AppResult<Subscription> {
    let interval: String = row.try_get("interval")?;
    let status: String = row.try_get("status")?;
    Ok(Subscription {
        id: row.try_get("id")?,
        school_id: row.try_get("school_id")?,
        plan: row.try_get("plan")?,
        interval: BillingInterval::from_str(&interval)?,
        status: SubscriptionStatus::from_str(&status)?,
        amount: row.try_get("amount")?,
        current_period_start: row.try_get("current_period_start")?,
        current_period_end: row.try_get("current_period_end")?,
        next_payment_date: row.try_get("next_payment_date")?,
        provider_customer_code: row.try_get("provider_customer_code")?,
        provider_authorization_code: row.try_get("provider_authorization_code")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::{AccountManager, RegisterRequest, RegistrationType},
        billing::provider::{Checkout, ProviderCustomer},
        test_support::{test_config, test_pool},
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Provider double: records checkouts, answers verify with a canned transaction
    #[derive(Default)]
    struct FakeProvider {
        refuse_checkout: bool,
        answer: Mutex<Option<ProviderTransaction>>,
        checkouts: Mutex<Vec<CheckoutRequest>>,
    }

    impl FakeProvider {
        fn answer_with(&self, transaction: ProviderTransaction) {
            *self.answer.lock().unwrap() = Some(transaction);
        }
    }

    #[async_trait]
    impl PaymentProvider for FakeProvider {
        async fn initialize(&self, request: &CheckoutRequest) -> AppResult<Checkout> {
            if self.refuse_checkout {
                return Err(AppError::PaymentInitFailed("Invalid key".to_string()));
            }
            self.checkouts.lock().unwrap().push(request.clone());
            Ok(Checkout {
                authorization_url: format!("https://checkout.test/{}", request.reference),
                reference: request.reference.clone(),
            })
        }

        async fn verify(&self, reference: &str) -> AppResult<ProviderTransaction> {
            Ok(self
                .answer
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| ProviderTransaction::rejected(reference, "not found")))
        }
    }

    struct Fixture {
        billing: BillingManager,
        provider: Arc<FakeProvider>,
        admin: Account,
        db: SqlitePool,
    }

    async fn setup_with(provider: FakeProvider) -> Fixture {
        let db = test_pool().await;
        let config = test_config();
        let provider = Arc::new(provider);
        let billing = BillingManager::new(db.clone(), provider.clone(), &config.billing);
        let accounts = AccountManager::new(db.clone(), Arc::new(config));
        let admin = accounts
            .register(RegisterRequest {
                email: Some("admin@acme.test".into()),
                password: Some("password123".into()),
                name: Some("Alice".into()),
                registration_type: RegistrationType::SchoolAdmin,
                school_name: Some("Acme".into()),
                invite_token: None,
            })
            .await
            .unwrap();

        Fixture {
            billing,
            provider,
            admin,
            db,
        }
    }

    async fn setup() -> Fixture {
        setup_with(FakeProvider::default()).await
    }

    fn success(reference: &str, amount: i64) -> ProviderTransaction {
        ProviderTransaction {
            status: "success".to_string(),
            reference: reference.to_string(),
            amount,
            channel: Some("card".to_string()),
            customer: Some(ProviderCustomer {
                customer_code: Some("CUS_acme".to_string()),
                email: None,
            }),
            ..Default::default()
        }
    }

    async fn count(db: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(db)
            .await
            .unwrap()
    }

    fn signed(body: &str) -> String {
        webhook::compute_signature(&test_config().billing.secret_key, body.as_bytes()).unwrap()
    }

    #[test]
    fn test_billing_period_is_calendar_based() {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();
        assert_eq!(
            billing_period(start, BillingInterval::Monthly).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()
        );

        let leap = Utc.with_ymd_and_hms(2024, 2, 29, 8, 30, 0).unwrap();
        assert_eq!(
            billing_period(leap, BillingInterval::Yearly).unwrap(),
            Utc.with_ymd_and_hms(2025, 2, 28, 8, 30, 0).unwrap()
        );

        // A calendar year is not always 365 days
        let start = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let end = billing_period(start, BillingInterval::Yearly).unwrap();
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        assert_eq!((end - start).num_days(), 366);
    }

    #[tokio::test]
    async fn test_initialize_records_pending_payment() {
        let f = setup().await;
        let init = f
            .billing
            .initialize(&f.admin, Some("premium"), Some("monthly"))
            .await
            .unwrap();

        assert_eq!(init.payment.status, PaymentStatus::Pending);
        assert_eq!(init.payment.amount, 4_999_900);
        assert!(init.payment.reference.starts_with("BNC_"));
        assert_eq!(init.payment.reference.split('_').count(), 3);
        assert_eq!(
            init.authorization_url,
            format!("https://checkout.test/{}", init.payment.reference)
        );

        let stored = f.billing.get_payment(&init.payment.reference).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
        assert_eq!(stored.amount, 4_999_900);

        let checkouts = f.provider.checkouts.lock().unwrap();
        assert_eq!(checkouts[0].metadata.plan.as_deref(), Some("premium"));
        assert_eq!(checkouts[0].metadata.interval.as_deref(), Some("monthly"));
    }

    #[tokio::test]
    async fn test_initialize_failure_writes_nothing() {
        let f = setup_with(FakeProvider {
            refuse_checkout: true,
            ..Default::default()
        })
        .await;

        let result = f
            .billing
            .initialize(&f.admin, Some("basic"), Some("yearly"))
            .await;
        assert!(matches!(result, Err(AppError::PaymentInitFailed(_))));
        assert_eq!(count(&f.db, "payment").await, 0);
    }

    #[tokio::test]
    async fn test_initialize_input_errors() {
        let f = setup().await;
        assert!(matches!(
            f.billing.initialize(&f.admin, Some("platinum"), Some("monthly")).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            f.billing.initialize(&f.admin, Some("premium"), Some("weekly")).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            f.billing.initialize(&f.admin, None, Some("monthly")).await,
            Err(AppError::MissingField("plan"))
        ));
        assert_eq!(count(&f.db, "payment").await, 0);
    }

    #[tokio::test]
    async fn test_verify_failure_flips_payment_and_skips_subscription() {
        let f = setup().await;
        let init = f
            .billing
            .initialize(&f.admin, Some("premium"), Some("monthly"))
            .await
            .unwrap();
        let reference = init.payment.reference.clone();

        let mut declined = success(&reference, 4_999_900);
        declined.status = "failed".to_string();
        f.provider.answer_with(declined);

        let result = f.billing.verify(&f.admin, Some(&reference)).await;
        assert!(matches!(result, Err(AppError::VerificationFailed(_))));

        let payment = f.billing.get_payment(&reference).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(count(&f.db, "subscription").await, 0);

        // A failed payment never comes back, even if the provider later says success
        f.provider.answer_with(success(&reference, 4_999_900));
        assert!(matches!(
            f.billing.verify(&f.admin, Some(&reference)).await,
            Err(AppError::VerificationFailed(_))
        ));
        assert_eq!(count(&f.db, "subscription").await, 0);
    }

    #[tokio::test]
    async fn test_verify_amount_mismatch_is_failure() {
        let f = setup().await;
        let init = f
            .billing
            .initialize(&f.admin, Some("premium"), Some("monthly"))
            .await
            .unwrap();
        let reference = init.payment.reference;

        f.provider.answer_with(success(&reference, 100));
        assert!(matches!(
            f.billing.verify(&f.admin, Some(&reference)).await,
            Err(AppError::VerificationFailed(_))
        ));
        assert_eq!(
            f.billing.get_payment(&reference).await.unwrap().status,
            PaymentStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_verify_success_upserts_single_subscription() {
        let f = setup().await;
        let first = f
            .billing
            .initialize(&f.admin, Some("basic"), Some("monthly"))
            .await
            .unwrap();
        f.provider.answer_with(success(&first.payment.reference, 1_999_900));

        let subscription = f
            .billing
            .verify(&f.admin, Some(&first.payment.reference))
            .await
            .unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert_eq!(subscription.plan, "basic");
        assert_eq!(subscription.interval, BillingInterval::Monthly);
        assert_eq!(subscription.provider_customer_code.as_deref(), Some("CUS_acme"));
        assert_eq!(
            subscription.current_period_end,
            billing_period(subscription.current_period_start, BillingInterval::Monthly).unwrap()
        );
        assert_eq!(subscription.next_payment_date, subscription.current_period_end);

        let payment = f.billing.get_payment(&first.payment.reference).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payment.channel.as_deref(), Some("card"));
        assert!(payment.paid_at.is_some());

        // Upgrade: same school, same row
        let second = f
            .billing
            .initialize(&f.admin, Some("enterprise"), Some("yearly"))
            .await
            .unwrap();
        f.provider.answer_with(success(&second.payment.reference, 99_999_000));
        let upgraded = f
            .billing
            .verify(&f.admin, Some(&second.payment.reference))
            .await
            .unwrap();

        assert_eq!(upgraded.id, subscription.id);
        assert_eq!(upgraded.plan, "enterprise");
        assert_eq!(upgraded.interval, BillingInterval::Yearly);
        assert_eq!(
            upgraded.current_period_end,
            billing_period(upgraded.current_period_start, BillingInterval::Yearly).unwrap()
        );
        assert_eq!(count(&f.db, "subscription").await, 1);
    }

    #[tokio::test]
    async fn test_verify_uses_recorded_plan_over_provider_metadata() {
        let f = setup().await;
        let init = f
            .billing
            .initialize(&f.admin, Some("basic"), Some("monthly"))
            .await
            .unwrap();
        let mut tx = success(&init.payment.reference, 1_999_900);
        tx.metadata = Some(TransactionMetadata {
            school_id: None,
            plan: Some("enterprise".to_string()),
            interval: Some("yearly".to_string()),
        });
        f.provider.answer_with(tx);

        let subscription = f
            .billing
            .verify(&f.admin, Some(&init.payment.reference))
            .await
            .unwrap();
        assert_eq!(subscription.plan, "basic");
        assert_eq!(subscription.interval, BillingInterval::Monthly);
    }

    #[tokio::test]
    async fn test_verify_unknown_reference() {
        let f = setup().await;
        assert!(matches!(
            f.billing.verify(&f.admin, Some("BNC_0_missing")).await,
            Err(AppError::PaymentNotFound)
        ));
    }

    #[tokio::test]
    async fn test_parents_cannot_bill() {
        let f = setup().await;
        let mut parent = f.admin.clone();
        parent.role = crate::account::Role::Parent;
        assert!(matches!(
            f.billing.initialize(&parent, Some("basic"), Some("monthly")).await,
            Err(AppError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_webhook_charge_success_is_idempotent() {
        let f = setup().await;
        let init = f
            .billing
            .initialize(&f.admin, Some("premium"), Some("monthly"))
            .await
            .unwrap();

        let body = format!(
            r#"{{"event":"charge.success","data":{{"reference":"{}","status":"success","amount":4999900,"channel":"bank","paid_at":"2024-05-01T09:00:00Z"}}}}"#,
            init.payment.reference
        );
        let signature = signed(&body);

        let first = f
            .billing
            .handle_webhook(body.as_bytes(), Some(&signature))
            .await
            .unwrap();
        assert_eq!(first, WebhookOutcome::PaymentFinalized);
        let after_first = f.billing.get_payment(&init.payment.reference).await.unwrap();
        assert_eq!(after_first.status, PaymentStatus::Success);
        assert_eq!(after_first.channel.as_deref(), Some("bank"));

        let second = f
            .billing
            .handle_webhook(body.as_bytes(), Some(&signature))
            .await
            .unwrap();
        assert_eq!(second, WebhookOutcome::AlreadyProcessed);
        let after_second = f.billing.get_payment(&init.payment.reference).await.unwrap();
        assert_eq!(after_second.paid_at, after_first.paid_at);
    }

    #[tokio::test]
    async fn test_webhook_bad_signature_mutates_nothing() {
        let f = setup().await;
        let init = f
            .billing
            .initialize(&f.admin, Some("premium"), Some("monthly"))
            .await
            .unwrap();

        let body = format!(
            r#"{{"event":"charge.success","data":{{"reference":"{}","status":"success"}}}}"#,
            init.payment.reference
        );
        let signature = webhook::compute_signature("wrong-secret", body.as_bytes()).unwrap();

        for sig in [Some(signature.as_str()), None] {
            let result = f.billing.handle_webhook(body.as_bytes(), sig).await;
            assert!(matches!(result, Err(AppError::InvalidSignature)));
        }
        assert_eq!(
            f.billing.get_payment(&init.payment.reference).await.unwrap().status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_webhook_subscription_disable_and_unknown_events() {
        let f = setup().await;
        let init = f
            .billing
            .initialize(&f.admin, Some("basic"), Some("monthly"))
            .await
            .unwrap();
        f.provider.answer_with(success(&init.payment.reference, 1_999_900));
        f.billing
            .verify(&f.admin, Some(&init.payment.reference))
            .await
            .unwrap();

        let ignored = r#"{"event":"invoice.create","data":{}}"#;
        assert_eq!(
            f.billing
                .handle_webhook(ignored.as_bytes(), Some(&signed(ignored)))
                .await
                .unwrap(),
            WebhookOutcome::Ignored
        );

        let garbage = "not json";
        assert_eq!(
            f.billing
                .handle_webhook(garbage.as_bytes(), Some(&signed(garbage)))
                .await
                .unwrap(),
            WebhookOutcome::Ignored
        );

        let disable = r#"{"event":"subscription.disable","data":{"customer":{"customer_code":"CUS_acme"}}}"#;
        assert_eq!(
            f.billing
                .handle_webhook(disable.as_bytes(), Some(&signed(disable)))
                .await
                .unwrap(),
            WebhookOutcome::SubscriptionsCancelled(1)
        );
        let school_id = f.admin.school_id.clone().unwrap();
        let subscription = f.billing.get_subscription(&school_id).await.unwrap().unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_subscription() {
        let f = setup().await;
        assert!(matches!(f.billing.cancel(&f.admin).await, Err(AppError::NotFound(_))));

        let init = f
            .billing
            .initialize(&f.admin, Some("premium"), Some("yearly"))
            .await
            .unwrap();
        f.provider.answer_with(success(&init.payment.reference, 49_999_000));
        f.billing
            .verify(&f.admin, Some(&init.payment.reference))
            .await
            .unwrap();

        let cancelled = f.billing.cancel(&f.admin).await.unwrap();
        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
        assert!(matches!(f.billing.cancel(&f.admin).await, Err(AppError::NotFound(_))));

        let current = f.billing.subscription_for(&f.admin).await.unwrap().unwrap();
        assert_eq!(current.status, SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_verify_replay_after_cancel_keeps_subscription() {
        let f = setup().await;
        let init = f
            .billing
            .initialize(&f.admin, Some("premium"), Some("monthly"))
            .await
            .unwrap();
        let reference = init.payment.reference;
        f.provider.answer_with(success(&reference, 4_999_900));

        let first = f.billing.verify(&f.admin, Some(&reference)).await.unwrap();
        assert!(f.billing.get_payment(&reference).await.unwrap().applied_at.is_some());

        f.billing.cancel(&f.admin).await.unwrap();

        let replay = f.billing.verify(&f.admin, Some(&reference)).await.unwrap();
        assert_eq!(replay.status, SubscriptionStatus::Cancelled);
        assert_eq!(replay.current_period_start, first.current_period_start);
        assert_eq!(replay.current_period_end, first.current_period_end);
    }

    #[tokio::test]
    async fn test_webhook_then_verify_converges() {
        let f = setup().await;
        let init = f
            .billing
            .initialize(&f.admin, Some("premium"), Some("monthly"))
            .await
            .unwrap();
        let reference = init.payment.reference;

        let body = format!(
            r#"{{"event":"charge.success","data":{{"reference":"{}","status":"success","amount":4999900,"channel":"bank","paid_at":"2024-05-01T09:00:00Z"}}}}"#,
            reference
        );
        assert_eq!(
            f.billing
                .handle_webhook(body.as_bytes(), Some(&signed(&body)))
                .await
                .unwrap(),
            WebhookOutcome::PaymentFinalized
        );
        let settled = f.billing.get_payment(&reference).await.unwrap();
        assert!(settled.applied_at.is_none());
        assert_eq!(count(&f.db, "subscription").await, 0);

        // Provider reports a different channel on verify; the webhook's values stay
        f.provider.answer_with(success(&reference, 4_999_900));
        let subscription = f.billing.verify(&f.admin, Some(&reference)).await.unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert_eq!(subscription.plan, "premium");

        let payment = f.billing.get_payment(&reference).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payment.channel.as_deref(), Some("bank"));
        assert_eq!(payment.paid_at, settled.paid_at);
        assert!(payment.applied_at.is_some());

        let again = f.billing.verify(&f.admin, Some(&reference)).await.unwrap();
        assert_eq!(again.current_period_end, subscription.current_period_end);
        assert_eq!(count(&f.db, "subscription").await, 1);
    }

    #[tokio::test]
    async fn test_webhook_amount_mismatch_leaves_payment_pending() {
        let f = setup().await;
        let init = f
            .billing
            .initialize(&f.admin, Some("premium"), Some("monthly"))
            .await
            .unwrap();

        let body = format!(
            r#"{{"event":"charge.success","data":{{"reference":"{}","status":"success","amount":100,"channel":"card"}}}}"#,
            init.payment.reference
        );
        assert_eq!(
            f.billing
                .handle_webhook(body.as_bytes(), Some(&signed(&body)))
                .await
                .unwrap(),
            WebhookOutcome::Ignored
        );

        let payment = f.billing.get_payment(&init.payment.reference).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.paid_at.is_none());
    }

    #[tokio::test]
    async fn test_teacher_billing_limited_to_personal_school() {
        let f = setup().await;

        let mut staff_teacher = f.admin.clone();
        staff_teacher.role = crate::account::Role::Teacher;
        assert!(matches!(
            f.billing.initialize(&staff_teacher, Some("basic"), Some("monthly")).await,
            Err(AppError::Authorization(_))
        ));
        assert!(matches!(
            f.billing.cancel(&staff_teacher).await,
            Err(AppError::Authorization(_))
        ));

        let accounts = AccountManager::new(f.db.clone(), Arc::new(test_config()));
        let independent = accounts
            .register(RegisterRequest {
                email: Some("tom@teach.test".into()),
                password: Some("password123".into()),
                name: Some("Tom".into()),
                registration_type: RegistrationType::Teacher,
                school_name: None,
                invite_token: None,
            })
            .await
            .unwrap();

        let init = f
            .billing
            .initialize(&independent, Some("basic"), Some("monthly"))
            .await
            .unwrap();
        assert_eq!(Some(init.payment.school_id), independent.school_id);
    }
}
