//! Persistence seam for billing.
//!
//! Every payment flow (Stripe, Payme, Click) goes through `BillingStore`.
//! `AppState` carries it as `Arc<dyn BillingStore>`; production uses
//! `PgBillingStore`, tests use the in-memory store in `billing::memory`.
//!
//! State changes are compare-and-set: an update names the state it expects
//! and returns `None` when the row has moved on, so a duplicated webhook
//! never applies twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::billing::{
    ClickState, ClickTransactionRow, PaymeState, PaymeTransactionRow, PaymentMethod, PlanRow,
    SubscriptionRow, SubscriptionStatus, TransactionRow, TransactionStatus,
};

#[derive(Debug, Clone)]
pub struct NewPlan {
    pub name: String,
    pub description: String,
    pub price: i64,
    pub currency: String,
    pub duration_days: i32,
    pub features: Value,
}

#[derive(Debug, Clone, Default)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub currency: Option<String>,
    pub duration_days: Option<i32>,
    pub features: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub payment_method: PaymentMethod,
    pub payment_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPaymeTransaction {
    pub payme_id: String,
    pub time: i64,
    pub amount: i64,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub create_time: DateTime<Utc>,
}

/// A state change on a Payme transaction.
#[derive(Debug, Clone, Copy)]
pub enum PaymeTransition {
    Perform { at: DateTime<Utc> },
    Cancel { state: PaymeState, reason: i32, at: DateTime<Utc> },
}

impl PaymeTransition {
    pub fn target_state(&self) -> PaymeState {
        match self {
            PaymeTransition::Perform { .. } => PaymeState::Completed,
            PaymeTransition::Cancel { state, .. } => *state,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewClickTransaction {
    pub click_trans_id: String,
    pub click_paydoc_id: String,
    pub merchant_trans_id: String,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    // Plans
    async fn list_plans(&self) -> Result<Vec<PlanRow>, AppError>;
    async fn find_plan(&self, id: Uuid) -> Result<Option<PlanRow>, AppError>;
    async fn create_plan(&self, plan: NewPlan) -> Result<PlanRow, AppError>;
    async fn update_plan(&self, id: Uuid, update: PlanUpdate) -> Result<Option<PlanRow>, AppError>;
    async fn delete_plan(&self, id: Uuid) -> Result<bool, AppError>;

    // Subscriptions
    async fn list_subscriptions(&self, user_id: Uuid) -> Result<Vec<SubscriptionRow>, AppError>;
    async fn find_subscription(&self, id: Uuid) -> Result<Option<SubscriptionRow>, AppError>;
    async fn find_active_subscription(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionRow>, AppError>;
    async fn create_subscription(&self, sub: NewSubscription) -> Result<SubscriptionRow, AppError>;
    async fn set_subscription_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<Option<SubscriptionRow>, AppError>;
    async fn activate_subscription(
        &self,
        id: Uuid,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<Option<SubscriptionRow>, AppError>;

    // Ledger
    async fn list_transactions(&self, user_id: Uuid) -> Result<Vec<TransactionRow>, AppError>;
    async fn find_transaction(&self, id: Uuid) -> Result<Option<TransactionRow>, AppError>;
    async fn find_transaction_by_payment(
        &self,
        method: PaymentMethod,
        payment_id: &str,
    ) -> Result<Option<TransactionRow>, AppError>;
    async fn create_transaction(&self, tx: NewTransaction) -> Result<TransactionRow, AppError>;
    /// Moves `id` from `from` to `to`; `None` if the row is not in `from`.
    async fn transition_transaction(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> Result<Option<TransactionRow>, AppError>;
    /// Binds a pending order to a provider transaction id. Succeeds when the
    /// order is unbound or already bound to the same id.
    async fn claim_payment_id(
        &self,
        id: Uuid,
        payment_id: &str,
    ) -> Result<Option<TransactionRow>, AppError>;

    // Payme
    async fn find_payme_transaction(
        &self,
        payme_id: &str,
    ) -> Result<Option<PaymeTransactionRow>, AppError>;
    async fn insert_payme_transaction(
        &self,
        tx: NewPaymeTransaction,
    ) -> Result<PaymeTransactionRow, AppError>;
    async fn transition_payme_transaction(
        &self,
        id: Uuid,
        from: PaymeState,
        change: PaymeTransition,
    ) -> Result<Option<PaymeTransactionRow>, AppError>;
    async fn payme_statement(
        &self,
        from: i64,
        to: i64,
    ) -> Result<Vec<PaymeTransactionRow>, AppError>;

    // Click
    async fn find_click_transaction(&self, id: i64)
        -> Result<Option<ClickTransactionRow>, AppError>;
    async fn find_click_transaction_by_click_id(
        &self,
        click_trans_id: &str,
    ) -> Result<Option<ClickTransactionRow>, AppError>;
    async fn insert_click_transaction(
        &self,
        tx: NewClickTransaction,
    ) -> Result<ClickTransactionRow, AppError>;
    async fn transition_click_transaction(
        &self,
        id: i64,
        from: ClickState,
        to: ClickState,
    ) -> Result<Option<ClickTransactionRow>, AppError>;
}

/// Rejects ledger moves outside `pending -> completed | failed` and
/// `completed -> refunded`.
pub fn check_ledger_transition(from: TransactionStatus, to: TransactionStatus) -> Result<(), AppError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "transaction cannot move from {from:?} to {to:?}"
        )))
    }
}

/// PostgreSQL-backed `BillingStore`.
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn list_plans(&self) -> Result<Vec<PlanRow>, AppError> {
        Ok(
            sqlx::query_as::<_, PlanRow>("SELECT * FROM subscription_plans ORDER BY price ASC")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn find_plan(&self, id: Uuid) -> Result<Option<PlanRow>, AppError> {
        Ok(
            sqlx::query_as::<_, PlanRow>("SELECT * FROM subscription_plans WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn create_plan(&self, plan: NewPlan) -> Result<PlanRow, AppError> {
        Ok(sqlx::query_as::<_, PlanRow>(
            r#"
            INSERT INTO subscription_plans
                (id, name, description, price, currency, duration_days, features)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&plan.name)
        .bind(&plan.description)
        .bind(plan.price)
        .bind(&plan.currency)
        .bind(plan.duration_days)
        .bind(&plan.features)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn update_plan(&self, id: Uuid, update: PlanUpdate) -> Result<Option<PlanRow>, AppError> {
        Ok(sqlx::query_as::<_, PlanRow>(
            r#"
            UPDATE subscription_plans SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                price = COALESCE($4, price),
                currency = COALESCE($5, currency),
                duration_days = COALESCE($6, duration_days),
                features = COALESCE($7, features),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.name)
        .bind(update.description)
        .bind(update.price)
        .bind(update.currency)
        .bind(update.duration_days)
        .bind(update.features)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_plan(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM subscription_plans WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    AppError::Conflict("plan still has subscriptions".into())
                }
                _ => AppError::Database(e),
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_subscriptions(&self, user_id: Uuid) -> Result<Vec<SubscriptionRow>, AppError> {
        Ok(sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_subscription(&self, id: Uuid) -> Result<Option<SubscriptionRow>, AppError> {
        Ok(
            sqlx::query_as::<_, SubscriptionRow>("SELECT * FROM subscriptions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_active_subscription(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionRow>, AppError> {
        Ok(sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT * FROM subscriptions
            WHERE user_id = $1 AND status = 'active' AND end_date > $2
            ORDER BY end_date DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn create_subscription(&self, sub: NewSubscription) -> Result<SubscriptionRow, AppError> {
        Ok(sqlx::query_as::<_, SubscriptionRow>(
            r#"
            INSERT INTO subscriptions (id, user_id, plan_id, status, start_date, end_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(sub.user_id)
        .bind(sub.plan_id)
        .bind(sub.status)
        .bind(sub.start_date)
        .bind(sub.end_date)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn set_subscription_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<Option<SubscriptionRow>, AppError> {
        Ok(sqlx::query_as::<_, SubscriptionRow>(
            "UPDATE subscriptions SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn activate_subscription(
        &self,
        id: Uuid,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<Option<SubscriptionRow>, AppError> {
        Ok(sqlx::query_as::<_, SubscriptionRow>(
            r#"
            UPDATE subscriptions
            SET status = 'active', start_date = $2, end_date = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(start_date)
        .bind(end_date)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_transactions(&self, user_id: Uuid) -> Result<Vec<TransactionRow>, AppError> {
        Ok(sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<TransactionRow>, AppError> {
        Ok(
            sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_transaction_by_payment(
        &self,
        method: PaymentMethod,
        payment_id: &str,
    ) -> Result<Option<TransactionRow>, AppError> {
        Ok(sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE payment_method = $1 AND payment_id = $2",
        )
        .bind(method)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn create_transaction(&self, tx: NewTransaction) -> Result<TransactionRow, AppError> {
        sqlx::query_as::<_, TransactionRow>(
            r#"
            INSERT INTO transactions
                (id, user_id, subscription_id, amount, currency, description,
                 payment_method, payment_id, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tx.user_id)
        .bind(tx.subscription_id)
        .bind(tx.amount)
        .bind(&tx.currency)
        .bind(&tx.description)
        .bind(tx.payment_method)
        .bind(&tx.payment_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::from_unique_violation(e, "payment id is already recorded"))
    }

    async fn transition_transaction(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> Result<Option<TransactionRow>, AppError> {
        check_ledger_transition(from, to)?;
        Ok(sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE transactions SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn claim_payment_id(
        &self,
        id: Uuid,
        payment_id: &str,
    ) -> Result<Option<TransactionRow>, AppError> {
        Ok(sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE transactions SET payment_id = $2, updated_at = NOW()
            WHERE id = $1
              AND status = 'pending'
              AND (payment_id IS NULL OR payment_id = $2)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_payme_transaction(
        &self,
        payme_id: &str,
    ) -> Result<Option<PaymeTransactionRow>, AppError> {
        Ok(sqlx::query_as::<_, PaymeTransactionRow>(
            "SELECT * FROM payme_transactions WHERE payme_id = $1",
        )
        .bind(payme_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn insert_payme_transaction(
        &self,
        tx: NewPaymeTransaction,
    ) -> Result<PaymeTransactionRow, AppError> {
        sqlx::query_as::<_, PaymeTransactionRow>(
            r#"
            INSERT INTO payme_transactions
                (id, payme_id, time, amount, state, order_id, user_id, create_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&tx.payme_id)
        .bind(tx.time)
        .bind(tx.amount)
        .bind(PaymeState::Created)
        .bind(tx.order_id)
        .bind(tx.user_id)
        .bind(tx.create_time)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::from_unique_violation(e, "payme transaction already exists"))
    }

    async fn transition_payme_transaction(
        &self,
        id: Uuid,
        from: PaymeState,
        change: PaymeTransition,
    ) -> Result<Option<PaymeTransactionRow>, AppError> {
        let target = change.target_state();
        let query = match change {
            PaymeTransition::Perform { at } => sqlx::query_as::<_, PaymeTransactionRow>(
                r#"
                UPDATE payme_transactions SET state = $3, perform_time = $4
                WHERE id = $1 AND state = $2
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(from)
            .bind(target)
            .bind(at),
            PaymeTransition::Cancel { reason, at, .. } => {
                sqlx::query_as::<_, PaymeTransactionRow>(
                    r#"
                    UPDATE payme_transactions SET state = $3, reason = $4, cancel_time = $5
                    WHERE id = $1 AND state = $2
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(from)
                .bind(target)
                .bind(reason)
                .bind(at)
            }
        };
        Ok(query.fetch_optional(&self.pool).await?)
    }

    async fn payme_statement(
        &self,
        from: i64,
        to: i64,
    ) -> Result<Vec<PaymeTransactionRow>, AppError> {
        Ok(sqlx::query_as::<_, PaymeTransactionRow>(
            "SELECT * FROM payme_transactions WHERE time >= $1 AND time <= $2 ORDER BY time ASC",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_click_transaction(
        &self,
        id: i64,
    ) -> Result<Option<ClickTransactionRow>, AppError> {
        Ok(
            sqlx::query_as::<_, ClickTransactionRow>("SELECT * FROM click_transactions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_click_transaction_by_click_id(
        &self,
        click_trans_id: &str,
    ) -> Result<Option<ClickTransactionRow>, AppError> {
        Ok(sqlx::query_as::<_, ClickTransactionRow>(
            "SELECT * FROM click_transactions WHERE click_trans_id = $1",
        )
        .bind(click_trans_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn insert_click_transaction(
        &self,
        tx: NewClickTransaction,
    ) -> Result<ClickTransactionRow, AppError> {
        sqlx::query_as::<_, ClickTransactionRow>(
            r#"
            INSERT INTO click_transactions
                (click_trans_id, click_paydoc_id, merchant_trans_id, order_id, user_id, amount, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&tx.click_trans_id)
        .bind(&tx.click_paydoc_id)
        .bind(&tx.merchant_trans_id)
        .bind(tx.order_id)
        .bind(tx.user_id)
        .bind(tx.amount)
        .bind(ClickState::Prepared)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::from_unique_violation(e, "click transaction already exists"))
    }

    async fn transition_click_transaction(
        &self,
        id: i64,
        from: ClickState,
        to: ClickState,
    ) -> Result<Option<ClickTransactionRow>, AppError> {
        Ok(sqlx::query_as::<_, ClickTransactionRow>(
            r#"
            UPDATE click_transactions SET state = $3, updated_at = NOW()
            WHERE id = $1 AND state = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?)
    }
}
