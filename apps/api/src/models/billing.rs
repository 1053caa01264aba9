//! Rows and enums for plans, subscriptions, the transaction ledger and the
//! provider-side Payme/Click transaction tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl TransactionStatus {
    /// Ledger transitions: pending settles once, and only completed money can be refunded.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Completed) | (Pending, Failed) | (Completed, Refunded)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Stripe,
    Payme,
    Click,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Minor currency units (tiyin, cents).
    pub price: i64,
    pub currency: String,
    pub duration_days: i32,
    pub features: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRow {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.end_date > now
    }
}

/// A row of the internal payment ledger. Provider flows call a pending row an "order".
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransactionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub payment_method: PaymentMethod,
    pub payment_id: Option<String>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
pub enum PaymeState {
    Created = 1,
    Completed = 2,
    Cancelled = -1,
    CancelledAfterComplete = -2,
}

impl PaymeState {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_cancelled(self) -> bool {
        matches!(self, PaymeState::Cancelled | PaymeState::CancelledAfterComplete)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymeTransactionRow {
    pub id: Uuid,
    pub payme_id: String,
    /// Payme's own creation timestamp, in milliseconds.
    pub time: i64,
    /// Tiyin.
    pub amount: i64,
    pub state: PaymeState,
    pub reason: Option<i32>,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub create_time: DateTime<Utc>,
    pub perform_time: Option<DateTime<Utc>>,
    pub cancel_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
pub enum ClickState {
    Prepared = 0,
    Completed = 2,
    Cancelled = -1,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClickTransactionRow {
    /// Returned to Click as `merchant_prepare_id` / `merchant_confirm_id`.
    pub id: i64,
    pub click_trans_id: String,
    pub click_paydoc_id: String,
    pub merchant_trans_id: String,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub state: ClickState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
