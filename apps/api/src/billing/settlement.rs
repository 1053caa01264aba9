//! Ledger settlement shared by the Stripe, Payme and Click flows.
//!
//! Each helper performs one compare-and-set transition on the ledger and,
//! only when that transition actually happened, applies its side effect on
//! the linked subscription. A repeated webhook finds the row already moved
//! and changes nothing.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::store::BillingStore;
use crate::errors::AppError;
use crate::models::billing::{SubscriptionRow, SubscriptionStatus, TransactionRow, TransactionStatus};

/// Marks a pending order completed and activates its subscription.
/// Returns `None` when the order was not pending.
pub async fn settle_completed(
    store: &dyn BillingStore,
    transaction_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<TransactionRow>, AppError> {
    let Some(tx) = store
        .transition_transaction(
            transaction_id,
            TransactionStatus::Pending,
            TransactionStatus::Completed,
        )
        .await?
    else {
        return Ok(None);
    };

    info!(transaction_id = %tx.id, amount = tx.amount, "Ledger transaction completed");

    if let Some(subscription_id) = tx.subscription_id {
        activate_subscription(store, subscription_id, now).await?;
    }
    Ok(Some(tx))
}

/// Marks a pending order failed. The subscription stays pending.
pub async fn settle_failed(
    store: &dyn BillingStore,
    transaction_id: Uuid,
) -> Result<Option<TransactionRow>, AppError> {
    let tx = store
        .transition_transaction(
            transaction_id,
            TransactionStatus::Pending,
            TransactionStatus::Failed,
        )
        .await?;
    if let Some(tx) = &tx {
        info!(transaction_id = %tx.id, "Ledger transaction failed");
    }
    Ok(tx)
}

/// Refunds a completed order and cancels its subscription.
pub async fn settle_refunded(
    store: &dyn BillingStore,
    transaction_id: Uuid,
) -> Result<Option<TransactionRow>, AppError> {
    let Some(tx) = store
        .transition_transaction(
            transaction_id,
            TransactionStatus::Completed,
            TransactionStatus::Refunded,
        )
        .await?
    else {
        return Ok(None);
    };

    info!(transaction_id = %tx.id, "Ledger transaction refunded");

    if let Some(subscription_id) = tx.subscription_id {
        store
            .set_subscription_status(subscription_id, SubscriptionStatus::Canceled)
            .await?;
        info!(%subscription_id, "Subscription canceled after refund");
    }
    Ok(Some(tx))
}

async fn activate_subscription(
    store: &dyn BillingStore,
    subscription_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<SubscriptionRow>, AppError> {
    let Some(sub) = store.find_subscription(subscription_id).await? else {
        warn!(%subscription_id, "Paid subscription no longer exists");
        return Ok(None);
    };
    if sub.status == SubscriptionStatus::Canceled {
        warn!(%subscription_id, "Payment settled for a canceled subscription; not activating");
        return Ok(None);
    }
    let Some(plan) = store.find_plan(sub.plan_id).await? else {
        warn!(%subscription_id, plan_id = %sub.plan_id, "Plan for paid subscription is missing");
        return Ok(None);
    };

    let end = now + Duration::days(i64::from(plan.duration_days));
    let activated = store.activate_subscription(subscription_id, now, end).await?;
    info!(%subscription_id, end_date = %end, "Subscription activated");
    Ok(activated)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::billing::memory::InMemoryBillingStore;
    use crate::billing::store::{NewPlan, NewSubscription, NewTransaction};
    use crate::models::billing::PaymentMethod;
    use chrono::TimeZone;

    /// A user with a pending 30-day subscription and a pending order for it.
    pub(crate) async fn seed_order(
        store: &InMemoryBillingStore,
        method: PaymentMethod,
        amount: i64,
    ) -> (Uuid, TransactionRow) {
        let user_id = Uuid::new_v4();
        let plan = store
            .create_plan(NewPlan {
                name: "Pro".into(),
                description: "Monthly".into(),
                price: amount,
                currency: "UZS".into(),
                duration_days: 30,
                features: serde_json::json!({}),
            })
            .await
            .unwrap();
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let sub = store
            .create_subscription(NewSubscription {
                user_id,
                plan_id: plan.id,
                status: SubscriptionStatus::Pending,
                start_date: start,
                end_date: start + Duration::days(30),
            })
            .await
            .unwrap();
        let tx = store
            .create_transaction(NewTransaction {
                user_id,
                subscription_id: Some(sub.id),
                amount,
                currency: "UZS".into(),
                description: "Pro subscription".into(),
                payment_method: method,
                payment_id: None,
            })
            .await
            .unwrap();
        (user_id, tx)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_completion_activates_subscription_once() {
        let store = InMemoryBillingStore::new();
        let (_, tx) = seed_order(&store, PaymentMethod::Payme, 5_000_000).await;
        let sub_id = tx.subscription_id.unwrap();

        let settled = settle_completed(&store, tx.id, now()).await.unwrap();
        assert_eq!(settled.unwrap().status, TransactionStatus::Completed);

        let sub = store.subscription(sub_id).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.start_date, now());
        assert_eq!(sub.end_date, now() + Duration::days(30));

        let later = now() + Duration::days(2);
        assert!(settle_completed(&store, tx.id, later).await.unwrap().is_none());
        assert_eq!(store.subscription(sub_id).unwrap().start_date, now());
    }

    #[tokio::test]
    async fn test_failure_leaves_subscription_pending() {
        let store = InMemoryBillingStore::new();
        let (_, tx) = seed_order(&store, PaymentMethod::Click, 100).await;

        assert!(settle_failed(&store, tx.id).await.unwrap().is_some());
        let sub = store.subscription(tx.subscription_id.unwrap()).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Pending);

        // failed orders cannot complete afterwards
        assert!(settle_completed(&store, tx.id, now()).await.unwrap().is_none());
        assert_eq!(
            store.transaction(tx.id).unwrap().status,
            TransactionStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_refund_requires_completion_and_cancels() {
        let store = InMemoryBillingStore::new();
        let (_, tx) = seed_order(&store, PaymentMethod::Stripe, 999).await;

        assert!(settle_refunded(&store, tx.id).await.unwrap().is_none());

        settle_completed(&store, tx.id, now()).await.unwrap();
        let refunded = settle_refunded(&store, tx.id).await.unwrap().unwrap();
        assert_eq!(refunded.status, TransactionStatus::Refunded);
        let sub = store.subscription(tx.subscription_id.unwrap()).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn test_illegal_ledger_moves_are_rejected() {
        let store = InMemoryBillingStore::new();
        let (_, tx) = seed_order(&store, PaymentMethod::Manual, 500).await;

        let err = store
            .transition_transaction(tx.id, TransactionStatus::Pending, TransactionStatus::Refunded)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(store.transaction(tx.id).unwrap().status, TransactionStatus::Pending);
    }
}
