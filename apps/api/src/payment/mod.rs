//! Checkout entry point shared by all providers, plus Stripe webhook
//! settlement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::settlement::{settle_completed, settle_failed, settle_refunded};
use crate::billing::store::{BillingStore, NewTransaction};
use crate::billing::subscriptions::{validate_currency, DEFAULT_CURRENCY};
use crate::errors::AppError;
use crate::models::billing::{PaymentMethod, SubscriptionStatus, TransactionRow};
use crate::payment::stripe::StripeEvent;

pub mod handlers;
pub mod stripe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Stripe,
    Payme,
    Click,
}

impl Provider {
    pub fn payment_method(self) -> PaymentMethod {
        match self {
            Provider::Stripe => PaymentMethod::Stripe,
            Provider::Payme => PaymentMethod::Payme,
            Provider::Click => PaymentMethod::Click,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    pub provider: Provider,
    pub subscription_id: Option<Uuid>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub description: Option<String>,
    /// Where Payme and Click send the payer afterwards. Defaults to `PUBLIC_URL`.
    pub return_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateIntentResponse {
    pub transaction_id: Uuid,
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
}

/// Validates a checkout request and records the pending order it pays for.
/// A subscription, when given, must be the caller's and still pending; its
/// plan decides the amount and currency.
pub async fn open_order(
    store: &dyn BillingStore,
    user_id: Uuid,
    req: &CreateIntentRequest,
) -> Result<TransactionRow, AppError> {
    let (amount, currency, description) = match req.subscription_id {
        Some(subscription_id) => {
            let sub = match store.find_subscription(subscription_id).await? {
                Some(sub) if sub.user_id == user_id => sub,
                _ => {
                    return Err(AppError::NotFound(format!(
                        "subscription {subscription_id} not found"
                    )))
                }
            };
            if sub.status != SubscriptionStatus::Pending {
                return Err(AppError::Validation(
                    "only a pending subscription can be paid for".into(),
                ));
            }
            let plan = store
                .find_plan(sub.plan_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("plan {} not found", sub.plan_id)))?;
            let description = req
                .description
                .clone()
                .unwrap_or_else(|| format!("{} subscription", plan.name));
            (plan.price, plan.currency, description)
        }
        None => {
            let amount = req.amount.unwrap_or(0);
            if amount <= 0 {
                return Err(AppError::Validation("amount must be positive".into()));
            }
            let currency = req
                .currency
                .clone()
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
                .to_uppercase();
            validate_currency(&currency)?;
            (amount, currency, req.description.clone().unwrap_or_else(|| "Payment".into()))
        }
    };

    if amount <= 0 {
        return Err(AppError::Validation("nothing to pay for a free plan".into()));
    }
    if matches!(req.provider, Provider::Payme | Provider::Click) && currency != DEFAULT_CURRENCY {
        return Err(AppError::Validation(format!(
            "{:?} only accepts {DEFAULT_CURRENCY}",
            req.provider
        )));
    }

    let order = store
        .create_transaction(NewTransaction {
            user_id,
            subscription_id: req.subscription_id,
            amount,
            currency,
            description,
            payment_method: req.provider.payment_method(),
            payment_id: None,
        })
        .await?;
    info!(
        order_id = %order.id,
        %user_id,
        provider = ?req.provider,
        amount = order.amount,
        "Order opened"
    );
    Ok(order)
}

/// Applies a verified Stripe event to the ledger. Events for unknown
/// PaymentIntents and unhandled event types are ignored.
pub async fn apply_stripe_event(
    store: &dyn BillingStore,
    event: &StripeEvent,
    now: DateTime<Utc>,
) -> Result<Option<TransactionRow>, AppError> {
    let Some(intent_id) = event.payment_intent_id() else {
        info!(event_type = %event.type_, "Stripe event without a PaymentIntent ignored");
        return Ok(None);
    };
    let Some(order) = store
        .find_transaction_by_payment(PaymentMethod::Stripe, intent_id)
        .await?
    else {
        warn!(event_type = %event.type_, payment_intent = %intent_id, "Stripe event for unknown PaymentIntent");
        return Ok(None);
    };

    let settled = match event.type_.as_str() {
        "payment_intent.succeeded" => settle_completed(store, order.id, now).await?,
        "payment_intent.payment_failed" => settle_failed(store, order.id).await?,
        "charge.refunded" => settle_refunded(store, order.id).await?,
        other => {
            info!(event_type = %other, "Unhandled Stripe event type");
            return Ok(None);
        }
    };
    if settled.is_none() {
        info!(
            event_type = %event.type_,
            order_id = %order.id,
            status = ?order.status,
            "Stripe event did not change the order"
        );
    }
    Ok(settled)
}
