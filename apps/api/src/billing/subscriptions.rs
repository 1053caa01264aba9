//! Plans, subscriptions and the transaction ledger.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::auth::{AdminUser, AuthUser};
use crate::billing::store::{BillingStore, NewPlan, NewSubscription, NewTransaction, PlanUpdate};
use crate::errors::AppError;
use crate::models::billing::{
    PaymentMethod, PlanRow, SubscriptionRow, SubscriptionStatus, TransactionRow,
};
use crate::state::AppState;

pub const DEFAULT_CURRENCY: &str = "UZS";

#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: i64,
    pub currency: Option<String>,
    pub duration_days: i32,
    pub features: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdatePlanRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub currency: Option<String>,
    pub duration_days: Option<i32>,
    pub features: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub plan_id: Uuid,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub amount: i64,
    pub currency: Option<String>,
    pub description: String,
    pub payment_method: Option<PaymentMethod>,
    pub payment_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionWithPlan {
    #[serde(flatten)]
    pub subscription: SubscriptionRow,
    pub plan: Option<PlanRow>,
    /// Whether the subscription grants access right now.
    pub active: bool,
}

/// Three uppercase ASCII letters, e.g. `UZS`.
pub fn validate_currency(currency: &str) -> Result<(), AppError> {
    if currency.len() == 3 && currency.bytes().all(|b| b.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "currency must be a 3-letter uppercase code, got '{currency}'"
        )))
    }
}

fn validate_plan_fields(
    name: Option<&str>,
    price: Option<i64>,
    duration_days: Option<i32>,
    currency: Option<&str>,
) -> Result<(), AppError> {
    if matches!(name, Some(n) if n.trim().is_empty()) {
        return Err(AppError::Validation("plan name must not be empty".into()));
    }
    if matches!(price, Some(p) if p < 0) {
        return Err(AppError::Validation("price must not be negative".into()));
    }
    if matches!(duration_days, Some(d) if d <= 0) {
        return Err(AppError::Validation("duration_days must be positive".into()));
    }
    if let Some(currency) = currency {
        validate_currency(currency)?;
    }
    Ok(())
}

pub fn validate_new_plan(req: CreatePlanRequest) -> Result<NewPlan, AppError> {
    let currency = req.currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    validate_plan_fields(
        Some(&req.name),
        Some(req.price),
        Some(req.duration_days),
        Some(&currency),
    )?;
    Ok(NewPlan {
        name: req.name.trim().to_string(),
        description: req.description,
        price: req.price,
        currency,
        duration_days: req.duration_days,
        features: req.features.unwrap_or_else(|| Value::Object(Default::default())),
    })
}

pub fn validate_plan_update(req: UpdatePlanRequest) -> Result<PlanUpdate, AppError> {
    validate_plan_fields(
        req.name.as_deref(),
        req.price,
        req.duration_days,
        req.currency.as_deref(),
    )?;
    Ok(PlanUpdate {
        name: req.name.map(|n| n.trim().to_string()),
        description: req.description,
        price: req.price,
        currency: req.currency,
        duration_days: req.duration_days,
        features: req.features,
    })
}

/// Creates a pending subscription. The end date defaults to the start plus
/// the plan's duration.
pub async fn create_subscription(
    store: &dyn BillingStore,
    user_id: Uuid,
    req: CreateSubscriptionRequest,
    now: DateTime<Utc>,
) -> Result<SubscriptionRow, AppError> {
    let plan = store
        .find_plan(req.plan_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("plan {} not found", req.plan_id)))?;

    let start_date = req.start_date.unwrap_or(now);
    let end_date = req
        .end_date
        .unwrap_or(start_date + Duration::days(i64::from(plan.duration_days)));
    if end_date <= start_date {
        return Err(AppError::Validation("end_date must be after start_date".into()));
    }

    let sub = store
        .create_subscription(NewSubscription {
            user_id,
            plan_id: plan.id,
            status: SubscriptionStatus::Pending,
            start_date,
            end_date,
        })
        .await?;
    info!(subscription_id = %sub.id, %user_id, plan_id = %plan.id, "Subscription created");
    Ok(sub)
}

/// Cancels one of the caller's subscriptions. Someone else's subscription is
/// reported as not found.
pub async fn cancel_subscription(
    store: &dyn BillingStore,
    user_id: Uuid,
    id: Uuid,
) -> Result<SubscriptionRow, AppError> {
    match store.find_subscription(id).await? {
        Some(sub) if sub.user_id == user_id => {}
        _ => return Err(AppError::NotFound(format!("subscription {id} not found"))),
    }
    let sub = store
        .set_subscription_status(id, SubscriptionStatus::Canceled)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("subscription {id} not found")))?;
    info!(subscription_id = %id, %user_id, "Subscription canceled");
    Ok(sub)
}

/// Records a manual ledger entry for the caller. Provider orders only come
/// from checkout, so entries made here never pay for a subscription.
pub async fn create_ledger_entry(
    store: &dyn BillingStore,
    user_id: Uuid,
    req: CreateTransactionRequest,
) -> Result<TransactionRow, AppError> {
    if req.amount <= 0 {
        return Err(AppError::Validation("amount must be positive".into()));
    }
    let payment_method = req.payment_method.unwrap_or(PaymentMethod::Manual);
    if payment_method != PaymentMethod::Manual {
        return Err(AppError::Validation(
            "provider orders are opened through /api/payment/create-intent".into(),
        ));
    }
    let currency = req
        .currency
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
        .to_uppercase();
    validate_currency(&currency)?;
    let tx = store
        .create_transaction(NewTransaction {
            user_id,
            subscription_id: None,
            amount: req.amount,
            currency,
            description: req.description,
            payment_method,
            payment_id: req.payment_id,
        })
        .await?;
    info!(transaction_id = %tx.id, %user_id, amount = tx.amount, "Manual ledger entry created");
    Ok(tx)
}

async fn with_plan(
    store: &dyn BillingStore,
    subscription: SubscriptionRow,
    now: DateTime<Utc>,
) -> Result<SubscriptionWithPlan, AppError> {
    let plan = store.find_plan(subscription.plan_id).await?;
    let active = subscription.is_active_at(now);
    Ok(SubscriptionWithPlan {
        subscription,
        plan,
        active,
    })
}

/// The `ActiveSubscription` guard: an authenticated caller with a
/// subscription that is active right now. Otherwise 402.
#[derive(Debug, Clone)]
pub struct ActiveSubscription {
    pub user: AuthUser,
    pub subscription: SubscriptionRow,
}

#[async_trait]
impl FromRequestParts<AppState> for ActiveSubscription {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        let subscription = state
            .billing
            .find_active_subscription(user.user_id, Utc::now())
            .await?
            .ok_or_else(|| AppError::PaymentRequired("an active subscription is required".into()))?;
        Ok(ActiveSubscription { user, subscription })
    }
}

/// GET /api/subscription/plans
pub async fn handle_list_plans(
    State(state): State<AppState>,
) -> Result<Json<Vec<PlanRow>>, AppError> {
    Ok(Json(state.billing.list_plans().await?))
}

/// POST /api/subscription/plans
pub async fn handle_create_plan(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(req): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<PlanRow>), AppError> {
    let plan = state.billing.create_plan(validate_new_plan(req)?).await?;
    info!(plan_id = %plan.id, admin_id = %admin.user_id, "Plan created");
    Ok((StatusCode::CREATED, Json(plan)))
}

/// PATCH /api/subscription/plans/:id
pub async fn handle_update_plan(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePlanRequest>,
) -> Result<Json<PlanRow>, AppError> {
    let update = validate_plan_update(req)?;
    let plan = state
        .billing
        .update_plan(id, update)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("plan {id} not found")))?;
    Ok(Json(plan))
}

/// DELETE /api/subscription/plans/:id
pub async fn handle_delete_plan(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.billing.delete_plan(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("plan {id} not found")))
    }
}

/// GET /api/subscription
pub async fn handle_list_subscriptions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<SubscriptionWithPlan>>, AppError> {
    let subs = state.billing.list_subscriptions(auth.user_id).await?;
    let now = Utc::now();
    let mut out = Vec::with_capacity(subs.len());
    for sub in subs {
        out.push(with_plan(state.billing.as_ref(), sub, now).await?);
    }
    Ok(Json(out))
}

/// GET /api/subscription/active
pub async fn handle_active_subscription(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Option<SubscriptionWithPlan>>, AppError> {
    let now = Utc::now();
    let active = state
        .billing
        .find_active_subscription(auth.user_id, now)
        .await?;
    match active {
        Some(sub) => Ok(Json(Some(with_plan(state.billing.as_ref(), sub, now).await?))),
        None => Ok(Json(None)),
    }
}

/// POST /api/subscription
pub async fn handle_create_subscription(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<SubscriptionRow>), AppError> {
    let sub = create_subscription(state.billing.as_ref(), auth.user_id, req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(sub)))
}

/// PATCH /api/subscription/:id/cancel
pub async fn handle_cancel_subscription(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionRow>, AppError> {
    Ok(Json(
        cancel_subscription(state.billing.as_ref(), auth.user_id, id).await?,
    ))
}

/// GET /api/subscription/transactions
pub async fn handle_list_transactions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<TransactionRow>>, AppError> {
    Ok(Json(state.billing.list_transactions(auth.user_id).await?))
}

/// POST /api/subscription/transactions
pub async fn handle_create_transaction(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<TransactionRow>), AppError> {
    let tx = create_ledger_entry(state.billing.as_ref(), auth.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}
