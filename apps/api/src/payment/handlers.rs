use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::auth::AuthUser;
use crate::billing::settlement::settle_failed;
use crate::click;
use crate::errors::AppError;
use crate::payme;
use crate::payment::{
    apply_stripe_event, open_order, CreateIntentRequest, CreateIntentResponse, Provider,
};
use crate::state::AppState;

fn ensure_enabled(state: &AppState, provider: Provider) -> Result<(), AppError> {
    let enabled = match provider {
        Provider::Stripe => state.stripe.enabled(),
        Provider::Payme => state.config.payme.enabled,
        Provider::Click => state.config.click.enabled,
    };
    if enabled {
        Ok(())
    } else {
        Err(AppError::Validation(format!("{provider:?} payments are disabled")))
    }
}

/// POST /api/payment/create-intent
pub async fn handle_create_intent(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateIntentRequest>,
) -> Result<(StatusCode, Json<CreateIntentResponse>), AppError> {
    ensure_enabled(&state, req.provider)?;

    let order = open_order(state.billing.as_ref(), user.user_id, &req).await?;
    let return_url = req
        .return_url
        .clone()
        .unwrap_or_else(|| state.config.public_url.clone());

    let mut response = CreateIntentResponse {
        transaction_id: order.id,
        provider: req.provider,
        payment_intent_id: None,
        client_secret: None,
        payment_url: None,
    };

    match req.provider {
        Provider::Stripe => {
            let intent = match state
                .stripe
                .create_payment_intent(
                    order.amount,
                    &order.currency,
                    &order.description,
                    &order.id.to_string(),
                )
                .await
            {
                Ok(intent) => intent,
                Err(e) => {
                    error!(order_id = %order.id, "Stripe PaymentIntent failed: {e}");
                    settle_failed(state.billing.as_ref(), order.id).await?;
                    return Err(AppError::Upstream(format!("Stripe error: {e}")));
                }
            };
            state
                .billing
                .claim_payment_id(order.id, &intent.id)
                .await?
                .ok_or_else(|| AppError::Conflict("order is no longer pending".into()))?;
            info!(
                order_id = %order.id,
                payment_intent = %intent.id,
                amount = intent.amount,
                currency = %intent.currency,
                status = %intent.status,
                "Stripe PaymentIntent created"
            );
            response.payment_intent_id = Some(intent.id);
            response.client_secret = intent.client_secret;
        }
        Provider::Payme => {
            response.payment_url = Some(payme::checkout_url(
                &state.config.payme,
                order.id,
                order.amount,
                &return_url,
            ));
        }
        Provider::Click => {
            response.payment_url = Some(click::checkout_url(
                &state.config.click,
                order.id,
                order.amount,
                &return_url,
            )?);
        }
    }

    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/payment/webhook
///
/// Stripe retries anything but 2xx, so verified events are acknowledged even
/// when they match no order.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    ensure_enabled(&state, Provider::Stripe)?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation("missing Stripe-Signature header".into()))?;

    let event = state
        .stripe
        .verify_webhook(&body, signature, Utc::now().timestamp())
        .map_err(|e| {
            warn!("Rejected Stripe webhook: {e}");
            AppError::Validation(format!("webhook error: {e}"))
        })?;

    info!(event_id = ?event.id, event_type = %event.type_, "Stripe webhook received");
    apply_stripe_event(state.billing.as_ref(), &event, Utc::now()).await?;

    Ok(Json(json!({ "received": true })))
}
