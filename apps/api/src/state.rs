use std::sync::Arc;

use sqlx::PgPool;

use crate::billing::store::BillingStore;
use crate::config::Config;
use crate::gemini::TextAssistant;
use crate::payment::stripe::StripeClient;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Users and resumes are queried directly.
    pub db: PgPool,
    /// Plans, subscriptions, the ledger and provider transactions.
    pub billing: Arc<dyn BillingStore>,
    pub assistant: Arc<dyn TextAssistant>,
    pub stripe: StripeClient,
    /// Outbound client for GitHub; Gemini and Stripe hold clones of it.
    pub http: reqwest::Client,
    pub config: Config,
}
