//! Fixtures shared by unit tests across modules.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;

use crate::billing::memory::InMemoryBillingStore;
use crate::config::{ClickConfig, Config, GeminiConfig, PaymeConfig, StripeConfig};
use crate::gemini::{GeminiError, TextAssistant};
use crate::payment::stripe::StripeClient;
use crate::state::AppState;

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/resume_test".into(),
        public_url: "https://cv.example.uz".into(),
        access_token_secret: "access-secret-for-tests".into(),
        refresh_token_secret: "refresh-secret-for-tests".into(),
        port: 0,
        rust_log: "debug".into(),
        disable_signups: false,
        disable_email_auth: false,
        gemini: GeminiConfig {
            api_key: "gemini-key".into(),
            api_url: "http://127.0.0.1:9".into(),
            model: "gemini-1.5-flash".into(),
        },
        stripe: StripeConfig {
            enabled: true,
            secret_key: "sk_test".into(),
            webhook_secret: "whsec_test".into(),
            api_url: "http://127.0.0.1:9".into(),
        },
        payme: PaymeConfig {
            enabled: true,
            merchant_id: "merchant-1".into(),
            merchant_key: "payme-key".into(),
            checkout_url: "https://checkout.paycom.uz".into(),
        },
        click: ClickConfig {
            enabled: true,
            merchant_id: "11".into(),
            service_id: "77".into(),
            secret_key: "click-secret".into(),
            checkout_url: "https://my.click.uz/services/pay".into(),
        },
    }
}

/// Answers every prompt by echoing its last line.
pub struct EchoAssistant;

#[async_trait]
impl TextAssistant for EchoAssistant {
    async fn generate(&self, prompt: &str) -> Result<String, GeminiError> {
        Ok(prompt.lines().last().unwrap_or_default().to_string())
    }
}

/// State over an in-memory billing store. The pool is lazy and never
/// connects, so only handlers that avoid `state.db` can be driven.
pub fn test_state(store: Arc<InMemoryBillingStore>, config: Config) -> AppState {
    let http = reqwest::Client::new();
    AppState {
        db: PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap(),
        billing: store,
        assistant: Arc::new(EchoAssistant),
        stripe: StripeClient::new(http.clone(), config.stripe.clone()),
        http,
        config,
    }
}
