use anyhow::{Context, Result};
use tracing::error;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub public_url: String,
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    pub port: u16,
    pub rust_log: String,
    pub disable_signups: bool,
    pub disable_email_auth: bool,
    pub gemini: GeminiConfig,
    pub stripe: StripeConfig,
    pub payme: PaymeConfig,
    pub click: ClickConfig,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Default)]
pub struct StripeConfig {
    pub enabled: bool,
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct PaymeConfig {
    pub enabled: bool,
    pub merchant_id: String,
    pub merchant_key: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct ClickConfig {
    pub enabled: bool,
    pub merchant_id: String,
    pub service_id: String,
    pub secret_key: String,
    pub checkout_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            public_url: require_env("PUBLIC_URL")?,
            access_token_secret: require_env("ACCESS_TOKEN_SECRET")?,
            refresh_token_secret: require_env("REFRESH_TOKEN_SECRET")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            disable_signups: env_flag("DISABLE_SIGNUPS"),
            disable_email_auth: env_flag("DISABLE_EMAIL_AUTH"),
            gemini: GeminiConfig {
                api_key: require_env("GEMINI_API_KEY")?,
                api_url: env_or(
                    "GEMINI_API_URL",
                    "https://generativelanguage.googleapis.com/v1beta",
                ),
                model: env_or("GEMINI_MODEL", "gemini-1.5-flash"),
            },
            stripe: StripeConfig::from_env(),
            payme: PaymeConfig::from_env(),
            click: ClickConfig::from_env(),
        })
    }
}

impl StripeConfig {
    fn from_env() -> Self {
        let mut config = StripeConfig {
            enabled: env_flag("STRIPE_ENABLED"),
            secret_key: env_or("STRIPE_SECRET_KEY", ""),
            webhook_secret: env_or("STRIPE_WEBHOOK_SECRET", ""),
            api_url: env_or("STRIPE_API_URL", "https://api.stripe.com/v1"),
        };
        if config.enabled && (config.secret_key.is_empty() || config.webhook_secret.is_empty()) {
            error!("Stripe integration is enabled but credentials are missing; disabling it");
            config.enabled = false;
        }
        config
    }
}

impl PaymeConfig {
    fn from_env() -> Self {
        let mut config = PaymeConfig {
            enabled: env_flag("PAYME_ENABLED"),
            merchant_id: env_or("PAYME_MERCHANT_ID", ""),
            merchant_key: env_or("PAYME_MERCHANT_KEY", ""),
            checkout_url: env_or("PAYME_CHECKOUT_URL", "https://checkout.paycom.uz"),
        };
        if config.enabled && (config.merchant_id.is_empty() || config.merchant_key.is_empty()) {
            error!("Payme integration is enabled but merchant credentials are missing; disabling it");
            config.enabled = false;
        }
        config
    }
}

impl ClickConfig {
    fn from_env() -> Self {
        let mut config = ClickConfig {
            enabled: env_flag("CLICK_ENABLED"),
            merchant_id: env_or("CLICK_MERCHANT_ID", ""),
            service_id: env_or("CLICK_SERVICE_ID", ""),
            secret_key: env_or("CLICK_SECRET_KEY", ""),
            checkout_url: env_or("CLICK_CHECKOUT_URL", "https://my.click.uz/services/pay"),
        };
        if config.enabled
            && (config.merchant_id.is_empty()
                || config.service_id.is_empty()
                || config.secret_key.is_empty())
        {
            error!("Click integration is enabled but credentials are missing; disabling it");
            config.enabled = false;
        }
        config
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str) -> bool {
    parse_flag(&std::env::var(key).unwrap_or_default())
}

/// Anything except an empty string, `false` or `0` switches a flag on.
pub fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    !(value.is_empty() || value.eq_ignore_ascii_case("false") || value == "0")
}
