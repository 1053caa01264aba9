mod auth;
mod billing;
mod click;
mod config;
mod contributors;
mod db;
mod errors;
mod gemini;
mod models;
mod payme;
mod payment;
mod resume;
mod routes;
mod state;
#[cfg(test)]
mod test_support;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::billing::store::PgBillingStore;
use crate::config::Config;
use crate::db::create_pool;
use crate::gemini::GeminiClient;
use crate::payment::stripe::StripeClient;
use crate::routes::build_router;
use crate::state::AppState;

const HTTP_TIMEOUT_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    // Fails fast on missing required env vars
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={},tower_http=info",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting resume API v{}", env!("CARGO_PKG_VERSION"));

    let db = create_pool(&config.database_url).await?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()?;

    let assistant = GeminiClient::new(http.clone(), config.gemini.clone());
    info!("Gemini client initialized (model: {})", config.gemini.model);

    let stripe = StripeClient::new(http.clone(), config.stripe.clone());
    info!(
        stripe = config.stripe.enabled,
        payme = config.payme.enabled,
        click = config.click.enabled,
        "Payment providers configured"
    );

    let state = AppState {
        billing: Arc::new(PgBillingStore::new(db.clone())),
        db,
        assistant: Arc::new(assistant),
        stripe,
        http,
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins to PUBLIC_URL once the client is deployed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
