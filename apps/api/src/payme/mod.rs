//! Payme merchant API (JSON-RPC over `POST /api/payme`) and checkout links.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use uuid::Uuid;

use crate::config::PaymeConfig;

pub mod handlers;
pub mod service;
pub mod types;

/// Payme always authenticates as `Paycom`; the merchant id is accepted too.
const PAYME_LOGIN: &str = "Paycom";

/// Checks `Authorization: Basic base64(login:key)` against the merchant key.
pub fn authorize(header: Option<&str>, config: &PaymeConfig) -> bool {
    let Some(encoded) = header.and_then(|h| h.trim().strip_prefix("Basic ")) else {
        return false;
    };
    let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((login, key)) = credentials.split_once(':') else {
        return false;
    };
    (login == PAYME_LOGIN || login == config.merchant_id)
        && !config.merchant_key.is_empty()
        && key == config.merchant_key
}

/// Builds the GET checkout link: `<checkout>/<base64("m=..;ac.order_id=..;a=..;c=..;l=ru")>`.
pub fn checkout_url(config: &PaymeConfig, order_id: Uuid, amount_tiyin: i64, callback: &str) -> String {
    let params = format!(
        "m={};ac.order_id={};a={};c={};l=ru",
        config.merchant_id, order_id, amount_tiyin, callback
    );
    format!(
        "{}/{}",
        config.checkout_url.trim_end_matches('/'),
        STANDARD.encode(params)
    )
}
