//! Click Shop API callbacks and checkout links.

use url::Url;
use uuid::Uuid;

use crate::billing::money::format_major_units;
use crate::config::ClickConfig;
use crate::errors::AppError;

pub mod handlers;
pub mod service;
pub mod signature;
pub mod types;

/// Checkout link for a pending order. Click expects the amount in so'm with
/// two decimals and returns the ledger id as `merchant_trans_id`.
pub fn checkout_url(
    config: &ClickConfig,
    order_id: Uuid,
    amount_minor: i64,
    return_url: &str,
) -> Result<String, AppError> {
    let mut url = Url::parse(&config.checkout_url)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid CLICK_CHECKOUT_URL: {e}")))?;
    url.query_pairs_mut()
        .append_pair("service_id", &config.service_id)
        .append_pair("merchant_id", &config.merchant_id)
        .append_pair("amount", &format_major_units(amount_minor))
        .append_pair("transaction_param", &order_id.to_string())
        .append_pair("return_url", return_url);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_url_query() {
        let config = service::tests::config();
        let order_id = Uuid::parse_str("2f0c6a53-4f4e-4b1e-9d36-0f0a6b1f3c11").unwrap();
        let url = checkout_url(&config, order_id, 1_500_050, "https://cv.example.uz/billing?ok=1")
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("my.click.uz"));
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("service_id".to_string(), "77".to_string()),
                ("merchant_id".to_string(), "11".to_string()),
                ("amount".to_string(), "15000.50".to_string()),
                ("transaction_param".to_string(), order_id.to_string()),
                ("return_url".to_string(), "https://cv.example.uz/billing?ok=1".to_string()),
            ]
        );
    }

    #[test]
    fn test_invalid_checkout_base_is_an_error() {
        let mut config = service::tests::config();
        config.checkout_url = "not a url".into();
        assert!(checkout_url(&config, Uuid::new_v4(), 100, "https://x.uz").is_err());
    }
}
