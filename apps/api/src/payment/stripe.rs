//! Minimal Stripe client built on reqwest: PaymentIntent creation and
//! webhook signature verification.

use hmac::{Hmac, Mac};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::error;

use crate::config::StripeConfig;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum StripeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stripe API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid webhook signature: {0}")]
    Signature(&'static str),

    #[error("malformed webhook payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

impl StripeEvent {
    /// The PaymentIntent id an event refers to: the object itself for
    /// `payment_intent.*`, the `payment_intent` field for charges.
    pub fn payment_intent_id(&self) -> Option<&str> {
        let object = &self.data.object;
        if self.type_.starts_with("payment_intent.") {
            object.get("id").and_then(|v| v.as_str())
        } else {
            object.get("payment_intent").and_then(|v| v.as_str())
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    message: Option<String>,
}

#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(http: reqwest::Client, config: StripeConfig) -> Self {
        Self { http, config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn create_payment_intent(
        &self,
        amount: i64,
        currency: &str,
        description: &str,
        transaction_id: &str,
    ) -> Result<PaymentIntent, StripeError> {
        let body = [
            ("amount", amount.to_string()),
            ("currency", currency.to_lowercase()),
            ("description", description.to_string()),
            ("metadata[transaction_id]", transaction_id.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let resp = self
            .http
            .post(format!(
                "{}/payment_intents",
                self.config.api_url.trim_end_matches('/')
            ))
            .header(AUTHORIZATION, format!("Bearer {}", self.config.secret_key))
            .header("Idempotency-Key", transaction_id)
            .form(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorEnvelope>(&text)
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or(text);
            error!(status = status.as_u16(), "Stripe PaymentIntent creation failed: {message}");
            return Err(StripeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }

    /// Verifies the webhook signature and parses the event.
    /// https://stripe.com/docs/webhooks/signatures
    pub fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: i64,
    ) -> Result<StripeEvent, StripeError> {
        verify_signature(&self.config.webhook_secret, payload, signature_header, now)?;
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Checks a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`) against
/// HMAC-SHA256 of `"{t}.{payload}"`.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: i64,
) -> Result<(), StripeError> {
    if secret.is_empty() {
        return Err(StripeError::Signature("webhook secret not configured"));
    }

    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(StripeError::Signature("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(StripeError::Signature("missing v1 signature"));
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(StripeError::Signature("timestamp outside tolerance"));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| StripeError::Signature("unusable secret"))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|sig| {
        hex::decode(sig)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(StripeError::Signature("signature mismatch"));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_741_608_000;

    #[test]
    fn test_valid_signature_accepted() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign_payload(SECRET, payload, NOW);
        assert!(verify_signature(SECRET, payload, &header, NOW + 10).is_ok());
    }

    #[test]
    fn test_any_matching_v1_is_enough() {
        let payload = b"{}";
        let good = sign_payload(SECRET, payload, NOW);
        let sig = good.split_once(",v1=").unwrap().1;
        let header = format!("t={NOW},v1={},v1={sig},v0=abc", "00".repeat(32));
        assert!(verify_signature(SECRET, payload, &header, NOW).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let header = sign_payload(SECRET, b"{\"amount\":100}", NOW);
        let err = verify_signature(SECRET, b"{\"amount\":999}", &header, NOW).unwrap_err();
        assert!(matches!(err, StripeError::Signature("signature mismatch")));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let header = sign_payload("whsec_other", b"{}", NOW);
        assert!(verify_signature(SECRET, b"{}", &header, NOW).is_err());
    }

    #[test]
    fn test_empty_secret_never_verifies() {
        let header = sign_payload("", b"{}", NOW);
        let err = verify_signature("", b"{}", &header, NOW).unwrap_err();
        assert!(matches!(err, StripeError::Signature("webhook secret not configured")));
    }

    #[test]
    fn test_tolerance_window() {
        let header = sign_payload(SECRET, b"{}", NOW);
        assert!(verify_signature(SECRET, b"{}", &header, NOW + SIGNATURE_TOLERANCE_SECS).is_ok());
        assert!(
            verify_signature(SECRET, b"{}", &header, NOW + SIGNATURE_TOLERANCE_SECS + 1).is_err()
        );
        assert!(
            verify_signature(SECRET, b"{}", &header, NOW - SIGNATURE_TOLERANCE_SECS - 1).is_err()
        );
    }

    #[test]
    fn test_malformed_headers_rejected() {
        assert!(verify_signature(SECRET, b"{}", "", NOW).is_err());
        assert!(verify_signature(SECRET, b"{}", &format!("t={NOW}"), NOW).is_err());
        assert!(verify_signature(SECRET, b"{}", "v1=abcd", NOW).is_err());
        assert!(verify_signature(SECRET, b"{}", &format!("t={NOW},v1=zz"), NOW).is_err());
    }

    #[test]
    fn test_payment_intent_id_from_events() {
        let succeeded: StripeEvent = serde_json::from_str(
            r#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_123"}}}"#,
        )
        .unwrap();
        assert_eq!(succeeded.payment_intent_id(), Some("pi_123"));

        let refunded: StripeEvent = serde_json::from_str(
            r#"{"type":"charge.refunded","data":{"object":{"id":"ch_1","payment_intent":"pi_123"}}}"#,
        )
        .unwrap();
        assert_eq!(refunded.payment_intent_id(), Some("pi_123"));
    }
}
