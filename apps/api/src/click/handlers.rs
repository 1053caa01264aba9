use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap},
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::click::service::ClickService;
use crate::click::types::{
    fields_from_form, fields_from_json, ClickError, ClickRequest, ClickResponse,
};
use crate::state::AppState;

/// Decodes a callback body. Click posts form data by default; JSON is
/// accepted when the content type says so.
fn parse_request(headers: &HeaderMap, body: &[u8]) -> Result<ClickRequest, String> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("json"))
        .unwrap_or(false);
    let fields = if is_json {
        fields_from_json(body)?
    } else {
        fields_from_form(body)?
    };
    ClickRequest::from_fields(&fields)
}

/// Ids are echoed back even for malformed bodies when they can be found.
fn malformed(body: &[u8]) -> ClickResponse {
    let fields = fields_from_form(body)
        .ok()
        .filter(|f| f.contains_key("click_trans_id"))
        .or_else(|| fields_from_json(body).ok())
        .unwrap_or_default();
    ClickResponse::error(
        fields.get("click_trans_id").map(String::as_str).unwrap_or(""),
        fields.get("merchant_trans_id").map(String::as_str).unwrap_or(""),
        ClickError::BadRequest,
    )
}

async fn handle_callback(
    state: AppState,
    headers: HeaderMap,
    body: Bytes,
    complete: bool,
) -> Json<ClickResponse> {
    if !state.config.click.enabled {
        warn!("Click callback received while the integration is disabled");
        return Json(malformed(&body));
    }

    let request = match parse_request(&headers, &body) {
        Ok(req) => req,
        Err(e) => {
            warn!("Malformed Click callback: {e}");
            return Json(malformed(&body));
        }
    };

    let service = ClickService::new(state.billing.as_ref(), &state.config.click);
    let response = if complete {
        service.complete(&request, Utc::now()).await
    } else {
        service.prepare(&request).await
    };
    Json(response)
}

/// POST /api/click/prepare
pub async fn handle_prepare(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<ClickResponse> {
    handle_callback(state, headers, body, false).await
}

/// POST /api/click/complete
pub async fn handle_complete(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<ClickResponse> {
    handle_callback(state, headers, body, true).await
}

/// GET /api/click/status
pub async fn handle_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "enabled": state.config.click.enabled,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_request_by_content_type() {
        let mut headers = HeaderMap::new();
        let form = b"click_trans_id=1&service_id=77&merchant_trans_id=m&amount=100&action=0\
            &sign_time=t&sign_string=s";
        let req = parse_request(&headers, form).unwrap();
        assert_eq!(req.amount, "100");

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
        assert!(parse_request(&headers, form).is_err());
        let json = br#"{"click_trans_id":1,"service_id":77,"merchant_trans_id":"m",
            "amount":100.5,"action":0,"sign_time":"t","sign_string":"s"}"#;
        assert_eq!(parse_request(&headers, json).unwrap().amount, "100.5");
    }

    #[test]
    fn test_malformed_echoes_ids() {
        let resp = malformed(b"click_trans_id=42&merchant_trans_id=abc");
        assert_eq!(resp.click_trans_id, "42");
        assert_eq!(resp.merchant_trans_id, "abc");
        assert_eq!(resp.error, -8);

        let resp = malformed(b"\xff\xfe");
        assert_eq!(resp.click_trans_id, "");
    }
}
