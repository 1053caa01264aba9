use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::payme::authorize;
use crate::payme::service::PaymeService;
use crate::payme::types::{PaymeMethod, RpcError, RpcRequest, RpcResponse};
use crate::state::AppState;

/// POST /api/payme
///
/// Always answers HTTP 200; failures travel in the JSON-RPC `error` member.
pub async fn handle_payme(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<RpcResponse> {
    let parsed: Result<Value, _> = serde_json::from_slice(&body);
    let id = parsed
        .as_ref()
        .ok()
        .and_then(|v| v.get("id").cloned())
        .unwrap_or(Value::Null);

    if !state.config.payme.enabled {
        warn!("Payme request received while the integration is disabled");
        return Json(RpcResponse::failure(id, RpcError::method_not_found()));
    }

    let auth_header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if !authorize(auth_header, &state.config.payme) {
        warn!("Payme request with invalid credentials");
        return Json(RpcResponse::failure(id, RpcError::insufficient_privilege()));
    }

    let request: RpcRequest = match parsed {
        Ok(value) => match serde_json::from_value(value) {
            Ok(req) => req,
            Err(e) => {
                warn!("Malformed Payme request: {e}");
                return Json(RpcResponse::failure(id, RpcError::invalid_request(e.to_string())));
            }
        },
        Err(e) => {
            warn!("Unparseable Payme body: {e}");
            return Json(RpcResponse::failure(id, RpcError::parse_error()));
        }
    };

    let Some(method) = PaymeMethod::parse(&request.method) else {
        warn!(method = %request.method, "Unknown Payme method");
        return Json(RpcResponse::failure(request.id, RpcError::method_not_found()));
    };

    let service = PaymeService::new(state.billing.as_ref());
    match service.dispatch(method, request.params, Utc::now()).await {
        Ok(result) => Json(RpcResponse::success(request.id, result)),
        Err(error) => {
            info!(method = ?method, code = error.code, "Payme request rejected");
            Json(RpcResponse::failure(request.id, error))
        }
    }
}
