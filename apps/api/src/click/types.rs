use std::collections::HashMap;

use serde::Serialize;
use serde_json::value::RawValue;

pub const ACTION_PREPARE: i32 = 0;
pub const ACTION_COMPLETE: i32 = 1;

/// Click Shop API error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickError {
    Success,
    SignCheckFailed,
    IncorrectAmount,
    ActionNotFound,
    AlreadyPaid,
    OrderNotFound,
    TransactionNotFound,
    FailedToUpdate,
    BadRequest,
    TransactionCancelled,
}

impl ClickError {
    pub fn code(self) -> i32 {
        match self {
            ClickError::Success => 0,
            ClickError::SignCheckFailed => -1,
            ClickError::IncorrectAmount => -2,
            ClickError::ActionNotFound => -3,
            ClickError::AlreadyPaid => -4,
            ClickError::OrderNotFound => -5,
            ClickError::TransactionNotFound => -6,
            ClickError::FailedToUpdate => -7,
            ClickError::BadRequest => -8,
            ClickError::TransactionCancelled => -9,
        }
    }

    pub fn note(self) -> &'static str {
        match self {
            ClickError::Success => "Success",
            ClickError::SignCheckFailed => "SIGN CHECK FAILED!",
            ClickError::IncorrectAmount => "Incorrect parameter amount",
            ClickError::ActionNotFound => "Action not found",
            ClickError::AlreadyPaid => "Already paid",
            ClickError::OrderNotFound => "Order not found",
            ClickError::TransactionNotFound => "Transaction does not exist",
            ClickError::FailedToUpdate => "Failed to update order",
            ClickError::BadRequest => "Error in request from click",
            ClickError::TransactionCancelled => "Transaction cancelled",
        }
    }
}

/// A prepare or complete callback. `amount` keeps the exact string Click
/// sent because it is part of the signed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickRequest {
    pub click_trans_id: String,
    pub service_id: String,
    pub click_paydoc_id: String,
    pub merchant_trans_id: String,
    pub merchant_prepare_id: Option<String>,
    pub amount: String,
    pub action: i32,
    pub error: i32,
    pub error_note: String,
    pub sign_time: String,
    pub sign_string: String,
}

impl ClickRequest {
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, String> {
        let required = |key: &str| -> Result<String, String> {
            fields
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| format!("missing field '{key}'"))
        };
        let int = |key: &str, default: Option<i32>| -> Result<i32, String> {
            match fields.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
                Some(v) => v.parse().map_err(|_| format!("field '{key}' must be an integer")),
                None => default.ok_or_else(|| format!("missing field '{key}'")),
            }
        };

        Ok(ClickRequest {
            click_trans_id: required("click_trans_id")?,
            service_id: required("service_id")?,
            click_paydoc_id: fields
                .get("click_paydoc_id")
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
            merchant_trans_id: required("merchant_trans_id")?,
            merchant_prepare_id: fields
                .get("merchant_prepare_id")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            amount: required("amount")?,
            action: int("action", None)?,
            error: int("error", Some(0))?,
            error_note: fields.get("error_note").cloned().unwrap_or_default(),
            sign_time: required("sign_time")?,
            sign_string: required("sign_string")?,
        })
    }
}

/// Parses an `application/x-www-form-urlencoded` callback body.
pub fn fields_from_form(body: &[u8]) -> Result<HashMap<String, String>, String> {
    serde_urlencoded::from_bytes(body).map_err(|e| e.to_string())
}

/// Parses a JSON callback body. Strings are unescaped; numbers and booleans
/// keep their literal spelling, so `15000.00` stays `15000.00`.
pub fn fields_from_json(body: &[u8]) -> Result<HashMap<String, String>, String> {
    let map: HashMap<String, Box<RawValue>> =
        serde_json::from_slice(body).map_err(|e| e.to_string())?;
    Ok(map
        .into_iter()
        .filter_map(|(key, value)| {
            let raw = value.get().trim();
            let text = match raw.as_bytes().first() {
                Some(b'"') => serde_json::from_str::<String>(raw).ok()?,
                Some(b'{') | Some(b'[') | None => return None,
                _ if raw == "null" => return None,
                _ => raw.to_string(),
            };
            Some((key, text))
        })
        .collect())
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClickResponse {
    pub click_trans_id: String,
    pub merchant_trans_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_prepare_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_confirm_id: Option<i64>,
    pub error: i32,
    pub error_note: String,
}

impl ClickResponse {
    pub fn error(click_trans_id: &str, merchant_trans_id: &str, error: ClickError) -> Self {
        ClickResponse {
            click_trans_id: click_trans_id.to_string(),
            merchant_trans_id: merchant_trans_id.to_string(),
            merchant_prepare_id: None,
            merchant_confirm_id: None,
            error: error.code(),
            error_note: error.note().to_string(),
        }
    }

    pub fn prepared(req: &ClickRequest, prepare_id: i64) -> Self {
        ClickResponse {
            merchant_prepare_id: Some(prepare_id),
            ..Self::error(&req.click_trans_id, &req.merchant_trans_id, ClickError::Success)
        }
    }

    pub fn confirmed(req: &ClickRequest, confirm_id: i64) -> Self {
        ClickResponse {
            merchant_confirm_id: Some(confirm_id),
            ..Self::error(&req.click_trans_id, &req.merchant_trans_id, ClickError::Success)
        }
    }
}
