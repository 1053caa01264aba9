//! Payme merchant API wire types: JSON-RPC envelopes, method params and the
//! error taxonomy with localized messages.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const ERR_INVALID_AMOUNT: i32 = -31001;
pub const ERR_TRANSACTION_NOT_FOUND: i32 = -31003;
pub const ERR_CANNOT_PERFORM: i32 = -31008;
pub const ERR_INVALID_ACCOUNT: i32 = -31050;
pub const ERR_ORDER_BUSY: i32 = -31099;
pub const ERR_SYSTEM: i32 = -32400;
pub const ERR_INSUFFICIENT_PRIVILEGE: i32 = -32504;
pub const ERR_INVALID_REQUEST: i32 = -32600;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_PARSE: i32 = -32700;

/// Cancel reason Payme uses for transactions that outlived the timeout.
pub const REASON_TIMEOUT: i32 = 4;

/// A Created transaction older than this can no longer be performed.
pub const TRANSACTION_TIMEOUT_MS: i64 = 12 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymeMethod {
    CheckPerformTransaction,
    CreateTransaction,
    PerformTransaction,
    CancelTransaction,
    CheckTransaction,
    GetStatement,
}

impl PaymeMethod {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "CheckPerformTransaction" => Self::CheckPerformTransaction,
            "CreateTransaction" => Self::CreateTransaction,
            "PerformTransaction" => Self::PerformTransaction,
            "CancelTransaction" => Self::CancelTransaction,
            "CheckTransaction" => Self::CheckTransaction,
            "GetStatement" => Self::GetStatement,
            _ => return None,
        })
    }
}

/// Raw JSON-RPC request; `params` is decoded per method.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Localized {
    pub ru: String,
    pub uz: String,
    pub en: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RpcError {
    pub code: i32,
    pub message: Localized,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl RpcError {
    fn new(code: i32, ru: &str, uz: &str, en: &str) -> Self {
        Self {
            code,
            message: Localized {
                ru: ru.into(),
                uz: uz.into(),
                en: en.into(),
            },
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn invalid_amount() -> Self {
        Self::new(
            ERR_INVALID_AMOUNT,
            "Неверная сумма",
            "Noto'g'ri summa",
            "Invalid amount",
        )
    }

    pub fn transaction_not_found() -> Self {
        Self::new(
            ERR_TRANSACTION_NOT_FOUND,
            "Транзакция не найдена",
            "Tranzaksiya topilmadi",
            "Transaction not found",
        )
    }

    pub fn cannot_perform() -> Self {
        Self::new(
            ERR_CANNOT_PERFORM,
            "Невозможно выполнить операцию",
            "Amalni bajarib bo'lmaydi",
            "Unable to perform operation",
        )
    }

    pub fn invalid_account() -> Self {
        Self::new(
            ERR_INVALID_ACCOUNT,
            "Заказ не найден",
            "Buyurtma topilmadi",
            "Order not found",
        )
        .with_data("order_id")
    }

    pub fn order_busy() -> Self {
        Self::new(
            ERR_ORDER_BUSY,
            "Заказ уже оплачивается другой транзакцией",
            "Buyurtma boshqa tranzaksiya orqali to'lanmoqda",
            "Order is being paid by another transaction",
        )
        .with_data("order_id")
    }

    pub fn system() -> Self {
        Self::new(
            ERR_SYSTEM,
            "Системная ошибка",
            "Tizim xatosi",
            "System error",
        )
    }

    pub fn insufficient_privilege() -> Self {
        Self::new(
            ERR_INSUFFICIENT_PRIVILEGE,
            "Недостаточно привилегий",
            "Huquqlar yetarli emas",
            "Insufficient privilege",
        )
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(
            ERR_INVALID_REQUEST,
            "Неверный запрос",
            "Noto'g'ri so'rov",
            "Invalid request",
        )
        .with_data(detail)
    }

    pub fn method_not_found() -> Self {
        Self::new(
            ERR_METHOD_NOT_FOUND,
            "Метод не найден",
            "Metod topilmadi",
            "Method not found",
        )
    }

    pub fn parse_error() -> Self {
        Self::new(
            ERR_PARSE,
            "Ошибка разбора JSON",
            "JSON tahlil xatosi",
            "Parse error",
        )
    }
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Payme amounts are integers in tiyin, but may arrive as `500000.0`.
fn deserialize_tiyin<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Number::deserialize(deserializer)?;
    if let Some(n) = value.as_i64() {
        return Ok(n);
    }
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(f as i64),
        _ => Err(serde::de::Error::custom("amount must be a whole number of tiyin")),
    }
}

#[derive(Debug, Deserialize)]
pub struct Account {
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckPerformParams {
    #[serde(deserialize_with = "deserialize_tiyin")]
    pub amount: i64,
    pub account: Account,
}

#[derive(Debug, Deserialize)]
pub struct CreateTransactionParams {
    pub id: String,
    pub time: i64,
    #[serde(deserialize_with = "deserialize_tiyin")]
    pub amount: i64,
    pub account: Account,
}

#[derive(Debug, Deserialize)]
pub struct TransactionIdParams {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelTransactionParams {
    pub id: String,
    pub reason: i32,
}

#[derive(Debug, Deserialize)]
pub struct StatementParams {
    pub from: i64,
    pub to: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_names() {
        assert_eq!(
            PaymeMethod::parse("CheckPerformTransaction"),
            Some(PaymeMethod::CheckPerformTransaction)
        );
        assert_eq!(PaymeMethod::parse("GetStatement"), Some(PaymeMethod::GetStatement));
        assert_eq!(PaymeMethod::parse("ChangePassword"), None);
    }

    #[test]
    fn test_error_envelope_shape() {
        let resp = RpcResponse::failure(json!(7), RpcError::invalid_account());
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["error"]["code"], -31050);
        assert_eq!(value["error"]["message"]["en"], "Order not found");
        assert_eq!(value["error"]["data"], "order_id");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_amount_accepts_integral_floats() {
        let params: CheckPerformParams =
            serde_json::from_value(json!({"amount": 500000.0, "account": {"order_id": "x"}}))
                .unwrap();
        assert_eq!(params.amount, 500_000);

        let bad = serde_json::from_value::<CheckPerformParams>(
            json!({"amount": 10.5, "account": {"order_id": "x"}}),
        );
        assert!(bad.is_err());
    }
}
