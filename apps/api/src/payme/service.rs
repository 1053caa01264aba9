//! Payme merchant API state machine.
//!
//! The `account.order_id` Payme sends is the id of a pending ledger
//! transaction created by `POST /api/payment/create-intent`. A Payme
//! transaction claims that order by writing its own id into the ledger's
//! `payment_id`, so one order is paid by at most one Payme transaction.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::billing::settlement::{settle_completed, settle_failed, settle_refunded};
use crate::billing::store::{BillingStore, NewPaymeTransaction, PaymeTransition};
use crate::errors::AppError;
use crate::models::billing::{
    PaymeState, PaymeTransactionRow, PaymentMethod, TransactionRow, TransactionStatus,
};
use crate::payme::types::{
    Account, CancelTransactionParams, CheckPerformParams, CreateTransactionParams, PaymeMethod,
    RpcError, StatementParams, TransactionIdParams, REASON_TIMEOUT, TRANSACTION_TIMEOUT_MS,
};

impl From<AppError> for RpcError {
    fn from(err: AppError) -> Self {
        error!("Payme store failure: {err}");
        RpcError::system()
    }
}

fn decode<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(|e| RpcError::invalid_request(e.to_string()))
}

fn millis(at: Option<DateTime<Utc>>) -> i64 {
    at.map(|t| t.timestamp_millis()).unwrap_or(0)
}

fn is_expired(tx: &PaymeTransactionRow, now: DateTime<Utc>) -> bool {
    now.timestamp_millis() - tx.create_time.timestamp_millis() > TRANSACTION_TIMEOUT_MS
}

pub struct PaymeService<'a> {
    store: &'a dyn BillingStore,
}

impl<'a> PaymeService<'a> {
    pub fn new(store: &'a dyn BillingStore) -> Self {
        Self { store }
    }

    pub async fn dispatch(
        &self,
        method: PaymeMethod,
        params: Value,
        now: DateTime<Utc>,
    ) -> Result<Value, RpcError> {
        match method {
            PaymeMethod::CheckPerformTransaction => self.check_perform(decode(params)?).await,
            PaymeMethod::CreateTransaction => self.create(decode(params)?, now).await,
            PaymeMethod::PerformTransaction => self.perform(decode(params)?, now).await,
            PaymeMethod::CancelTransaction => self.cancel(decode(params)?, now).await,
            PaymeMethod::CheckTransaction => self.check(decode(params)?).await,
            PaymeMethod::GetStatement => self.statement(decode(params)?).await,
        }
    }

    async fn find_order(&self, account: &Account) -> Result<TransactionRow, RpcError> {
        let id = Uuid::parse_str(account.order_id.trim()).map_err(|_| RpcError::invalid_account())?;
        match self.store.find_transaction(id).await? {
            Some(order) if order.payment_method == PaymentMethod::Payme => Ok(order),
            _ => Err(RpcError::invalid_account()),
        }
    }

    /// The order must be payable and the amount must match it exactly.
    async fn payable_order(&self, account: &Account, amount: i64) -> Result<TransactionRow, RpcError> {
        let order = self.find_order(account).await?;
        if order.status != TransactionStatus::Pending {
            return Err(RpcError::invalid_account());
        }
        if order.amount != amount {
            return Err(RpcError::invalid_amount());
        }
        Ok(order)
    }

    async fn find_transaction(&self, payme_id: &str) -> Result<PaymeTransactionRow, RpcError> {
        self.store
            .find_payme_transaction(payme_id)
            .await?
            .ok_or_else(RpcError::transaction_not_found)
    }

    /// Cancels a Created transaction that outlived the timeout and fails its order.
    async fn expire(&self, tx: &PaymeTransactionRow, now: DateTime<Utc>) -> Result<(), RpcError> {
        let cancelled = self
            .store
            .transition_payme_transaction(
                tx.id,
                PaymeState::Created,
                PaymeTransition::Cancel {
                    state: PaymeState::Cancelled,
                    reason: REASON_TIMEOUT,
                    at: now,
                },
            )
            .await?;
        if let Some(cancelled) = cancelled {
            self.settle_ledger(&cancelled, now).await?;
            warn!(payme_id = %tx.payme_id, order_id = %tx.order_id, "Payme transaction timed out");
        }
        Ok(())
    }

    /// Applies a final Payme state to the ledger. Settlement is
    /// compare-and-set, so a repeated call only writes what an earlier,
    /// interrupted call left undone.
    async fn settle_ledger(&self, tx: &PaymeTransactionRow, now: DateTime<Utc>) -> Result<(), RpcError> {
        match tx.state {
            PaymeState::Created => {}
            PaymeState::Completed => {
                settle_completed(self.store, tx.order_id, tx.perform_time.unwrap_or(now)).await?;
            }
            PaymeState::Cancelled => {
                settle_failed(self.store, tx.order_id).await?;
            }
            PaymeState::CancelledAfterComplete => {
                settle_refunded(self.store, tx.order_id).await?;
            }
        }
        Ok(())
    }

    async fn check_perform(&self, params: CheckPerformParams) -> Result<Value, RpcError> {
        self.payable_order(&params.account, params.amount).await?;
        Ok(json!({ "allow": true }))
    }

    async fn create(
        &self,
        params: CreateTransactionParams,
        now: DateTime<Utc>,
    ) -> Result<Value, RpcError> {
        if let Some(existing) = self.store.find_payme_transaction(&params.id).await? {
            if existing.state != PaymeState::Created {
                return Err(RpcError::cannot_perform());
            }
            if is_expired(&existing, now) {
                self.expire(&existing, now).await?;
                return Err(RpcError::cannot_perform());
            }
            return Ok(create_result(&existing));
        }

        let order = self.payable_order(&params.account, params.amount).await?;

        if self.store.claim_payment_id(order.id, &params.id).await?.is_none() {
            warn!(payme_id = %params.id, order_id = %order.id, "Order already claimed");
            return Err(RpcError::order_busy());
        }

        let tx = match self
            .store
            .insert_payme_transaction(NewPaymeTransaction {
                payme_id: params.id.clone(),
                time: params.time,
                amount: params.amount,
                order_id: order.id,
                user_id: order.user_id,
                create_time: now,
            })
            .await
        {
            Ok(tx) => tx,
            // a concurrent duplicate won the insert
            Err(AppError::Conflict(_)) => self.find_transaction(&params.id).await?,
            Err(e) => return Err(e.into()),
        };

        info!(payme_id = %tx.payme_id, order_id = %order.id, amount = tx.amount, "Payme transaction created");
        Ok(create_result(&tx))
    }

    async fn perform(
        &self,
        params: TransactionIdParams,
        now: DateTime<Utc>,
    ) -> Result<Value, RpcError> {
        let tx = self.find_transaction(&params.id).await?;
        match tx.state {
            PaymeState::Completed => {
                self.settle_ledger(&tx, now).await?;
                return Ok(perform_result(&tx));
            }
            PaymeState::Cancelled | PaymeState::CancelledAfterComplete => {
                return Err(RpcError::cannot_perform())
            }
            PaymeState::Created => {}
        }
        if is_expired(&tx, now) {
            self.expire(&tx, now).await?;
            return Err(RpcError::cannot_perform());
        }

        let order = self
            .store
            .find_transaction(tx.order_id)
            .await?
            .ok_or_else(RpcError::cannot_perform)?;
        if order.status != TransactionStatus::Pending {
            warn!(payme_id = %tx.payme_id, order_id = %order.id, status = ?order.status, "Order is no longer pending");
            return Err(RpcError::cannot_perform());
        }

        let performed = self
            .store
            .transition_payme_transaction(tx.id, PaymeState::Created, PaymeTransition::Perform { at: now })
            .await?;
        let performed = match performed {
            Some(row) => row,
            None => {
                // lost a race; report whatever won
                let current = self.find_transaction(&params.id).await?;
                return if current.state == PaymeState::Completed {
                    self.settle_ledger(&current, now).await?;
                    Ok(perform_result(&current))
                } else {
                    Err(RpcError::cannot_perform())
                };
            }
        };

        self.settle_ledger(&performed, now).await?;
        info!(payme_id = %performed.payme_id, order_id = %performed.order_id, state = performed.state.code(), "Payme transaction performed");
        Ok(perform_result(&performed))
    }

    async fn cancel(
        &self,
        params: CancelTransactionParams,
        now: DateTime<Utc>,
    ) -> Result<Value, RpcError> {
        let tx = self.find_transaction(&params.id).await?;
        let target = match tx.state {
            PaymeState::Created => PaymeState::Cancelled,
            PaymeState::Completed => PaymeState::CancelledAfterComplete,
            PaymeState::Cancelled | PaymeState::CancelledAfterComplete => {
                self.settle_ledger(&tx, now).await?;
                return Ok(cancel_result(&tx));
            }
        };

        let cancelled = self
            .store
            .transition_payme_transaction(
                tx.id,
                tx.state,
                PaymeTransition::Cancel {
                    state: target,
                    reason: params.reason,
                    at: now,
                },
            )
            .await?;
        let Some(cancelled) = cancelled else {
            let current = self.find_transaction(&params.id).await?;
            return if current.state.is_cancelled() {
                Ok(cancel_result(&current))
            } else {
                Err(RpcError::cannot_perform())
            };
        };

        self.settle_ledger(&cancelled, now).await?;
        info!(
            payme_id = %cancelled.payme_id,
            order_id = %cancelled.order_id,
            state = cancelled.state.code(),
            reason = params.reason,
            "Payme transaction cancelled"
        );
        Ok(cancel_result(&cancelled))
    }

    async fn check(&self, params: TransactionIdParams) -> Result<Value, RpcError> {
        let tx = self.find_transaction(&params.id).await?;
        Ok(json!({
            "create_time": tx.create_time.timestamp_millis(),
            "perform_time": millis(tx.perform_time),
            "cancel_time": millis(tx.cancel_time),
            "transaction": tx.id.to_string(),
            "state": tx.state.code(),
            "reason": tx.reason,
        }))
    }

    async fn statement(&self, params: StatementParams) -> Result<Value, RpcError> {
        if params.from > params.to {
            return Err(RpcError::invalid_request("from must not exceed to"));
        }
        let rows = self.store.payme_statement(params.from, params.to).await?;
        let transactions: Vec<Value> = rows
            .iter()
            .map(|tx| {
                json!({
                    "id": tx.payme_id,
                    "time": tx.time,
                    "amount": tx.amount,
                    "account": { "order_id": tx.order_id.to_string() },
                    "create_time": tx.create_time.timestamp_millis(),
                    "perform_time": millis(tx.perform_time),
                    "cancel_time": millis(tx.cancel_time),
                    "transaction": tx.id.to_string(),
                    "state": tx.state.code(),
                    "reason": tx.reason,
                })
            })
            .collect();
        Ok(json!({ "transactions": transactions }))
    }
}

fn create_result(tx: &PaymeTransactionRow) -> Value {
    json!({
        "create_time": tx.create_time.timestamp_millis(),
        "transaction": tx.id.to_string(),
        "state": tx.state.code(),
    })
}

fn perform_result(tx: &PaymeTransactionRow) -> Value {
    json!({
        "transaction": tx.id.to_string(),
        "perform_time": millis(tx.perform_time),
        "state": tx.state.code(),
    })
}

fn cancel_result(tx: &PaymeTransactionRow) -> Value {
    json!({
        "transaction": tx.id.to_string(),
        "cancel_time": millis(tx.cancel_time),
        "state": tx.state.code(),
    })
}
