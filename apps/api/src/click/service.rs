//! Click prepare/complete state machine.
//!
//! `merchant_trans_id` is the ledger id of a pending Click order. Prepare
//! inserts a `click_transactions` row whose id becomes `merchant_prepare_id`;
//! complete settles it.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::billing::money::parse_minor_units;
use crate::billing::settlement::{settle_completed, settle_failed};
use crate::billing::store::{BillingStore, NewClickTransaction};
use crate::click::signature::verify_signature;
use crate::click::types::{ClickError, ClickRequest, ClickResponse, ACTION_COMPLETE, ACTION_PREPARE};
use crate::config::ClickConfig;
use crate::errors::AppError;
use crate::models::billing::{ClickState, PaymentMethod, TransactionRow, TransactionStatus};

pub struct ClickService<'a> {
    store: &'a dyn BillingStore,
    config: &'a ClickConfig,
}

impl<'a> ClickService<'a> {
    pub fn new(store: &'a dyn BillingStore, config: &'a ClickConfig) -> Self {
        Self { store, config }
    }

    pub async fn prepare(&self, req: &ClickRequest) -> ClickResponse {
        match self.try_prepare(req).await {
            Ok(prepare_id) => ClickResponse::prepared(req, prepare_id),
            Err(e) => self.reject(req, e),
        }
    }

    pub async fn complete(&self, req: &ClickRequest, now: DateTime<Utc>) -> ClickResponse {
        match self.try_complete(req, now).await {
            Ok(confirm_id) => ClickResponse::confirmed(req, confirm_id),
            Err(e) => self.reject(req, e),
        }
    }

    fn reject(&self, req: &ClickRequest, error: ClickError) -> ClickResponse {
        info!(
            click_trans_id = %req.click_trans_id,
            merchant_trans_id = %req.merchant_trans_id,
            action = req.action,
            error = error.code(),
            "Click request rejected"
        );
        ClickResponse::error(&req.click_trans_id, &req.merchant_trans_id, error)
    }

    fn authenticate(&self, req: &ClickRequest, action: i32) -> Result<(), ClickError> {
        if req.service_id != self.config.service_id {
            warn!(service_id = %req.service_id, "Click request for a foreign service");
            return Err(ClickError::BadRequest);
        }
        if !verify_signature(req, &self.config.secret_key) {
            warn!(click_trans_id = %req.click_trans_id, "Click signature mismatch");
            return Err(ClickError::SignCheckFailed);
        }
        if req.action != action {
            return Err(ClickError::ActionNotFound);
        }
        Ok(())
    }

    async fn find_order(&self, merchant_trans_id: &str) -> Result<TransactionRow, ClickError> {
        let id = Uuid::parse_str(merchant_trans_id.trim()).map_err(|_| ClickError::OrderNotFound)?;
        match self.store.find_transaction(id).await.map_err(store_failure)? {
            Some(order) if order.payment_method == PaymentMethod::Click => Ok(order),
            _ => Err(ClickError::OrderNotFound),
        }
    }

    fn check_amount(req: &ClickRequest, expected: i64) -> Result<(), ClickError> {
        match parse_minor_units(&req.amount) {
            Some(amount) if amount == expected => Ok(()),
            _ => Err(ClickError::IncorrectAmount),
        }
    }

    async fn try_prepare(&self, req: &ClickRequest) -> Result<i64, ClickError> {
        self.authenticate(req, ACTION_PREPARE)?;

        let order = self.find_order(&req.merchant_trans_id).await?;
        match order.status {
            TransactionStatus::Pending => {}
            TransactionStatus::Completed => return Err(ClickError::AlreadyPaid),
            TransactionStatus::Failed | TransactionStatus::Refunded => {
                return Err(ClickError::TransactionCancelled)
            }
        }
        Self::check_amount(req, order.amount)?;

        if let Some(existing) = self
            .store
            .find_click_transaction_by_click_id(&req.click_trans_id)
            .await
            .map_err(store_failure)?
        {
            if existing.order_id != order.id {
                return Err(ClickError::BadRequest);
            }
            return match existing.state {
                ClickState::Prepared => Ok(existing.id),
                ClickState::Completed => Err(ClickError::AlreadyPaid),
                ClickState::Cancelled => Err(ClickError::TransactionCancelled),
            };
        }

        if self
            .store
            .claim_payment_id(order.id, &req.click_trans_id)
            .await
            .map_err(store_failure)?
            .is_none()
        {
            warn!(click_trans_id = %req.click_trans_id, order_id = %order.id, "Order already claimed");
            return Err(ClickError::AlreadyPaid);
        }

        let inserted = self
            .store
            .insert_click_transaction(NewClickTransaction {
                click_trans_id: req.click_trans_id.clone(),
                click_paydoc_id: req.click_paydoc_id.clone(),
                merchant_trans_id: req.merchant_trans_id.clone(),
                order_id: order.id,
                user_id: order.user_id,
                amount: order.amount,
            })
            .await;
        let row = match inserted {
            Ok(row) => row,
            Err(AppError::Conflict(_)) => self
                .store
                .find_click_transaction_by_click_id(&req.click_trans_id)
                .await
                .map_err(store_failure)?
                .ok_or(ClickError::FailedToUpdate)?,
            Err(e) => return Err(store_failure(e)),
        };

        info!(
            click_trans_id = %row.click_trans_id,
            order_id = %order.id,
            merchant_prepare_id = row.id,
            "Click transaction prepared"
        );
        Ok(row.id)
    }

    async fn try_complete(&self, req: &ClickRequest, now: DateTime<Utc>) -> Result<i64, ClickError> {
        let prepare_id: i64 = req
            .merchant_prepare_id
            .as_deref()
            .ok_or(ClickError::BadRequest)?
            .parse()
            .map_err(|_| ClickError::TransactionNotFound)?;

        self.authenticate(req, ACTION_COMPLETE)?;

        let row = self
            .store
            .find_click_transaction(prepare_id)
            .await
            .map_err(store_failure)?
            .filter(|row| {
                row.click_trans_id == req.click_trans_id
                    && row.merchant_trans_id == req.merchant_trans_id
            })
            .ok_or(ClickError::TransactionNotFound)?;

        Self::check_amount(req, row.amount)?;

        match row.state {
            ClickState::Prepared => {}
            // a previous complete may have stopped between the two writes
            ClickState::Completed => {
                let settled = settle_completed(self.store, row.order_id, row.updated_at)
                    .await
                    .map_err(store_failure)?;
                return match settled {
                    Some(_) => Ok(row.id),
                    None => Err(ClickError::AlreadyPaid),
                };
            }
            ClickState::Cancelled => {
                settle_failed(self.store, row.order_id)
                    .await
                    .map_err(store_failure)?;
                return Err(ClickError::TransactionCancelled);
            }
        }

        if req.error < 0 {
            // Click reports the payment itself failed
            let cancelled = self
                .store
                .transition_click_transaction(row.id, ClickState::Prepared, ClickState::Cancelled)
                .await
                .map_err(store_failure)?;
            if cancelled.is_some() {
                settle_failed(self.store, row.order_id)
                    .await
                    .map_err(store_failure)?;
                info!(
                    click_trans_id = %row.click_trans_id,
                    order_id = %row.order_id,
                    click_error = req.error,
                    "Click transaction cancelled by provider"
                );
            }
            return Err(ClickError::TransactionCancelled);
        }

        let order = self
            .store
            .find_transaction(row.order_id)
            .await
            .map_err(store_failure)?
            .ok_or(ClickError::OrderNotFound)?;
        match order.status {
            TransactionStatus::Pending => {}
            TransactionStatus::Completed => return Err(ClickError::AlreadyPaid),
            TransactionStatus::Failed | TransactionStatus::Refunded => {
                return Err(ClickError::TransactionCancelled)
            }
        }

        let completed = self
            .store
            .transition_click_transaction(row.id, ClickState::Prepared, ClickState::Completed)
            .await
            .map_err(store_failure)?
            .ok_or(ClickError::FailedToUpdate)?;

        settle_completed(self.store, completed.order_id, now)
            .await
            .map_err(store_failure)?;

        info!(
            click_trans_id = %completed.click_trans_id,
            order_id = %completed.order_id,
            state = completed.state as i32,
            "Click transaction completed"
        );
        Ok(completed.id)
    }
}

fn store_failure(err: AppError) -> ClickError {
    error!("Click store failure: {err}");
    ClickError::FailedToUpdate
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::billing::memory::InMemoryBillingStore;
    use crate::billing::money::format_major_units;
    use crate::billing::settlement::tests::seed_order;
    use crate::click::signature::expected_signature;
    use crate::models::billing::SubscriptionStatus;
    use chrono::TimeZone;

    const AMOUNT: i64 = 1_500_000;

    pub(crate) fn config() -> ClickConfig {
        ClickConfig {
            enabled: true,
            merchant_id: "11".into(),
            service_id: "77".into(),
            secret_key: "click-secret".into(),
            checkout_url: "https://my.click.uz/services/pay".into(),
        }
    }

    pub(crate) fn signed(mut req: ClickRequest, secret: &str) -> ClickRequest {
        req.sign_string = expected_signature(&req, secret);
        req
    }

    pub(crate) fn prepare_request(click_trans_id: &str, order: &TransactionRow) -> ClickRequest {
        signed(
            ClickRequest {
                click_trans_id: click_trans_id.into(),
                service_id: "77".into(),
                click_paydoc_id: "555".into(),
                merchant_trans_id: order.id.to_string(),
                merchant_prepare_id: None,
                amount: format_major_units(order.amount),
                action: ACTION_PREPARE,
                error: 0,
                error_note: "Success".into(),
                sign_time: "2025-05-20 10:00:00".into(),
                sign_string: String::new(),
            },
            "click-secret",
        )
    }

    fn complete_request(prepared: &ClickRequest, prepare_id: i64, error: i32) -> ClickRequest {
        let mut req = prepared.clone();
        req.action = ACTION_COMPLETE;
        req.merchant_prepare_id = Some(prepare_id.to_string());
        req.error = error;
        signed(req, "click-secret")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 20, 10, 1, 0).unwrap()
    }

    #[tokio::test]
    async fn test_prepare_and_complete() {
        let store = InMemoryBillingStore::new();
        let config = config();
        let service = ClickService::new(&store, &config);
        let (_, order) = seed_order(&store, PaymentMethod::Click, AMOUNT).await;

        let prep_req = prepare_request("9001", &order);
        let prepared = service.prepare(&prep_req).await;
        assert_eq!(prepared.error, 0, "{}", prepared.error_note);
        let prepare_id = prepared.merchant_prepare_id.unwrap();

        // duplicate prepare returns the same id
        let again = service.prepare(&prep_req).await;
        assert_eq!(again.merchant_prepare_id, Some(prepare_id));
        assert_eq!(store.click_count(), 1);

        let done = service
            .complete(&complete_request(&prep_req, prepare_id, 0), now())
            .await;
        assert_eq!(done.error, 0, "{}", done.error_note);
        assert_eq!(done.merchant_confirm_id, Some(prepare_id));

        assert_eq!(
            store.transaction(order.id).unwrap().status,
            TransactionStatus::Completed
        );
        let sub = store.subscription(order.subscription_id.unwrap()).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);

        let repeat = service
            .complete(&complete_request(&prep_req, prepare_id, 0), now())
            .await;
        assert_eq!(repeat.error, ClickError::AlreadyPaid.code());

        let late_prepare = service.prepare(&prepare_request("9002", &order)).await;
        assert_eq!(late_prepare.error, ClickError::AlreadyPaid.code());
    }

    #[tokio::test]
    async fn test_repeat_complete_settles_after_ledger_failure() {
        let store = InMemoryBillingStore::new();
        let config = config();
        let service = ClickService::new(&store, &config);
        let (_, order) = seed_order(&store, PaymentMethod::Click, AMOUNT).await;

        let prep_req = prepare_request("9010", &order);
        let prepare_id = service.prepare(&prep_req).await.merchant_prepare_id.unwrap();
        let complete = complete_request(&prep_req, prepare_id, 0);

        store.set_ledger_down(true);
        let failed = service.complete(&complete, now()).await;
        assert_eq!(failed.error, ClickError::FailedToUpdate.code());
        assert_eq!(store.transaction(order.id).unwrap().status, TransactionStatus::Pending);

        store.set_ledger_down(false);
        let retried = service.complete(&complete, now()).await;
        assert_eq!(retried.error, 0, "{}", retried.error_note);
        assert_eq!(retried.merchant_confirm_id, Some(prepare_id));
        assert_eq!(store.transaction(order.id).unwrap().status, TransactionStatus::Completed);
        let sub = store.subscription(order.subscription_id.unwrap()).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);

        let repeat = service.complete(&complete, now()).await;
        assert_eq!(repeat.error, ClickError::AlreadyPaid.code());
    }

    #[tokio::test]
    async fn test_bad_signature_and_service() {
        let store = InMemoryBillingStore::new();
        let config = config();
        let service = ClickService::new(&store, &config);
        let (_, order) = seed_order(&store, PaymentMethod::Click, AMOUNT).await;

        let mut req = prepare_request("9001", &order);
        req.sign_string = "0".repeat(32);
        assert_eq!(service.prepare(&req).await.error, -1);

        let mut req = prepare_request("9001", &order);
        req.service_id = "78".into();
        let req = signed(req, "click-secret");
        assert_eq!(service.prepare(&req).await.error, -8);
        assert_eq!(store.click_count(), 0);
    }

    #[tokio::test]
    async fn test_prepare_validations() {
        let store = InMemoryBillingStore::new();
        let config = config();
        let service = ClickService::new(&store, &config);
        let (_, order) = seed_order(&store, PaymentMethod::Click, AMOUNT).await;

        let mut req = prepare_request("9001", &order);
        req.amount = "14999.99".into();
        assert_eq!(service.prepare(&signed(req, "click-secret")).await.error, -2);

        let mut req = prepare_request("9001", &order);
        req.merchant_trans_id = Uuid::new_v4().to_string();
        assert_eq!(service.prepare(&signed(req, "click-secret")).await.error, -5);

        let mut req = prepare_request("9001", &order);
        req.action = ACTION_COMPLETE;
        assert_eq!(service.prepare(&signed(req, "click-secret")).await.error, -3);

        // integer amount spelling is accepted
        let mut req = prepare_request("9001", &order);
        req.amount = "15000".into();
        assert_eq!(service.prepare(&signed(req, "click-secret")).await.error, 0);
    }

    #[tokio::test]
    async fn test_payme_orders_are_not_payable_through_click() {
        let store = InMemoryBillingStore::new();
        let config = config();
        let service = ClickService::new(&store, &config);
        let (_, order) = seed_order(&store, PaymentMethod::Payme, AMOUNT).await;
        assert_eq!(service.prepare(&prepare_request("9001", &order)).await.error, -5);
    }

    #[tokio::test]
    async fn test_provider_error_cancels() {
        let store = InMemoryBillingStore::new();
        let config = config();
        let service = ClickService::new(&store, &config);
        let (_, order) = seed_order(&store, PaymentMethod::Click, AMOUNT).await;

        let prep_req = prepare_request("9001", &order);
        let prepare_id = service.prepare(&prep_req).await.merchant_prepare_id.unwrap();

        let resp = service
            .complete(&complete_request(&prep_req, prepare_id, -5017), now())
            .await;
        assert_eq!(resp.error, -9);
        assert_eq!(
            store.transaction(order.id).unwrap().status,
            TransactionStatus::Failed
        );

        let retry = service
            .complete(&complete_request(&prep_req, prepare_id, 0), now())
            .await;
        assert_eq!(retry.error, -9);

        let new_prepare = service.prepare(&prepare_request("9003", &order)).await;
        assert_eq!(new_prepare.error, -9);
    }

    #[tokio::test]
    async fn test_complete_with_unknown_or_mismatched_prepare_id() {
        let store = InMemoryBillingStore::new();
        let config = config();
        let service = ClickService::new(&store, &config);
        let (_, order) = seed_order(&store, PaymentMethod::Click, AMOUNT).await;

        let prep_req = prepare_request("9001", &order);
        let prepare_id = service.prepare(&prep_req).await.merchant_prepare_id.unwrap();

        let resp = service
            .complete(&complete_request(&prep_req, prepare_id + 100, 0), now())
            .await;
        assert_eq!(resp.error, -6);

        let mut other = prep_req.clone();
        other.click_trans_id = "7777".into();
        let resp = service
            .complete(&complete_request(&other, prepare_id, 0), now())
            .await;
        assert_eq!(resp.error, -6);

        let mut missing = prep_req.clone();
        missing.action = ACTION_COMPLETE;
        let resp = service.complete(&signed(missing, "click-secret"), now()).await;
        assert_eq!(resp.error, -8);
    }
}
