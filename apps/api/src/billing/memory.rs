//! In-memory `BillingStore` for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::billing::store::{
    check_ledger_transition, BillingStore, NewClickTransaction, NewPaymeTransaction, NewPlan,
    NewSubscription, NewTransaction, PaymeTransition, PlanUpdate,
};
use crate::errors::AppError;
use crate::models::billing::{
    ClickState, ClickTransactionRow, PaymeState, PaymeTransactionRow, PaymentMethod, PlanRow,
    SubscriptionRow, SubscriptionStatus, TransactionRow, TransactionStatus,
};

#[derive(Default)]
struct Tables {
    plans: HashMap<Uuid, PlanRow>,
    subscriptions: HashMap<Uuid, SubscriptionRow>,
    transactions: HashMap<Uuid, TransactionRow>,
    payme: HashMap<Uuid, PaymeTransactionRow>,
    click: HashMap<i64, ClickTransactionRow>,
    click_seq: i64,
}

#[derive(Default)]
pub struct InMemoryBillingStore {
    tables: Mutex<Tables>,
    ledger_down: AtomicBool,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction(&self, id: Uuid) -> Option<TransactionRow> {
        self.tables.lock().unwrap().transactions.get(&id).cloned()
    }

    pub fn subscription(&self, id: Uuid) -> Option<SubscriptionRow> {
        self.tables.lock().unwrap().subscriptions.get(&id).cloned()
    }

    pub fn payme_count(&self) -> usize {
        self.tables.lock().unwrap().payme.len()
    }

    pub fn click_count(&self) -> usize {
        self.tables.lock().unwrap().click.len()
    }

    /// While set, every ledger status change fails with a database error.
    pub fn set_ledger_down(&self, down: bool) {
        self.ledger_down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn list_plans(&self) -> Result<Vec<PlanRow>, AppError> {
        let mut plans: Vec<_> = self.tables.lock().unwrap().plans.values().cloned().collect();
        plans.sort_by_key(|p| p.price);
        Ok(plans)
    }

    async fn find_plan(&self, id: Uuid) -> Result<Option<PlanRow>, AppError> {
        Ok(self.tables.lock().unwrap().plans.get(&id).cloned())
    }

    async fn create_plan(&self, plan: NewPlan) -> Result<PlanRow, AppError> {
        let now = Utc::now();
        let row = PlanRow {
            id: Uuid::new_v4(),
            name: plan.name,
            description: plan.description,
            price: plan.price,
            currency: plan.currency,
            duration_days: plan.duration_days,
            features: plan.features,
            created_at: now,
            updated_at: now,
        };
        self.tables.lock().unwrap().plans.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_plan(&self, id: Uuid, update: PlanUpdate) -> Result<Option<PlanRow>, AppError> {
        let mut tables = self.tables.lock().unwrap();
        let Some(plan) = tables.plans.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            plan.name = name;
        }
        if let Some(description) = update.description {
            plan.description = description;
        }
        if let Some(price) = update.price {
            plan.price = price;
        }
        if let Some(currency) = update.currency {
            plan.currency = currency;
        }
        if let Some(days) = update.duration_days {
            plan.duration_days = days;
        }
        if let Some(features) = update.features {
            plan.features = features;
        }
        plan.updated_at = Utc::now();
        Ok(Some(plan.clone()))
    }

    async fn delete_plan(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.tables.lock().unwrap().plans.remove(&id).is_some())
    }

    async fn list_subscriptions(&self, user_id: Uuid) -> Result<Vec<SubscriptionRow>, AppError> {
        let mut subs: Vec<_> = self
            .tables
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        subs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(subs)
    }

    async fn find_subscription(&self, id: Uuid) -> Result<Option<SubscriptionRow>, AppError> {
        Ok(self.tables.lock().unwrap().subscriptions.get(&id).cloned())
    }

    async fn find_active_subscription(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionRow>, AppError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active_at(now))
            .max_by_key(|s| s.end_date)
            .cloned())
    }

    async fn create_subscription(&self, sub: NewSubscription) -> Result<SubscriptionRow, AppError> {
        let now = Utc::now();
        let row = SubscriptionRow {
            id: Uuid::new_v4(),
            user_id: sub.user_id,
            plan_id: sub.plan_id,
            status: sub.status,
            start_date: sub.start_date,
            end_date: sub.end_date,
            created_at: now,
            updated_at: now,
        };
        self.tables
            .lock()
            .unwrap()
            .subscriptions
            .insert(row.id, row.clone());
        Ok(row)
    }

    async fn set_subscription_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<Option<SubscriptionRow>, AppError> {
        let mut tables = self.tables.lock().unwrap();
        Ok(tables.subscriptions.get_mut(&id).map(|sub| {
            sub.status = status;
            sub.updated_at = Utc::now();
            sub.clone()
        }))
    }

    async fn activate_subscription(
        &self,
        id: Uuid,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<Option<SubscriptionRow>, AppError> {
        let mut tables = self.tables.lock().unwrap();
        Ok(tables.subscriptions.get_mut(&id).map(|sub| {
            sub.status = SubscriptionStatus::Active;
            sub.start_date = start_date;
            sub.end_date = end_date;
            sub.updated_at = Utc::now();
            sub.clone()
        }))
    }

    async fn list_transactions(&self, user_id: Uuid) -> Result<Vec<TransactionRow>, AppError> {
        let mut txs: Vec<_> = self
            .tables
            .lock()
            .unwrap()
            .transactions
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(txs)
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<TransactionRow>, AppError> {
        Ok(self.tables.lock().unwrap().transactions.get(&id).cloned())
    }

    async fn find_transaction_by_payment(
        &self,
        method: PaymentMethod,
        payment_id: &str,
    ) -> Result<Option<TransactionRow>, AppError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .transactions
            .values()
            .find(|t| t.payment_method == method && t.payment_id.as_deref() == Some(payment_id))
            .cloned())
    }

    async fn create_transaction(&self, tx: NewTransaction) -> Result<TransactionRow, AppError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(payment_id) = tx.payment_id.as_deref() {
            let taken = tables.transactions.values().any(|t| {
                t.payment_method == tx.payment_method && t.payment_id.as_deref() == Some(payment_id)
            });
            if taken {
                return Err(AppError::Conflict("payment id is already recorded".into()));
            }
        }
        let now = Utc::now();
        let row = TransactionRow {
            id: Uuid::new_v4(),
            user_id: tx.user_id,
            subscription_id: tx.subscription_id,
            amount: tx.amount,
            currency: tx.currency,
            description: tx.description,
            payment_method: tx.payment_method,
            payment_id: tx.payment_id,
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        tables.transactions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn transition_transaction(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> Result<Option<TransactionRow>, AppError> {
        check_ledger_transition(from, to)?;
        if self.ledger_down.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut tables = self.tables.lock().unwrap();
        Ok(tables
            .transactions
            .get_mut(&id)
            .filter(|t| t.status == from)
            .map(|t| {
                t.status = to;
                t.updated_at = Utc::now();
                t.clone()
            }))
    }

    async fn claim_payment_id(
        &self,
        id: Uuid,
        payment_id: &str,
    ) -> Result<Option<TransactionRow>, AppError> {
        let mut tables = self.tables.lock().unwrap();
        Ok(tables
            .transactions
            .get_mut(&id)
            .filter(|t| {
                t.status == TransactionStatus::Pending
                    && t.payment_id.as_deref().map_or(true, |p| p == payment_id)
            })
            .map(|t| {
                t.payment_id = Some(payment_id.to_string());
                t.updated_at = Utc::now();
                t.clone()
            }))
    }

    async fn find_payme_transaction(
        &self,
        payme_id: &str,
    ) -> Result<Option<PaymeTransactionRow>, AppError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .payme
            .values()
            .find(|t| t.payme_id == payme_id)
            .cloned())
    }

    async fn insert_payme_transaction(
        &self,
        tx: NewPaymeTransaction,
    ) -> Result<PaymeTransactionRow, AppError> {
        let mut tables = self.tables.lock().unwrap();
        if tables.payme.values().any(|t| t.payme_id == tx.payme_id) {
            return Err(AppError::Conflict("payme transaction already exists".into()));
        }
        let row = PaymeTransactionRow {
            id: Uuid::new_v4(),
            payme_id: tx.payme_id,
            time: tx.time,
            amount: tx.amount,
            state: PaymeState::Created,
            reason: None,
            order_id: tx.order_id,
            user_id: tx.user_id,
            create_time: tx.create_time,
            perform_time: None,
            cancel_time: None,
        };
        tables.payme.insert(row.id, row.clone());
        Ok(row)
    }

    async fn transition_payme_transaction(
        &self,
        id: Uuid,
        from: PaymeState,
        change: PaymeTransition,
    ) -> Result<Option<PaymeTransactionRow>, AppError> {
        let mut tables = self.tables.lock().unwrap();
        Ok(tables
            .payme
            .get_mut(&id)
            .filter(|t| t.state == from)
            .map(|t| {
                t.state = change.target_state();
                match change {
                    PaymeTransition::Perform { at } => {
                        t.perform_time = Some(at);
                    }
                    PaymeTransition::Cancel { reason, at, .. } => {
                        t.reason = Some(reason);
                        t.cancel_time = Some(at);
                    }
                }
                t.clone()
            }))
    }

    async fn payme_statement(
        &self,
        from: i64,
        to: i64,
    ) -> Result<Vec<PaymeTransactionRow>, AppError> {
        let mut rows: Vec<_> = self
            .tables
            .lock()
            .unwrap()
            .payme
            .values()
            .filter(|t| t.time >= from && t.time <= to)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.time);
        Ok(rows)
    }

    async fn find_click_transaction(
        &self,
        id: i64,
    ) -> Result<Option<ClickTransactionRow>, AppError> {
        Ok(self.tables.lock().unwrap().click.get(&id).cloned())
    }

    async fn find_click_transaction_by_click_id(
        &self,
        click_trans_id: &str,
    ) -> Result<Option<ClickTransactionRow>, AppError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .click
            .values()
            .find(|t| t.click_trans_id == click_trans_id)
            .cloned())
    }

    async fn insert_click_transaction(
        &self,
        tx: NewClickTransaction,
    ) -> Result<ClickTransactionRow, AppError> {
        let mut tables = self.tables.lock().unwrap();
        if tables
            .click
            .values()
            .any(|t| t.click_trans_id == tx.click_trans_id)
        {
            return Err(AppError::Conflict("click transaction already exists".into()));
        }
        tables.click_seq += 1;
        let now = Utc::now();
        let row = ClickTransactionRow {
            id: tables.click_seq,
            click_trans_id: tx.click_trans_id,
            click_paydoc_id: tx.click_paydoc_id,
            merchant_trans_id: tx.merchant_trans_id,
            order_id: tx.order_id,
            user_id: tx.user_id,
            amount: tx.amount,
            state: ClickState::Prepared,
            created_at: now,
            updated_at: now,
        };
        tables.click.insert(row.id, row.clone());
        Ok(row)
    }

    async fn transition_click_transaction(
        &self,
        id: i64,
        from: ClickState,
        to: ClickState,
    ) -> Result<Option<ClickTransactionRow>, AppError> {
        let mut tables = self.tables.lock().unwrap();
        Ok(tables
            .click
            .get_mut(&id)
            .filter(|t| t.state == from)
            .map(|t| {
                t.state = to;
                t.updated_at = Utc::now();
                t.clone()
            }))
    }
}
