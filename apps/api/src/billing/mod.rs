//! Plans, subscriptions and the payment ledger.

#[cfg(test)]
pub mod memory;
pub mod money;
pub mod settlement;
pub mod store;
pub mod subscriptions;
