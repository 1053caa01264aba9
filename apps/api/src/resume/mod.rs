//! Resume documents: per-user CRUD, locking and public sharing by slug.

pub mod defaults;
pub mod handlers;
