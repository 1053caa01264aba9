pub mod billing;
pub mod resume;
pub mod user;
