//! Request handlers.

pub mod account;
pub mod billing;
pub mod generate;
pub mod health;
pub mod history;

pub use health::*;
