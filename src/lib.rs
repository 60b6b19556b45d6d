//! M-Pesa STK push checkout backend
//!
//! A payer is prompted on their handset to authorize a debit. The result
//! arrives asynchronously through a provider callback, and a status poll
//! covers callbacks that never arrive. Both paths settle the stored
//! transaction through one reconciliation step, so the first terminal result
//! wins.

pub mod api;
#[cfg(feature = "cache")]
pub mod cache;
pub mod client;
pub mod config;
pub mod database;
pub mod error;
pub mod payments;
pub mod services;
pub mod telemetry;
pub mod workers;

pub use error::{AppError, AppResult};
