//! Push-payment provider integration
//!
//! `PaymentGateway` is the seam the checkout services call through. The
//! M-Pesa implementation talks to Daraja; the simulated one stays in-process.

pub mod providers;
pub mod traits;
pub mod types;

pub use traits::PaymentGateway;
