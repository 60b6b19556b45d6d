//! Checkout services
//!
//! Initiation, callback and status query all funnel provider results through
//! `reconciliation`, which owns the pending-to-terminal transition.

pub mod callback;
pub mod initiation;
pub mod reconciliation;
pub mod status;
pub mod validation;

pub use callback::{CallbackAck, CallbackHandler};
pub use initiation::{InitiatePayment, Initiated, InitiationHandler};
pub use status::{StatusReport, StatusService};
