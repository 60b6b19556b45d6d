//! Payment gateway implementations

pub mod mpesa;
pub mod simulated;

pub use mpesa::{MpesaConfig, MpesaEnvironment, MpesaGateway};
pub use simulated::{ScriptedPush, ScriptedQuery, SimulatedGateway};
