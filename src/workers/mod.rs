//! Background tasks

pub mod status_poller;

pub use status_poller::{PollHandle, PollOutcome, PollerConfig, StatusPoller, StatusSource};
