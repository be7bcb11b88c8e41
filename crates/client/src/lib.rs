pub mod controller;

pub use controller::{Controller, ExecuteOutcome, POLICY_PROBE_CODE};
