mod service;

pub use service::{ControlOutcome, ControlService};
