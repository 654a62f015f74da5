mod service;

pub use service::{IngestSummary, SensorService};
