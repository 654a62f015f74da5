//! Sensor → plug mappings and the per-vendor device registries.

mod service;

use std::collections::HashSet;

use serde_json::Value;
use tracing::info;

use crate::{
    db::{models::{DeviceRegistryEntry, SensorPlugMapping}, Store},
    error::Result,
};

pub use service::{RegistryService, SyncSummary};

/// Outcome of comparing a vendor listing with the local registry.
#[derive(Debug, Default, PartialEq)]
pub struct Reconciliation {
    /// Remote devices missing locally.
    pub to_insert: Vec<DeviceRegistryEntry>,
    /// Local entries no longer present remotely.
    pub to_delete: Vec<DeviceRegistryEntry>,
}

/// Set difference by `device_id` in both directions. Entries present on both
/// sides are left alone, even if their fields differ.
pub fn reconcile(remote: Vec<DeviceRegistryEntry>, local: Vec<DeviceRegistryEntry>) -> Reconciliation {
    let remote_ids: HashSet<String> = remote.iter().map(|d| d.device_id.clone()).collect();
    let local_ids: HashSet<String> = local.iter().map(|d| d.device_id.clone()).collect();

    let mut seen = HashSet::new();
    let to_insert = remote
        .into_iter()
        .filter(|d| !local_ids.contains(&d.device_id))
        .filter(|d| seen.insert(d.device_id.clone()))
        .collect();
    let to_delete = local
        .into_iter()
        .filter(|d| !remote_ids.contains(&d.device_id))
        .collect();

    Reconciliation { to_insert, to_delete }
}

/// Insert or update a mapping, keeping the original `created_at`.
pub async fn upsert_mapping(
    store: &dyn Store,
    sensor_id: &str,
    plug_device_id: &str,
    enabled: bool,
    account_id: &str,
    now: i64,
) -> Result<SensorPlugMapping> {
    let created_at = store
        .get_mapping(sensor_id)
        .await?
        .map_or(now, |existing| existing.created_at);

    let mapping = SensorPlugMapping {
        sensor_id: sensor_id.to_owned(),
        plug_device_id: plug_device_id.to_owned(),
        enabled,
        account_id: account_id.to_owned(),
        created_at,
        updated_at: now.max(created_at),
    };
    store.put_mapping(&mapping).await?;
    info!(sensor_id, plug_device_id, enabled, "Mapping saved");

    Ok(mapping)
}

/// Lenient boolean: JSON bools, numbers (non-zero is true) and the usual
/// yes/no spellings. Anything else yields `default`.
pub fn normalize_bool(value: Option<&Value>, default: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map_or(default, |f| f != 0.0),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => true,
            "false" | "0" | "no" | "n" | "off" => false,
            _ => default,
        },
        _ => default,
    }
}
