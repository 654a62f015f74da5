use std::{collections::BTreeMap, fmt, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Normalize a sensor MAC into its stored form: no `:`/`-` separators,
/// uppercase, surrounding whitespace removed (`cc:b5:d1:31:c3:d0` → `CCB5D131C3D0`).
pub fn normalize_sensor_id(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-'))
        .collect::<String>()
        .to_uppercase()
}

/// A single pushed measurement set. Append-only: never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: String,
    /// Measurement time, Unix seconds. Sort key within a sensor.
    pub timestamp: i64,
    pub metric_values: BTreeMap<String, Decimal>,
    /// When the webhook carrying this reading arrived, Unix seconds.
    pub received_at: i64,
}

/// Which plug a sensor drives. One row per sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SensorPlugMapping {
    pub sensor_id: String,
    pub plug_device_id: String,
    pub enabled: bool,
    pub account_id: String,
    /// Unix seconds; preserved across upserts.
    pub created_at: i64,
    /// Unix seconds; refreshed on every upsert. Never earlier than `created_at`.
    pub updated_at: i64,
}

/// Vendor owning a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Qingping,
    Tuya,
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Vendor::Qingping => "qingping",
            Vendor::Tuya => "tuya",
        })
    }
}

impl FromStr for Vendor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "qingping" => Ok(Self::Qingping),
            "tuya" => Ok(Self::Tuya),
            other => Err(anyhow::anyhow!("unknown vendor: {other:?}")),
        }
    }
}

/// A device known to belong to an account, mirrored from the vendor cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeviceRegistryEntry {
    pub vendor: Vendor,
    /// Sensor MAC for Qingping, device id for Tuya.
    pub device_id: String,
    pub account_id: String,
    pub display_name: Option<String>,
    /// Vendor product/category description, stored as received.
    #[schema(value_type = Object)]
    pub product_info: serde_json::Value,
    pub enabled: bool,
    /// Unix seconds.
    pub bound_at: i64,
}
