use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use crate::{
    db::models::{DeviceRegistryEntry, SensorPlugMapping, Vendor},
    registry::SyncSummary,
    tuya::models::SpaceDevice,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn new(status: &str) -> Self {
        Self { status: status.to_owned() }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Always `"error"`.
    pub status: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Mappings
// ---------------------------------------------------------------------------

/// Body of `POST /mappings`. Booleans also accept `1`/`0`, `"yes"`/`"no"`,
/// `"on"`/`"off"` and similar spellings.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct MappingRequest {
    #[serde(alias = "sensor_mac")]
    pub sensor_id: Option<String>,
    #[serde(alias = "tuya_device_id")]
    pub plug_device_id: Option<String>,
    /// Defaults to `true`.
    #[schema(value_type = Option<bool>)]
    pub enabled: Option<Value>,
    /// Remove the mapping instead of saving it. Defaults to `false`.
    #[schema(value_type = Option<bool>)]
    pub delete: Option<Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MappingListResponse {
    pub status: String,
    pub account_id: String,
    pub count: usize,
    pub mappings: Vec<SensorPlugMapping>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MappingSavedResponse {
    pub status: String,
    pub mapping: SensorPlugMapping,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MappingDeletedResponse {
    pub status: String,
    pub message: String,
    pub sensor_id: String,
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// Body of `POST /qingping/devices`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct BindDeviceRequest {
    /// Pairing token shown by the Qingping app.
    #[serde(default)]
    pub device_token: String,
    /// Numeric product id; a numeric string is accepted too.
    #[schema(value_type = i64)]
    pub product_id: Option<Value>,
}

impl BindDeviceRequest {
    pub fn product_id(&self) -> Option<i64> {
        match self.product_id.as_ref()? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BindDeviceResponse {
    pub status: String,
    pub device: DeviceRegistryEntry,
    /// Vendor response, as received.
    #[schema(value_type = Object)]
    pub raw: Value,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeviceListResponse {
    pub status: String,
    pub account_id: String,
    pub count: usize,
    pub devices: Vec<DeviceRegistryEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SyncResponse {
    pub status: String,
    pub vendor: Vendor,
    pub summary: SyncSummary,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PlugDto {
    pub tuya_device_id: String,
    pub name: Option<String>,
    pub category: Option<String>,
    pub online: Option<bool>,
}

impl From<SpaceDevice> for PlugDto {
    fn from(d: SpaceDevice) -> Self {
        Self {
            name: d.display_name().map(str::to_owned),
            tuya_device_id: d.id,
            category: d.category,
            online: d.is_online,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PlugListResponse {
    pub status: String,
    pub count: usize,
    pub plugs: Vec<PlugDto>,
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExportParams {
    /// Sensor MAC, separators optional.
    #[serde(default, alias = "sensor_mac")]
    pub sensor_id: String,
    /// Epoch seconds, `YYYY-MM-DD` or ISO-8601.
    #[serde(default)]
    pub start_time: String,
    /// Epoch seconds, `YYYY-MM-DD` (whole day included) or ISO-8601.
    #[serde(default)]
    pub end_time: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn mapping_request_accepts_legacy_names() {
        let req: MappingRequest =
            serde_json::from_value(json!({"sensor_mac": "AA", "tuya_device_id": "p1", "enabled": "off"})).unwrap();
        assert_eq!(req.sensor_id.as_deref(), Some("AA"));
        assert_eq!(req.plug_device_id.as_deref(), Some("p1"));
        assert_eq!(req.enabled, Some(json!("off")));
    }

    #[test]
    fn bind_request_product_id_forms() {
        let num: BindDeviceRequest = serde_json::from_value(json!({"device_token": "t", "product_id": 1203})).unwrap();
        let text: BindDeviceRequest = serde_json::from_value(json!({"device_token": "t", "product_id": " 1203 "})).unwrap();
        let bad: BindDeviceRequest = serde_json::from_value(json!({"device_token": "t", "product_id": "x"})).unwrap();
        assert_eq!(num.product_id(), Some(1203));
        assert_eq!(text.product_id(), Some(1203));
        assert_eq!(bad.product_id(), None);
    }

    #[test]
    fn plug_dto_prefers_custom_name() {
        let d: SpaceDevice =
            serde_json::from_value(json!({"id": "p1", "name": "Plug", "customName": "Heater", "isOnline": false})).unwrap();
        let dto = PlugDto::from(d);
        assert_eq!(dto.name.as_deref(), Some("Heater"));
        assert_eq!(dto.online, Some(false));
    }
}
