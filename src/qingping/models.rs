use std::{collections::BTreeMap, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    db::models::{normalize_sensor_id, SensorReading},
    error::{Error, Result},
};

// ---------------------------------------------------------------------------
// Webhook push
//
// {
//   "signature": { "timestamp": 1700000000, "token": "…", "signature": "…" },
//   "payload": {
//     "info": { "mac": "CCB5D131C3D0", … },
//     "data": [ { "timestamp": {"value": 1700000000}, "pm25": {"value": 12}, … } ]
//   }
// }
// ---------------------------------------------------------------------------

/// A push as received. Only the signature block is read before the push is
/// authenticated; the payload stays raw until [`WebhookPush::payload`].
#[derive(Debug, Default)]
pub struct WebhookPush {
    pub signature: SignatureBlock,
    payload: Value,
}

impl WebhookPush {
    /// Never fails: a missing or malformed signature block is empty and so
    /// fails verification.
    pub fn from_value(mut body: Value) -> Self {
        let signature = body
            .get_mut("signature")
            .map(Value::take)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let payload = body.get_mut("payload").map(Value::take).unwrap_or_default();
        Self { signature, payload }
    }

    /// The typed payload. A missing payload is empty.
    pub fn payload(&self) -> Result<WebhookPayload> {
        if self.payload.is_null() {
            return Ok(WebhookPayload::default());
        }
        WebhookPayload::deserialize(&self.payload).map_err(|e| Error::validation(format!("Invalid payload: {e}")))
    }
}

/// Fields are kept raw; wrong types read as empty strings.
#[derive(Debug, Default, Deserialize)]
pub struct SignatureBlock {
    /// Seconds; pushed as a number, occasionally as a string.
    #[serde(default)]
    pub timestamp: Value,
    #[serde(default)]
    pub token: Value,
    #[serde(default)]
    pub signature: Value,
}

impl SignatureBlock {
    /// The timestamp as signed: its decimal string form, empty when absent.
    pub fn timestamp_string(&self) -> String {
        match &self.timestamp {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.trim().to_owned(),
            _ => String::new(),
        }
    }

    pub fn token(&self) -> &str {
        self.token.as_str().unwrap_or_default()
    }

    pub fn signature(&self) -> &str {
        self.signature.as_str().unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub info: PayloadInfo,
    /// One object per measurement instant; each metric is `{"value": n}`.
    #[serde(default)]
    pub data: Vec<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PayloadInfo {
    pub mac: Option<String>,
}

impl WebhookPayload {
    /// Normalized sensor id, `None` when the push carries no usable MAC.
    pub fn sensor_id(&self) -> Option<String> {
        self.info
            .mac
            .as_deref()
            .map(normalize_sensor_id)
            .filter(|id| !id.is_empty())
    }

    /// One reading per data entry. Entries without their own timestamp are
    /// stamped with `received_at`; non-numeric metrics are skipped.
    pub fn readings(&self, sensor_id: &str, received_at: i64) -> Vec<SensorReading> {
        self.data
            .iter()
            .map(|entry| {
                let timestamp = entry
                    .get("timestamp")
                    .and_then(metric_value)
                    .and_then(|v| v.trunc().to_string().parse::<i64>().ok())
                    .unwrap_or(received_at);

                let metric_values: BTreeMap<String, Decimal> = entry
                    .iter()
                    .filter(|(k, _)| k.as_str() != "timestamp")
                    .filter_map(|(k, v)| metric_value(v).map(|d| (k.clone(), d)))
                    .collect();

                SensorReading {
                    sensor_id: sensor_id.to_owned(),
                    timestamp,
                    metric_values,
                    received_at,
                }
            })
            .collect()
    }
}

/// `{"value": n}` or a bare number, as a decimal.
fn metric_value(v: &Value) -> Option<Decimal> {
    let v = match v {
        Value::Object(m) => m.get("value")?,
        other => other,
    };
    match v {
        Value::Number(n) => json_number_to_decimal(n),
        _ => None,
    }
}

pub(crate) fn json_number_to_decimal(n: &serde_json::Number) -> Option<Decimal> {
    let s = n.to_string();
    Decimal::from_str(&s)
        .or_else(|_| Decimal::from_scientific(&s))
        .ok()
}

// ---------------------------------------------------------------------------
// OAuth  —  POST /oauth2/token
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct OAuthTokenResponse {
    #[serde(default)]
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

// ---------------------------------------------------------------------------
// Devices  —  POST/GET /v1/apis/devices
// ---------------------------------------------------------------------------

/// Request body for binding a device to the app.
#[derive(Debug, Serialize)]
pub struct BindDeviceRequest<'a> {
    pub device_token: &'a str,
    pub product_id: i64,
    /// Milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DeviceInfo {
    pub mac: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub created_at: Option<i64>,
    /// Product descriptor (`id`, `name`, `en_name`, …) kept verbatim.
    #[serde(default)]
    pub product: Value,
}

#[derive(Debug, Deserialize)]
pub struct DeviceEnvelope {
    #[serde(default)]
    pub info: Option<DeviceInfo>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceListResponse {
    pub total: Option<i64>,
    #[serde(default)]
    pub devices: Vec<DeviceEnvelope>,
}

/// Result of a bind call: parsed `info` plus the raw response.
#[derive(Debug, Clone)]
pub struct BoundDevice {
    pub info: DeviceInfo,
    pub raw: Value,
}
