use serde::{Deserialize, Serialize};

use crate::error::Error;

// ---------------------------------------------------------------------------
// Generic response envelope
//
// Every Tuya Cloud API wraps its payload in the same outer object:
//
// Success:
//   { "success": true, "t": 1545447665981, "result": <T>, "tid": "..." }
//
// Failure:
//   { "success": false, "t": 1561348644346, "code": 1010, "msg": "token invalid", "tid": "..." }
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TuyaResponse<T> {
    pub success: bool,

    /// 13-digit Unix timestamp in milliseconds returned by the server.
    #[serde(default)]
    pub t: Option<i64>,

    /// Server-side request trace ID.
    pub tid: Option<String>,

    /// Present on success.
    pub result: Option<T>,

    /// Tuya error code, present on failure.
    pub code: Option<i64>,

    /// Human-readable error message, present on failure.
    pub msg: Option<String>,
}

/// Tuya error code for an expired or revoked access token.
pub const TOKEN_INVALID_CODE: i64 = 1010;

impl<T> TuyaResponse<T> {
    /// Map the envelope onto the error taxonomy: `success=false` is an
    /// upstream failure, a missing `result` on success likewise. A rejected
    /// access token is an `Auth` error.
    pub fn into_result(self) -> Result<T, Error> {
        if self.success {
            return self.result.ok_or_else(|| {
                Error::upstream(anyhow::anyhow!(
                    "Tuya response: success=true but result field is missing"
                ))
            });
        }
        let code = self.code.unwrap_or(-1);
        let msg = self.msg.as_deref().unwrap_or("(no message)");
        if code == TOKEN_INVALID_CODE {
            return Err(Error::Auth(format!("Tuya rejected access token: {msg}")));
        }
        Err(Error::upstream(anyhow::anyhow!("Tuya API error: code={code}, msg={msg}")))
    }
}

// ---------------------------------------------------------------------------
// DpValue
//
// DP values are polymorphic: booleans, integers, strings. Bool must come
// before Integer so `true`/`false` are never coerced.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DpValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl std::fmt::Display for DpValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DpValue::Bool(v) => write!(f, "{v}"),
            DpValue::Integer(v) => write!(f, "{v}"),
            DpValue::Text(v) => f.write_str(v),
        }
    }
}

// ---------------------------------------------------------------------------
// Token  —  GET /v1.0/token?grant_type=1
// ---------------------------------------------------------------------------

/// Reference: <https://developer.tuya.com/en/docs/cloud/6c1636a9bd?id=Ka7kjumkoa53v>
#[derive(Debug, Deserialize)]
pub struct TokenResult {
    #[serde(default)]
    pub access_token: String,

    /// Validity period in seconds (typically 7200).
    pub expire_time: Option<i64>,

    pub refresh_token: Option<String>,
    pub uid: Option<String>,
}

// ---------------------------------------------------------------------------
// Space devices  —  GET /v2.0/cloud/thing/space/device
// ---------------------------------------------------------------------------

/// One device of a space listing. Field casing differs between API
/// generations, hence the aliases.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SpaceDevice {
    pub id: String,
    pub name: Option<String>,
    #[serde(alias = "customName")]
    pub custom_name: Option<String>,
    pub category: Option<String>,
    #[serde(alias = "productName")]
    pub product_name: Option<String>,
    #[serde(alias = "isOnline")]
    pub is_online: Option<bool>,
}

impl SpaceDevice {
    /// User-assigned name when present, otherwise the product default.
    pub fn display_name(&self) -> Option<&str> {
        self.custom_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.name.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Report logs  —  GET /v2.0/cloud/thing/{device_id}/report-logs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReportLogsResult {
    #[serde(default)]
    pub logs: Vec<ReportLog>,
    #[serde(default)]
    pub has_more: bool,
    pub last_row_key: Option<String>,
}

/// A single reported DP change.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReportLog {
    pub code: Option<String>,
    pub value: Option<DpValue>,
    /// Unix timestamp in milliseconds.
    pub event_time: Option<i64>,
}

// ---------------------------------------------------------------------------
// Send commands  —  POST /v1.0/devices/{device_id}/commands
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SendCommandRequest {
    pub commands: Vec<Command>,
}

#[derive(Debug, Serialize)]
pub struct Command {
    /// DP code to target, e.g. `"switch_1"`.
    pub code: String,
    pub value: DpValue,
}
