//! Request bodies arrive either as plain JSON or wrapped in a gateway
//! envelope (`{"body": "<json>", "isBase64Encoded": bool}`). Both are resolved
//! here, once, before any handler logic runs.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, PartialEq)]
pub enum Inbound {
    /// The request body is the payload.
    Direct(Value),
    /// Gateway envelope carrying the payload as a string.
    Gateway { body: String, base64: bool },
}

impl Inbound {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::Direct(Value::Object(Default::default())));
        }
        let value: Value = serde_json::from_slice(bytes).map_err(|e| Error::validation(format!("Invalid JSON body: {e}")))?;

        let Value::Object(map) = &value else {
            return Ok(Self::Direct(value));
        };
        match map.get("body") {
            Some(Value::String(body)) => Ok(Self::Gateway {
                body: body.clone(),
                base64: map
                    .get("isBase64Encoded")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            Some(Value::Object(inner)) => Ok(Self::Direct(Value::Object(inner.clone()))),
            _ => Ok(Self::Direct(value)),
        }
    }

    /// The payload as JSON. An empty gateway body is an empty object.
    pub fn into_json(self) -> Result<Value> {
        match self {
            Self::Direct(value) => Ok(value),
            Self::Gateway { body, base64 } => {
                let raw = if base64 {
                    let bytes = STANDARD
                        .decode(body.trim())
                        .map_err(|e| Error::validation(format!("Invalid base64 body: {e}")))?;
                    String::from_utf8(bytes).map_err(|_| Error::validation("Body is not valid UTF-8"))?
                } else {
                    body
                };
                if raw.trim().is_empty() {
                    return Ok(Value::Object(Default::default()));
                }
                serde_json::from_str(&raw).map_err(|e| Error::validation(format!("Invalid JSON body: {e}")))
            }
        }
    }
}

/// Resolve the inbound shape to the payload JSON, untyped.
pub fn payload(bytes: &[u8]) -> Result<Value> {
    Inbound::parse(bytes)?.into_json()
}

/// Resolve the inbound shape and deserialize the payload.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let value = payload(bytes)?;
    serde_json::from_value(value).map_err(|e| Error::validation(format!("Invalid request body: {e}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn direct_json_passes_through() {
        let v = json!({"sensor_mac": "AA", "tuya_device_id": "p1"});
        let parsed = Inbound::parse(v.to_string().as_bytes()).unwrap();
        assert_eq!(parsed, Inbound::Direct(v.clone()));
        assert_eq!(parsed.into_json().unwrap(), v);
    }

    #[test]
    fn gateway_string_body_is_unwrapped() {
        let envelope = json!({"body": "{\"a\":1}", "isBase64Encoded": false});
        let v: Value = decode(envelope.to_string().as_bytes()).unwrap();
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn gateway_base64_body_is_decoded() {
        let envelope = json!({"body": STANDARD.encode(b"{\"a\":2}"), "isBase64Encoded": true});
        let v: Value = decode(envelope.to_string().as_bytes()).unwrap();
        assert_eq!(v, json!({"a": 2}));
    }

    #[test]
    fn gateway_object_body_is_used_directly() {
        let envelope = json!({"body": {"a": 3}});
        let v: Value = decode(envelope.to_string().as_bytes()).unwrap();
        assert_eq!(v, json!({"a": 3}));
    }

    #[test]
    fn empty_bodies_are_empty_objects() {
        assert_eq!(decode::<Value>(b"").unwrap(), json!({}));
        assert_eq!(decode::<Value>(br#"{"body": ""}"#).unwrap(), json!({}));
    }

    #[test]
    fn malformed_input_is_validation_error() {
        for bad in [&b"{not json"[..], br#"{"body": "{oops"}"#, br#"{"body": "@@@", "isBase64Encoded": true}"#] {
            let err = decode::<Value>(bad).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{}", String::from_utf8_lossy(bad));
        }
    }
}
