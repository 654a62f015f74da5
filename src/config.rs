use std::{collections::BTreeMap, str::FromStr};

use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Plug rule
// ---------------------------------------------------------------------------

/// How the latest metric value is compared against the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `value > threshold`
    Above,
    /// `value >= threshold`
    AtLeast,
}

impl FromStr for Comparison {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gt" | ">" => Ok(Self::Above),
            "gte" | ">=" => Ok(Self::AtLeast),
            other => Err(anyhow!("unknown comparison: {other:?}")),
        }
    }
}

/// Threshold rule deciding whether a mapped plug is switched on.
///
/// The plug is switched on when the rule matches and off otherwise. Readings
/// that do not carry `metric` leave the plug untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlugRule {
    pub metric: String,
    pub threshold: Decimal,
    pub comparison: Comparison,
}

impl PlugRule {
    /// `Some(true)` → switch on, `Some(false)` → switch off, `None` → metric absent.
    pub fn evaluate(&self, metric_values: &BTreeMap<String, Decimal>) -> Option<bool> {
        let value = metric_values.get(&self.metric)?;
        Some(match self.comparison {
            Comparison::Above => *value > self.threshold,
            Comparison::AtLeast => *value >= self.threshold,
        })
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. The in-memory store is used when unset.
    pub database_url: Option<String>,
    pub server_host: String,
    pub server_port: u16,

    pub qingping_app_key: Option<String>,
    pub qingping_app_secret: Option<String>,
    /// Secret used to verify webhook signatures. Falls back to the app secret.
    pub qingping_webhook_secret: Option<String>,
    pub qingping_oauth_url: String,
    pub qingping_api_url: String,
    pub qingping_timeout_secs: u64,

    pub tuya_access_id: Option<String>,
    pub tuya_access_secret: Option<String>,
    pub tuya_base_url: String,
    /// Space whose devices are offered as plugs.
    pub tuya_space_id: Option<String>,
    /// Optional comma-separated category filter for the space listing.
    pub tuya_categories: Option<String>,
    /// DP code toggled on the plug, e.g. `switch_1`.
    pub tuya_switch_code: String,
    pub tuya_timeout_secs: u64,

    /// Account every mapping and bound device is filed under until the
    /// frontend carries its own identity.
    pub shared_account_id: String,
    /// Zone used to interpret date-only and naive export bounds.
    pub local_tz: Tz,
    pub plug_rule: PlugRule,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let qingping_app_secret = optional_nonempty("QINGPING_APP_SECRET");

        Ok(Self {
            database_url: optional_nonempty("DATABASE_URL"),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,

            qingping_app_key: optional_nonempty("QINGPING_APP_KEY"),
            qingping_webhook_secret: optional_nonempty("QINGPING_WEBHOOK_SECRET")
                .or_else(|| qingping_app_secret.clone()),
            qingping_app_secret,
            qingping_oauth_url: optional("QINGPING_OAUTH_URL", "https://oauth.cleargrass.com"),
            qingping_api_url: optional("QINGPING_API_URL", "https://apis.cleargrass.com"),
            qingping_timeout_secs: optional("QINGPING_TIMEOUT_SECS", "10")
                .parse()
                .context("QINGPING_TIMEOUT_SECS must be a positive integer")?,

            tuya_access_id: optional_nonempty("TUYA_ACCESS_ID"),
            tuya_access_secret: optional_nonempty("TUYA_ACCESS_SECRET"),
            tuya_base_url: optional("TUYA_BASE_URL", "https://openapi.tuyaus.com"),
            tuya_space_id: optional_nonempty("TUYA_SPACE_ID"),
            tuya_categories: optional_nonempty("TUYA_CATEGORIES"),
            tuya_switch_code: optional("TUYA_SWITCH_CODE", "switch_1"),
            tuya_timeout_secs: optional("TUYA_TIMEOUT_SECS", "15")
                .parse()
                .context("TUYA_TIMEOUT_SECS must be a positive integer")?,

            shared_account_id: optional("SHARED_ACCOUNT_ID", "qingping_shared"),
            local_tz: parse_tz(&optional("LOCAL_TZ", "America/New_York"))?,
            plug_rule: PlugRule {
                metric: optional("PLUG_RULE_METRIC", "pm25"),
                threshold: optional("PLUG_RULE_THRESHOLD", "10")
                    .parse()
                    .context("PLUG_RULE_THRESHOLD must be a decimal number")?,
                comparison: optional("PLUG_RULE_COMPARISON", "gt")
                    .parse()
                    .context("PLUG_RULE_COMPARISON must be one of gt, gte")?,
            },
        })
    }
}

impl Default for Config {
    /// Values `from_env` falls back to, with no vendor credentials.
    fn default() -> Self {
        Self {
            database_url: None,
            server_host: "0.0.0.0".to_owned(),
            server_port: 8080,
            qingping_app_key: None,
            qingping_app_secret: None,
            qingping_webhook_secret: None,
            qingping_oauth_url: "https://oauth.cleargrass.com".to_owned(),
            qingping_api_url: "https://apis.cleargrass.com".to_owned(),
            qingping_timeout_secs: 10,
            tuya_access_id: None,
            tuya_access_secret: None,
            tuya_base_url: "https://openapi.tuyaus.com".to_owned(),
            tuya_space_id: None,
            tuya_categories: None,
            tuya_switch_code: "switch_1".to_owned(),
            tuya_timeout_secs: 15,
            shared_account_id: "qingping_shared".to_owned(),
            local_tz: chrono_tz::America::New_York,
            plug_rule: PlugRule {
                metric: "pm25".to_owned(),
                threshold: Decimal::from(10),
                comparison: Comparison::Above,
            },
        }
    }
}

fn parse_tz(raw: &str) -> Result<Tz> {
    raw.parse::<Tz>()
        .map_err(|e| anyhow!("invalid LOCAL_TZ {raw:?}: {e}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key)
        .map(|v| v.trim().to_owned())
        .unwrap_or_else(|_| default.to_owned())
}

fn optional_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}
