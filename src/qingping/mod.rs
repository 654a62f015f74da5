pub mod models;
pub mod signature;

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::{
    config::Config,
    error::{Error, Result},
    pagination::{self, SizedPageRequest},
    token_cache::{IssuedToken, TokenCache, TokenSource},
};

use self::models::{
    BindDeviceRequest, BoundDevice, DeviceEnvelope, DeviceInfo, DeviceListResponse,
    OAuthTokenResponse,
};

/// Page size used when listing bound devices.
pub const DEVICE_LIST_PAGE_SIZE: usize = 50;

/// Sensor-side operations the handlers depend on.
#[async_trait]
pub trait SensorCloud: Send + Sync {
    /// Bind a device to the app using the token shown in the Qingping app.
    async fn bind_device(&self, device_token: &str, product_id: i64) -> Result<BoundDevice>;

    /// Every device currently bound to the app.
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>>;
}

// ---------------------------------------------------------------------------
// OAuth
// ---------------------------------------------------------------------------

/// Client-credentials exchange against the Qingping OAuth server.
#[derive(Debug)]
pub struct QingpingOAuth {
    http: Client,
    oauth_url: String,
    app_key: Option<String>,
    app_secret: Option<String>,
}

impl QingpingOAuth {
    pub fn new(http: Client, oauth_url: &str, app_key: Option<&str>, app_secret: Option<&str>) -> Self {
        Self {
            http,
            oauth_url: oauth_url.trim_end_matches('/').to_owned(),
            app_key: app_key.map(str::to_owned),
            app_secret: app_secret.map(str::to_owned),
        }
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        match (self.app_key.as_deref(), self.app_secret.as_deref()) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => Ok((key, secret)),
            _ => Err(Error::Config(
                "missing QINGPING_APP_KEY or QINGPING_APP_SECRET".to_owned(),
            )),
        }
    }
}

#[async_trait]
impl TokenSource for QingpingOAuth {
    fn vendor(&self) -> &'static str {
        "qingping"
    }

    async fn exchange(&self) -> Result<IssuedToken> {
        let (key, secret) = self.credentials()?;
        let url = format!("{}/oauth2/token", self.oauth_url);

        let resp = self
            .http
            .post(&url)
            .basic_auth(key, Some(secret))
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body("grant_type=client_credentials&scope=device_full_access")
            .send()
            .await
            .map_err(|e| Error::Auth(format!("Qingping token request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "Qingping token endpoint returned HTTP {status}: {body}"
            )));
        }

        let token: OAuthTokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::Auth(format!("malformed Qingping token response: {e}")))?;

        Ok(IssuedToken {
            token: token.access_token,
            ttl_secs: token.expires_in,
        })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct QingpingClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    api_url: String,
    tokens: TokenCache<QingpingOAuth>,
}

impl QingpingClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.qingping_timeout_secs))
            .build()
            .context("failed to build Qingping HTTP client")?;
        let oauth = QingpingOAuth::new(
            http.clone(),
            &config.qingping_oauth_url,
            config.qingping_app_key.as_deref(),
            config.qingping_app_secret.as_deref(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                api_url: config.qingping_api_url.trim_end_matches('/').to_owned(),
                tokens: TokenCache::new(oauth),
            }),
        })
    }

    /// Attach a fresh bearer token and send. Non-2xx answers are upstream errors.
    async fn send<T: DeserializeOwned>(&self, what: &str, builder: RequestBuilder) -> Result<T> {
        self.inner.tokens.source().credentials()?;
        let token = self.inner.tokens.get_token().await?;

        let resp = builder
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Qingping {what} request failed"))
            .map_err(Error::upstream)?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .with_context(|| format!("failed to read Qingping {what} response"))
            .map_err(Error::upstream)?;

        if !status.is_success() {
            return Err(Error::upstream(anyhow::anyhow!(
                "Qingping {what} returned HTTP {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }

        serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to deserialize Qingping {what} response"))
            .map_err(Error::upstream)
    }

    fn devices_url(&self) -> String {
        format!("{}/v1/apis/devices", self.inner.api_url)
    }
}

#[async_trait]
impl SensorCloud for QingpingClient {
    async fn bind_device(&self, device_token: &str, product_id: i64) -> Result<BoundDevice> {
        let body = BindDeviceRequest {
            device_token,
            product_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        debug!(product_id, "Binding Qingping device");

        let raw: Value = self
            .send("bind", self.inner.http.post(self.devices_url()).json(&body))
            .await?;
        let info = bound_info(&raw)?;

        Ok(BoundDevice { info, raw })
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let url = self.devices_url();
        let url = url.as_str();

        let envelopes = pagination::fetch_all_by_size(
            DEVICE_LIST_PAGE_SIZE,
            |_: &DeviceEnvelope| None,
            |req: SizedPageRequest| async move {
                let page_url = format!(
                    "{url}?offset={}&limit={}&timestamp={}",
                    req.offset,
                    req.page_size,
                    chrono::Utc::now().timestamp_millis()
                );
                let page: DeviceListResponse = self
                    .send("device list", self.inner.http.get(page_url))
                    .await?;
                Ok::<_, Error>(page.devices)
            },
        )
        .await?;

        Ok(envelopes.into_iter().filter_map(|d| d.info).collect())
    }
}

/// `info` of a bind response, which must carry the device MAC.
fn bound_info(raw: &Value) -> Result<DeviceInfo> {
    let info = raw
        .get("info")
        .cloned()
        .map(serde_json::from_value::<DeviceInfo>)
        .transpose()
        .context("malformed Qingping bind response")
        .map_err(Error::upstream)?
        .unwrap_or_default();

    if info.mac.as_deref().map_or(true, str::is_empty) {
        return Err(Error::upstream(anyhow::anyhow!(
            "Qingping bind response is missing info.mac"
        )));
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn missing_app_credentials_is_config_error() {
        let oauth = QingpingOAuth::new(Client::new(), "http://127.0.0.1:9", Some("key"), None);
        let err = oauth.exchange().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    #[test]
    fn bound_info_requires_mac() {
        let info = bound_info(&json!({"info": {"mac": "AABBCC", "name": "Office"}})).unwrap();
        assert_eq!(info.name.as_deref(), Some("Office"));

        for raw in [json!({}), json!({"info": {"name": "x"}}), json!({"info": {"mac": ""}})] {
            let err = bound_info(&raw).unwrap_err();
            assert!(matches!(err, Error::Upstream(_)), "{raw}");
        }
    }

    #[test]
    fn oauth_url_is_trimmed() {
        let oauth = QingpingOAuth::new(Client::new(), "https://oauth.cleargrass.com/", None, None);
        assert_eq!(oauth.oauth_url, "https://oauth.cleargrass.com");
    }
}
