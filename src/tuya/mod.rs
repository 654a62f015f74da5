pub mod models;
pub mod signing;

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::{
    config::Config,
    error::{Error, Result},
    pagination::{self, CursorPage},
    token_cache::{IssuedToken, TokenCache, TokenSource},
};

use self::{
    models::{
        Command, DpValue, ReportLog, ReportLogsResult, SendCommandRequest, SpaceDevice,
        TokenResult, TuyaResponse,
    },
    signing::{Credentials, Query},
};

/// Maximum `page_size` accepted by the space device listing.
pub const SPACE_DEVICES_PAGE_SIZE: usize = 20;
/// Page size used for report logs.
pub const REPORT_LOGS_PAGE_SIZE: usize = 100;

/// Plug-side operations the handlers depend on.
#[async_trait]
pub trait PlugCloud: Send + Sync {
    /// Switch the plug's relay on or off.
    async fn set_switch(&self, device_id: &str, on: bool) -> Result<()>;

    /// Every device of the configured space.
    async fn list_plugs(&self) -> Result<Vec<SpaceDevice>>;

    /// Switch DP changes of `device_id` between `start_ms` and `end_ms`.
    async fn switch_logs(&self, device_id: &str, start_ms: i64, end_ms: i64) -> Result<Vec<ReportLog>>;
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Signs and sends single requests. Also the Tuya `TokenSource`.
#[derive(Debug)]
pub struct TuyaTransport {
    http: Client,
    base_url: String,
    credentials: Option<Credentials>,
    config_error: Option<String>,
}

impl TuyaTransport {
    pub fn new(http: Client, base_url: &str, client_id: Option<&str>, secret: Option<&str>) -> Self {
        let (credentials, config_error) = match Credentials::from_parts(client_id, secret) {
            Ok(c) => (Some(c), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            credentials,
            config_error,
        }
    }

    fn credentials(&self) -> Result<&Credentials> {
        self.credentials.as_ref().ok_or_else(|| {
            Error::Config(
                self.config_error
                    .clone()
                    .unwrap_or_else(|| "missing Tuya credentials".to_owned()),
            )
        })
    }

    /// Send one signed request and unwrap the response envelope.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &Query,
        body: Option<&B>,
        access_token: Option<&str>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        // Credentials are checked before anything touches the network.
        let credentials = self.credentials()?;

        let body_bytes = match body {
            Some(b) => serde_json::to_vec(b).context("failed to serialize Tuya request body").map_err(Error::upstream)?,
            None => Vec::new(),
        };
        let path_with_query = signing::path_with_query(path, query);
        let url = format!("{}{}", self.base_url, path_with_query);
        debug!(method = %method, url = %url, "Tuya request");

        let headers = signing::build_signed_headers(
            credentials,
            method.as_str(),
            &path_with_query,
            &body_bytes,
            access_token,
        );

        let mut builder = self
            .http
            .request(method, &url)
            .headers(to_header_map(headers).map_err(Error::upstream)?);
        if body.is_some() {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body_bytes);
        }

        let resp = builder
            .send()
            .await
            .with_context(|| format!("Tuya request {path} failed"))
            .map_err(Error::upstream)?;
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .context("failed to read Tuya response body")
            .map_err(Error::upstream)?;

        if !status.is_success() {
            return Err(Error::upstream(anyhow::anyhow!(
                "Tuya {path} returned HTTP {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }

        serde_json::from_slice::<TuyaResponse<T>>(&bytes)
            .with_context(|| format!("failed to deserialize Tuya {path} response"))
            .map_err(Error::upstream)?
            .into_result()
    }
}

#[async_trait]
impl TokenSource for TuyaTransport {
    fn vendor(&self) -> &'static str {
        "tuya"
    }

    async fn exchange(&self) -> Result<IssuedToken> {
        let query = Query::new().param("grant_type", 1);
        let token = self
            .request::<TokenResult, ()>(Method::GET, "/v1.0/token", &query, None, None)
            .await
            .map_err(|e| match e {
                Error::Upstream(e) => Error::Auth(format!("{e:#}")),
                other => other,
            })?;

        Ok(IssuedToken {
            token: token.access_token,
            ttl_secs: token.expire_time,
        })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TuyaClient {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<TuyaTransport>,
    tokens: TokenCache<Arc<TuyaTransport>>,
    space_id: Option<String>,
    categories: Option<String>,
    switch_code: String,
}

impl TuyaClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.tuya_timeout_secs))
            .build()
            .context("failed to build Tuya HTTP client")?;
        let transport = Arc::new(TuyaTransport::new(
            http,
            &config.tuya_base_url,
            config.tuya_access_id.as_deref(),
            config.tuya_access_secret.as_deref(),
        ));

        Ok(Self {
            inner: Arc::new(Inner {
                tokens: TokenCache::new(transport.clone()),
                transport,
                space_id: config.tuya_space_id.clone(),
                categories: config.tuya_categories.clone(),
                switch_code: config.tuya_switch_code.clone(),
            }),
        })
    }

    async fn authed<T, B>(&self, method: Method, path: &str, query: &Query, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized + Sync,
    {
        // Fail on missing credentials before attempting the token exchange.
        self.inner.transport.credentials()?;
        let token = self.inner.tokens.get_token().await?;
        match self
            .inner
            .transport
            .request(method.clone(), path, query, body, Some(&token))
            .await
        {
            // Token revoked before its TTL ran out: refresh once and retry.
            Err(Error::Auth(msg)) => {
                warn!(path = %path, error = %msg, "Tuya rejected cached token; refreshing");
                self.inner.tokens.invalidate();
                let token = self.inner.tokens.get_token().await?;
                self.inner
                    .transport
                    .request(method, path, query, body, Some(&token))
                    .await
            }
            other => other,
        }
    }
}

#[async_trait]
impl PlugCloud for TuyaClient {
    async fn set_switch(&self, device_id: &str, on: bool) -> Result<()> {
        let path = format!("/v1.0/devices/{device_id}/commands");
        let body = SendCommandRequest {
            commands: vec![Command {
                code: self.inner.switch_code.clone(),
                value: DpValue::Bool(on),
            }],
        };
        debug!(device_id = %device_id, on, "Sending switch command");

        let accepted: bool = self
            .authed(Method::POST, &path, &Query::new(), Some(&body))
            .await?;
        if !accepted {
            return Err(Error::upstream(anyhow::anyhow!(
                "Tuya did not accept switch command for {device_id}"
            )));
        }
        Ok(())
    }

    async fn list_plugs(&self) -> Result<Vec<SpaceDevice>> {
        let space_id = self.inner.space_id.as_deref().ok_or_else(|| {
            Error::validation("Missing TUYA_SPACE_ID (set it to the space whose plugs are offered)")
        })?;
        let categories = self.inner.categories.as_deref();

        pagination::fetch_all_by_size(
            SPACE_DEVICES_PAGE_SIZE,
            |d: &SpaceDevice| Some(d.id.clone()),
            |req| async move {
                let query = Query::new()
                    .param("space_ids", space_id)
                    .param("page_size", req.page_size)
                    .opt_param("last_id", req.last_key)
                    .opt_param("categories", categories);
                self.authed::<Vec<SpaceDevice>, ()>(
                    Method::GET,
                    "/v2.0/cloud/thing/space/device",
                    &query,
                    None,
                )
                .await
            },
        )
        .await
    }

    async fn switch_logs(&self, device_id: &str, start_ms: i64, end_ms: i64) -> Result<Vec<ReportLog>> {
        let path = format!("/v2.0/cloud/thing/{device_id}/report-logs");
        let path = path.as_str();
        let code = self.inner.switch_code.as_str();

        pagination::fetch_all_by_cursor(|cursor| async move {
            let query = Query::new()
                .param("codes", code)
                .param("start_time", start_ms)
                .param("end_time", end_ms)
                .param("size", REPORT_LOGS_PAGE_SIZE)
                .opt_param("last_row_key", cursor);
            let result: ReportLogsResult = self
                .authed::<ReportLogsResult, ()>(Method::GET, path, &query, None)
                .await?;
            Ok::<_, Error>(CursorPage {
                items: result.logs,
                has_more: result.has_more,
                cursor: result.last_row_key,
            })
        })
        .await
    }
}

/// Convert our string `HashMap` into a `reqwest::header::HeaderMap`.
fn to_header_map(map: HashMap<String, String>) -> anyhow::Result<reqwest::header::HeaderMap> {
    let mut header_map = reqwest::header::HeaderMap::new();
    for (k, v) in map {
        let name = reqwest::header::HeaderName::from_bytes(k.as_bytes())
            .with_context(|| format!("invalid header name: {k}"))?;
        let value = reqwest::header::HeaderValue::from_str(&v)
            .with_context(|| format!("invalid header value for {k}"))?;
        header_map.insert(name, value);
    }
    Ok(header_map)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use axum::{
        http::HeaderMap,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;

    use super::*;

    #[test]
    fn to_header_map_converts_correctly() {
        let mut map = HashMap::new();
        map.insert("client_id".to_owned(), "abc".to_owned());
        map.insert("sign".to_owned(), "DEF123".to_owned());

        let hm = to_header_map(map).expect("should convert");
        assert_eq!(hm["client_id"], "abc");
        assert_eq!(hm["sign"], "DEF123");
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_network() {
        // Unroutable base URL: reaching the network would surface as Upstream.
        let transport = TuyaTransport::new(Client::new(), "http://127.0.0.1:9", None, None);
        let err = transport
            .request::<bool, ()>(Method::GET, "/v1.0/token", &Query::new(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");

        let err = transport.exchange().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    /// Local stand-in for the Tuya cloud. Tokens are `tok-<n>` by exchange
    /// count; commands signed with `tok-1` are answered with code 1010.
    async fn fake_tuya(revoke_all: bool) -> (Config, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
        let exchanges = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let token_calls = exchanges.clone();
        let command_tokens = seen.clone();
        let app = Router::new()
            .route(
                "/v1.0/token",
                get(move || {
                    let n = token_calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        Json(json!({"success": true, "result": {"access_token": format!("tok-{n}"), "expire_time": 7200}}))
                    }
                }),
            )
            .route(
                "/v1.0/devices/{device_id}/commands",
                post(move |headers: HeaderMap| {
                    let token = headers
                        .get("access_token")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_owned();
                    command_tokens.lock().unwrap().push(token.clone());
                    async move {
                        if revoke_all || token == "tok-1" {
                            Json(json!({"success": false, "code": 1010, "msg": "token invalid"}))
                        } else {
                            Json(json!({"success": true, "result": true}))
                        }
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let config = Config {
            tuya_access_id: Some("id".into()),
            tuya_access_secret: Some("secret".into()),
            tuya_base_url: format!("http://{addr}"),
            ..Config::default()
        };
        (config, exchanges, seen)
    }

    #[tokio::test]
    async fn revoked_token_is_refreshed_once_and_retried() {
        let (config, exchanges, seen) = fake_tuya(false).await;
        let client = TuyaClient::new(&config).unwrap();

        client.set_switch("plug-1", true).await.unwrap();
        assert_eq!(exchanges.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["tok-1".to_owned(), "tok-2".to_owned()]);

        // The refreshed token stays cached.
        client.set_switch("plug-1", false).await.unwrap();
        assert_eq!(exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_rejection_is_returned() {
        let (config, exchanges, seen) = fake_tuya(true).await;
        let client = TuyaClient::new(&config).unwrap();

        let err = client.set_switch("plug-1", true).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)), "{err}");
        assert_eq!(exchanges.load(Ordering::SeqCst), 2);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let t = TuyaTransport::new(Client::new(), "https://openapi.tuyaus.com/", Some("id"), Some("s"));
        assert_eq!(t.base_url, "https://openapi.tuyaus.com");
    }
}
