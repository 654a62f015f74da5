use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::info;

use crate::error::{Error, Result};

/// Seconds shaved off the vendor-declared lifetime so a token is never used
/// right at its expiry.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// A freshly issued vendor token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    /// Lifetime declared by the vendor. `None` when the response omitted it.
    pub ttl_secs: Option<i64>,
}

/// Vendor-specific credential exchange (one implementation per vendor).
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Short vendor name used in logs and error messages.
    fn vendor(&self) -> &'static str;

    async fn exchange(&self) -> Result<IssuedToken>;
}

#[async_trait]
impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    fn vendor(&self) -> &'static str {
        (**self).vendor()
    }

    async fn exchange(&self) -> Result<IssuedToken> {
        (**self).exchange().await
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    /// Unix timestamp (seconds) after which the token is no longer handed out.
    expires_at: i64,
}

/// Process-lifetime cache of a single vendor access token.
///
/// The lock is only held to read or replace the slot, never across the
/// exchange. Two callers that miss at the same time both fetch a token and the
/// last one stored wins; an occasional extra exchange is accepted.
pub struct TokenCache<S> {
    source: S,
    slot: RwLock<Option<CachedToken>>,
}

impl<S: TokenSource> TokenCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            slot: RwLock::new(None),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns a valid access token, exchanging credentials if necessary.
    pub async fn get_token(&self) -> Result<String> {
        self.get_token_at(chrono::Utc::now().timestamp()).await
    }

    pub(crate) async fn get_token_at(&self, now: i64) -> Result<String> {
        if let Some(token) = self.cached(now) {
            return Ok(token);
        }

        info!(vendor = self.source.vendor(), "Fetching new access token");
        let issued = self.source.exchange().await?;

        if issued.token.is_empty() {
            return Err(Error::Auth(format!(
                "{} token response did not contain a token",
                self.source.vendor()
            )));
        }
        let ttl = match issued.ttl_secs {
            Some(ttl) if ttl > 0 => ttl,
            other => {
                return Err(Error::Auth(format!(
                    "{} token response has invalid lifetime: {other:?}",
                    self.source.vendor()
                )))
            }
        };

        let cached = CachedToken {
            token: issued.token,
            expires_at: now + ttl - EXPIRY_MARGIN_SECS,
        };
        let token = cached.token.clone();
        // Poisoning is ignored: the slot is only ever replaced wholesale.
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = Some(cached);

        Ok(token)
    }

    fn cached(&self, now: i64) -> Option<String> {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        slot.as_ref()
            .filter(|c| now < c.expires_at)
            .map(|c| c.token.clone())
    }

    /// Drop the cached token so the next call exchanges again.
    pub fn invalidate(&self) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use super::*;

    /// Scripted `TokenSource` that counts exchanges.
    pub(crate) struct FakeSource {
        pub calls: AtomicUsize,
        responses: Mutex<Vec<Result<IssuedToken>>>,
    }

    impl FakeSource {
        pub(crate) fn new(responses: Vec<Result<IssuedToken>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                responses: Mutex::new(responses.into_iter().rev().collect()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenSource for FakeSource {
        fn vendor(&self) -> &'static str {
            "fake"
        }

        async fn exchange(&self) -> Result<IssuedToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(Error::Auth("no scripted response left".into())))
        }
    }

    pub(crate) fn issued(token: &str, ttl: i64) -> Result<IssuedToken> {
        Ok(IssuedToken { token: token.to_owned(), ttl_secs: Some(ttl) })
    }

    #[tokio::test]
    async fn second_call_within_ttl_hits_cache() {
        let cache = TokenCache::new(FakeSource::new(vec![issued("tok-1", 7200)]));

        let first = cache.get_token_at(1_000).await.unwrap();
        let second = cache.get_token_at(1_000 + 7200 - 61).await.unwrap();

        assert_eq!(first, "tok-1");
        assert_eq!(second, "tok-1");
        assert_eq!(cache.source().calls(), 1);
    }

    #[tokio::test]
    async fn call_at_margin_refreshes_exactly_once() {
        let cache = TokenCache::new(FakeSource::new(vec![
            issued("tok-1", 7200),
            issued("tok-2", 7200),
        ]));

        cache.get_token_at(1_000).await.unwrap();
        // expires_at = 1000 + 7200 - 60
        let refreshed = cache.get_token_at(1_000 + 7200 - 60).await.unwrap();
        let again = cache.get_token_at(1_000 + 7200 - 59).await.unwrap();

        assert_eq!(refreshed, "tok-2");
        assert_eq!(again, "tok-2");
        assert_eq!(cache.source().calls(), 2);
    }

    #[tokio::test]
    async fn non_positive_ttl_is_rejected_and_not_cached() {
        let cache = TokenCache::new(FakeSource::new(vec![
            issued("tok-1", 0),
            Ok(IssuedToken { token: "tok-2".into(), ttl_secs: None }),
            issued("tok-3", -5),
        ]));

        for _ in 0..3 {
            let err = cache.get_token_at(1_000).await.unwrap_err();
            assert!(matches!(err, Error::Auth(_)), "{err}");
        }
        assert_eq!(cache.source().calls(), 3);
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let cache = TokenCache::new(FakeSource::new(vec![issued("", 7200)]));
        let err = cache.get_token_at(0).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn exchange_failure_propagates() {
        let cache = TokenCache::new(FakeSource::new(vec![Err(Error::Auth("denied".into()))]));
        let err = cache.get_token_at(0).await.unwrap_err();
        assert!(err.to_string().contains("denied"));
    }

    #[tokio::test]
    async fn invalidate_forces_new_exchange() {
        let cache = TokenCache::new(FakeSource::new(vec![
            issued("tok-1", 7200),
            issued("tok-2", 7200),
        ]));
        cache.get_token_at(0).await.unwrap();
        cache.invalidate();
        assert_eq!(cache.get_token_at(1).await.unwrap(), "tok-2");
        assert_eq!(cache.source().calls(), 2);
    }

    #[tokio::test]
    async fn arc_source_delegates() {
        let source = Arc::new(FakeSource::new(vec![issued("shared", 100)]));
        let cache = TokenCache::new(source.clone());
        assert_eq!(cache.get_token_at(0).await.unwrap(), "shared");
        assert_eq!(source.calls(), 1);
    }
}
