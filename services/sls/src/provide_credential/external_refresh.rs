use super::utils::{fetch_with_retry, DEFAULT_FETCH_ATTEMPTS};
use crate::Credential;
use async_trait::async_trait;
use chrono::TimeDelta;
use log::{debug, warn};
use slsreq_core::time::{format_rfc3339, now, DateTime};
use slsreq_core::{Context, Error, ProvideCredential, Result};
use std::fmt::{self, Debug};
use std::future::ready;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Refresh a credential this long before it expires.
pub const DEFAULT_REFRESH_ADVANCE: Duration = Duration::from_secs(10 * 60);

/// RefreshCredential is what a refresh callback hands back.
#[derive(Clone, Debug)]
pub struct RefreshCredential {
    /// The new credential.
    pub credential: Credential,
    /// When the new credential expires.
    pub expiration: DateTime,
}

type RefreshFn = dyn Fn() -> anyhow::Result<RefreshCredential> + Send + Sync;

/// ExternalRefreshCredentialProvider caches the credential returned by a
/// user supplied callback, typically one that talks to an STS service.
///
/// The cached credential is served until it gets within the refresh advance
/// of its expiration. A refresh calls the callback up to three times. When
/// all attempts fail, a cached credential that hasn't expired yet is still
/// served with a warning, an expired one is an error.
pub struct ExternalRefreshCredentialProvider {
    refresh: Arc<RefreshFn>,
    advance: Duration,
    max_attempts: usize,
    cache: RwLock<Option<RefreshCredential>>,
}

impl Debug for ExternalRefreshCredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalRefreshCredentialProvider")
            .field("advance", &self.advance)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl ExternalRefreshCredentialProvider {
    /// Create a new provider around `refresh`.
    pub fn new(
        refresh: impl Fn() -> anyhow::Result<RefreshCredential> + Send + Sync + 'static,
    ) -> Self {
        Self {
            refresh: Arc::new(refresh),
            advance: DEFAULT_REFRESH_ADVANCE,
            max_attempts: DEFAULT_FETCH_ATTEMPTS,
            cache: RwLock::new(None),
        }
    }

    /// Set how long before expiration a refresh happens.
    pub fn with_advance(mut self, advance: Duration) -> Self {
        self.advance = advance;
        self
    }

    /// Set how many times the callback is tried per refresh.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    fn refresh_once(&self) -> Result<RefreshCredential> {
        let v = (self.refresh)().map_err(|e| {
            let msg = format!("refresh callback failed: {e}");
            Error::unexpected(msg).with_source(e)
        })?;

        if v.credential.access_key_id.is_empty()
            || v.credential.access_key_secret.is_empty()
            || v.expiration.timestamp_millis() <= 0
        {
            return Err(Error::credential_invalid(format!(
                "refresh callback returned an invalid credential, expiration: {}",
                format_rfc3339(v.expiration)
            )));
        }
        Ok(v)
    }
}

#[async_trait]
impl ProvideCredential for ExternalRefreshCredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, _: &Context) -> Result<Option<Self::Credential>> {
        let cached = self.cache.read().expect("lock poisoned").clone();
        let now = now();
        let advance = TimeDelta::from_std(self.advance).map_err(|e| {
            Error::config_invalid("refresh advance is out of range").with_source(e)
        })?;

        if let Some(cached) = &cached {
            if cached.expiration - now > advance {
                return Ok(Some(cached.credential.clone()));
            }
        }

        debug!("refreshing credential with external callback");
        let result = fetch_with_retry(
            "refresh credential with external callback",
            self.max_attempts,
            || ready(self.refresh_once()),
        )
        .await;

        match (result, cached) {
            (Ok(v), _) => {
                debug!(
                    "refreshed credential with external callback, expiration: {}",
                    format_rfc3339(v.expiration)
                );
                let cred = v.credential.clone();
                *self.cache.write().expect("lock poisoned") = Some(v);
                Ok(Some(cred))
            }
            (Err(err), None) => Err(err),
            (Err(err), Some(cached)) if now < cached.expiration => {
                warn!(
                    "refresh credential failed, keep using the cached one that expires at {}: {err}",
                    format_rfc3339(cached.expiration)
                );
                Ok(Some(cached.credential))
            }
            (Err(err), Some(cached)) => Err(Error::credential_expired(format!(
                "cached credential expired at {} and refresh failed",
                format_rfc3339(cached.expiration)
            ))
            .with_context(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slsreq_core::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use test_case::test_case;

    /// A callback failing `failures` times before it succeeds, then returning
    /// credentials expiring `lifetime` from now.
    fn flaky_refresh(
        failures: usize,
        lifetime: TimeDelta,
    ) -> (
        Arc<AtomicUsize>,
        impl Fn() -> anyhow::Result<RefreshCredential> + Send + Sync + 'static,
    ) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let refresh = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                anyhow::bail!("sts unavailable, attempt {n}");
            }
            Ok(RefreshCredential {
                credential: Credential::new("access_key_id", "access_key_secret")
                    .with_security_token("token"),
                expiration: now() + lifetime,
            })
        };
        (calls, refresh)
    }

    #[test_case(0, true; "no failure")]
    #[test_case(2, true; "fewer failures than attempts")]
    #[test_case(3, false; "as many failures as attempts")]
    #[test_case(5, false; "more failures than attempts")]
    #[tokio::test]
    async fn test_refresh_with_failures(failures: usize, succeeds: bool) {
        let _ = env_logger::builder().is_test(true).try_init();

        let (calls, refresh) = flaky_refresh(failures, TimeDelta::hours(1));
        let provider = ExternalRefreshCredentialProvider::new(refresh);

        let result = provider.provide_credential(&Context::new()).await;
        assert_eq!(result.is_ok(), succeeds, "{result:?}");
        assert_eq!(calls.load(Ordering::SeqCst), (failures + 1).min(3));

        if succeeds {
            // The cached credential is far from expiration, no more calls.
            let cred = provider
                .provide_credential(&Context::new())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(cred.security_token.as_deref(), Some("token"));
            assert_eq!(calls.load(Ordering::SeqCst), failures + 1);
        } else {
            let err = result.unwrap_err();
            assert!(err.is_credential_error());
            assert!(err.to_string().contains("sts unavailable, attempt 0"));
        }
    }

    #[tokio::test]
    async fn test_refresh_within_advance() {
        let (calls, refresh) = flaky_refresh(0, TimeDelta::minutes(5));
        let provider = ExternalRefreshCredentialProvider::new(refresh);

        provider.provide_credential(&Context::new()).await.unwrap();
        provider.provide_credential(&Context::new()).await.unwrap();

        // Five minutes left is inside the ten minutes advance.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_unexpired_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let provider = ExternalRefreshCredentialProvider::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) > 0 {
                anyhow::bail!("sts unavailable");
            }
            Ok(RefreshCredential {
                credential: Credential::new("access_key_id", "access_key_secret"),
                expiration: now() + TimeDelta::minutes(5),
            })
        });

        let first = provider
            .provide_credential(&Context::new())
            .await
            .unwrap()
            .unwrap();
        let second = provider
            .provide_credential(&Context::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failed_refresh_with_expired_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let provider = ExternalRefreshCredentialProvider::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) > 0 {
                anyhow::bail!("sts unavailable");
            }
            Ok(RefreshCredential {
                credential: Credential::new("access_key_id", "access_key_secret"),
                expiration: now() - TimeDelta::minutes(1),
            })
        });

        provider.provide_credential(&Context::new()).await.unwrap();
        let err = provider
            .provide_credential(&Context::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialExpired);
    }

    #[tokio::test]
    async fn test_invalid_refresh_result() {
        let provider = ExternalRefreshCredentialProvider::new(|| {
            Ok(RefreshCredential {
                credential: Credential::new("", "access_key_secret"),
                expiration: now() + TimeDelta::hours(1),
            })
        })
        .with_max_attempts(1);

        let err = provider
            .provide_credential(&Context::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid credential"), "{err}");
    }
}
