use super::utils::{fetch_with_retry, DEFAULT_FETCH_ATTEMPTS};
use crate::constants::{ALIBABA_CLOUD_ECS_METADATA, ECS_RAM_ROLE_URL_PREFIX};
use crate::credential::DEFAULT_EXPIRED_FACTOR;
use crate::{Credential, TemporaryCredential};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use log::{debug, warn};
use serde::Deserialize;
use slsreq_core::time::{format_rfc3339, from_unix_millis, now};
use slsreq_core::{Context, Error, ProvideCredential, Result};
use std::sync::RwLock;

/// EcsRamRoleCredentialProvider loads STS credentials of the RAM role
/// attached to an ECS instance from the instance metadata service.
///
/// The role name comes from [`with_role_name`](Self::with_role_name) or, if
/// unset, from `ALIBABA_CLOUD_ECS_METADATA` at call time. Without a role name
/// this provider yields nothing.
///
/// Fetched credentials are cached until [`TemporaryCredential::should_refresh`]
/// says otherwise. A failed refresh falls back to the cached credential as
/// long as it hasn't expired.
#[derive(Debug)]
pub struct EcsRamRoleCredentialProvider {
    role_name: Option<String>,
    endpoint: String,
    max_attempts: usize,
    expired_factor: f64,
    cache: RwLock<Option<TemporaryCredential>>,
}

impl Default for EcsRamRoleCredentialProvider {
    fn default() -> Self {
        Self {
            role_name: None,
            endpoint: ECS_RAM_ROLE_URL_PREFIX.to_string(),
            max_attempts: DEFAULT_FETCH_ATTEMPTS,
            expired_factor: DEFAULT_EXPIRED_FACTOR,
            cache: RwLock::new(None),
        }
    }
}

impl EcsRamRoleCredentialProvider {
    /// Create a new provider reading the role name from env.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the RAM role name.
    pub fn with_role_name(mut self, role_name: impl Into<String>) -> Self {
        self.role_name = Some(role_name.into());
        self
    }

    /// Set the url prefix the role name is appended to.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set how many times the metadata service is tried per refresh.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the expired factor of fetched credentials, see
    /// [`TemporaryCredential::with_expired_factor`].
    pub fn with_expired_factor(mut self, factor: f64) -> Self {
        self.expired_factor = factor;
        self
    }

    fn role_name(&self, ctx: &Context) -> Option<String> {
        self.role_name
            .clone()
            .or_else(|| ctx.env_var(ALIBABA_CLOUD_ECS_METADATA))
            .filter(|v| !v.is_empty())
    }

    async fn fetch(&self, ctx: &Context, role_name: &str) -> Result<TemporaryCredential> {
        let url = format!("{}{role_name}", self.endpoint);
        let req = http::Request::builder()
            .method(Method::GET)
            .uri(&url)
            .body(Bytes::new())
            .map_err(|e| {
                Error::request_invalid("failed to build ecs ram role request")
                    .with_source(e)
                    .with_context(format!("url: {url}"))
            })?;

        let resp = ctx.http_send_as_string(req).await?;
        if resp.status() != StatusCode::OK {
            return Err(Error::unexpected(format!(
                "ecs metadata service responded {}",
                resp.status()
            ))
            .with_context(format!("body: {}", resp.body())));
        }

        let body = resp.into_body();
        let resp: EcsRamRoleResponse = serde_json::from_str(&body).map_err(|e| {
            Error::unexpected(format!("failed to parse ecs ram role response: {e}"))
                .with_source(e)
        })?;
        if !resp.is_valid() {
            return Err(Error::credential_invalid(
                "ecs metadata service returned an invalid credential",
            )
            .with_context(format!("code: {}", resp.code)));
        }

        let credential = Credential::new(resp.access_key_id, resp.access_key_secret)
            .with_security_token(resp.security_token);
        Ok(TemporaryCredential::new(
            credential,
            from_unix_millis(resp.expiration)?,
            from_unix_millis(resp.last_updated)?,
        )
        .with_expired_factor(self.expired_factor))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EcsRamRoleResponse {
    #[serde(default)]
    code: String,
    #[serde(default)]
    access_key_id: String,
    #[serde(default)]
    access_key_secret: String,
    #[serde(default)]
    security_token: String,
    #[serde(default)]
    expiration: i64,
    #[serde(default)]
    last_updated: i64,
}

impl EcsRamRoleResponse {
    fn is_valid(&self) -> bool {
        self.code.eq_ignore_ascii_case("success")
            && !self.access_key_id.is_empty()
            && !self.access_key_secret.is_empty()
            && self.expiration > 0
            && self.last_updated > 0
    }
}

#[async_trait]
impl ProvideCredential for EcsRamRoleCredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        let Some(role_name) = self.role_name(ctx) else {
            debug!("ecs ram role name is not set, skip");
            return Ok(None);
        };

        let cached = self.cache.read().expect("lock poisoned").clone();
        let now = now();
        if let Some(cached) = &cached {
            if !cached.should_refresh(now) {
                return Ok(Some(cached.credential.clone()));
            }
        }

        debug!("fetching ecs ram role credential of role {role_name}");
        let result = fetch_with_retry(
            "fetch ecs ram role credential",
            self.max_attempts,
            || self.fetch(ctx, &role_name),
        )
        .await;

        match (result, cached) {
            (Ok(cred), _) => {
                debug!(
                    "fetched ecs ram role credential, expiration: {}, last updated: {}",
                    format_rfc3339(cred.expiration),
                    format_rfc3339(cred.last_updated)
                );
                let credential = cred.credential.clone();
                *self.cache.write().expect("lock poisoned") = Some(cred);
                Ok(Some(credential))
            }
            (Err(err), Some(cached)) if !cached.has_expired(now) => {
                warn!(
                    "fetch ecs ram role credential failed, keep using the cached one that expires at {}: {err}",
                    format_rfc3339(cached.expiration)
                );
                Ok(Some(cached.credential))
            }
            (Err(err), _) => Err(err.with_context(format!("role: {role_name}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use slsreq_core::time::DateTime;
    use slsreq_core::{ErrorKind, HttpSend, StaticEnv};
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Answers queued responses in order and records every requested url.
    #[derive(Debug, Clone, Default)]
    struct MockMetadata {
        responses: Arc<Mutex<VecDeque<(StatusCode, String)>>>,
        urls: Arc<Mutex<Vec<String>>>,
    }

    impl MockMetadata {
        fn push(&self, status: StatusCode, body: impl Into<String>) -> &Self {
            self.responses
                .lock()
                .unwrap()
                .push_back((status, body.into()));
            self
        }

        fn calls(&self) -> usize {
            self.urls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpSend for MockMetadata {
        async fn http_send(&self, req: http::Request<Bytes>) -> Result<http::Response<Bytes>> {
            self.urls.lock().unwrap().push(req.uri().to_string());
            let (status, body) = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, String::new()));
            Ok(http::Response::builder()
                .status(status)
                .body(Bytes::from(body))
                .unwrap())
        }
    }

    fn credential_body(code: &str, last_updated: DateTime, expiration: DateTime) -> String {
        serde_json::json!({
            "Code": code,
            "AccessKeyId": "STS.access_key_id",
            "AccessKeySecret": "access_key_secret",
            "SecurityToken": "security_token",
            "Expiration": expiration.timestamp_millis(),
            "LastUpdated": last_updated.timestamp_millis(),
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_fetch_and_cache() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mock = MockMetadata::default();
        mock.push(
            StatusCode::OK,
            credential_body("Success", now(), now() + TimeDelta::hours(6)),
        );
        let ctx = Context::new().with_http_send(mock.clone());
        let provider = EcsRamRoleCredentialProvider::new().with_role_name("test-role");

        let cred = provider.provide_credential(&ctx).await.unwrap().unwrap();
        assert_eq!(cred.access_key_id, "STS.access_key_id");
        assert_eq!(cred.security_token.as_deref(), Some("security_token"));

        let again = provider.provide_credential(&ctx).await.unwrap().unwrap();
        assert_eq!(cred, again);
        assert_eq!(mock.calls(), 1);
        assert_eq!(
            mock.urls.lock().unwrap()[0],
            format!("{ECS_RAM_ROLE_URL_PREFIX}test-role")
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_unexpired_cache() {
        let mock = MockMetadata::default();
        // Issued 50 minutes ago with 10 minutes left, past the 0.8 lifetime share.
        mock.push(
            StatusCode::OK,
            credential_body(
                "Success",
                now() - TimeDelta::minutes(50),
                now() + TimeDelta::minutes(10),
            ),
        );
        let ctx = Context::new().with_http_send(mock.clone());
        let provider = EcsRamRoleCredentialProvider::new().with_role_name("test-role");

        let first = provider.provide_credential(&ctx).await.unwrap().unwrap();
        let second = provider.provide_credential(&ctx).await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(mock.calls(), 4);
    }

    #[tokio::test]
    async fn test_failed_refresh_with_expired_cache() {
        let mock = MockMetadata::default();
        mock.push(
            StatusCode::OK,
            credential_body(
                "Success",
                now() - TimeDelta::hours(1),
                now() - TimeDelta::minutes(1),
            ),
        );
        let ctx = Context::new().with_http_send(mock.clone());
        let provider = EcsRamRoleCredentialProvider::new().with_role_name("test-role");

        provider.provide_credential(&ctx).await.unwrap();
        let err = provider.provide_credential(&ctx).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CredentialUnavailable);
        assert!(err.to_string().contains("role: test-role"), "{err}");
        assert_eq!(mock.calls(), 4);
    }

    #[tokio::test]
    async fn test_invalid_response_is_retried() {
        let mock = MockMetadata::default();
        mock.push(
            StatusCode::OK,
            credential_body("Failed", now(), now() + TimeDelta::hours(6)),
        )
        .push(StatusCode::OK, "not json")
        .push(
            StatusCode::OK,
            credential_body("success", now(), now() + TimeDelta::hours(6)),
        );
        let ctx = Context::new().with_http_send(mock.clone());
        let provider = EcsRamRoleCredentialProvider::new().with_role_name("test-role");

        let cred = provider.provide_credential(&ctx).await.unwrap();
        assert!(cred.is_some());
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_invalid_response_fails() {
        let mock = MockMetadata::default();
        for _ in 0..3 {
            mock.push(
                StatusCode::OK,
                credential_body("Failed", now(), now() + TimeDelta::hours(6)),
            );
        }
        let ctx = Context::new().with_http_send(mock.clone());
        let provider = EcsRamRoleCredentialProvider::new().with_role_name("test-role");

        let err = provider.provide_credential(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("invalid credential"), "{err}");
    }

    #[tokio::test]
    async fn test_role_name_from_env() {
        let mock = MockMetadata::default();
        mock.push(
            StatusCode::OK,
            credential_body("Success", now(), now() + TimeDelta::hours(6)),
        );
        let ctx = Context::new()
            .with_http_send(mock.clone())
            .with_env(StaticEnv {
                envs: HashMap::from([(
                    ALIBABA_CLOUD_ECS_METADATA.to_string(),
                    "env-role".to_string(),
                )]),
            });

        let cred = EcsRamRoleCredentialProvider::new()
            .with_endpoint("http://127.0.0.1:8080/ram/")
            .provide_credential(&ctx)
            .await
            .unwrap();
        assert!(cred.is_some());
        assert_eq!(
            mock.urls.lock().unwrap().as_slice(),
            ["http://127.0.0.1:8080/ram/env-role"]
        );
    }

    #[tokio::test]
    async fn test_without_role_name() {
        let mock = MockMetadata::default();
        let ctx = Context::new().with_http_send(mock.clone());

        let cred = EcsRamRoleCredentialProvider::new()
            .provide_credential(&ctx)
            .await
            .unwrap();
        assert!(cred.is_none());
        assert_eq!(mock.calls(), 0);
    }
}
