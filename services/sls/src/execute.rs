use crate::constants::*;
use crate::error::parse_error_response;
use crate::{Config, Credential, DefaultCredentialProvider, Error, RequestSigner, Result};
use backon::{BackoffBuilder, ExponentialBuilder};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use log::debug;
use slsreq_core::{Context, ProvideCredential, Signer};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};

/// RetryPolicy decides which failures of a call are retried.
///
/// Transport failures are always retried. Server errors are retried only
/// when [`Config::retry_on_server_error`] is on: any 5xx for reads, only
/// 500, 502 and 503 for writes since the others may have been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Idempotent calls.
    Read,
    /// Calls that change state.
    Write,
}

impl RetryPolicy {
    /// `GET` is a read, everything else is a write.
    pub fn for_method(method: &Method) -> Self {
        if *method == Method::GET {
            RetryPolicy::Read
        } else {
            RetryPolicy::Write
        }
    }

    /// Returns true if `err` is worth another attempt.
    pub fn is_retryable(&self, err: &Error, retry_on_server_error: bool) -> bool {
        match err {
            Error::Transport(_) => true,
            Error::Service(_) | Error::BadResponse(_) => {
                let Some(status) = err.status() else {
                    return false;
                };
                retry_on_server_error
                    && match self {
                        RetryPolicy::Read => status.is_server_error(),
                        RetryPolicy::Write => matches!(
                            status,
                            StatusCode::INTERNAL_SERVER_ERROR
                                | StatusCode::BAD_GATEWAY
                                | StatusCode::SERVICE_UNAVAILABLE
                        ),
                    }
            }
            Error::Client(_) | Error::Credentials(_) => false,
        }
    }
}

/// RequestExecutor sends log service requests: it completes the protocol
/// headers, signs, sends, and retries within [`Config::retry_timeout`].
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    config: Arc<Config>,
    signer: Signer<Credential>,
}

impl RequestExecutor {
    /// Create an executor with an explicit credential provider.
    pub fn new(
        ctx: Context,
        config: Arc<Config>,
        provider: impl ProvideCredential<Credential = Credential>,
    ) -> Self {
        let signer = Signer::new(ctx, provider, RequestSigner::from_config(&config));
        Self { config, signer }
    }

    /// Create an executor that loads missing config from env and uses
    /// [`DefaultCredentialProvider`].
    pub fn from_config(ctx: Context, config: Config) -> Self {
        let config = Arc::new(config.from_env(&ctx));
        let provider = DefaultCredentialProvider::new(&config);
        Self::new(ctx, config, provider)
    }

    /// The config in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Execute one logical call.
    ///
    /// `path_and_query` starts with `/`. `headers` must carry
    /// `x-log-bodyrawsize`, and `Content-Type` as well when `body` is given.
    /// A non-200 answer is returned as [`Error::Service`] or
    /// [`Error::BadResponse`].
    pub async fn execute(
        &self,
        method: Method,
        project: Option<&str>,
        path_and_query: &str,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Result<http::Response<Bytes>> {
        let policy = RetryPolicy::for_method(&method);
        let deadline = Instant::now() + self.config.retry_timeout;
        let mut backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(500))
            .with_factor(1.5)
            .with_max_delay(Duration::from_secs(60))
            .with_jitter()
            .without_max_times()
            .build();

        let mut last_err = None;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let fut =
                self.execute_once(&method, project, path_and_query, &headers, body.as_ref());
            let err = match timeout_at(deadline, fut).await {
                Ok(Ok(resp)) => return Ok(resp),
                Ok(Err(err)) => err,
                Err(_) => {
                    debug!("attempt {attempt} aborted at the retry deadline");
                    return Err(last_err.unwrap_or_else(|| {
                        Error::Transport(
                            slsreq_core::Error::unexpected(format!(
                                "request timed out after {:?}",
                                self.config.retry_timeout
                            ))
                            .set_retryable(true),
                        )
                    }));
                }
            };

            if !policy.is_retryable(&err, self.config.retry_on_server_error) {
                return Err(err);
            }
            let Some(delay) = backoff.next() else {
                return Err(err);
            };
            if Instant::now() + delay >= deadline {
                debug!("attempt {attempt} failed, next retry would pass the deadline: {err}");
                return Err(err);
            }

            debug!("attempt {attempt} failed, retry in {delay:?}: {err}");
            last_err = Some(err);
            sleep(delay).await;
        }
    }

    async fn execute_once(
        &self,
        method: &Method,
        project: Option<&str>,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Option<&Bytes>,
    ) -> Result<http::Response<Bytes>> {
        if !headers.contains_key(X_LOG_BODY_RAW_SIZE) {
            return Err(Error::Client(slsreq_core::Error::request_invalid(format!(
                "header {X_LOG_BODY_RAW_SIZE} is required"
            ))));
        }
        if body.is_some() && !headers.contains_key(CONTENT_TYPE) {
            return Err(Error::Client(slsreq_core::Error::request_invalid(
                "header Content-Type is required for a request with body",
            )));
        }

        let host = match project {
            Some(project) => format!("{project}.{}", self.config.host()),
            None => self.config.host().to_string(),
        };
        let url = format!("{}://{host}{path_and_query}", self.config.scheme());
        let (mut parts, ()) = http::Request::builder()
            .method(method.clone())
            .uri(&url)
            .body(())
            .map_err(|e| {
                Error::Client(slsreq_core::Error::from(e).with_context(format!("url: {url}")))
            })?
            .into_parts();

        parts.headers = self.build_headers(headers, &host).map_err(Error::Client)?;
        self.signer
            .sign(&mut parts, body.map(|v| &v[..]))
            .await
            .map_err(Error::from_sign)?;

        let req = http::Request::from_parts(parts, body.cloned().unwrap_or_default());
        let resp = self
            .signer
            .context()
            .http_send(req)
            .await
            .map_err(Error::Transport)?;

        let request_id = resp
            .headers()
            .get(X_LOG_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        if resp.status() == StatusCode::OK {
            debug!(
                "{method} {url} succeeded, request id: {}",
                request_id.as_deref().unwrap_or("-")
            );
            return Ok(resp);
        }

        let (parts, body) = resp.into_parts();
        Err(parse_error_response(
            parts.status,
            parts.headers,
            body,
            request_id,
        ))
    }

    fn build_headers(&self, headers: &HeaderMap, host: &str) -> slsreq_core::Result<HeaderMap> {
        let mut headers = headers.clone();
        headers.insert(HOST, host.parse()?);
        headers.insert(X_LOG_API_VERSION, HeaderValue::from_static(API_VERSION));
        headers.insert(
            X_LOG_SIGNATURE_METHOD,
            HeaderValue::from_static(SIGNATURE_METHOD),
        );
        headers.insert(USER_AGENT, self.config.user_agent.parse()?);

        for (k, v) in &self.config.common_headers {
            let name: HeaderName = k.parse()?;
            if !headers.contains_key(&name) {
                headers.insert(name, v.parse()?);
            }
        }
        Ok(headers)
    }
}
