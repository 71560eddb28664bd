use crate::constants::*;
use crate::SignVersion;
use slsreq_core::Context;
use std::time::Duration;

/// Config carries all the configuration for the log service client.
#[derive(Clone, Debug)]
pub struct Config {
    /// Endpoint of the log service, like `cn-hangzhou.log.aliyuncs.com`.
    ///
    /// A `https://` prefix selects TLS unless `force_http` is set, no prefix
    /// or `http://` means plain http.
    pub endpoint: String,
    /// Signature version, default to [`SignVersion::V1`].
    pub sign_version: SignVersion,
    /// Region of the endpoint, required by [`SignVersion::V4`].
    pub region: Option<String>,
    /// `access_key_id` will be loaded from
    ///
    /// - this field if it's `is_some`
    /// - env value: [`ALIBABA_CLOUD_ACCESS_KEY_ID`]
    pub access_key_id: Option<String>,
    /// `access_key_secret` will be loaded from
    ///
    /// - this field if it's `is_some`
    /// - env value: [`ALIBABA_CLOUD_ACCESS_KEY_SECRET`]
    pub access_key_secret: Option<String>,
    /// `security_token` will be loaded from
    ///
    /// - this field if it's `is_some`
    /// - env value: [`ALIBABA_CLOUD_SECURITY_TOKEN`]
    pub security_token: Option<String>,
    /// `role_name` of the ECS RAM role will be loaded from
    ///
    /// - this field if it's `is_some`
    /// - env value: [`ALIBABA_CLOUD_ECS_METADATA`]
    pub role_name: Option<String>,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Headers sent with every request unless the caller sets them.
    pub common_headers: Vec<(String, String)>,
    /// Wall-clock budget of one logical call, retries included.
    pub retry_timeout: Duration,
    /// Retry 5xx responses, see [`RetryPolicy`](crate::RetryPolicy).
    pub retry_on_server_error: bool,
    /// Always use plain http, even for a `https://` endpoint.
    pub force_http: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            sign_version: SignVersion::V1,
            region: None,
            access_key_id: None,
            access_key_secret: None,
            security_token: None,
            role_name: None,
            user_agent: format!("slsreq/{}", env!("CARGO_PKG_VERSION")),
            common_headers: Vec::new(),
            retry_timeout: Duration::from_secs(90),
            retry_on_server_error: true,
            force_http: false,
        }
    }
}

impl Config {
    /// Load config from env.
    pub fn from_env(mut self, ctx: &Context) -> Self {
        if let Some(v) = ctx.env_var(ALIBABA_CLOUD_ACCESS_KEY_ID) {
            self.access_key_id.get_or_insert(v);
        }
        if let Some(v) = ctx.env_var(ALIBABA_CLOUD_ACCESS_KEY_SECRET) {
            self.access_key_secret.get_or_insert(v);
        }
        if let Some(v) = ctx.env_var(ALIBABA_CLOUD_SECURITY_TOKEN) {
            self.security_token.get_or_insert(v);
        }
        if let Some(v) = ctx.env_var(ALIBABA_CLOUD_ECS_METADATA) {
            self.role_name.get_or_insert(v);
        }

        self
    }

    /// The endpoint without its scheme prefix.
    pub(crate) fn host(&self) -> &str {
        let endpoint = self.endpoint.trim_end_matches('/');
        endpoint
            .strip_prefix("https://")
            .or_else(|| endpoint.strip_prefix("http://"))
            .unwrap_or(endpoint)
    }

    /// The scheme requests are sent with.
    pub(crate) fn scheme(&self) -> &'static str {
        if self.endpoint.starts_with("https://") && !self.force_http {
            "https"
        } else {
            "http"
        }
    }
}
