use once_cell::sync::Lazy;
use std::time::Duration;

/// Default TTL of a resolved address set.
pub const DEFAULT_DNS_CACHE_TTL: Duration = Duration::from_secs(60);
/// Default number of hosts kept before a sweep runs.
pub const DEFAULT_DNS_CACHE_MAX_ENTRIES: usize = 10_000;

static GLOBAL_HTTP_CONFIG: Lazy<HttpConfig> = Lazy::new(HttpConfig::default);

/// DnsCacheConfig tunes the [`DnsCache`](crate::DnsCache).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsCacheConfig {
    /// How long a lookup result stays fresh.
    pub ttl: Duration,
    /// Size above which an insert triggers a sweep of stale entries.
    pub max_entries: usize,
}

impl Default for DnsCacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_DNS_CACHE_TTL,
            max_entries: DEFAULT_DNS_CACHE_MAX_ENTRIES,
        }
    }
}

/// HttpConfig carries the connection tuning for [`ReqwestHttpSend`](crate::ReqwestHttpSend).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpConfig {
    /// Timeout of a whole exchange, from connect to the last body byte.
    ///
    /// Default to 60s.
    pub request_timeout: Duration,
    /// How long an idle pooled connection is kept.
    ///
    /// Default to 90s.
    pub idle_timeout: Duration,
    /// Disable connection reuse entirely.
    pub disable_keep_alives: bool,
    /// Proxy url applied to all schemes, for example `http://127.0.0.1:3128`.
    pub proxy: Option<String>,
    /// DNS cache settings, `None` uses the resolver of reqwest directly.
    pub dns_cache: Option<DnsCacheConfig>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(90),
            disable_keep_alives: false,
            proxy: None,
            dns_cache: Some(DnsCacheConfig::default()),
        }
    }
}

impl HttpConfig {
    /// The process-wide default config.
    ///
    /// It's built once on first use and never changes afterwards. Clients
    /// that need other settings should build their own `HttpConfig`.
    pub fn global() -> &'static HttpConfig {
        &GLOBAL_HTTP_CONFIG
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the proxy url.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Replace the DNS cache settings.
    pub fn with_dns_cache(mut self, dns_cache: Option<DnsCacheConfig>) -> Self {
        self.dns_cache = dns_cache;
        self
    }
}
