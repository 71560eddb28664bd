//! Reqwest based [`HttpSend`] for slsreq.
//!
//! ```no_run
//! use slsreq_core::Context;
//! use slsreq_http_send_reqwest::{HttpConfig, ReqwestHttpSend};
//!
//! # fn example() -> slsreq_core::Result<()> {
//! let http = ReqwestHttpSend::from_config(HttpConfig::global())?;
//! let ctx = Context::new().with_http_send(http);
//! # Ok(())
//! # }
//! ```

mod config;
pub use config::{
    DnsCacheConfig, HttpConfig, DEFAULT_DNS_CACHE_MAX_ENTRIES, DEFAULT_DNS_CACHE_TTL,
};

mod dns;
pub use dns::{CachedResolver, DnsCache, Lookup, SystemLookup};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::BodyExt;
use log::debug;
use reqwest::{Client, Request};
use slsreq_core::{Error, HttpSend, Result};
use std::sync::Arc;

/// ReqwestHttpSend sends requests with a [`reqwest::Client`].
///
/// Transport failures are returned as retryable errors. Responses are
/// returned as-is whatever their status.
///
/// With a DNS cache in place, a request that can't connect to any cached
/// address drops the host from the cache and is sent once more through a
/// client that resolves the hostname itself.
#[derive(Debug, Default, Clone)]
pub struct ReqwestHttpSend {
    client: Client,
    direct: Option<(Client, Arc<DnsCache>)>,
}

impl ReqwestHttpSend {
    /// Create a new ReqwestHttpSend with a reqwest::Client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            direct: None,
        }
    }

    /// Build a client from the given config.
    ///
    /// A config that keeps the default DNS cache settings shares the
    /// process-wide cache, any other settings get a cache of their own.
    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        let cache = config.dns_cache.as_ref().map(|v| {
            if v == &DnsCacheConfig::default() {
                DnsCache::global()
            } else {
                Arc::new(DnsCache::new(v.clone()))
            }
        });

        Self::from_config_with_cache(config, cache)
    }

    /// Build a client from the given config and an explicit DNS cache.
    ///
    /// `config.dns_cache` is ignored, pass `None` to use the resolver of reqwest.
    pub fn from_config_with_cache(
        config: &HttpConfig,
        cache: Option<Arc<DnsCache>>,
    ) -> Result<Self> {
        let Some(cache) = cache else {
            return Ok(Self::new(build_client(config, None)?));
        };

        let client = build_client(config, Some(CachedResolver::new(cache.clone())))?;
        let direct = build_client(config, None)?;
        Ok(Self {
            client,
            direct: Some((direct, cache)),
        })
    }
}

fn build_client(config: &HttpConfig, resolver: Option<CachedResolver>) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(config.request_timeout)
        .pool_idle_timeout(config.idle_timeout);
    if config.disable_keep_alives {
        builder = builder.pool_max_idle_per_host(0);
    }
    if let Some(proxy) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy).map_err(|e| {
            Error::config_invalid(format!("invalid proxy url: {proxy}")).with_source(e)
        })?;
        builder = builder.proxy(proxy);
    }
    if let Some(resolver) = resolver {
        builder = builder.dns_resolver(Arc::new(resolver));
    }

    builder
        .build()
        .map_err(|e| Error::config_invalid("failed to build http client").with_source(e))
}

fn send_error(err: reqwest::Error, url: &str) -> Error {
    Error::unexpected("failed to send http request")
        .with_source(err)
        .with_context(format!("url: {url}"))
        .set_retryable(true)
}

#[async_trait]
impl HttpSend for ReqwestHttpSend {
    async fn http_send(&self, req: http::Request<Bytes>) -> Result<http::Response<Bytes>> {
        let req = Request::try_from(req)
            .map_err(|e| Error::request_invalid("failed to convert http request").with_source(e))?;
        let url = req.url().to_string();
        let retry = self
            .direct
            .as_ref()
            .and_then(|(client, cache)| Some((client, cache, req.try_clone()?)));

        let resp = match (self.client.execute(req).await, retry) {
            (Ok(resp), _) => resp,
            (Err(err), Some((client, cache, req))) if err.is_connect() => {
                if let Some(host) = req.url().host_str() {
                    debug!("connect via cached addresses failed: {err}, dial {host} directly");
                    cache.invalidate(host);
                }
                client.execute(req).await.map_err(|e| send_error(e, &url))?
            }
            (Err(err), _) => return Err(send_error(err, &url)),
        };
        let resp: http::Response<_> = resp.into();

        let (parts, body) = resp.into_parts();
        let bs = BodyExt::collect(body)
            .await
            .map(|buf| buf.to_bytes())
            .map_err(|e| {
                Error::unexpected("failed to read http response body")
                    .with_source(e)
                    .with_context(format!("url: {url}"))
                    .set_retryable(true)
            })?;
        Ok(http::Response::from_parts(parts, bs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Always answers an address nothing listens on.
    #[derive(Debug)]
    struct StaleLookup;

    #[async_trait]
    impl Lookup for StaleLookup {
        async fn lookup(&self, _: &str) -> io::Result<Vec<IpAddr>> {
            Ok(vec![IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2))])
        }
    }

    async fn serve_once(listener: TcpListener) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0; 4096];
        let mut read = 0;
        loop {
            let n = stream.read(&mut buf[read..]).await.unwrap();
            read += n;
            if n == 0 || buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        stream
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stale_dns_entry_falls_back_to_direct_dial() {
        let _ = env_logger::builder().is_test(true).try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_once(listener));

        let cache = Arc::new(DnsCache::with_lookup(DnsCacheConfig::default(), StaleLookup));
        let client =
            ReqwestHttpSend::from_config_with_cache(&HttpConfig::default(), Some(cache.clone()))
                .unwrap();

        let req = http::Request::get(format!("http://localhost:{port}/"))
            .body(Bytes::new())
            .unwrap();
        let resp = client.http_send(req).await.unwrap();
        assert_eq!(resp.status(), http::StatusCode::OK);
        assert_eq!(resp.body().as_ref(), b"ok");

        // The stale entry is gone, the next request looks the host up again.
        assert!(cache.is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_error_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = ReqwestHttpSend::from_config_with_cache(&HttpConfig::default(), None).unwrap();
        let req = http::Request::get(format!("http://127.0.0.1:{port}/"))
            .body(Bytes::new())
            .unwrap();
        let err = client.http_send(req).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("failed to send http request"), "{err}");
    }
}
