//! A TTL cache in front of hostname lookups.

use crate::DnsCacheConfig;
use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

static GLOBAL_DNS_CACHE: Lazy<Arc<DnsCache>> =
    Lazy::new(|| Arc::new(DnsCache::new(DnsCacheConfig::default())));

/// Lookup resolves a hostname into addresses.
#[async_trait]
pub trait Lookup: Debug + Send + Sync + 'static {
    /// Resolve `host`. An empty result is allowed and is never cached.
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// SystemLookup asks the system resolver through tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

#[async_trait]
impl Lookup for SystemLookup {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|v| v.ip()).collect())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    addrs: Vec<IpAddr>,
    refreshed_at: Instant,
}

/// DnsCache maps hostnames to resolved addresses for a fixed TTL.
///
/// Reads share the lock, inserts and sweeps take it exclusively. The lock is
/// never held across a lookup, so two concurrent misses on the same host may
/// both resolve it; the last one to finish wins.
#[derive(Debug)]
pub struct DnsCache {
    config: DnsCacheConfig,
    lookup: Arc<dyn Lookup>,
    entries: RwLock<HashMap<String, Entry>>,
}

impl DnsCache {
    /// Create a new cache backed by the system resolver.
    pub fn new(config: DnsCacheConfig) -> Self {
        Self::with_lookup(config, SystemLookup)
    }

    /// Create a new cache backed by the given lookup.
    pub fn with_lookup(config: DnsCacheConfig, lookup: impl Lookup) -> Self {
        Self {
            config,
            lookup: Arc::new(lookup),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide cache with default settings.
    pub fn global() -> Arc<DnsCache> {
        GLOBAL_DNS_CACHE.clone()
    }

    /// The config of this cache.
    pub fn config(&self) -> &DnsCacheConfig {
        &self.config
    }

    /// Resolve `host`, serving a fresh cached result when there is one.
    pub async fn get(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        if let Some(addrs) = self.get_fresh(host) {
            return Ok(addrs);
        }

        debug!("dns cache miss for host {host}, looking up");
        let addrs = self.lookup.lookup(host).await?;
        if addrs.is_empty() {
            return Ok(addrs);
        }

        let mut entries = self.entries.write().expect("lock poisoned");
        entries.insert(
            host.to_string(),
            Entry {
                addrs: addrs.clone(),
                refreshed_at: Instant::now(),
            },
        );
        if entries.len() > self.config.max_entries {
            let ttl = self.config.ttl;
            entries.retain(|_, v| v.refreshed_at.elapsed() < ttl);
            debug!("dns cache swept, {} entries left", entries.len());
        }

        Ok(addrs)
    }

    fn get_fresh(&self, host: &str) -> Option<Vec<IpAddr>> {
        let entries = self.entries.read().expect("lock poisoned");
        let entry = entries.get(host)?;
        (entry.refreshed_at.elapsed() < self.config.ttl).then(|| entry.addrs.clone())
    }

    /// Drop every entry refreshed more than `age` ago.
    ///
    /// `age` is raised to the TTL when smaller, fresh entries always survive.
    pub fn evict_older_than(&self, age: Duration) {
        let age = age.max(self.config.ttl);
        self.entries
            .write()
            .expect("lock poisoned")
            .retain(|_, v| v.refreshed_at.elapsed() < age);
    }

    /// Number of cached hosts, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the entry of `host` so the next `get` looks it up again.
    pub fn invalidate(&self, host: &str) {
        self.entries.write().expect("lock poisoned").remove(host);
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries.write().expect("lock poisoned").clear();
    }

    /// Open a TCP connection to `host:port`.
    ///
    /// Every cached address is tried in order. When the lookup fails or no
    /// address accepts the connection, dial `host` directly as a last resort.
    pub async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        match self.get(host).await {
            Ok(addrs) => {
                for ip in addrs {
                    match TcpStream::connect(SocketAddr::new(ip, port)).await {
                        Ok(stream) => return Ok(stream),
                        Err(err) => debug!("connect to {ip}:{port} for host {host} failed: {err}"),
                    }
                }
            }
            Err(err) => debug!("lookup host {host} failed: {err}, dial directly"),
        }

        TcpStream::connect((host, port)).await
    }
}

/// CachedResolver plugs a [`DnsCache`] into reqwest.
#[derive(Debug, Clone)]
pub struct CachedResolver {
    cache: Arc<DnsCache>,
}

impl CachedResolver {
    /// Create a resolver on top of the given cache.
    pub fn new(cache: Arc<DnsCache>) -> Self {
        Self { cache }
    }
}

impl Resolve for CachedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let cache = self.cache.clone();
        Box::pin(async move {
            let addrs = cache.get(name.as_str()).await?;
            if addrs.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for host {}", name.as_str()),
                )
                .into());
            }

            // Port is filled in by the connector.
            let addrs: Addrs = Box::new(addrs.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok(addrs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Default)]
    struct CountingLookup {
        calls: Arc<AtomicUsize>,
        addrs: Vec<IpAddr>,
    }

    #[async_trait]
    impl Lookup for CountingLookup {
        async fn lookup(&self, _: &str) -> io::Result<Vec<IpAddr>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.addrs.clone())
        }
    }

    fn localhost() -> Vec<IpAddr> {
        vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_within_ttl_hits_cache() {
        let lookup = CountingLookup {
            addrs: localhost(),
            ..Default::default()
        };
        let cache = DnsCache::with_lookup(DnsCacheConfig::default(), lookup.clone());

        let first = cache.get("cn-hangzhou.log.aliyuncs.com").await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        let second = cache.get("cn-hangzhou.log.aliyuncs.com").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_ttl_looks_up_again() {
        let lookup = CountingLookup {
            addrs: localhost(),
            ..Default::default()
        };
        let cache = DnsCache::with_lookup(DnsCacheConfig::default(), lookup.clone());

        cache.get("host").await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        cache.get("host").await.unwrap();

        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_cached() {
        let lookup = CountingLookup::default();
        let cache = DnsCache::with_lookup(DnsCacheConfig::default(), lookup.clone());

        assert!(cache.get("host").await.unwrap().is_empty());
        assert!(cache.get("host").await.unwrap().is_empty());

        assert!(cache.is_empty());
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_after_max_entries() {
        let lookup = CountingLookup {
            addrs: localhost(),
            ..Default::default()
        };
        let config = DnsCacheConfig {
            ttl: Duration::from_secs(60),
            max_entries: 3,
        };
        let cache = DnsCache::with_lookup(config, lookup);

        for host in ["a", "b", "c"] {
            cache.get(host).await.unwrap();
        }
        assert_eq!(cache.len(), 3);

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.get("d").await.unwrap();

        // Inserting "d" pushed the cache past the limit, the stale hosts are gone.
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_older_than_never_drops_fresh_entries() {
        let lookup = CountingLookup {
            addrs: localhost(),
            ..Default::default()
        };
        let cache = DnsCache::with_lookup(DnsCacheConfig::default(), lookup);

        cache.get("old").await.unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;
        cache.get("new").await.unwrap();

        cache.evict_older_than(Duration::ZERO);
        assert_eq!(cache.len(), 1);

        cache.invalidate("new");
        assert!(cache.is_empty());
        cache.get("new").await.unwrap();
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_connect_tries_cached_addresses() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let lookup = CountingLookup {
            addrs: localhost(),
            ..Default::default()
        };
        let cache = DnsCache::with_lookup(DnsCacheConfig::default(), lookup);

        let stream = cache.connect("project.log.invalid", port).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[derive(Debug)]
    struct FailingLookup;

    #[async_trait]
    impl Lookup for FailingLookup {
        async fn lookup(&self, _: &str) -> io::Result<Vec<IpAddr>> {
            Err(io::Error::other("resolver down"))
        }
    }

    #[tokio::test]
    async fn test_connect_falls_back_to_direct_dial() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let cache = DnsCache::with_lookup(DnsCacheConfig::default(), FailingLookup);

        let stream = cache.connect("127.0.0.1", port).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn test_resolver_reports_empty_result() {
        let cache = Arc::new(DnsCache::with_lookup(
            DnsCacheConfig::default(),
            CountingLookup::default(),
        ));
        let resolver = CachedResolver::new(cache);

        let name: Name = "host.invalid".parse().unwrap();
        assert!(resolver.resolve(name).await.is_err());
    }
}
