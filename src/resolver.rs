use std::{
    cell::RefCell,
    collections::HashMap,
    io,
    net::{IpAddr, SocketAddr},
    time::{Duration, Instant},
};

use tracing::{debug, trace};

/// Turns a domain name and port into the endpoints to try, in order.
#[allow(async_fn_in_trait)]
pub trait Resolve {
    async fn resolve(&self, domainname: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolves through the operating system.
#[derive(Debug, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    async fn resolve(&self, domainname: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        let addresses = tokio::net::lookup_host((domainname, port)).await?;
        Ok(addresses.collect())
    }
}

#[derive(Debug)]
struct CacheEntry {
    inserted: Instant,
    addresses: Vec<IpAddr>,
}

/// Domain name to address cache where every entry lives for a fixed time-to-live.
///
/// Expired entries are dropped when looked up, and all of them are swept on insertion.
#[derive(Debug)]
pub struct ResolverCache {
    ttl: Duration,
    entries: HashMap<String, CacheEntry>,
}

impl ResolverCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted) >= self.ttl
    }

    pub fn get(&mut self, domainname: &str, now: Instant) -> Option<Vec<IpAddr>> {
        let entry = self.entries.get(domainname)?;
        if self.is_expired(entry, now) {
            self.entries.remove(domainname);
            return None;
        }

        Some(entry.addresses.clone())
    }

    pub fn insert(&mut self, domainname: String, addresses: Vec<IpAddr>, now: Instant) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| now.saturating_duration_since(entry.inserted) < ttl);
        self.entries.insert(domainname, CacheEntry { inserted: now, addresses });
    }
}

/// A resolver that answers from a [`ResolverCache`] when it can, and remembers every non-empty
/// answer of the resolver it wraps.
#[derive(Debug)]
pub struct CachingResolver<R> {
    inner: R,
    cache: RefCell<ResolverCache>,
}

impl<R: Resolve> CachingResolver<R> {
    pub fn new(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            cache: RefCell::new(ResolverCache::new(ttl)),
        }
    }
}

impl<R: Resolve> Resolve for CachingResolver<R> {
    async fn resolve(&self, domainname: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        let cached = self.cache.borrow_mut().get(domainname, Instant::now());
        if let Some(ips) = cached {
            trace!("cache hit for {domainname}");
            return Ok(ips.into_iter().map(|ip| SocketAddr::new(ip, port)).collect());
        }

        let addresses = self.inner.resolve(domainname, port).await?;
        if !addresses.is_empty() {
            let ips = addresses.iter().map(|address| address.ip()).collect();
            self.cache.borrow_mut().insert(domainname.to_owned(), ips, Instant::now());
        }

        Ok(addresses)
    }
}

/// The resolver an egress worker uses, picked once at startup.
#[derive(Debug)]
pub enum Resolver {
    Direct(SystemResolver),
    Cached(CachingResolver<SystemResolver>),
}

impl Resolver {
    pub fn new(dns_cache_ttl: Option<Duration>) -> Self {
        match dns_cache_ttl {
            Some(ttl) => {
                debug!("caching resolved names for {ttl:?}");
                Self::Cached(CachingResolver::new(SystemResolver, ttl))
            }
            None => Self::Direct(SystemResolver),
        }
    }
}

impl Resolve for Resolver {
    async fn resolve(&self, domainname: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        match self {
            Self::Direct(resolver) => resolver.resolve(domainname, port).await,
            Self::Cached(resolver) => resolver.resolve(domainname, port).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::Cell,
        io::{Error, ErrorKind},
        net::Ipv4Addr,
    };

    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    struct CountingResolver {
        answer: Vec<SocketAddr>,
        calls: Cell<usize>,
    }

    impl Resolve for CountingResolver {
        async fn resolve(&self, domainname: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
            self.calls.set(self.calls.get() + 1);
            match domainname {
                "missing.test" => Err(Error::new(ErrorKind::NotFound, "no such host")),
                _ => Ok(self.answer.clone()),
            }
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn cache_entries_expire() {
        let start = Instant::now();
        let mut cache = ResolverCache::new(TTL);
        cache.insert("example.com".to_owned(), vec![ip(1), ip(2)], start);

        assert_eq!(cache.get("example.com", start + Duration::from_secs(29)), Some(vec![ip(1), ip(2)]));
        assert_eq!(cache.get("other.com", start), None);

        assert_eq!(cache.get("example.com", start + TTL), None);
        assert!(cache.entries.is_empty());
    }

    #[test]
    fn insert_sweeps_expired_entries() {
        let start = Instant::now();
        let mut cache = ResolverCache::new(TTL);
        cache.insert("a.test".to_owned(), vec![ip(1)], start);
        cache.insert("b.test".to_owned(), vec![ip(2)], start + Duration::from_secs(20));
        assert_eq!(cache.entries.len(), 2);

        cache.insert("c.test".to_owned(), vec![ip(3)], start + Duration::from_secs(40));
        assert_eq!(cache.entries.len(), 2);
        assert_eq!(cache.get("a.test", start + Duration::from_secs(40)), None);
        assert_eq!(cache.get("b.test", start + Duration::from_secs(40)), Some(vec![ip(2)]));
    }

    #[tokio::test]
    async fn caching_resolver_answers_from_cache() {
        let inner = CountingResolver {
            answer: vec![SocketAddr::new(ip(7), 1)],
            calls: Cell::new(0),
        };
        let resolver = CachingResolver::new(inner, TTL);

        let first = resolver.resolve("cached.test", 80).await.unwrap();
        let second = resolver.resolve("cached.test", 443).await.unwrap();

        assert_eq!(first, vec![SocketAddr::new(ip(7), 1)]);
        assert_eq!(second, vec![SocketAddr::new(ip(7), 443)]);
        assert_eq!(resolver.inner.calls.get(), 1);
    }

    #[tokio::test]
    async fn failures_and_empty_answers_are_not_cached() {
        let inner = CountingResolver {
            answer: Vec::new(),
            calls: Cell::new(0),
        };
        let resolver = CachingResolver::new(inner, TTL);

        assert!(resolver.resolve("missing.test", 80).await.is_err());
        assert!(resolver.resolve("missing.test", 80).await.is_err());
        assert!(resolver.resolve("empty.test", 80).await.unwrap().is_empty());
        assert!(resolver.resolve("empty.test", 80).await.unwrap().is_empty());

        assert_eq!(resolver.inner.calls.get(), 4);
        assert!(resolver.cache.borrow().entries.is_empty());
    }

    #[tokio::test]
    async fn system_resolver_handles_literals() {
        let addresses = SystemResolver.resolve("127.0.0.1", 8080).await.unwrap();
        assert_eq!(addresses, vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080)]);
    }

    #[test]
    fn resolver_is_cached_only_with_ttl() {
        assert!(matches!(Resolver::new(None), Resolver::Direct(_)));
        assert!(matches!(Resolver::new(Some(TTL)), Resolver::Cached(_)));
    }
}
