use std::fmt;
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use tracing::{debug, info, warn};
use url::Url;

use super::data_io::write_atomic;
use super::error::{FillError, Result};
use super::types::Identifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// DNS, connect, timeout or body read failure.
    Request(String),
    Status(u16),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Request(err) => write!(f, "network error: {err}"),
            TransportError::Status(code) => write!(f, "http {code}"),
        }
    }
}

/// One GET, no retries.
pub trait PageTransport {
    fn get(&self, url: &Url) -> impl Future<Output = Result<String, TransportError>>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str, accept_language: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(accept_language) {
            Ok(value) => {
                headers.insert(ACCEPT_LANGUAGE, value);
            }
            Err(_) => warn!(accept_language, "ignoring invalid accept-language value"),
        }

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl PageTransport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<String, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| TransportError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        response
            .text()
            .await
            .map_err(|err| TransportError::Request(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Cached(String),
    Downloaded(String),
    Unavailable { reason: String, requested: bool },
}

impl FetchOutcome {
    pub fn body(&self) -> Option<&str> {
        match self {
            FetchOutcome::Cached(body) | FetchOutcome::Downloaded(body) => Some(body),
            FetchOutcome::Unavailable { .. } => None,
        }
    }

    pub fn hit_network(&self) -> bool {
        match self {
            FetchOutcome::Cached(_) => false,
            FetchOutcome::Downloaded(_) => true,
            FetchOutcome::Unavailable { requested, .. } => *requested,
        }
    }
}

/// Detail-page fetcher backed by a write-once directory of bodies.
pub struct CachedFetcher<T> {
    transport: T,
    cache_dir: PathBuf,
    base_url: Url,
}

impl<T: PageTransport> CachedFetcher<T> {
    pub fn new(transport: T, cache_dir: impl Into<PathBuf>, base_url: Url) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir).map_err(FillError::at(&cache_dir))?;
        Ok(Self {
            transport,
            cache_dir,
            base_url,
        })
    }

    pub fn cache_path(&self, id: &Identifier) -> PathBuf {
        self.cache_dir.join(id.cache_file_name())
    }

    pub fn is_cached(&self, id: &Identifier) -> bool {
        self.cache_path(id).is_file()
    }

    pub fn url_for(&self, id: &Identifier) -> Option<Url> {
        self.base_url.join(id.as_str()).ok()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Cache first; on a miss a single request, persisted only on success.
    /// Only filesystem failures are errors.
    pub async fn fetch(&self, id: &Identifier) -> Result<FetchOutcome> {
        let path = self.cache_path(id);
        if path.is_file() {
            debug!(%id, cache = %path.display(), "using cached detail page");
            let body = fs::read_to_string(&path).map_err(FillError::at(&path))?;
            return Ok(FetchOutcome::Cached(body));
        }

        let Some(url) = self.url_for(id) else {
            return Ok(FetchOutcome::Unavailable {
                reason: format!("cannot resolve against {}", self.base_url),
                requested: false,
            });
        };

        info!(%url, "downloading detail page");
        match self.transport.get(&url).await {
            Ok(body) => {
                write_atomic(&path, body.as_bytes())?;
                Ok(FetchOutcome::Downloaded(body))
            }
            Err(err) => {
                warn!(%url, error = %err, "detail page unavailable, not caching");
                Ok(FetchOutcome::Unavailable {
                    reason: err.to_string(),
                    requested: true,
                })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    /// Serves canned answers by path and counts every request.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pub pages: HashMap<String, Result<String, TransportError>>,
        pub calls: Cell<usize>,
        pub requested: RefCell<Vec<String>>,
    }

    impl FakeTransport {
        pub(crate) fn with(mut self, path: &str, answer: Result<String, TransportError>) -> Self {
            self.pages.insert(path.to_string(), answer);
            self
        }
    }

    impl PageTransport for FakeTransport {
        async fn get(&self, url: &Url) -> Result<String, TransportError> {
            self.calls.set(self.calls.get() + 1);
            self.requested.borrow_mut().push(url.path().to_string());
            self.pages
                .get(url.path())
                .cloned()
                .unwrap_or_else(|| Err(TransportError::Request("operation timed out".to_string())))
        }
    }

    fn base() -> Url {
        Url::parse("https://ar.computrabajo.com").unwrap()
    }

    fn id(raw: &str) -> Identifier {
        Identifier::from_href(raw).unwrap()
    }

    #[tokio::test]
    async fn second_fetch_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::default().with("/oferta-1", Ok("<html>uno</html>".to_string()));
        let fetcher = CachedFetcher::new(transport, dir.path(), base()).unwrap();

        let first = fetcher.fetch(&id("/oferta-1")).await.unwrap();
        let second = fetcher.fetch(&id("/oferta-1")).await.unwrap();

        assert_eq!(first, FetchOutcome::Downloaded("<html>uno</html>".to_string()));
        assert_eq!(second, FetchOutcome::Cached("<html>uno</html>".to_string()));
        assert_eq!(first.body(), second.body());
        assert_eq!(fetcher.transport().calls.get(), 1);
        assert!(fetcher.is_cached(&id("/oferta-1")));
    }

    #[tokio::test]
    async fn error_status_is_absent_and_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::default().with("/gone", Err(TransportError::Status(404)));
        let fetcher = CachedFetcher::new(transport, dir.path(), base()).unwrap();

        let outcome = fetcher.fetch(&id("/gone")).await.unwrap();

        assert_eq!(outcome.body(), None);
        assert!(outcome.hit_network());
        assert!(!fetcher.cache_path(&id("/gone")).exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn transport_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = CachedFetcher::new(FakeTransport::default(), dir.path(), base()).unwrap();

        let outcome = fetcher.fetch(&id("/slow")).await.unwrap();

        assert!(matches!(outcome, FetchOutcome::Unavailable { requested: true, .. }));
        assert_eq!(fetcher.transport().calls.get(), 1);
        assert_eq!(*fetcher.transport().requested.borrow(), vec!["/slow".to_string()]);
    }

    #[tokio::test]
    async fn existing_cache_file_wins_over_network() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::default().with("/oferta-2", Ok("fresh".to_string()));
        let fetcher = CachedFetcher::new(transport, dir.path(), base()).unwrap();
        fs::write(fetcher.cache_path(&id("/oferta-2")), "stale").unwrap();

        let outcome = fetcher.fetch(&id("/oferta-2")).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Cached("stale".to_string()));
        assert!(!outcome.hit_network());
        assert_eq!(fetcher.transport().calls.get(), 0);
    }

    #[tokio::test]
    async fn unresolvable_identifier_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = CachedFetcher::new(FakeTransport::default(), dir.path(), base()).unwrap();

        let outcome = fetcher.fetch(&id("http://[::1")).await.unwrap();

        assert!(matches!(outcome, FetchOutcome::Unavailable { requested: false, .. }));
        assert!(!outcome.hit_network());
        assert_eq!(fetcher.transport().calls.get(), 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn identifiers_resolve_against_base_origin() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = CachedFetcher::new(FakeTransport::default(), dir.path(), base()).unwrap();
        let url = fetcher
            .url_for(&id("/ofertas-de-trabajo/oferta-de-trabajo-de-cajero-1"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://ar.computrabajo.com/ofertas-de-trabajo/oferta-de-trabajo-de-cajero-1"
        );
    }
}
