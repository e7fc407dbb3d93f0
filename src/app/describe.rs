use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, sleep_until};
use tracing::{info, warn};

use super::error::Result;
use super::extract::Extractor;
use super::fetch::{CachedFetcher, FetchOutcome, PageTransport};
use super::types::Identifier;

/// Resolves an identifier to its description; `None` means "nothing to show".
pub trait DescriptionSource {
    fn describe(&mut self, id: &Identifier) -> impl Future<Output = Result<Option<String>>>;
}

impl DescriptionSource for HashMap<Identifier, String> {
    async fn describe(&mut self, id: &Identifier) -> Result<Option<String>> {
        Ok(self
            .get(id)
            .filter(|text| !text.trim().is_empty())
            .cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupSource {
    Cached,
    Downloaded,
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct Lookup {
    pub identifier: Identifier,
    pub url: String,
    pub source: LookupSource,
    pub description_chars: usize,
    pub recorded_at: String,
}

impl Lookup {
    pub fn is_skip(&self) -> bool {
        matches!(self.source, LookupSource::Unavailable(_)) || self.description_chars == 0
    }
}

/// Fetch + extract on demand, memoized for the run, with a pause between
/// requests that reach the network.
pub struct LiveDescriptions<T> {
    fetcher: CachedFetcher<T>,
    extractor: Extractor,
    settled: HashMap<Identifier, Option<String>>,
    lookups: Vec<Lookup>,
    delay: Duration,
    last_request: Option<Instant>,
}

impl<T: PageTransport> LiveDescriptions<T> {
    pub fn new(fetcher: CachedFetcher<T>, extractor: Extractor, delay: Duration) -> Self {
        Self {
            fetcher,
            extractor,
            settled: HashMap::new(),
            lookups: Vec::new(),
            delay,
            last_request: None,
        }
    }

    pub fn lookups(&self) -> &[Lookup] {
        &self.lookups
    }

    pub fn fetcher(&self) -> &CachedFetcher<T> {
        &self.fetcher
    }

    pub fn is_settled(&self, id: &Identifier) -> bool {
        self.settled.contains_key(id)
    }

    async fn pace(&mut self) {
        if let Some(last) = self.last_request {
            sleep_until(last + self.delay).await;
        }
    }

    async fn load(&mut self, id: &Identifier) -> Result<Option<String>> {
        let will_request = !self.fetcher.is_cached(id) && self.fetcher.url_for(id).is_some();
        if will_request {
            self.pace().await;
        }

        let outcome = self.fetcher.fetch(id).await?;
        if outcome.hit_network() {
            self.last_request = Some(Instant::now());
        }

        let description = outcome
            .body()
            .map(|body| self.extractor.extract(body))
            .unwrap_or_default();
        match (&outcome, description.is_empty()) {
            (FetchOutcome::Unavailable { .. }, _) => {}
            (_, true) => warn!(%id, "no description found, heuristic matched nothing"),
            (_, false) => info!(%id, chars = description.chars().count(), "description found"),
        }

        self.lookups.push(Lookup {
            identifier: id.clone(),
            url: self
                .fetcher
                .url_for(id)
                .map(|url| url.to_string())
                .unwrap_or_default(),
            source: match outcome {
                FetchOutcome::Cached(_) => LookupSource::Cached,
                FetchOutcome::Downloaded(_) => LookupSource::Downloaded,
                FetchOutcome::Unavailable { reason, .. } => LookupSource::Unavailable(reason),
            },
            description_chars: description.chars().count(),
            recorded_at: Utc::now().to_rfc3339(),
        });

        let description = (!description.is_empty()).then_some(description);
        self.settled.insert(id.clone(), description.clone());
        Ok(description)
    }
}

impl<T: PageTransport> DescriptionSource for LiveDescriptions<T> {
    async fn describe(&mut self, id: &Identifier) -> Result<Option<String>> {
        if let Some(known) = self.settled.get(id) {
            return Ok(known.clone());
        }
        self.load(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::fetch::TransportError;
    use crate::app::fetch::tests::FakeTransport;
    use crate::app::types::HeuristicConfig;
    use url::Url;

    fn detail_page(text: &str) -> String {
        format!("<html><body><header>Menu</header><div class=\"desc\">{text}</div></body></html>")
    }

    fn live(transport: FakeTransport, dir: &std::path::Path, delay: Duration) -> LiveDescriptions<FakeTransport> {
        let base = Url::parse("https://ar.computrabajo.com").unwrap();
        let fetcher = CachedFetcher::new(transport, dir, base).unwrap();
        let extractor = Extractor::new(&HeuristicConfig::default()).unwrap();
        LiveDescriptions::new(fetcher, extractor, delay)
    }

    #[tokio::test]
    async fn map_source_treats_blank_text_as_missing() {
        let mut known = HashMap::new();
        known.insert(Identifier::from_href("/a").unwrap(), "Texto".to_string());
        known.insert(Identifier::from_href("/b").unwrap(), "  \n".to_string());

        let a = known.describe(&Identifier::from_href("/a").unwrap()).await.unwrap();
        let b = known.describe(&Identifier::from_href("/b").unwrap()).await.unwrap();
        let c = known.describe(&Identifier::from_href("/c").unwrap()).await.unwrap();
        assert_eq!(a.as_deref(), Some("Texto"));
        assert_eq!(b, None);
        assert_eq!(c, None);
    }

    #[tokio::test]
    async fn failures_are_settled_and_not_requested_twice() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::default().with("/b", Err(TransportError::Status(503)));
        let mut source = live(transport, dir.path(), Duration::ZERO);
        let id = Identifier::from_href("/b").unwrap();

        assert_eq!(source.describe(&id).await.unwrap(), None);
        assert_eq!(source.describe(&id).await.unwrap(), None);

        assert_eq!(source.fetcher().transport().calls.get(), 1);
        assert_eq!(source.lookups().len(), 1);
        assert!(source.lookups()[0].is_skip());
        assert_eq!(
            source.lookups()[0].source,
            LookupSource::Unavailable("http 503".to_string())
        );
    }

    #[tokio::test]
    async fn downloaded_page_is_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let text = "Buscamos administrativo contable. ".repeat(12);
        let transport = FakeTransport::default().with("/a", Ok(detail_page(&text)));
        let mut source = live(transport, dir.path(), Duration::ZERO);
        let id = Identifier::from_href("/a").unwrap();

        let description = source.describe(&id).await.unwrap().unwrap();

        assert_eq!(description, text.trim());
        assert_eq!(source.lookups()[0].source, LookupSource::Downloaded);
        assert!(source.is_settled(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_downloads_are_spaced_by_delay() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::default()
            .with("/a", Ok(detail_page("uno")))
            .with("/b", Ok(detail_page("dos")));
        let mut source = live(transport, dir.path(), Duration::from_secs(2));

        let started = Instant::now();
        source.describe(&Identifier::from_href("/a").unwrap()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        source.describe(&Identifier::from_href("/b").unwrap()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_identifier_is_not_delayed() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::default().with("/a", Ok(detail_page("uno")));
        let mut source = live(transport, dir.path(), Duration::from_secs(2));
        let broken = Identifier::from_href("http://[::1").unwrap();

        let started = Instant::now();
        source.describe(&Identifier::from_href("/a").unwrap()).await.unwrap();
        assert_eq!(source.describe(&broken).await.unwrap(), None);

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(source.fetcher().transport().calls.get(), 1);
        assert!(matches!(source.lookups()[1].source, LookupSource::Unavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hits_are_not_delayed() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::default().with("/a", Ok(detail_page("uno")));
        let mut source = live(transport, dir.path(), Duration::from_secs(2));
        std::fs::write(
            source.fetcher().cache_path(&Identifier::from_href("/b").unwrap()),
            detail_page("dos"),
        )
        .unwrap();

        let started = Instant::now();
        source.describe(&Identifier::from_href("/a").unwrap()).await.unwrap();
        source.describe(&Identifier::from_href("/b").unwrap()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
