// Pagination driver
//
// Turns "page 0 tells us how many results there are" into a finite, ordered
// sequence of page fetches. One page at a time, in index order, on a single
// task; the only waits are the fetcher's backoff and the pacing delay here.

use crate::cache::{CacheKey, CachedFetcher, Origin};
use crate::error::RunError;
use crate::extract::RecordExtractor;
use crate::record::Record;
use futures::{Stream, TryStreamExt, stream};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use trawler_scanner::{FetchPolicy, FetchRequest, FetchResult, FetchStatus, Method, Transport};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

const PLACEHOLDERS: &[&str] = &["{page}", "{offset}", "{page1}"];

/// Maps a page index to the request for that page.
pub trait PageSource: Send + Sync {
    fn page_url(&self, page_index: u32) -> Result<String, RunError>;

    fn cache_key(&self, page_index: u32, request: &FetchRequest) -> CacheKey;

    fn request(&self, page_index: u32) -> Result<FetchRequest, RunError> {
        Ok(FetchRequest::new(self.page_url(page_index)?))
    }
}

fn has_placeholder(text: &str) -> bool {
    PLACEHOLDERS.iter().any(|p| text.contains(p))
}

/// URL template with `{page}` (0-based), `{page1}` (1-based) or
/// `{offset}` (`page * page_size`) placeholders. For POST searches the
/// placeholder may sit in the body template instead.
#[derive(Debug, Clone)]
pub struct UrlTemplate {
    template: String,
    source: String,
    page_size: u32,
    method: Method,
    body_template: Option<String>,
    headers: BTreeMap<String, String>,
    markers: BTreeSet<String>,
}

impl UrlTemplate {
    pub fn new(template: &str, source: &str, page_size: u32) -> Result<Self, RunError> {
        Self::build(template, source, page_size, Method::Get, None)
    }

    /// A POST search whose page number travels in the body, e.g. a JSON
    /// query or a form postback.
    pub fn post(
        template: &str,
        body_template: &str,
        source: &str,
        page_size: u32,
    ) -> Result<Self, RunError> {
        Self::build(
            template,
            source,
            page_size,
            Method::Post,
            Some(body_template.to_string()),
        )
    }

    fn build(
        template: &str,
        source: &str,
        page_size: u32,
        method: Method,
        body_template: Option<String>,
    ) -> Result<Self, RunError> {
        let in_body = body_template.as_deref().map(has_placeholder).unwrap_or(false);
        if !has_placeholder(template) && !in_body {
            return Err(RunError::Configuration(format!(
                "URL template {:?} has no page placeholder ({})",
                template,
                PLACEHOLDERS.join(", ")
            )));
        }
        if page_size == 0 {
            return Err(RunError::Configuration("page size must be positive".to_string()));
        }
        let template = Self {
            template: template.to_string(),
            source: source.to_string(),
            page_size,
            method,
            body_template,
            headers: BTreeMap::new(),
            markers: BTreeSet::new(),
        };
        template.page_url(0)?;
        Ok(template)
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.markers.extend(markers.into_iter().map(Into::into));
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn method(&self) -> Method {
        self.method
    }

    fn render(&self, text: &str, page_index: u32) -> String {
        let offset = page_index as u64 * self.page_size as u64;
        text.replace("{page1}", &(page_index as u64 + 1).to_string())
            .replace("{page}", &page_index.to_string())
            .replace("{offset}", &offset.to_string())
    }
}

impl PageSource for UrlTemplate {
    fn page_url(&self, page_index: u32) -> Result<String, RunError> {
        let url = self.render(&self.template, page_index);
        match url::Url::parse(&url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(url),
            Ok(parsed) => Err(RunError::Configuration(format!(
                "unsupported scheme {:?} in {}",
                parsed.scheme(),
                url
            ))),
            Err(e) => Err(RunError::Configuration(format!("invalid URL {}: {}", url, e))),
        }
    }

    fn cache_key(&self, page_index: u32, request: &FetchRequest) -> CacheKey {
        CacheKey::for_page(&self.source, page_index, request)
    }

    fn request(&self, page_index: u32) -> Result<FetchRequest, RunError> {
        let mut request = FetchRequest::new(self.page_url(page_index)?)
            .with_method(self.method)
            .with_headers(self.headers.clone())
            .with_markers(self.markers.iter().cloned());
        if let Some(body) = &self.body_template {
            request = request.with_body(self.render(body, page_index));
        }
        Ok(request)
    }
}

/// Wait between consecutive network fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelayPolicy {
    #[default]
    None,
    Fixed(Duration),
    Uniform { min: Duration, max: Duration },
}

impl DelayPolicy {
    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        match (min_ms, max_ms) {
            (0, 0) => DelayPolicy::None,
            (min, max) if max <= min => DelayPolicy::Fixed(Duration::from_millis(min)),
            (min, max) => DelayPolicy::Uniform {
                min: Duration::from_millis(min),
                max: Duration::from_millis(max),
            },
        }
    }

    pub fn sample(&self) -> Duration {
        match *self {
            DelayPolicy::None => Duration::ZERO,
            DelayPolicy::Fixed(d) => d,
            DelayPolicy::Uniform { min, max } if max > min => {
                let ms = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
                Duration::from_millis(ms)
            }
            DelayPolicy::Uniform { min, .. } => min,
        }
    }
}

/// Shared cancellation switch, flipped from a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub page_size: u32,
    pub start_page: u32,
    /// Upper bound on page indices, counted from page 0.
    pub max_pages: Option<u32>,
    pub max_records: Option<u64>,
    pub failure_threshold: u32,
    pub fetch_policy: FetchPolicy,
    pub prefer_cache: bool,
    pub delay: DelayPolicy,
    pub long_pause_every: Option<u32>,
    pub long_pause: DelayPolicy,
    pub cancel: CancelFlag,
    pub deadline: Option<Instant>,
}

impl DriverOptions {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            start_page: 0,
            max_pages: None,
            max_records: None,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            fetch_policy: FetchPolicy::default(),
            prefer_cache: false,
            delay: DelayPolicy::None,
            long_pause_every: None,
            long_pause: DelayPolicy::None,
            cancel: CancelFlag::new(),
            deadline: None,
        }
    }

    pub fn with_start_page(mut self, start_page: u32) -> Self {
        self.start_page = start_page;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn with_max_records(mut self, max_records: u64) -> Self {
        self.max_records = Some(max_records);
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    pub fn with_prefer_cache(mut self, prefer_cache: bool) -> Self {
        self.prefer_cache = prefer_cache;
        self
    }

    pub fn with_delay(mut self, delay: DelayPolicy) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_long_pause(mut self, every: u32, pause: DelayPolicy) -> Self {
        self.long_pause_every = (every > 0).then_some(every);
        self.long_pause = pause;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub page_index: u32,
    pub total_pages: u32,
    pub items_per_page: u32,
}

impl PageCursor {
    fn new(items_per_page: u32) -> Self {
        Self {
            page_index: 0,
            total_pages: 1,
            items_per_page,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    AwaitingFirstPage,
    Paging,
    Exhausted,
    Aborted,
    Cancelled,
}

impl DriverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverState::AwaitingFirstPage => "awaiting_first_page",
            DriverState::Paging => "paging",
            DriverState::Exhausted => "exhausted",
            DriverState::Aborted => "aborted",
            DriverState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DriverState::Exhausted | DriverState::Aborted | DriverState::Cancelled
        )
    }
}

/// What happened to one page. Skipped pages carry no records.
#[derive(Debug, Clone)]
pub struct PageBatch {
    pub page_index: u32,
    pub status: FetchStatus,
    pub origin: Origin,
    pub attempts: u32,
    pub error: Option<String>,
    pub records: Vec<Record>,
}

impl PageBatch {
    pub fn is_skipped(&self) -> bool {
        self.status != FetchStatus::Success
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverStats {
    pub total_results: Option<u64>,
    pub total_pages: u32,
    pub network_fetches: u32,
    pub cache_hits: u32,
    pub pages_skipped: u32,
    pub records_emitted: u64,
}

struct FetchedPage {
    result: FetchResult,
    origin: Origin,
}

pub struct PaginationDriver<T: Transport> {
    fetcher: CachedFetcher<T>,
    source: Box<dyn PageSource>,
    extractor: Box<dyn RecordExtractor>,
    options: DriverOptions,
    state: DriverState,
    cursor: PageCursor,
    first_page: Option<FetchedPage>,
    consecutive_failures: u32,
    last_failed_page: u32,
    network_since_pause: u32,
    pace_before_next: bool,
    stats: DriverStats,
}

impl<T: Transport> PaginationDriver<T> {
    pub fn new(
        fetcher: CachedFetcher<T>,
        source: Box<dyn PageSource>,
        extractor: Box<dyn RecordExtractor>,
        options: DriverOptions,
    ) -> Self {
        let fetcher = fetcher.with_prefer_cache(options.prefer_cache);
        let cursor = PageCursor::new(options.page_size);
        Self {
            fetcher,
            source,
            extractor,
            options,
            state: DriverState::AwaitingFirstPage,
            cursor,
            first_page: None,
            consecutive_failures: 0,
            last_failed_page: 0,
            network_since_pause: 0,
            pace_before_next: false,
            stats: DriverStats::default(),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn cursor(&self) -> PageCursor {
        self.cursor
    }

    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    /// The circuit-breaker error, once the driver has aborted on it.
    pub fn abort_error(&self) -> Option<RunError> {
        (self.state == DriverState::Aborted && self.consecutive_failures > 0).then(|| {
            RunError::Aborted {
                consecutive: self.consecutive_failures,
                last_page: self.last_failed_page,
            }
        })
    }

    fn stop_requested(&self) -> bool {
        self.options.cancel.is_cancelled()
            || self
                .options
                .deadline
                .map(|deadline| Instant::now() >= deadline)
                .unwrap_or(false)
    }

    fn budget_spent(&self) -> bool {
        self.options
            .max_records
            .map(|max| self.stats.records_emitted >= max)
            .unwrap_or(false)
    }

    /// Sleeps between network fetches. Cache hits never set the flag, so a
    /// run served entirely from disk does not wait.
    async fn pace(&mut self) {
        if !self.pace_before_next {
            return;
        }
        self.pace_before_next = false;

        let mut delay = self.options.delay.sample();
        if let Some(every) = self.options.long_pause_every {
            if self.network_since_pause >= every {
                self.network_since_pause = 0;
                let pause = self.options.long_pause.sample();
                info!("Taking a longer break of {:?}", pause);
                delay += pause;
            }
        }
        if !delay.is_zero() {
            debug!("Waiting {:?} before next page", delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn fetch_page(&mut self, page_index: u32) -> Result<FetchedPage, RunError> {
        let request = self.source.request(page_index)?;
        let key = self.source.cache_key(page_index, &request);
        let fetched = self
            .fetcher
            .fetch(&request, &key, &self.options.fetch_policy)
            .await?;

        match fetched.origin {
            Origin::Cache => self.stats.cache_hits += 1,
            Origin::Network => {
                self.stats.network_fetches += 1;
                self.network_since_pause += 1;
                self.pace_before_next = true;
            }
        }
        Ok(FetchedPage {
            result: fetched.result,
            origin: fetched.origin,
        })
    }

    async fn load_first_page(&mut self) -> Result<(), RunError> {
        if self.stop_requested() {
            self.state = DriverState::Cancelled;
            return Ok(());
        }

        let first = self.fetch_page(0).await?;
        let Some(body) = first.result.body.as_deref() else {
            self.state = DriverState::Aborted;
            return Err(RunError::FirstPage {
                status: first.result.status,
                reason: first.result.last_error.unwrap_or_default(),
            });
        };

        let total = match self.extractor.total_results(body) {
            Ok(total) => total,
            Err(e) => {
                self.state = DriverState::Aborted;
                return Err(RunError::PermanentParse {
                    page: 0,
                    reason: e.to_string(),
                });
            }
        };

        let page_size = self.options.page_size.max(1) as u64;
        let mut total_pages = u32::try_from(total.div_ceil(page_size)).unwrap_or(u32::MAX);
        if let Some(max_pages) = self.options.max_pages {
            total_pages = total_pages.min(max_pages);
        }
        info!(
            "{} results across {} page(s) of {}",
            total, total_pages, page_size
        );

        self.stats.total_results = Some(total);
        self.stats.total_pages = total_pages;
        self.cursor.total_pages = total_pages;
        self.cursor.page_index = self.options.start_page;
        if self.options.start_page == 0 {
            self.first_page = Some(first);
        }
        self.state = DriverState::Paging;
        Ok(())
    }

    /// Next page in index order, or `None` once the driver is terminal.
    pub async fn next_page(&mut self) -> Result<Option<PageBatch>, RunError> {
        if self.state == DriverState::AwaitingFirstPage {
            self.load_first_page().await?;
        }
        if self.state != DriverState::Paging {
            return Ok(None);
        }

        if self.cursor.page_index >= self.cursor.total_pages || self.budget_spent() {
            info!("Pagination exhausted at page {}", self.cursor.page_index);
            self.state = DriverState::Exhausted;
            return Ok(None);
        }

        let page_index = self.cursor.page_index;
        let fetched = match self.first_page.take() {
            Some(first) if page_index == 0 => first,
            _ => {
                self.pace().await;
                if self.stop_requested() {
                    info!("Stopping before page {}", page_index);
                    self.state = DriverState::Cancelled;
                    return Ok(None);
                }
                self.fetch_page(page_index).await?
            }
        };
        self.cursor.page_index += 1;

        let FetchedPage { result, origin } = fetched;
        let Some(body) = result.body else {
            self.consecutive_failures += 1;
            self.last_failed_page = page_index;
            self.stats.pages_skipped += 1;
            warn!(
                "Skipping page {} ({}): {}",
                page_index,
                result.status.as_str(),
                result.last_error.as_deref().unwrap_or("no detail")
            );
            if self.consecutive_failures >= self.options.failure_threshold {
                warn!(
                    "{} consecutive page failures, aborting",
                    self.consecutive_failures
                );
                self.state = DriverState::Aborted;
            }
            return Ok(Some(PageBatch {
                page_index,
                status: result.status,
                origin,
                attempts: result.attempt_count,
                error: result.last_error,
                records: Vec::new(),
            }));
        };
        self.consecutive_failures = 0;

        let mut records = self
            .extractor
            .extract(&body, page_index)
            .map_err(|e| {
                self.state = DriverState::Aborted;
                RunError::PermanentParse {
                    page: page_index,
                    reason: e.to_string(),
                }
            })?;

        if let Some(max) = self.options.max_records {
            let remaining = max.saturating_sub(self.stats.records_emitted);
            records.truncate(usize::try_from(remaining).unwrap_or(usize::MAX));
        }
        self.stats.records_emitted += records.len() as u64;
        debug!("Page {} yielded {} record(s)", page_index, records.len());

        Ok(Some(PageBatch {
            page_index,
            status: FetchStatus::Success,
            origin,
            attempts: result.attempt_count,
            error: None,
            records,
        }))
    }

    /// Lazy, finite stream of records in page order. Ends with
    /// [`RunError::Aborted`] if the circuit breaker trips.
    pub fn records(self) -> impl Stream<Item = Result<Record, RunError>> {
        stream::try_unfold(self, |mut driver| async move {
            let next = match driver.next_page().await? {
                Some(batch) => Some((batch.records, driver)),
                None => {
                    if let Some(err) = driver.abort_error() {
                        return Err(err);
                    }
                    None
                }
            };
            Ok::<_, RunError>(next)
        })
        .map_ok(|records| stream::iter(records.into_iter().map(Ok::<Record, RunError>)))
        .try_flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_requires_placeholder() {
        let err = UrlTemplate::new("https://example.com/search", "s", 10).unwrap_err();
        assert!(matches!(err, RunError::Configuration(_)));
    }

    #[test]
    fn test_template_rejects_invalid_url() {
        assert!(UrlTemplate::new("not a url?page={page}", "s", 10).is_err());
        assert!(UrlTemplate::new("ftp://example.com/?p={page}", "s", 10).is_err());
    }

    #[test]
    fn test_template_placeholders() {
        let t = UrlTemplate::new(
            "https://example.com/s?page={page}&p1={page1}&from={offset}",
            "s",
            75,
        )
        .unwrap();
        assert_eq!(
            t.page_url(2).unwrap(),
            "https://example.com/s?page=2&p1=3&from=150"
        );
        let request = t.request(2).unwrap();
        assert!(t.cache_key(2, &request).as_str().starts_with("s_2_"));
    }

    #[test]
    fn test_post_template_renders_body() {
        let t = UrlTemplate::post(
            "https://api.example.com/v3/notices/search",
            r#"{"query":"TD=[C]","page":{page1},"limit":{offset}}"#,
            "ted",
            50,
        )
        .unwrap();
        let request = t.request(1).unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.url, "https://api.example.com/v3/notices/search");
        assert_eq!(
            request.body.as_deref(),
            Some(r#"{"query":"TD=[C]","page":2,"limit":50}"#)
        );
        assert_ne!(
            t.cache_key(1, &request),
            t.cache_key(1, &t.request(2).unwrap())
        );
    }

    #[test]
    fn test_post_template_requires_placeholder_somewhere() {
        let err = UrlTemplate::post("https://api.example.com/search", "{}", "s", 10).unwrap_err();
        assert!(matches!(err, RunError::Configuration(_)));
    }

    #[test]
    fn test_same_source_different_queries_get_distinct_keys() {
        let visium = UrlTemplate::new("https://example.com/s?q=visium&page={page}", "s", 10).unwrap();
        let merfish = UrlTemplate::new("https://example.com/s?q=merfish&page={page}", "s", 10).unwrap();
        let a = visium.cache_key(0, &visium.request(0).unwrap());
        let b = merfish.cache_key(0, &merfish.request(0).unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn test_request_carries_headers_and_markers() {
        let mut headers = BTreeMap::new();
        headers.insert("user-agent".to_string(), "trawler".to_string());
        let t = UrlTemplate::new("https://example.com/?page={page}", "s", 10)
            .unwrap()
            .with_headers(headers)
            .with_markers(["summary"]);
        let request = t.request(0).unwrap();
        assert_eq!(request.headers.get("user-agent").map(String::as_str), Some("trawler"));
        assert!(request.validation_markers.contains("summary"));
    }

    #[test]
    fn test_delay_policy() {
        assert_eq!(DelayPolicy::from_millis(0, 0), DelayPolicy::None);
        assert_eq!(
            DelayPolicy::from_millis(500, 500),
            DelayPolicy::Fixed(Duration::from_millis(500))
        );
        let uniform = DelayPolicy::from_millis(100, 200);
        for _ in 0..50 {
            let d = uniform.sample();
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
