// Detail-page enrichment
//
// Some listings only carry a link per item; the fields worth keeping live on
// the item's own page. Each record's detail page goes through the response
// cache under an entity key (DOI, accession, URL), so a re-run reads it from
// disk. A detail page that cannot be fetched or parsed leaves its fields
// empty; it never fails the listing page it belongs to.

use crate::cache::{CacheKey, CachedFetcher, Origin};
use crate::error::RunError;
use crate::extract::DocumentExtractor;
use crate::paginate::DelayPolicy;
use crate::record::{FieldValue, Record};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use trawler_scanner::{FetchPolicy, FetchRequest, Transport};
use url::Url;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichStats {
    pub network_fetches: u32,
    pub cache_hits: u32,
    /// Records whose detail page was unreachable, blocked or unparseable.
    pub failed: u32,
    /// Records with no detail URL.
    pub missing_url: u32,
}

pub struct DetailEnricher<T: Transport> {
    fetcher: CachedFetcher<T>,
    extractor: Box<dyn DocumentExtractor>,
    source: String,
    url_field: String,
    key_field: Option<String>,
    base: Option<Url>,
    headers: BTreeMap<String, String>,
    markers: BTreeSet<String>,
    policy: FetchPolicy,
    delay: DelayPolicy,
    pace_before_next: bool,
    stats: EnrichStats,
}

impl<T: Transport> DetailEnricher<T> {
    pub fn new(
        fetcher: CachedFetcher<T>,
        extractor: Box<dyn DocumentExtractor>,
        source: &str,
        url_field: &str,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            source: source.to_string(),
            url_field: url_field.to_string(),
            key_field: None,
            base: None,
            headers: BTreeMap::new(),
            markers: BTreeSet::new(),
            policy: FetchPolicy::default(),
            delay: DelayPolicy::None,
            pace_before_next: false,
            stats: EnrichStats::default(),
        }
    }

    /// Field whose value names the entity in the cache, e.g. `doi`.
    /// Falls back to the detail URL.
    pub fn with_key_field(mut self, key_field: Option<String>) -> Self {
        self.key_field = key_field;
        self
    }

    /// Base that relative links such as `/content/10.1101/x` resolve against.
    pub fn with_base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
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

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_delay(mut self, delay: DelayPolicy) -> Self {
        self.delay = delay;
        self
    }

    pub fn stats(&self) -> &EnrichStats {
        &self.stats
    }

    pub fn field_names(&self) -> Vec<String> {
        self.extractor.field_names()
    }

    fn detail_url(&self, record: &Record) -> Option<String> {
        let raw = match record.get(&self.url_field)? {
            FieldValue::Text(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return None,
        };
        match &self.base {
            Some(base) => base.join(&raw).ok().map(String::from),
            None => Url::parse(&raw).ok().map(String::from),
        }
    }

    fn entity_id(&self, record: &Record, url: &str) -> String {
        self.key_field
            .as_deref()
            .and_then(|field| record.get(field))
            .map(FieldValue::to_cell)
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| url.to_string())
    }

    fn clear_fields(&self, record: &mut Record) {
        for name in self.extractor.field_names() {
            record.set(name, FieldValue::Null);
        }
    }

    async fn pace(&mut self) {
        if !self.pace_before_next {
            return;
        }
        self.pace_before_next = false;
        let delay = self.delay.sample();
        if !delay.is_zero() {
            debug!("Waiting {:?} before next detail page", delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Fills the detail fields of `record`. Only a cache write failure is
    /// an error.
    pub async fn enrich(&mut self, record: &mut Record) -> Result<(), RunError> {
        self.clear_fields(record);
        let Some(url) = self.detail_url(record) else {
            self.stats.missing_url += 1;
            debug!("Record has no usable {:?}, skipping detail", self.url_field);
            return Ok(());
        };

        let key = CacheKey::for_entity(&self.source, &self.entity_id(record, &url));
        let request = FetchRequest::new(url.as_str())
            .with_headers(self.headers.clone())
            .with_markers(self.markers.iter().cloned());

        self.pace().await;
        let fetched = self.fetcher.fetch(&request, &key, &self.policy).await?;
        match fetched.origin {
            Origin::Cache => self.stats.cache_hits += 1,
            Origin::Network => {
                self.stats.network_fetches += 1;
                self.pace_before_next = true;
            }
        }

        let Some(body) = fetched.result.body else {
            self.stats.failed += 1;
            warn!(
                "Detail page {} {}: {}",
                url,
                fetched.result.status.as_str(),
                fetched.result.last_error.as_deref().unwrap_or("no detail")
            );
            return Ok(());
        };

        match self.extractor.extract_document(&body) {
            Ok(detail) => {
                for (name, value) in detail.iter() {
                    record.set(name, value.clone());
                }
            }
            Err(e) => {
                self.stats.failed += 1;
                warn!("Could not parse detail page {}: {}", url, e);
            }
        }
        Ok(())
    }

    pub async fn enrich_all(&mut self, records: &mut [Record]) -> Result<(), RunError> {
        for record in records.iter_mut() {
            self.enrich(record).await?;
        }
        Ok(())
    }
}
