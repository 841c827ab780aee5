// Job files
//
// A job is one TOML file describing the target listing, how to pull records
// out of it, and where they go. Everything that can be checked before the
// first request is checked in `load_job`.

use crate::error::RunError;
use crate::extract::{
    DocumentExtractor, HtmlDocumentExtractor, HtmlExtractor, JsonDocumentExtractor, JsonExtractor,
    RecordExtractor,
};
use crate::paginate::{CancelFlag, DelayPolicy, DriverOptions, UrlTemplate};
use crate::sanitize::sanitize_filename;
use crate::sink::DEFAULT_PROVENANCE_COLUMN;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use trawler_scanner::{Backoff, FetchPolicy, MarkerClassifier, Method};

pub const KEYWORD_PLACEHOLDER: &str = "{keyword}";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub target: TargetConfig,
    pub extract: ExtractConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub detail: Option<DetailConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Used for cache keys and the journal.
    pub name: String,
    pub url_template: String,
    pub page_size: u32,
    #[serde(default)]
    pub method: Method,
    /// POST payload; may carry the page placeholder instead of the URL.
    #[serde(default)]
    pub body_template: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub validation_markers: Vec<String>,
    /// One run per keyword, substituted for `{keyword}` in the URL, the
    /// body and the output path.
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractKind {
    Html,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    /// CSS selector (optionally `selector@attr`) or JSON pointer.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    pub kind: ExtractKind,
    #[serde(default)]
    pub total_selector: Option<String>,
    #[serde(default)]
    pub total_pattern: Option<String>,
    #[serde(default)]
    pub item_selector: Option<String>,
    #[serde(default)]
    pub total_pointer: Option<String>,
    #[serde(default)]
    pub items_pointer: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

/// Per-record detail pages fetched after each listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailConfig {
    /// Listing field holding the detail link, absolute or relative.
    pub url_field: String,
    /// Listing field naming the entity in the cache, e.g. a DOI.
    #[serde(default)]
    pub key_field: Option<String>,
    /// Defaults to `extract.kind`.
    #[serde(default)]
    pub kind: Option<ExtractKind>,
    #[serde(default)]
    pub validation_markers: Vec<String>,
    pub fields: Vec<FieldConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default)]
    pub max_backoff_ms: Option<u64>,
    #[serde(default = "default_rate_limit_multiplier")]
    pub rate_limit_multiplier: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Replaces the built-in challenge signatures. Empty disables detection.
    #[serde(default)]
    pub block_markers: Option<Vec<String>>,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    2000
}
fn default_rate_limit_multiplier() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: None,
            rate_limit_multiplier: default_rate_limit_multiplier(),
            timeout_secs: default_timeout_secs(),
            user_agent: None,
            block_markers: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default)]
    pub start_page: u32,
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub max_records: Option<u64>,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default)]
    pub delay_min_ms: u64,
    #[serde(default)]
    pub delay_max_ms: u64,
    #[serde(default)]
    pub long_pause_every: u32,
    #[serde(default)]
    pub long_pause_min_ms: u64,
    #[serde(default)]
    pub long_pause_max_ms: u64,
}

fn default_failure_threshold() -> u32 {
    crate::paginate::DEFAULT_FAILURE_THRESHOLD
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            start_page: 0,
            max_pages: None,
            max_records: None,
            failure_threshold: default_failure_threshold(),
            delay_min_ms: 0,
            delay_max_ms: 0,
            long_pause_every: 0,
            long_pause_min_ms: 0,
            long_pause_max_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Defaults to the target name.
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub prefer_cache: bool,
}

fn default_true() -> bool {
    true
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
            namespace: None,
            prefer_cache: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_provenance_column")]
    pub provenance_column: String,
    /// Continue after the last page already present in `path`.
    #[serde(default = "default_true")]
    pub resume: bool,
}

fn default_provenance_column() -> String {
    DEFAULT_PROVENANCE_COLUMN.to_string()
}

fn expand(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

fn config_err(msg: impl Into<String>) -> RunError {
    RunError::Configuration(msg.into())
}

pub fn parse_job(content: &str) -> Result<JobConfig, RunError> {
    let mut job: JobConfig =
        toml::from_str(content).map_err(|e| config_err(format!("invalid job file: {}", e)))?;
    job.cache.dir = expand(&job.cache.dir);
    job.output.path = expand(&job.output.path);
    job.validate()?;
    Ok(job)
}

pub fn load_job(path: &Path) -> Result<JobConfig, RunError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| config_err(format!("cannot read job file {}: {}", path.display(), e)))?;
    parse_job(&content)
}

fn mentions_keyword(text: &str) -> bool {
    text.contains(KEYWORD_PLACEHOLDER)
}

/// Percent-encodes a keyword for a URL, spaces as `%20` so it also works
/// inside a path segment.
fn encode_keyword(keyword: &str) -> String {
    url::form_urlencoded::byte_serialize(keyword.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

impl JobConfig {
    /// One job per keyword, each with its own name, output file and cache
    /// namespace. A job without keywords expands to itself.
    pub fn expand_keywords(&self) -> Result<Vec<JobConfig>, RunError> {
        if self.target.keywords.is_empty() {
            return Ok(vec![self.clone()]);
        }
        let in_request = mentions_keyword(&self.target.url_template)
            || self.target.body_template.as_deref().is_some_and(mentions_keyword);
        if !in_request {
            return Err(config_err(
                "target.keywords is set but neither url_template nor body_template contains {keyword}",
            ));
        }
        if !mentions_keyword(&self.output.path.to_string_lossy()) {
            return Err(config_err(
                "output.path must contain {keyword} when target.keywords is set",
            ));
        }

        let mut seen = BTreeSet::new();
        let mut jobs = Vec::with_capacity(self.target.keywords.len());
        for keyword in &self.target.keywords {
            let keyword = keyword.trim();
            if keyword.is_empty() {
                return Err(config_err("target.keywords must not contain empty entries"));
            }
            let slug = sanitize_filename(keyword);
            if !seen.insert(slug.clone()) {
                return Err(config_err(format!("duplicate keyword {:?}", keyword)));
            }

            let mut job = self.clone();
            job.target.keywords.clear();
            job.target.name = format!("{}_{}", self.target.name, slug);
            job.target.url_template = self
                .target
                .url_template
                .replace(KEYWORD_PLACEHOLDER, &encode_keyword(keyword));
            job.target.body_template = self
                .target
                .body_template
                .as_ref()
                .map(|body| body.replace(KEYWORD_PLACEHOLDER, keyword));
            job.output.path = PathBuf::from(
                self.output
                    .path
                    .to_string_lossy()
                    .replace(KEYWORD_PLACEHOLDER, &slug),
            );
            if let Some(namespace) = &self.cache.namespace {
                job.cache.namespace = Some(format!("{}_{}", namespace, slug));
            }
            jobs.push(job);
        }
        Ok(jobs)
    }

    pub fn validate(&self) -> Result<(), RunError> {
        if !self.target.keywords.is_empty() {
            for job in self.expand_keywords()? {
                job.validate()?;
            }
            return Ok(());
        }
        let stray_keyword = mentions_keyword(&self.target.url_template)
            || self.target.body_template.as_deref().is_some_and(mentions_keyword)
            || mentions_keyword(&self.output.path.to_string_lossy());
        if stray_keyword {
            return Err(config_err("{keyword} is used but target.keywords is empty"));
        }

        if self.target.name.trim().is_empty() {
            return Err(config_err("target.name must not be empty"));
        }
        if self.target.page_size == 0 {
            return Err(config_err("target.page_size must be > 0"));
        }
        match (self.target.method, &self.target.body_template) {
            (Method::Get, Some(_)) => {
                return Err(config_err("target.body_template needs method = \"post\""));
            }
            (Method::Post, None) => {
                return Err(config_err("method = \"post\" needs target.body_template"));
            }
            _ => {}
        }
        self.page_source()?;

        if self.extract.fields.is_empty() {
            return Err(config_err("extract.fields must declare at least one field"));
        }
        let detail_fields = self.detail.iter().flat_map(|d| d.fields.iter());
        let mut seen = BTreeSet::new();
        for field in self.extract.fields.iter().chain(detail_fields) {
            if field.name == self.output.provenance_column {
                return Err(config_err(format!(
                    "field {:?} collides with the provenance column",
                    field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(config_err(format!("duplicate field {:?}", field.name)));
            }
        }
        self.extractor()?;

        if let Some(detail) = &self.detail {
            let listed = |name: &str| self.extract.fields.iter().any(|f| f.name == name);
            if !listed(&detail.url_field) {
                return Err(config_err(format!(
                    "detail.url_field {:?} is not an extract field",
                    detail.url_field
                )));
            }
            if let Some(key) = detail.key_field.as_deref().filter(|k| !listed(*k)) {
                return Err(config_err(format!(
                    "detail.key_field {:?} is not an extract field",
                    key
                )));
            }
            if detail.fields.is_empty() {
                return Err(config_err("detail.fields must declare at least one field"));
            }
            self.detail_extractor()?;
        }

        if self.pagination.failure_threshold == 0 {
            return Err(config_err("pagination.failure_threshold must be >= 1"));
        }
        if self.pagination.delay_max_ms != 0 && self.pagination.delay_max_ms < self.pagination.delay_min_ms {
            return Err(config_err("pagination.delay_max_ms must be >= delay_min_ms"));
        }
        if self.output.provenance_column.trim().is_empty() {
            return Err(config_err("output.provenance_column must not be empty"));
        }
        Ok(())
    }

    pub fn page_source(&self) -> Result<UrlTemplate, RunError> {
        let t = &self.target;
        let template = match (&t.method, &t.body_template) {
            (Method::Post, Some(body)) => UrlTemplate::post(&t.url_template, body, &t.name, t.page_size)?,
            _ => UrlTemplate::new(&t.url_template, &t.name, t.page_size)?,
        };
        Ok(template
            .with_headers(t.headers.clone())
            .with_markers(t.validation_markers.iter().cloned()))
    }

    pub fn extractor(&self) -> Result<Box<dyn RecordExtractor>, RunError> {
        let ex = &self.extract;
        let required = |value: &Option<String>, key: &str| {
            value
                .clone()
                .ok_or_else(|| config_err(format!("extract.{} is required for kind {:?}", key, ex.kind)))
        };
        match ex.kind {
            ExtractKind::Html => {
                let mut extractor = HtmlExtractor::new(
                    &required(&ex.total_selector, "total_selector")?,
                    ex.total_pattern.as_deref().unwrap_or(r"([\d,]+)"),
                    &required(&ex.item_selector, "item_selector")?,
                )
                .map_err(|e| config_err(e.to_string()))?;
                for field in &ex.fields {
                    extractor = extractor
                        .with_field(&field.name, &field.path)
                        .map_err(|e| config_err(e.to_string()))?;
                }
                Ok(Box::new(extractor))
            }
            ExtractKind::Json => {
                let mut extractor = JsonExtractor::new(
                    &required(&ex.total_pointer, "total_pointer")?,
                    &required(&ex.items_pointer, "items_pointer")?,
                );
                for field in &ex.fields {
                    extractor = extractor.with_field(&field.name, &field.path);
                }
                Ok(Box::new(extractor))
            }
        }
    }

    pub fn detail_kind(&self) -> Option<ExtractKind> {
        self.detail.as_ref().map(|d| d.kind.unwrap_or(self.extract.kind))
    }

    pub fn detail_extractor(&self) -> Result<Option<Box<dyn DocumentExtractor>>, RunError> {
        let (Some(detail), Some(kind)) = (&self.detail, self.detail_kind()) else {
            return Ok(None);
        };
        let extractor: Box<dyn DocumentExtractor> = match kind {
            ExtractKind::Html => {
                let mut extractor = HtmlDocumentExtractor::new();
                for field in &detail.fields {
                    extractor = extractor
                        .with_field(&field.name, &field.path)
                        .map_err(|e| config_err(e.to_string()))?;
                }
                Box::new(extractor)
            }
            ExtractKind::Json => Box::new(
                detail
                    .fields
                    .iter()
                    .fold(JsonDocumentExtractor::new(), |ex, f| ex.with_field(&f.name, &f.path)),
            ),
        };
        Ok(Some(extractor))
    }

    /// Declared output columns: extracted fields, detail fields, then
    /// provenance.
    pub fn output_fields(&self) -> Vec<String> {
        let detail_fields = self.detail.iter().flat_map(|d| d.fields.iter());
        self.extract
            .fields
            .iter()
            .chain(detail_fields)
            .map(|f| f.name.clone())
            .chain(std::iter::once(self.output.provenance_column.clone()))
            .collect()
    }

    pub fn cache_namespace(&self) -> &str {
        self.cache.namespace.as_deref().unwrap_or(&self.target.name)
    }

    pub fn detail_cache_namespace(&self) -> String {
        format!("{}_detail", self.cache_namespace())
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        let mut backoff = Backoff::new(Duration::from_millis(self.fetch.base_backoff_ms))
            .with_rate_limit_multiplier(self.fetch.rate_limit_multiplier);
        if let Some(max) = self.fetch.max_backoff_ms {
            backoff = backoff.with_max(Duration::from_millis(max));
        }
        FetchPolicy::new(self.fetch.max_retries, backoff.base()).with_backoff(backoff)
    }

    pub fn classifier(&self) -> MarkerClassifier {
        match &self.fetch.block_markers {
            None => MarkerClassifier::new(),
            Some(markers) if markers.is_empty() => MarkerClassifier::disabled(),
            Some(markers) => MarkerClassifier::with_markers(markers.iter().cloned()),
        }
    }

    pub fn driver_options(&self, cancel: CancelFlag) -> DriverOptions {
        let p = &self.pagination;
        let mut options = DriverOptions::new(self.target.page_size)
            .with_start_page(p.start_page)
            .with_failure_threshold(p.failure_threshold)
            .with_fetch_policy(self.fetch_policy())
            .with_prefer_cache(self.cache.prefer_cache)
            .with_delay(DelayPolicy::from_millis(p.delay_min_ms, p.delay_max_ms))
            .with_long_pause(
                p.long_pause_every,
                DelayPolicy::from_millis(p.long_pause_min_ms, p.long_pause_max_ms),
            )
            .with_cancel(cancel);
        if let Some(max_pages) = p.max_pages {
            options = options.with_max_pages(max_pages);
        }
        if let Some(max_records) = p.max_records {
            options = options.with_max_records(max_records);
        }
        options
    }
}

pub const SAMPLE_JOB: &str = r#"# Trawler job file

[target]
name = "biorxiv-visium"
url_template = "https://www.biorxiv.org/search/visium%20numresults%3A75%20sort%3Arelevance-rank?page={page}"
page_size = 75
validation_markers = ["highwire-search-summary"]

[target.headers]
user-agent = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
accept-language = "en-US,en;q=0.9"

[extract]
kind = "html"
total_selector = "div.highwire-search-summary"
total_pattern = '([\d,]+)\s+Results'
item_selector = ".highwire-search-results-list > li"

[[extract.fields]]
name = "title"
path = ".highwire-cite-linked-title > .highwire-cite-title"

[[extract.fields]]
name = "date"
path = ".highwire-cite-metadata-pages"

[[extract.fields]]
name = "authors"
path = ".highwire-cite-authors"

[[extract.fields]]
name = "url"
path = ".highwire-cite-linked-title@href"

[fetch]
max_retries = 3
base_backoff_ms = 2000
rate_limit_multiplier = 2
timeout_secs = 30

[pagination]
failure_threshold = 3
delay_min_ms = 1000
delay_max_ms = 3000
long_pause_every = 10
long_pause_min_ms = 5000
long_pause_max_ms = 10000

[cache]
dir = "cache"
prefer_cache = false

[output]
path = "biorxiv_visium.csv"
format = "csv"
provenance_column = "source_page"
resume = true

# One run per search term: put {keyword} in url_template (or body_template)
# and in output.path, then list the terms under [target]:
#   keywords = ["visium", "merfish"]
#
# POST searches take the page placeholder in the body instead:
#   method = "post"
#   body_template = '{"query": "{keyword}", "page": {page1}}'
#
# Fetch each record's own page and add fields from it:
# [detail]
# url_field = "url"
# [[detail.fields]]
# name = "posted"
# path = "meta[name='article:published_time']@content"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_job_is_valid() {
        let job = parse_job(SAMPLE_JOB).unwrap();
        assert_eq!(job.target.page_size, 75);
        assert_eq!(job.extract.kind, ExtractKind::Html);
        assert_eq!(
            job.output_fields(),
            vec!["title", "date", "authors", "url", "source_page"]
        );
        assert_eq!(job.cache_namespace(), "biorxiv-visium");
        assert_eq!(job.pagination.long_pause_every, 10);
    }

    #[test]
    fn test_defaults() {
        let job = parse_job(
            r#"
            [target]
            name = "t"
            url_template = "https://example.com/api?page={page}"
            page_size = 10
            [extract]
            kind = "json"
            total_pointer = "/total"
            items_pointer = "/items"
            fields = [{ name = "id", path = "/id" }]
            [output]
            path = "out.jsonl"
            format = "jsonl"
            "#,
        )
        .unwrap();
        assert_eq!(job.fetch.max_retries, 3);
        assert_eq!(job.pagination.failure_threshold, 3);
        assert!(job.cache.enabled);
        assert!(job.output.resume);
        assert_eq!(job.output.format, OutputFormat::Jsonl);
        assert_eq!(job.output.provenance_column, "source_page");

        let options = job.driver_options(CancelFlag::new());
        assert_eq!(options.page_size, 10);
        assert_eq!(options.delay, DelayPolicy::None);
        assert_eq!(options.fetch_policy.max_retries, 3);
    }

    #[test]
    fn test_missing_placeholder_rejected() {
        let content = SAMPLE_JOB.replace("?page={page}", "");
        assert!(matches!(parse_job(&content), Err(RunError::Configuration(_))));
    }

    #[test]
    fn test_html_requires_selectors() {
        let content = SAMPLE_JOB.replace("item_selector = \".highwire-search-results-list > li\"\n", "");
        let err = parse_job(&content).unwrap_err();
        assert!(err.to_string().contains("item_selector"));
    }

    #[test]
    fn test_provenance_collision_rejected() {
        let content = SAMPLE_JOB.replace("name = \"date\"", "name = \"source_page\"");
        assert!(parse_job(&content).is_err());
    }

    #[test]
    fn test_block_markers() {
        use trawler_scanner::{BlockClassifier, RawResponse};
        let mut job = parse_job(SAMPLE_JOB).unwrap();
        job.fetch.block_markers = Some(Vec::new());
        assert!(job.classifier().classify(&RawResponse::new(403, "captcha")).is_none());
        job.fetch.block_markers = None;
        assert!(job.classifier().classify(&RawResponse::new(403, "captcha")).is_some());
        assert!(job.classifier().classify(&RawResponse::new(200, "captcha")).is_none());
        job.fetch.block_markers = Some(vec!["Robot Check".to_string()]);
        assert!(job.classifier().classify(&RawResponse::new(200, "robot check")).is_some());
    }

    const KEYWORD_JOB: &str = r#"
        [target]
        name = "biorxiv"
        url_template = "https://www.biorxiv.org/search/{keyword}%20numresults%3A75?page={page}"
        page_size = 75
        keywords = ["visium", "spatial transcriptomics"]
        [extract]
        kind = "json"
        total_pointer = "/total"
        items_pointer = "/items"
        fields = [{ name = "id", path = "/id" }]
        [output]
        path = "out/{keyword}.csv"
        "#;

    #[test]
    fn test_keywords_expand_to_separate_runs() {
        let job = parse_job(KEYWORD_JOB).unwrap();
        let jobs = job.expand_keywords().unwrap();

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].target.name, "biorxiv_visium");
        assert_eq!(jobs[1].target.name, "biorxiv_spatial transcriptomics");
        assert_eq!(
            jobs[1].target.url_template,
            "https://www.biorxiv.org/search/spatial%20transcriptomics%20numresults%3A75?page={page}"
        );
        assert_eq!(jobs[0].output.path, PathBuf::from("out/visium.csv"));
        assert_ne!(jobs[0].cache_namespace(), jobs[1].cache_namespace());
        assert!(jobs.iter().all(|j| j.target.keywords.is_empty()));
        assert!(jobs.iter().all(|j| j.validate().is_ok()));
    }

    #[test]
    fn test_keywords_need_placeholders() {
        let no_output_slot = KEYWORD_JOB.replace("out/{keyword}.csv", "out.csv");
        let err = parse_job(&no_output_slot).unwrap_err();
        assert!(err.to_string().contains("output.path"));

        let stray = KEYWORD_JOB.replace(r#"keywords = ["visium", "spatial transcriptomics"]"#, "");
        assert!(parse_job(&stray).unwrap_err().to_string().contains("{keyword}"));

        let dup = KEYWORD_JOB.replace(r#""spatial transcriptomics""#, r#""visium""#);
        assert!(parse_job(&dup).is_err());
    }

    #[test]
    fn test_explicit_namespace_is_suffixed_per_keyword() {
        let mut job = parse_job(KEYWORD_JOB).unwrap();
        job.cache.namespace = Some("bx".to_string());
        let jobs = job.expand_keywords().unwrap();
        assert_eq!(jobs[0].cache_namespace(), "bx_visium");
        assert_eq!(jobs[0].detail_cache_namespace(), "bx_visium_detail");
    }

    #[test]
    fn test_post_target() {
        let content = r#"
            [target]
            name = "ted"
            url_template = "https://api.ted.europa.eu/v3/notices/search"
            method = "post"
            body_template = '{"query": "TD=[C]", "page": {page1}, "limit": 50}'
            page_size = 50
            [target.headers]
            content-type = "application/json"
            [extract]
            kind = "json"
            total_pointer = "/totalNoticeCount"
            items_pointer = "/notices"
            fields = [{ name = "id", path = "/publication-number" }]
            [output]
            path = "ted.jsonl"
            format = "jsonl"
            "#;
        let job = parse_job(content).unwrap();
        use crate::paginate::PageSource;
        let request = job.page_source().unwrap().request(2).unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(
            request.body.as_deref(),
            Some(r#"{"query": "TD=[C]", "page": 3, "limit": 50}"#)
        );

        let get_with_body = content.replace("method = \"post\"\n", "");
        assert!(parse_job(&get_with_body).unwrap_err().to_string().contains("post"));
    }

    #[test]
    fn test_detail_section() {
        let content = format!(
            "{}\n[detail]\nurl_field = \"url\"\nkey_field = \"title\"\n\n[[detail.fields]]\nname = \"posted\"\npath = \"meta[name=citation_date]@content\"\n",
            SAMPLE_JOB
        );
        let job = parse_job(&content).unwrap();
        assert_eq!(job.detail_kind(), Some(ExtractKind::Html));
        assert!(job.detail_extractor().unwrap().is_some());
        assert_eq!(
            job.output_fields(),
            vec!["title", "date", "authors", "url", "posted", "source_page"]
        );
        assert_eq!(job.detail_cache_namespace(), "biorxiv-visium_detail");

        let unknown_link = content.replace("url_field = \"url\"", "url_field = \"link\"");
        assert!(parse_job(&unknown_link).unwrap_err().to_string().contains("url_field"));

        let clash = content.replace("name = \"posted\"", "name = \"date\"");
        assert!(parse_job(&clash).unwrap_err().to_string().contains("duplicate"));
    }
}
