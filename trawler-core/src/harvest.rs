use crate::cache::{CachedFetcher, ResponseCache};
use crate::config::{ExtractKind, JobConfig, OutputFormat};
use crate::data::{Journal, SessionStatus};
use crate::enrich::{DetailEnricher, EnrichStats};
use crate::error::RunError;
use crate::paginate::{CancelFlag, DriverState, PageBatch, PageSource, PaginationDriver};
use crate::sink::{CsvSink, JsonLinesSink, ResultSink, SinkMode, resume_point, resume_point_jsonl};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use trawler_scanner::{PageFetcher, Transport};

/// Run-time overrides on top of a job file.
#[derive(Debug, Clone, Default)]
pub struct HarvestOptions {
    pub start_page: Option<u32>,
    pub max_pages: Option<u32>,
    pub max_records: Option<u64>,
    pub prefer_cache: Option<bool>,
    /// Bypass the response cache entirely.
    pub no_cache: bool,
    /// Truncate the output and start from the configured start page.
    pub fresh: bool,
    /// Run journal location; no journal when unset.
    pub journal_path: Option<PathBuf>,
    pub cancel: CancelFlag,
    pub show_progress: bool,
}

/// Callback for reporting harvest progress
pub type HarvestProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HarvestOutcome {
    Completed,
    Aborted,
    Cancelled,
}

impl HarvestOutcome {
    fn session_status(&self) -> SessionStatus {
        match self {
            HarvestOutcome::Completed => SessionStatus::Completed,
            HarvestOutcome::Aborted => SessionStatus::Aborted,
            HarvestOutcome::Cancelled => SessionStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestSummary {
    pub session_id: Option<String>,
    pub outcome: HarvestOutcome,
    pub output_path: PathBuf,
    pub start_page: u32,
    pub total_results: Option<u64>,
    pub total_pages: u32,
    pub pages_processed: u32,
    pub pages_skipped: u32,
    pub network_fetches: u32,
    pub cache_hits: u32,
    pub records_written: u64,
    /// Detail-page counters; all zero when the job has no `[detail]`.
    pub details: EnrichStats,
}

/// Applies the CLI overrides and returns the effective job.
pub fn effective_job(job: &JobConfig, options: &HarvestOptions) -> JobConfig {
    let mut job = job.clone();
    if let Some(max_pages) = options.max_pages {
        job.pagination.max_pages = Some(max_pages);
    }
    if let Some(max_records) = options.max_records {
        job.pagination.max_records = Some(max_records);
    }
    if let Some(prefer_cache) = options.prefer_cache {
        job.cache.prefer_cache = prefer_cache;
    }
    if options.no_cache {
        job.cache.enabled = false;
    }
    job
}

/// Page a run of `job` would begin at: an explicit override, otherwise the
/// page after the last one recorded in the output (when resuming).
pub fn resolve_start_page(job: &JobConfig, options: &HarvestOptions) -> Result<u32, RunError> {
    if let Some(start) = options.start_page {
        return Ok(start);
    }
    let configured = job.pagination.start_page;
    if options.fresh || !job.output.resume {
        return Ok(configured);
    }
    let resumed = match job.output.format {
        OutputFormat::Csv => resume_point(&job.output.path, &job.output.provenance_column)?,
        OutputFormat::Jsonl => resume_point_jsonl(&job.output.path, &job.output.provenance_column)?,
    };
    Ok(resumed.map_or(configured, |page| page.max(configured)))
}

fn sink_mode(options: &HarvestOptions) -> SinkMode {
    if options.fresh {
        SinkMode::Fresh
    } else {
        SinkMode::Append
    }
}

fn cache_extension(kind: ExtractKind) -> &'static str {
    match kind {
        ExtractKind::Html => "html",
        ExtractKind::Json => "json",
    }
}

fn open_sink(job: &JobConfig, mode: SinkMode) -> Result<Box<dyn ResultSink>, RunError> {
    Ok(match job.output.format {
        OutputFormat::Csv => Box::new(CsvSink::open(&job.output.path, job.output_fields(), mode)?),
        OutputFormat::Jsonl => Box::new(JsonLinesSink::open(&job.output.path, mode)?),
    })
}

pub fn provenance_value(page_index: u32) -> String {
    format!("page_{}", page_index)
}

fn finish_journal(journal: Option<&(Journal, String)>, status: SessionStatus, records: u64) {
    if let Some((journal, session_id)) = journal {
        if let Err(e) = journal.finish_session(session_id, status, records) {
            warn!("Could not close journal session {}: {}", session_id, e);
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    records_written: u64,
    pages_processed: u32,
}

/// Pulls pages until the driver stops, writing each one before the next is
/// requested. Any error leaves `tally` at the last page fully written.
async fn drain_pages<T: Transport>(
    job: &JobConfig,
    driver: &mut PaginationDriver<T>,
    mut enricher: Option<&mut DetailEnricher<T>>,
    sink: &mut dyn ResultSink,
    journal: Option<&(Journal, String)>,
    report: &dyn Fn(String),
    tally: &mut Tally,
) -> Result<(), RunError> {
    let mut total_recorded = false;

    while let Some(batch) = driver.next_page().await? {
        if !total_recorded {
            total_recorded = true;
            if let Some((journal, session_id)) = journal {
                journal.set_total_pages(session_id, driver.stats().total_pages)?;
            }
        }

        let PageBatch {
            page_index,
            status,
            origin,
            attempts,
            error,
            mut records,
        } = batch;

        if let Some(enricher) = enricher.as_deref_mut() {
            enricher.enrich_all(&mut records).await?;
        }
        let provenance = provenance_value(page_index);
        for record in &mut records {
            record.set(job.output.provenance_column.clone(), provenance.as_str());
        }

        sink.append(&records)?;
        tally.records_written += records.len() as u64;
        tally.pages_processed += 1;

        if let Some((journal, session_id)) = journal {
            journal.log_page(
                session_id,
                page_index,
                status.as_str(),
                origin.as_str(),
                attempts,
                records.len() as u32,
                error.as_deref(),
            )?;
        }

        report(format!(
            "page {}/{} {} ({}, {} records, {} total)",
            page_index + 1,
            driver.cursor().total_pages,
            status.as_str(),
            origin.as_str(),
            records.len(),
            tally.records_written
        ));
    }
    Ok(())
}

/// Execute a harvest with the given job and options
pub async fn execute_harvest<T: Transport>(
    job: &JobConfig,
    transport: T,
    options: HarvestOptions,
    progress_callback: Option<HarvestProgressCallback>,
) -> Result<HarvestSummary, RunError> {
    let effective = effective_job(job, &options);
    effective.validate()?;
    let sink = open_sink(&effective, sink_mode(&options))?;
    execute_harvest_with_sink(job, transport, options, sink, progress_callback).await
}

/// Same as [`execute_harvest`] with a caller-supplied sink.
pub async fn execute_harvest_with_sink<T: Transport>(
    job: &JobConfig,
    transport: T,
    options: HarvestOptions,
    mut sink: Box<dyn ResultSink>,
    progress_callback: Option<HarvestProgressCallback>,
) -> Result<HarvestSummary, RunError> {
    let job = effective_job(job, &options);
    job.validate()?;
    let start_page = resolve_start_page(&job, &options)?;

    let cache = job.cache.enabled.then(|| {
        ResponseCache::new(&job.cache.dir, job.cache_namespace())
            .with_extension(cache_extension(job.extract.kind))
    });
    let detail_cache = match (job.cache.enabled, job.detail_kind()) {
        (true, Some(kind)) => Some(
            ResponseCache::new(&job.cache.dir, &job.detail_cache_namespace())
                .with_extension(cache_extension(kind)),
        ),
        _ => None,
    };
    if options.fresh {
        for cache in cache.iter().chain(detail_cache.iter()) {
            cache.clear()?;
        }
    }

    let transport = Arc::new(transport);
    let fetcher = PageFetcher::new(transport.clone()).with_classifier(Box::new(job.classifier()));
    let mut driver_options = job.driver_options(options.cancel.clone());
    driver_options.start_page = start_page;
    let delay = driver_options.delay;
    let fetch_policy = driver_options.fetch_policy;
    let prefer_cache = driver_options.prefer_cache;
    let page_source = job.page_source()?;

    let mut enricher = match (&job.detail, job.detail_extractor()?) {
        (Some(detail), Some(extractor)) => {
            let base = url::Url::parse(&page_source.page_url(0)?)
                .map_err(|e| RunError::Configuration(e.to_string()))?;
            let fetcher =
                PageFetcher::new(transport.clone()).with_classifier(Box::new(job.classifier()));
            Some(
                DetailEnricher::new(
                    CachedFetcher::new(fetcher, detail_cache).with_prefer_cache(prefer_cache),
                    extractor,
                    &job.target.name,
                    &detail.url_field,
                )
                .with_key_field(detail.key_field.clone())
                .with_base(base)
                .with_headers(job.target.headers.clone())
                .with_markers(detail.validation_markers.iter().cloned())
                .with_policy(fetch_policy)
                .with_delay(delay),
            )
        }
        _ => None,
    };

    let mut driver = PaginationDriver::new(
        CachedFetcher::new(fetcher, cache),
        Box::new(page_source),
        job.extractor()?,
        driver_options,
    );

    let journal = match &options.journal_path {
        Some(path) => {
            let journal = Journal::new(path)?;
            let configuration = serde_json::to_string(&job).ok();
            let session_id = journal.create_session(
                &job.target.name,
                &job.output.path.display().to_string(),
                start_page,
                configuration.as_deref(),
            )?;
            Some((journal, session_id))
        }
        None => None,
    };

    let progress_bar = if options.show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Fetching {} from page {}...", job.target.name, start_page));
        Some(pb)
    } else {
        None
    };
    let report = |message: String| {
        if let Some(pb) = &progress_bar {
            pb.set_message(message.clone());
            pb.tick();
        }
        if let Some(cb) = &progress_callback {
            cb(message);
        }
    };

    info!(
        "Harvesting {} from page {} into {}",
        job.target.name,
        start_page,
        job.output.path.display()
    );

    let mut tally = Tally::default();
    let drained = drain_pages(
        &job,
        &mut driver,
        enricher.as_mut(),
        sink.as_mut(),
        journal.as_ref(),
        &report,
        &mut tally,
    )
    .await;

    if let Err(e) = drained {
        error!("Harvest of {} failed: {}", job.target.name, e);
        finish_journal(journal.as_ref(), SessionStatus::Failed, tally.records_written);
        if let Some(pb) = &progress_bar {
            pb.finish_and_clear();
        }
        return Err(e);
    }

    let outcome = match driver.state() {
        DriverState::Aborted => HarvestOutcome::Aborted,
        DriverState::Cancelled => HarvestOutcome::Cancelled,
        _ => HarvestOutcome::Completed,
    };
    finish_journal(journal.as_ref(), outcome.session_status(), tally.records_written);

    if let Some(pb) = &progress_bar {
        pb.finish_with_message(format!(
            "{} records from {} page(s)",
            tally.records_written, tally.pages_processed
        ));
    }

    let stats = driver.stats();
    let details = enricher.map(|e| e.stats().clone()).unwrap_or_default();
    info!(
        "Harvest of {} finished: {:?}, {} records, {} network fetches, {} cache hits",
        job.target.name, outcome, tally.records_written, stats.network_fetches, stats.cache_hits
    );
    if job.detail.is_some() {
        info!(
            "Detail pages: {} fetched, {} from cache, {} failed, {} without link",
            details.network_fetches, details.cache_hits, details.failed, details.missing_url
        );
    }

    Ok(HarvestSummary {
        session_id: journal.map(|(_, id)| id),
        outcome,
        output_path: job.output.path.clone(),
        start_page,
        total_results: stats.total_results,
        total_pages: stats.total_pages,
        pages_processed: tally.pages_processed,
        pages_skipped: stats.pages_skipped,
        network_fetches: stats.network_fetches,
        cache_hits: stats.cache_hits,
        records_written: tally.records_written,
        details,
    })
}

/// Runs `job` once per keyword (once when it has none), in order, sharing
/// one transport. An aborted keyword moves on to the next; cancellation or
/// an error stops the sequence.
pub async fn execute_harvests<T: Transport>(
    job: &JobConfig,
    transport: T,
    options: HarvestOptions,
    progress_callback: Option<HarvestProgressCallback>,
) -> Result<Vec<HarvestSummary>, RunError> {
    let jobs = job.expand_keywords()?;
    let transport = Arc::new(transport);
    let mut summaries = Vec::with_capacity(jobs.len());

    for keyword_job in &jobs {
        if options.cancel.is_cancelled() {
            break;
        }
        if jobs.len() > 1 {
            info!("Starting {}", keyword_job.target.name);
        }
        let summary = execute_harvest(
            keyword_job,
            transport.clone(),
            options.clone(),
            progress_callback.clone(),
        )
        .await?;
        let cancelled = summary.outcome == HarvestOutcome::Cancelled;
        summaries.push(summary);
        if cancelled {
            break;
        }
    }
    Ok(summaries)
}
