use anyhow::{Context, bail};
use clap::ArgMatches;
use colored::Colorize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};
use trawler_core::config::{SAMPLE_JOB, load_job};
use trawler_core::data::{Journal, SessionRow};
use trawler_core::error::RunError;
use trawler_core::harvest::{
    HarvestOptions, HarvestOutcome, HarvestSummary, execute_harvests, resolve_start_page,
};
use trawler_core::paginate::CancelFlag;
use trawler_core::report::{
    ReportFormat, format_timestamp, gather_report_data, generate_json_report,
    generate_text_report, save_report,
};
use trawler_scanner::HttpTransport;

pub const DEFAULT_CONFIG_DIR: &str = "~/.config/trawler/";
pub const JOURNAL_FILE: &str = "trawler.db";
pub const SAMPLE_JOB_FILE: &str = "job.toml";

// Same status as RunError::Aborted
const EXIT_ABORTED: i32 = 4;
// Exit status for a run stopped by Ctrl-C
const EXIT_CANCELLED: i32 = 130;

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

pub fn default_journal_path() -> PathBuf {
    expand_path(DEFAULT_CONFIG_DIR).join(JOURNAL_FILE)
}

/// Journal location from `--db`, falling back to the config directory.
pub fn journal_path_from(args: &ArgMatches) -> PathBuf {
    args.get_one::<PathBuf>("db")
        .map(|p| expand_path(&p.to_string_lossy()))
        .unwrap_or_else(default_journal_path)
}

// ============================================================================
// Logging
// ============================================================================

fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    }
}

fn directives(level: &str) -> String {
    format!(
        "warn,trawler={level},trawler_core={level},trawler_scanner={level}",
        level = level
    )
}

/// Filter directives for our own crates at the given verbosity.
/// Dependencies stay at `warn`.
pub fn log_directives(verbosity: u8) -> String {
    directives(level_for(verbosity))
}

/// Console logging to stderr, plus an optional plain-text mirror file
/// which always records at least `info`. `RUST_LOG` overrides the console
/// filter when set.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>) -> anyhow::Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directives(verbosity)));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating log directory {}", parent.display()))?;
            }
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            let file_level = if verbosity == 0 {
                "info"
            } else {
                level_for(verbosity)
            };
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_filter(EnvFilter::new(directives(file_level))),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("installing log subscriber")?;
    Ok(())
}

// ============================================================================
// Exit codes
// ============================================================================

pub fn outcome_exit_code(outcome: HarvestOutcome) -> i32 {
    match outcome {
        HarvestOutcome::Completed => 0,
        HarvestOutcome::Aborted => EXIT_ABORTED,
        HarvestOutcome::Cancelled => EXIT_CANCELLED,
    }
}

/// Exit status for a sequence of keyword runs: the worst outcome wins.
pub fn combined_exit_code<I>(outcomes: I) -> i32
where
    I: IntoIterator<Item = HarvestOutcome>,
{
    let outcomes: Vec<HarvestOutcome> = outcomes.into_iter().collect();
    if outcomes.contains(&HarvestOutcome::Cancelled) {
        outcome_exit_code(HarvestOutcome::Cancelled)
    } else if outcomes.contains(&HarvestOutcome::Aborted) {
        outcome_exit_code(HarvestOutcome::Aborted)
    } else {
        0
    }
}

/// Exit status for an error bubbled up to `main`.
pub fn error_exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<RunError>()
        .map(RunError::exit_code)
        .unwrap_or(1)
}

// ============================================================================
// init
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub config_dir: PathBuf,
    pub journal_path: PathBuf,
    pub job_path: PathBuf,
    pub journal_recreated: bool,
    pub job_written: bool,
}

/// Creates the config directory, the run journal and a sample job file.
/// Existing files are left alone unless `force` is set.
pub fn init_workspace(config_dir: &Path, force: bool) -> anyhow::Result<InitReport> {
    fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    let journal_path = config_dir.join(JOURNAL_FILE);
    let mut journal_recreated = false;
    if force && Journal::exists(&journal_path) {
        Journal::drop(&journal_path)
            .with_context(|| format!("removing journal {}", journal_path.display()))?;
        journal_recreated = true;
    }
    Journal::new(&journal_path)
        .with_context(|| format!("creating journal {}", journal_path.display()))?;

    let job_path = config_dir.join(SAMPLE_JOB_FILE);
    let job_written = force || !job_path.exists();
    if job_written {
        fs::write(&job_path, SAMPLE_JOB)
            .with_context(|| format!("writing sample job {}", job_path.display()))?;
    }

    Ok(InitReport {
        config_dir: config_dir.to_path_buf(),
        journal_path,
        job_path,
        journal_recreated,
        job_written,
    })
}

pub fn handle_init(args: &ArgMatches) -> anyhow::Result<()> {
    print_divider();
    println!("{}", "  TRAWLER INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let raw_dir = args
        .get_one::<String>("PATH")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_DIR);
    let force = args.get_flag("force");
    let report = init_workspace(&expand_path(raw_dir), force)?;

    if report.journal_recreated {
        println!("{} Existing journal deleted", "→".cyan());
    }
    if !report.job_written {
        println!(
            "{} Kept existing job file (use --force to overwrite): {}",
            "⚠".yellow().bold(),
            report.job_path.display()
        );
    }

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!();
    println!(
        "{} Config directory: {}",
        "✓".green().bold(),
        report.config_dir.display().to_string().bright_white()
    );
    println!(
        "{} Journal: {}",
        "✓".green().bold(),
        report.journal_path.display().to_string().bright_white()
    );
    println!(
        "{} Sample job: {}",
        "✓".green().bold(),
        report.job_path.display().to_string().bright_white()
    );
    println!();
    println!(
        "{} Edit the sample job, then: {}",
        "→".cyan(),
        format!("trawler run -c {}", report.job_path.display()).bright_white()
    );
    Ok(())
}

// ============================================================================
// run
// ============================================================================

/// Builds harvest overrides from `run` arguments.
pub fn harvest_options_from_args(args: &ArgMatches, cancel: CancelFlag) -> HarvestOptions {
    let journal_path = if args.get_flag("no-journal") {
        None
    } else {
        Some(journal_path_from(args))
    };
    HarvestOptions {
        start_page: args.get_one::<u32>("start-page").copied(),
        max_pages: args.get_one::<u32>("max-pages").copied(),
        max_records: args.get_one::<u64>("max-records").copied(),
        prefer_cache: args.get_flag("prefer-cache").then_some(true),
        no_cache: args.get_flag("no-cache"),
        fresh: args.get_flag("fresh"),
        journal_path,
        cancel,
        show_progress: true,
    }
}

fn print_summary(summary: &HarvestSummary) {
    println!();
    print_divider();
    let heading = match summary.outcome {
        HarvestOutcome::Completed => "  HARVEST COMPLETE".green().bold(),
        HarvestOutcome::Aborted => "  HARVEST ABORTED".red().bold(),
        HarvestOutcome::Cancelled => "  HARVEST CANCELLED".yellow().bold(),
    };
    println!("{}", heading);
    print_divider();
    println!();
    println!(
        "{} Records written: {}",
        "✓".green().bold(),
        summary.records_written.to_string().bright_white()
    );
    println!(
        "{} Output: {}",
        "✓".green().bold(),
        summary.output_path.display().to_string().bright_white()
    );
    let total = summary
        .total_results
        .map(|t| t.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!(
        "{} Listing: {} results over {} page(s), started at page {}",
        "→".cyan(),
        total,
        summary.total_pages,
        summary.start_page
    );
    println!(
        "{} Fetches: {} network, {} from cache",
        "→".cyan(),
        summary.network_fetches,
        summary.cache_hits
    );
    let details = &summary.details;
    if details.network_fetches + details.cache_hits > 0 {
        println!(
            "{} Detail pages: {} network, {} from cache, {} failed",
            "→".cyan(),
            details.network_fetches,
            details.cache_hits,
            details.failed
        );
    }
    if summary.pages_skipped > 0 {
        println!(
            "{} {} page(s) skipped, see `trawler report` for details",
            "⚠".yellow().bold(),
            summary.pages_skipped
        );
    }
    if let Some(id) = &summary.session_id {
        println!("{} Session: {}", "→".cyan(), id.bright_white());
    }
}

/// Runs a job to completion and returns the process exit status.
pub async fn handle_run(args: &ArgMatches) -> anyhow::Result<i32> {
    let config_path = args
        .get_one::<PathBuf>("config")
        .context("a job file is required (-c/--config)")?;
    let job = load_job(config_path)?;

    let cancel = CancelFlag::new();
    let options = harvest_options_from_args(args, cancel.clone());
    if let Some(parent) = options.journal_path.as_deref().and_then(Path::parent) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating journal directory {}", parent.display()))?;
    }

    let transport = HttpTransport::with_timeout(job.fetch.timeout_secs, job.fetch.user_agent.as_deref())?;

    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = execute_harvests(&job, transport, options, None).await;
    watcher.abort();

    let summaries = result?;
    for summary in &summaries {
        print_summary(summary);
    }
    Ok(combined_exit_code(summaries.iter().map(|s| s.outcome)))
}

// ============================================================================
// resume-point / sessions / report
// ============================================================================

pub fn handle_resume_point(args: &ArgMatches) -> anyhow::Result<()> {
    let config_path = args
        .get_one::<PathBuf>("config")
        .context("a job file is required (-c/--config)")?;
    let job = load_job(config_path)?;
    let jobs = job.expand_keywords()?;
    if let [single] = jobs.as_slice() {
        println!("{}", resolve_start_page(single, &HarvestOptions::default())?);
        return Ok(());
    }
    for keyword_job in &jobs {
        let start = resolve_start_page(keyword_job, &HarvestOptions::default())?;
        println!("{}\t{}", keyword_job.target.name, start);
    }
    Ok(())
}

fn open_existing_journal(path: &Path) -> anyhow::Result<Journal> {
    if !Journal::exists(path) {
        bail!(
            "no journal at {} (run `trawler init` or pass --db)",
            path.display()
        );
    }
    Ok(Journal::new(path)?)
}

/// One line per session for `trawler sessions`.
pub fn format_session_line(session: &SessionRow) -> String {
    let started = format_timestamp(session.start_time);
    let pages = session
        .total_pages
        .map(|p| p.to_string())
        .unwrap_or_else(|| "?".to_string());
    format!(
        "{}  {:<10} {:<20} {}  from page {} of {}, {} records -> {}",
        session.id,
        session.status,
        session.target,
        started,
        session.start_page,
        pages,
        session.records_written,
        session.output_path
    )
}

pub fn handle_sessions(args: &ArgMatches) -> anyhow::Result<()> {
    let journal = open_existing_journal(&journal_path_from(args))?;
    let sessions = journal.list_sessions()?;
    if sessions.is_empty() {
        println!("{} No runs recorded yet", "→".cyan());
        return Ok(());
    }
    for session in &sessions {
        println!("{}", format_session_line(session));
    }
    Ok(())
}

/// Renders the report for one session.
pub fn render_report(journal: &Journal, session_id: &str, format: ReportFormat) -> anyhow::Result<String> {
    if journal.get_session(session_id)?.is_none() {
        bail!("no session with id {}", session_id);
    }
    let data = gather_report_data(journal, session_id)?;
    Ok(match format {
        ReportFormat::Text => generate_text_report(&data),
        ReportFormat::Json => generate_json_report(&data)?,
    })
}

pub fn handle_report(args: &ArgMatches) -> anyhow::Result<()> {
    let session_id = args
        .get_one::<String>("SESSION")
        .context("a session id is required")?;
    let format = args
        .get_one::<String>("format")
        .and_then(|f| ReportFormat::parse(f))
        .unwrap_or(ReportFormat::Text);
    let journal = open_existing_journal(&journal_path_from(args))?;
    let content = render_report(&journal, session_id, format)?;

    match args.get_one::<PathBuf>("output") {
        Some(path) => {
            save_report(&content, path)
                .with_context(|| format!("saving report to {}", path.display()))?;
            println!(
                "{} Report saved to {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => print!("{}", content),
    }
    Ok(())
}
