use thiserror::Error;
use trawler_scanner::FetchStatus;

/// Failures writing the tabular output. Never retried.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("cannot write output {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{path} has columns [{found}], expected [{expected}]")]
    HeaderMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("{path} has no {column:?} column")]
    MissingColumn { path: String, column: String },
}

/// Errors that end a run.
///
/// Transient fetch problems never show up here: the fetcher resolves them
/// and the driver turns exhausted pages into skips or an abort.
#[derive(Error, Debug)]
pub enum RunError {
    /// Bad job file, malformed URL template, unusable paths. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A validated page lacks an expected structural element. The site
    /// schema has probably changed; surfaced to the operator.
    #[error("parse error on page {page}: {reason}")]
    PermanentParse { page: u32, reason: String },

    #[error("the first page could not be fetched ({status:?}): {reason}")]
    FirstPage { status: FetchStatus, reason: String },

    #[error("aborted after {consecutive} consecutive page failures (last page {last_page})")]
    Aborted { consecutive: u32, last_page: u32 },

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("cache error: {0}")]
    Cache(#[from] std::io::Error),

    #[error("journal error: {0}")]
    Journal(#[from] rusqlite::Error),
}

impl RunError {
    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Configuration(_) => 2,
            RunError::PermanentParse { .. } => 3,
            RunError::FirstPage { .. } | RunError::Aborted { .. } => 4,
            RunError::Sink(_) | RunError::Cache(_) | RunError::Journal(_) => 1,
        }
    }
}
