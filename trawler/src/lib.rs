// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    combined_exit_code, default_journal_path, error_exit_code, format_session_line,
    harvest_options_from_args, init_workspace, outcome_exit_code, render_report,
};

// Re-export harvest functionality from trawler-core
pub use trawler_core::harvest::{
    HarvestOptions, HarvestOutcome, HarvestProgressCallback, HarvestSummary, execute_harvest,
    execute_harvests,
};
