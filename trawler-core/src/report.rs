// Run reports from the journal

use crate::data::{Journal, PageLogEntry, SessionRow};
use chrono::{DateTime, Utc};
use rusqlite::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCounts {
    pub success: u32,
    pub blocked: u32,
    pub failed: u32,
    pub from_cache: u32,
    pub from_network: u32,
    pub total_attempts: u32,
    pub records: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub session: SessionRow,
    pub counts: PageCounts,
    pub pages: Vec<PageLogEntry>,
}

impl ReportData {
    /// Pages that were skipped, in page order.
    pub fn skipped_pages(&self) -> impl Iterator<Item = &PageLogEntry> {
        self.pages.iter().filter(|p| p.status != "success")
    }
}

pub fn gather_report_data(journal: &Journal, session_id: &str) -> Result<ReportData> {
    let session = journal
        .get_session(session_id)?
        .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
    let pages = journal.pages_for_session(session_id)?;

    let mut counts = PageCounts::default();
    for page in &pages {
        match page.status.as_str() {
            "success" => counts.success += 1,
            "blocked" => counts.blocked += 1,
            _ => counts.failed += 1,
        }
        match page.origin.as_str() {
            "cache" => counts.from_cache += 1,
            _ => counts.from_network += 1,
        }
        counts.total_attempts += page.attempts;
        counts.records += page.records as u64;
    }

    Ok(ReportData {
        session,
        counts,
        pages,
    })
}

pub fn format_timestamp(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn format_iso8601(timestamp: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(timestamp, 0).map(|dt| dt.to_rfc3339())
}

fn status_label(status: &str) -> &'static str {
    match status {
        "completed" => "Completed",
        "aborted" => "Aborted (too many consecutive failures)",
        "cancelled" => "Cancelled",
        "failed" => "Failed",
        "running" => "Running",
        _ => "Unknown",
    }
}

pub fn generate_text_report(data: &ReportData) -> String {
    let s = &data.session;
    let mut report = String::new();

    report.push_str(RULE);
    report.push_str("                           TRAWLER RUN REPORT\n");
    report.push_str(RULE);
    report.push('\n');

    report.push_str(&format!("Session ID:   {}\n", s.id));
    report.push_str(&format!("Target:       {}\n", s.target));
    report.push_str(&format!("Status:       {}\n", status_label(&s.status)));
    report.push_str(&format!("Started:      {}\n", format_timestamp(s.start_time)));
    if let Some(end_time) = s.end_time {
        report.push_str(&format!("Duration:     {} seconds\n", end_time - s.start_time));
    }
    report.push_str(&format!("Output:       {}\n", s.output_path));
    report.push_str(&format!("Start page:   {}\n", s.start_page));
    if let Some(total) = s.total_pages {
        report.push_str(&format!("Total pages:  {}\n", total));
    }
    report.push('\n');

    report.push_str(RULE);
    report.push_str("SUMMARY\n");
    report.push_str(RULE);
    report.push('\n');

    let c = &data.counts;
    report.push_str(&format!("Pages logged:     {}\n", data.pages.len()));
    report.push_str(&format!("  succeeded       {}\n", c.success));
    report.push_str(&format!("  blocked         {}\n", c.blocked));
    report.push_str(&format!("  failed          {}\n", c.failed));
    report.push_str(&format!("From cache:       {}\n", c.from_cache));
    report.push_str(&format!("From network:     {}\n", c.from_network));
    report.push_str(&format!("Fetch attempts:   {}\n", c.total_attempts));
    report.push_str(&format!("Records written:  {}\n", s.records_written));
    report.push('\n');

    let skipped: Vec<_> = data.skipped_pages().collect();
    if !skipped.is_empty() {
        report.push_str(RULE);
        report.push_str("SKIPPED PAGES\n");
        report.push_str(RULE);
        report.push('\n');
        for page in skipped {
            report.push_str(&format!(
                "  page {:<6} {:<8} after {} attempt(s)",
                page.page_index, page.status, page.attempts
            ));
            if let Some(ref error) = page.error {
                report.push_str(&format!("  {}", error));
            }
            report.push('\n');
        }
        report.push('\n');
    }

    report.push_str(RULE);
    report.push_str("                              End of Report\n");
    report.push_str(RULE);

    report
}

pub fn generate_json_report(data: &ReportData) -> std::result::Result<String, serde_json::Error> {
    let s = &data.session;
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "Trawler",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": Utc::now().to_rfc3339(),
                "format": "json"
            },
            "session": {
                "id": s.id,
                "target": s.target,
                "status": s.status,
                "start_time": format_iso8601(s.start_time),
                "end_time": s.end_time.and_then(format_iso8601),
                "duration_seconds": s.end_time.map(|end| end - s.start_time),
                "output_path": s.output_path,
                "start_page": s.start_page,
                "total_pages": s.total_pages,
                "records_written": s.records_written
            },
            "summary": data.counts,
            "pages": data.pages
        }
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}
