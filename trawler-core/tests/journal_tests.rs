// Tests for the run journal

use trawler_core::data::{Journal, SessionStatus};
use tempfile::TempDir;

fn create_test_journal() -> (TempDir, Journal) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("trawler.db");
    let journal = Journal::new(&db_path).unwrap();
    (temp_dir, journal)
}

// ============================================================================
// Journal Creation Tests
// ============================================================================

#[test]
fn test_journal_creation() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("trawler.db");

    assert!(!Journal::exists(&db_path));
    let journal = Journal::new(&db_path);
    assert!(journal.is_ok());
    assert!(Journal::exists(&db_path));
}

#[test]
fn test_journal_drop() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("trawler.db");

    let journal = Journal::new(&db_path).unwrap();
    drop(journal);
    Journal::drop(&db_path).unwrap();
    assert!(!Journal::exists(&db_path));
}

#[test]
fn test_reopen_keeps_sessions() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("trawler.db");

    let session_id = {
        let journal = Journal::new(&db_path).unwrap();
        journal.create_session("visium", "out.csv", 0, None).unwrap()
    };

    let journal = Journal::new(&db_path).unwrap();
    assert!(journal.get_session(&session_id).unwrap().is_some());
}

// ============================================================================
// Session Tests
// ============================================================================

#[test]
fn test_create_session() {
    let (_temp_dir, journal) = create_test_journal();

    let session_id = journal
        .create_session("visium", "out/visium.csv", 4, Some("{}"))
        .unwrap();
    assert!(!session_id.is_empty());

    let session = journal.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.target, "visium");
    assert_eq!(session.status, "running");
    assert_eq!(session.output_path, "out/visium.csv");
    assert_eq!(session.start_page, 4);
    assert_eq!(session.end_time, None);
    assert_eq!(session.total_pages, None);
}

#[test]
fn test_finish_session() {
    let (_temp_dir, journal) = create_test_journal();

    let session_id = journal.create_session("visium", "out.csv", 0, None).unwrap();
    journal.set_total_pages(&session_id, 12).unwrap();
    journal
        .finish_session(&session_id, SessionStatus::Aborted, 150)
        .unwrap();

    let session = journal.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status, "aborted");
    assert_eq!(session.records_written, 150);
    assert_eq!(session.total_pages, Some(12));
    assert!(session.end_time.is_some());
    assert_eq!(SessionStatus::parse(&session.status), Some(SessionStatus::Aborted));
}

#[test]
fn test_get_unknown_session() {
    let (_temp_dir, journal) = create_test_journal();
    assert!(journal.get_session("missing").unwrap().is_none());
}

#[test]
fn test_list_sessions_newest_first() {
    let (_temp_dir, journal) = create_test_journal();

    let first = journal.create_session("a", "a.csv", 0, None).unwrap();
    let second = journal.create_session("b", "b.csv", 0, None).unwrap();

    let sessions = journal.list_sessions().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id, second);
    assert_eq!(sessions[1].id, first);
}

// ============================================================================
// Page Log Tests
// ============================================================================

#[test]
fn test_log_pages_in_order() {
    let (_temp_dir, journal) = create_test_journal();
    let session_id = journal.create_session("visium", "out.csv", 0, None).unwrap();

    journal
        .log_page(&session_id, 1, "failed", "network", 4, 0, Some("HTTP 503"))
        .unwrap();
    journal
        .log_page(&session_id, 0, "success", "cache", 0, 75, None)
        .unwrap();

    let pages = journal.pages_for_session(&session_id).unwrap();
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].page_index, 0);
    assert_eq!(pages[0].origin, "cache");
    assert_eq!(pages[0].records, 75);
    assert_eq!(pages[1].status, "failed");
    assert_eq!(pages[1].attempts, 4);
    assert_eq!(pages[1].error.as_deref(), Some("HTTP 503"));
}

#[test]
fn test_invalid_page_status_rejected() {
    let (_temp_dir, journal) = create_test_journal();
    let session_id = journal.create_session("visium", "out.csv", 0, None).unwrap();

    let result = journal.log_page(&session_id, 0, "exploded", "network", 1, 0, None);
    assert!(result.is_err());
}

#[test]
fn test_last_completed_page_ignores_failures() {
    let (_temp_dir, journal) = create_test_journal();
    assert_eq!(journal.last_completed_page("visium").unwrap(), None);

    let run1 = journal.create_session("visium", "out.csv", 0, None).unwrap();
    journal.log_page(&run1, 0, "success", "network", 1, 75, None).unwrap();
    journal.log_page(&run1, 1, "success", "network", 1, 75, None).unwrap();

    let run2 = journal.create_session("visium", "out.csv", 2, None).unwrap();
    journal.log_page(&run2, 2, "success", "network", 2, 75, None).unwrap();
    journal.log_page(&run2, 3, "blocked", "network", 1, 0, Some("captcha")).unwrap();

    let other = journal.create_session("merfish", "m.csv", 0, None).unwrap();
    journal.log_page(&other, 9, "success", "network", 1, 10, None).unwrap();

    assert_eq!(journal.last_completed_page("visium").unwrap(), Some(2));
}

#[test]
fn test_in_memory_journal() {
    let journal = Journal::in_memory().unwrap();
    let session_id = journal.create_session("t", "t.csv", 0, None).unwrap();
    assert_eq!(journal.list_sessions().unwrap()[0].id, session_id);
}
