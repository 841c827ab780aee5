// Tests for the CSV and JSON-lines sinks

use std::fs;
use tempfile::TempDir;
use trawler_core::error::SinkError;
use trawler_core::record::Record;
use trawler_core::sink::{
    CsvSink, JsonLinesSink, ResultSink, SinkMode, parse_rows, resume_point, resume_point_jsonl,
};

fn fields() -> Vec<String> {
    vec!["title".to_string(), "doi".to_string(), "source_page".to_string()]
}

fn record(title: &str, page: u32) -> Record {
    Record::new()
        .with("title", title)
        .with("doi", format!("10.1/{}", title))
        .with("source_page", format!("page_{}", page))
}

// ============================================================================
// CSV Tests
// ============================================================================

#[test]
fn test_header_written_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.csv");

    {
        let mut sink = CsvSink::open(&path, fields(), SinkMode::Append).unwrap();
        sink.append(&[record("a", 0)]).unwrap();
    }
    {
        let mut sink = CsvSink::open(&path, fields(), SinkMode::Append).unwrap();
        sink.append(&[record("b", 1)]).unwrap();
        assert_eq!(sink.rows_written(), 1);
    }

    let rows = parse_rows(&fs::read_to_string(&path).unwrap());
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], fields());
    assert_eq!(rows[1], vec!["a", "10.1/a", "page_0"]);
    assert_eq!(rows[2], vec!["b", "10.1/b", "page_1"]);
}

#[test]
fn test_rows_visible_after_each_append() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.csv");
    let mut sink = CsvSink::open(&path, fields(), SinkMode::Append).unwrap();

    sink.append(&[record("a", 0), record("b", 0)]).unwrap();
    // Sink still open: the batch must already be on disk.
    let rows = parse_rows(&fs::read_to_string(&path).unwrap());
    assert_eq!(rows.len(), 3);
}

#[test]
fn test_fresh_mode_truncates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.csv");
    fs::write(&path, "title,doi,source_page\nold,x,page_9\n").unwrap();

    let mut sink = CsvSink::open(&path, fields(), SinkMode::Fresh).unwrap();
    sink.append(&[record("new", 0)]).unwrap();

    let rows = parse_rows(&fs::read_to_string(&path).unwrap());
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1][0], "new");
}

#[test]
fn test_empty_existing_file_gets_header() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.csv");
    fs::write(&path, "").unwrap();

    CsvSink::open(&path, fields(), SinkMode::Append).unwrap();
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "title,doi,source_page\n"
    );
}

#[test]
fn test_undeclared_fields_dropped_missing_fields_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.csv");
    let mut sink = CsvSink::open(&path, fields(), SinkMode::Append).unwrap();

    let record = Record::new()
        .with("title", "has, comma")
        .with("extra", "ignored")
        .with("source_page", "page_0");
    sink.append(&[record]).unwrap();

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.ends_with("\"has, comma\",,page_0\n"));
    assert!(!content.contains("ignored"));
}

#[test]
fn test_header_mismatch_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.csv");
    fs::write(&path, "id,name\n1,x\n").unwrap();

    let result = CsvSink::open(&path, fields(), SinkMode::Append);
    assert!(matches!(result, Err(SinkError::HeaderMismatch { .. })));
}

#[test]
fn test_unwritable_path_is_io_error() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("file");
    fs::write(&blocker, "x").unwrap();

    let result = CsvSink::open(blocker.join("out.csv"), fields(), SinkMode::Append);
    assert!(matches!(result, Err(SinkError::Io { .. })));
}

#[test]
fn test_creates_parent_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/deeper/out.csv");
    CsvSink::open(&path, fields(), SinkMode::Append).unwrap();
    assert!(path.exists());
}

// ============================================================================
// Resume Tests
// ============================================================================

#[test]
fn test_resume_point_after_pages_0_to_2() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.csv");
    let mut sink = CsvSink::open(&path, fields(), SinkMode::Append).unwrap();
    for page in 0..=2 {
        sink.append(&[record("a", page), record("b", page)]).unwrap();
    }

    assert_eq!(resume_point(&path, "source_page").unwrap(), Some(3));
}

#[test]
fn test_resume_point_plain_numbers_unordered() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.csv");
    fs::write(&path, "title,source_page\na,4\nb,1\nc,\n").unwrap();

    assert_eq!(resume_point(&path, "source_page").unwrap(), Some(5));
}

#[test]
fn test_resume_point_missing_file() {
    let dir = TempDir::new().unwrap();
    assert_eq!(
        resume_point(dir.path().join("none.csv"), "source_page").unwrap(),
        None
    );
}

#[test]
fn test_resume_point_header_only() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.csv");
    fs::write(&path, "title,source_page\n").unwrap();
    assert_eq!(resume_point(&path, "source_page").unwrap(), None);
}

#[test]
fn test_resume_point_missing_column() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.csv");
    fs::write(&path, "title\na\n").unwrap();
    assert!(matches!(
        resume_point(&path, "source_page"),
        Err(SinkError::MissingColumn { .. })
    ));
}

// ============================================================================
// JSON Lines Tests
// ============================================================================

#[test]
fn test_jsonl_append_and_resume() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.jsonl");

    let mut sink = JsonLinesSink::open(&path, SinkMode::Append).unwrap();
    sink.append(&[record("a", 0), record("b", 1)]).unwrap();
    assert_eq!(sink.rows_written(), 2);

    let content = fs::read_to_string(&path).unwrap();
    let first: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(first["title"], "a");
    assert_eq!(first["source_page"], "page_0");

    // A torn trailing line does not break resume.
    fs::write(&path, format!("{}{{\"title\": \"c\", \"sour", content)).unwrap();
    assert_eq!(resume_point_jsonl(&path, "source_page").unwrap(), Some(2));
}

#[test]
fn test_jsonl_resume_reads_numeric_provenance() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.jsonl");
    fs::write(
        &path,
        "{\"title\": \"a\", \"source_page\": 4}\n{\"title\": \"b\", \"source_page\": 2}\n",
    )
    .unwrap();
    assert_eq!(resume_point_jsonl(&path, "source_page").unwrap(), Some(5));
}
