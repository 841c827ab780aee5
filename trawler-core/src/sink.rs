// Output sinks
//
// Every batch is flushed and synced before append returns, so a killed run
// loses at most the page being processed. The provenance column written
// into each row is what a later run resumes from.

use crate::error::SinkError;
use crate::record::Record;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::mem::take;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_PROVENANCE_COLUMN: &str = "source_page";

const SEP: char = ',';

pub trait ResultSink {
    fn append(&mut self, records: &[Record]) -> Result<(), SinkError>;

    fn rows_written(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkMode {
    /// Keep existing rows; header only if the file is new or empty.
    #[default]
    Append,
    /// Truncate and start over.
    Fresh,
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> SinkError + '_ {
    move |source| SinkError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn open_output(path: &Path, mode: SinkMode) -> Result<File, SinkError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(path))?;
    }
    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        SinkMode::Append => options.append(true),
        SinkMode::Fresh => options.write(true).truncate(true),
    };
    options.open(path).map_err(io_err(path))
}

/* ---------------- CSV ---------------- */

fn needs_quotes(field: &str) -> bool {
    field.contains(SEP) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn write_row<W: Write>(w: &mut W, row: &[String]) -> io::Result<()> {
    let mut first = true;
    for cell in row {
        if !first {
            write!(w, "{}", SEP)?;
        }
        first = false;
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{}", cell)?;
        }
    }
    writeln!(w)
}

/// Quote-aware CSV parser, tolerant of CRLF and of a trailing newline.
pub fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut field = String::new();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if matches!(chars.peek(), Some('"')) {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            c if c == SEP && !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && matches!(chars.peek(), Some('\n')) {
                    chars.next();
                }
                row.push(take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(ch),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

pub struct CsvSink {
    path: PathBuf,
    fields: Vec<String>,
    writer: BufWriter<File>,
    rows_written: u64,
}

impl CsvSink {
    /// Opens `path` for the declared `fields`. Appending to a file whose
    /// header names other columns is refused.
    pub fn open(path: impl AsRef<Path>, fields: Vec<String>, mode: SinkMode) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if mode == SinkMode::Append {
            if let Some(existing) = read_header(&path)? {
                if existing != fields {
                    return Err(SinkError::HeaderMismatch {
                        path: path.display().to_string(),
                        expected: fields.join(","),
                        found: existing.join(","),
                    });
                }
            }
        }

        let file = open_output(&path, mode)?;
        let is_empty = file.metadata().map_err(io_err(&path))?.len() == 0;
        let mut sink = Self {
            writer: BufWriter::new(file),
            path,
            fields,
            rows_written: 0,
        };
        if is_empty {
            write_row(&mut sink.writer, &sink.fields).map_err(io_err(&sink.path))?;
            sink.sync()?;
            debug!("Wrote header to {}", sink.path.display());
        }
        Ok(sink)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    fn sync(&mut self) -> Result<(), SinkError> {
        self.writer.flush().map_err(io_err(&self.path))?;
        self.writer.get_ref().sync_data().map_err(io_err(&self.path))
    }
}

impl ResultSink for CsvSink {
    fn append(&mut self, records: &[Record]) -> Result<(), SinkError> {
        for record in records {
            let cells = record.cells(&self.fields);
            write_row(&mut self.writer, &cells).map_err(io_err(&self.path))?;
        }
        self.sync()?;
        self.rows_written += records.len() as u64;
        Ok(())
    }

    fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

fn read_header(path: &Path) -> Result<Option<Vec<String>>, SinkError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line).map_err(io_err(path))?;
    Ok(parse_rows(&line).into_iter().next())
}

/// Page number from a provenance value like `"3"` or `"page_3"`.
pub fn parse_provenance(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = value.rsplit(['_', '-', ' ']).next().unwrap_or(value);
    digits.parse().ok()
}

/// First page not yet present in the CSV at `path`: the highest page in
/// `provenance_column`, plus one. `None` when there is nothing to resume.
pub fn resume_point(path: impl AsRef<Path>, provenance_column: &str) -> Result<Option<u32>, SinkError> {
    let path = path.as_ref();
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };

    let mut rows = parse_rows(&text).into_iter();
    let Some(header) = rows.next() else {
        return Ok(None);
    };
    let Some(column) = header.iter().position(|h| h == provenance_column) else {
        return Err(SinkError::MissingColumn {
            path: path.display().to_string(),
            column: provenance_column.to_string(),
        });
    };

    let next = rows
        .filter_map(|row| row.get(column).and_then(|v| parse_provenance(v)))
        .max()
        .map(|max| max + 1);
    if let Some(page) = next {
        info!("{} already holds pages up to {}", path.display(), page - 1);
    }
    Ok(next)
}

/* ---------------- JSON lines ---------------- */

pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
    rows_written: u64,
}

impl JsonLinesSink {
    pub fn open(path: impl AsRef<Path>, mode: SinkMode) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = open_output(&path, mode)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
            rows_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for JsonLinesSink {
    fn append(&mut self, records: &[Record]) -> Result<(), SinkError> {
        for record in records {
            serde_json::to_writer(&mut self.writer, &record.to_json())?;
            self.writer.write_all(b"\n").map_err(io_err(&self.path))?;
        }
        self.writer.flush().map_err(io_err(&self.path))?;
        self.writer.get_ref().sync_data().map_err(io_err(&self.path))?;
        self.rows_written += records.len() as u64;
        Ok(())
    }

    fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

/// Same as [`resume_point`] for a JSON-lines output.
pub fn resume_point_jsonl(path: impl AsRef<Path>, provenance_column: &str) -> Result<Option<u32>, SinkError> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };

    let mut max: Option<u32> = None;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(io_err(path))?;
        if line.trim().is_empty() {
            continue;
        }
        // A torn final line from a killed run is ignored.
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
            continue;
        };
        let page = match value.get(provenance_column) {
            Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Some(serde_json::Value::String(s)) => parse_provenance(s),
            _ => None,
        };
        max = max.max(page);
    }
    Ok(max.map(|m| m + 1))
}
