// Record extraction from page bodies
//
// The driver only knows the RecordExtractor trait. The two built-in
// extractors cover server-rendered listing pages (CSS selectors) and JSON
// search APIs (JSON pointers).

use crate::record::{FieldValue, Record};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("expected element not found: {0}")]
    MissingElement(String),

    #[error("result count not found in {0:?}")]
    MissingTotal(String),

    #[error("malformed body: {0}")]
    Malformed(String),

    #[error("invalid selector {0:?}")]
    InvalidSelector(String),
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// Site-specific knowledge supplied to the pagination driver.
pub trait RecordExtractor: Send + Sync {
    /// Total result count from the first page's summary.
    fn total_results(&self, body: &str) -> Result<u64>;

    /// Records on one validated page, in page order.
    fn extract(&self, body: &str, page_index: u32) -> Result<Vec<Record>>;
}

/// Fields read from a whole detail page, e.g. a posting date or an
/// abstract, rather than from repeated listing items.
pub trait DocumentExtractor: Send + Sync {
    fn extract_document(&self, body: &str) -> Result<Record>;

    fn field_names(&self) -> Vec<String>;
}

/// Parses a human-formatted count such as `"1,234"`.
fn parse_count(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// HTML
// ============================================================================

/// `selector` takes the element text; `selector@attr` takes an attribute.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    selector: Selector,
    attr: Option<String>,
}

impl FieldSpec {
    pub fn parse(name: &str, spec: &str) -> Result<Self> {
        let (css, attr) = match spec.rsplit_once('@') {
            Some((css, attr)) if !attr.is_empty() && !attr.contains(' ') => {
                (css, Some(attr.to_string()))
            }
            _ => (spec, None),
        };
        let selector =
            Selector::parse(css).map_err(|_| ExtractError::InvalidSelector(css.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            selector,
            attr,
        })
    }

    fn value_in(&self, item: &ElementRef<'_>) -> FieldValue {
        let Some(element) = item.select(&self.selector).next() else {
            return FieldValue::Null;
        };
        let raw = match &self.attr {
            Some(attr) => element.value().attr(attr).map(str::to_string),
            None => Some(element.text().collect::<String>()),
        };
        match raw.map(|s| normalize_whitespace(&s)) {
            Some(s) if !s.is_empty() => FieldValue::Text(s),
            _ => FieldValue::Null,
        }
    }
}

pub struct HtmlExtractor {
    total_selector: Selector,
    total_selector_src: String,
    total_pattern: Regex,
    item_selector: Selector,
    fields: Vec<FieldSpec>,
}

impl HtmlExtractor {
    pub fn new(total_selector: &str, total_pattern: &str, item_selector: &str) -> Result<Self> {
        let parse = |css: &str| {
            Selector::parse(css).map_err(|_| ExtractError::InvalidSelector(css.to_string()))
        };
        let total_pattern = Regex::new(total_pattern)
            .map_err(|e| ExtractError::InvalidSelector(format!("{}: {}", total_pattern, e)))?;
        Ok(Self {
            total_selector: parse(total_selector)?,
            total_selector_src: total_selector.to_string(),
            total_pattern,
            item_selector: parse(item_selector)?,
            fields: Vec::new(),
        })
    }

    pub fn with_field(mut self, name: &str, spec: &str) -> Result<Self> {
        self.fields.push(FieldSpec::parse(name, spec)?);
        Ok(self)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

impl RecordExtractor for HtmlExtractor {
    fn total_results(&self, body: &str) -> Result<u64> {
        let document = Html::parse_document(body);
        let summary = document
            .select(&self.total_selector)
            .next()
            .ok_or_else(|| ExtractError::MissingElement(self.total_selector_src.clone()))?;
        let text = normalize_whitespace(&summary.text().collect::<String>());

        let captures = self
            .total_pattern
            .captures(&text)
            .ok_or_else(|| ExtractError::MissingTotal(text.clone()))?;
        let matched = captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|m| m.as_str())
            .unwrap_or_default();
        parse_count(matched).ok_or(ExtractError::MissingTotal(text))
    }

    fn extract(&self, body: &str, _page_index: u32) -> Result<Vec<Record>> {
        let document = Html::parse_document(body);
        Ok(document
            .select(&self.item_selector)
            .map(|item| {
                let mut record = Record::new();
                for field in &self.fields {
                    record.set(field.name.clone(), field.value_in(&item));
                }
                record
            })
            .collect())
    }
}

/// Detail-page fields by CSS selector over the whole document.
#[derive(Debug, Clone, Default)]
pub struct HtmlDocumentExtractor {
    fields: Vec<FieldSpec>,
}

impl HtmlDocumentExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: &str, spec: &str) -> Result<Self> {
        self.fields.push(FieldSpec::parse(name, spec)?);
        Ok(self)
    }
}

impl DocumentExtractor for HtmlDocumentExtractor {
    fn extract_document(&self, body: &str) -> Result<Record> {
        let document = Html::parse_document(body);
        let root = document.root_element();
        let mut record = Record::new();
        for field in &self.fields {
            record.set(field.name.clone(), field.value_in(&root));
        }
        Ok(record)
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

// ============================================================================
// JSON
// ============================================================================

pub struct JsonExtractor {
    total_pointer: String,
    items_pointer: String,
    fields: Vec<(String, String)>,
}

impl JsonExtractor {
    pub fn new(total_pointer: &str, items_pointer: &str) -> Self {
        Self {
            total_pointer: total_pointer.to_string(),
            items_pointer: items_pointer.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: &str, pointer: &str) -> Self {
        self.fields.push((name.to_string(), pointer.to_string()));
        self
    }

    fn parse(body: &str) -> Result<Value> {
        serde_json::from_str(body).map_err(|e| ExtractError::Malformed(e.to_string()))
    }
}

/// Flattens a JSON value into a cell. Arrays of `{"label": ..}` objects
/// (facet lists) and arrays of scalars are joined with `", "`.
fn json_to_field(value: Option<&Value>) -> FieldValue {
    match value {
        None | Some(Value::Null) => FieldValue::Null,
        Some(Value::String(s)) => FieldValue::Text(s.clone()),
        Some(Value::Number(n)) => n.as_f64().map(FieldValue::Number).unwrap_or(FieldValue::Null),
        Some(Value::Bool(b)) => FieldValue::Text(b.to_string()),
        Some(Value::Array(items)) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(obj) => obj.get("label").map(|l| match l {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    }),
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
                .collect();
            if parts.is_empty() {
                FieldValue::Null
            } else {
                FieldValue::Text(parts.join(", "))
            }
        }
        Some(obj @ Value::Object(_)) => FieldValue::Text(obj.to_string()),
    }
}

impl RecordExtractor for JsonExtractor {
    fn total_results(&self, body: &str) -> Result<u64> {
        let doc = Self::parse(body)?;
        match doc.pointer(&self.total_pointer) {
            Some(Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| ExtractError::MissingTotal(n.to_string())),
            Some(Value::String(s)) => {
                parse_count(s).ok_or_else(|| ExtractError::MissingTotal(s.clone()))
            }
            _ => Err(ExtractError::MissingElement(self.total_pointer.clone())),
        }
    }

    fn extract(&self, body: &str, _page_index: u32) -> Result<Vec<Record>> {
        let doc = Self::parse(body)?;
        let items = match doc.pointer(&self.items_pointer) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) => return Ok(Vec::new()),
            _ => return Err(ExtractError::MissingElement(self.items_pointer.clone())),
        };
        Ok(items
            .iter()
            .map(|item| {
                let mut record = Record::new();
                for (name, pointer) in &self.fields {
                    record.set(name.clone(), json_to_field(item.pointer(pointer)));
                }
                record
            })
            .collect())
    }
}

/// Detail-record fields by JSON pointer from the document root.
#[derive(Debug, Clone, Default)]
pub struct JsonDocumentExtractor {
    fields: Vec<(String, String)>,
}

impl JsonDocumentExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: &str, pointer: &str) -> Self {
        self.fields.push((name.to_string(), pointer.to_string()));
        self
    }
}

impl DocumentExtractor for JsonDocumentExtractor {
    fn extract_document(&self, body: &str) -> Result<Record> {
        let doc = JsonExtractor::parse(body)?;
        let mut record = Record::new();
        for (name, pointer) in &self.fields {
            record.set(name.clone(), json_to_field(doc.pointer(pointer)));
        }
        Ok(record)
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|(name, _)| name.clone()).collect()
    }
}
