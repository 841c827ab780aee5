use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// A single logical page request. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    /// Request payload, e.g. a JSON search query or a form postback.
    pub body: Option<String>,
    pub validation_markers: BTreeSet<String>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            validation_markers: BTreeSet::new(),
        }
    }

    /// POST with the given payload.
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(url).with_method(Method::Post).with_body(body)
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in headers {
            self.headers.insert(k.into(), v.into());
        }
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.validation_markers.insert(marker.into());
        self
    }

    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validation_markers
            .extend(markers.into_iter().map(Into::into));
        self
    }

    /// Markers absent from `body`, in sorted order.
    pub fn missing_markers(&self, body: &str) -> Vec<String> {
        self.validation_markers
            .iter()
            .filter(|m| !body.contains(m.as_str()))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchStatus {
    Success,
    Blocked,
    Failed,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::Blocked => "blocked",
            FetchStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub status: FetchStatus,
    /// Present iff `status == Success`.
    pub body: Option<String>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

impl FetchResult {
    pub fn success(body: String, attempt_count: u32) -> Self {
        Self {
            status: FetchStatus::Success,
            body: Some(body),
            attempt_count,
            last_error: None,
        }
    }

    pub fn blocked(reason: String, attempt_count: u32) -> Self {
        Self {
            status: FetchStatus::Blocked,
            body: None,
            attempt_count,
            last_error: Some(reason),
        }
    }

    pub fn failed(reason: String, attempt_count: u32) -> Self {
        Self {
            status: FetchStatus::Failed,
            body: None,
            attempt_count,
            last_error: Some(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }
}
