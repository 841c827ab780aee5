// Shared fixtures for the driver, cache and harvest tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use trawler_core::extract::JsonExtractor;
use trawler_core::paginate::UrlTemplate;
use trawler_scanner::{FetchRequest, RawResponse, ScanError, Transport};

pub const TEMPLATE: &str = "https://listing.test/search?page={page}";

pub fn page_url(page: u32) -> String {
    TEMPLATE.replace("{page}", &page.to_string())
}

/// JSON listing page: `count` items with ids `p<page>-<i>`.
pub fn page_body(total: u64, page: u32, count: u32) -> String {
    let items: Vec<serde_json::Value> = (0..count)
        .map(|i| serde_json::json!({ "id": format!("p{}-{}", page, i), "rank": page * 1000 + i }))
        .collect();
    serde_json::json!({ "total": total, "items": items }).to_string()
}

pub fn extractor() -> Box<JsonExtractor> {
    Box::new(
        JsonExtractor::new("/total", "/items")
            .with_field("id", "/id")
            .with_field("rank", "/rank"),
    )
}

pub fn source(page_size: u32) -> Box<UrlTemplate> {
    Box::new(UrlTemplate::new(TEMPLATE, "listing", page_size).unwrap())
}

/// In-memory site. Pages answer with a fixed response; unknown URLs 404;
/// URLs marked offline fail at the transport level.
#[derive(Default)]
pub struct FakeSite {
    pages: Mutex<HashMap<String, RawResponse>>,
    offline: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeSite {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A listing of `total` results split into pages of `page_size`.
    pub fn listing(total: u64, page_size: u32) -> Arc<Self> {
        let site = Self::new();
        let pages = total.div_ceil(page_size as u64) as u32;
        for page in 0..pages.max(1) {
            let remaining = total.saturating_sub(page as u64 * page_size as u64);
            let count = remaining.min(page_size as u64) as u32;
            site.serve(page, 200, page_body(total, page, count));
        }
        site
    }

    pub fn serve(&self, page: u32, status: u16, body: impl Into<String>) {
        self.serve_url(&page_url(page), status, body);
    }

    pub fn serve_url(&self, url: &str, status: u16, body: impl Into<String>) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), RawResponse::new(status, body));
    }

    pub fn take_offline(&self, page: u32) {
        self.offline.lock().unwrap().insert(page_url(page));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, page: u32) -> usize {
        self.calls_for_url(&page_url(page))
    }

    pub fn calls_for_url(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Transport for FakeSite {
    async fn send(&self, request: &FetchRequest) -> trawler_scanner::error::Result<RawResponse> {
        let url = request.url.as_str();
        self.calls.lock().unwrap().push(url.to_string());
        if self.offline.lock().unwrap().contains(url) {
            return Err(ScanError::Other(format!("connection reset by {}", url)));
        }
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| RawResponse::new(404, "not found")))
    }
}
