// Tests for detail-page enrichment

mod common;

use common::FakeSite;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use trawler_core::cache::{CacheKey, CachedFetcher, ResponseCache};
use trawler_core::enrich::DetailEnricher;
use trawler_core::extract::HtmlDocumentExtractor;
use trawler_core::record::{FieldValue, Record};
use trawler_scanner::{FetchPolicy, PageFetcher};
use url::Url;

const DETAIL: &str = r#"<html><head>
    <meta name="article:published_time" content="2024-03-01">
    </head><body><div class="abstract">Spatial maps of the mouse brain.</div></body></html>"#;

fn enricher(site: &Arc<FakeSite>, cache: Option<ResponseCache>) -> DetailEnricher<Arc<FakeSite>> {
    let extractor = HtmlDocumentExtractor::new()
        .with_field("posted", "meta[name='article:published_time']@content")
        .unwrap()
        .with_field("abstract", ".abstract")
        .unwrap();
    DetailEnricher::new(
        CachedFetcher::new(PageFetcher::new(site.clone()), cache),
        Box::new(extractor),
        "listing",
        "url",
    )
    .with_key_field(Some("doi".to_string()))
    .with_base(Url::parse("https://listing.test/search?page=0").unwrap())
    .with_policy(FetchPolicy::new(0, Duration::from_millis(1)))
}

fn record(doi: &str, url: &str) -> Record {
    Record::new().with("doi", doi).with("url", url)
}

// ============================================================================
// Enrichment Tests
// ============================================================================

#[tokio::test]
async fn test_relative_link_is_resolved_and_fields_filled() {
    let site = FakeSite::new();
    site.serve_url("https://listing.test/content/10.1101/001", 200, DETAIL);
    let mut enricher = enricher(&site, None);

    let mut rec = record("10.1101/001", "/content/10.1101/001");
    enricher.enrich(&mut rec).await.unwrap();

    assert_eq!(rec.get("posted"), Some(&FieldValue::Text("2024-03-01".into())));
    assert_eq!(
        rec.get("abstract"),
        Some(&FieldValue::Text("Spatial maps of the mouse brain.".into()))
    );
    assert_eq!(enricher.stats().network_fetches, 1);
}

#[tokio::test]
async fn test_details_are_cached_by_entity_key() {
    let dir = TempDir::new().unwrap();
    let cache = ResponseCache::new(dir.path(), "listing_detail");
    let site = FakeSite::new();
    site.serve_url("https://listing.test/content/10.1101/001", 200, DETAIL);

    let mut first = enricher(&site, Some(cache.clone()));
    first.enrich(&mut record("10.1101/001", "/content/10.1101/001")).await.unwrap();
    assert!(cache.contains(&CacheKey::for_entity("listing", "10.1101/001")));

    let mut second = enricher(&site, Some(cache));
    let mut rec = record("10.1101/001", "/content/10.1101/001");
    second.enrich(&mut rec).await.unwrap();

    assert_eq!(site.call_count(), 1);
    assert_eq!(second.stats().cache_hits, 1);
    assert_eq!(rec.get("posted"), Some(&FieldValue::Text("2024-03-01".into())));
}

#[tokio::test]
async fn test_unreachable_detail_leaves_fields_empty() {
    let site = FakeSite::new();
    site.serve_url(
        "https://listing.test/content/blocked",
        403,
        "<html><title>Just a moment...</title></html>",
    );
    let mut enricher = enricher(&site, None);

    let mut records = vec![
        record("a", "/content/missing"),
        record("b", "/content/blocked"),
        Record::new().with("doi", "c"),
    ];
    enricher.enrich_all(&mut records).await.unwrap();

    for rec in &records {
        assert_eq!(rec.get("posted"), Some(&FieldValue::Null));
        assert_eq!(rec.get("abstract"), Some(&FieldValue::Null));
    }
    assert_eq!(enricher.stats().failed, 2);
    assert_eq!(enricher.stats().missing_url, 1);
}

#[tokio::test]
async fn test_absolute_link_and_url_key_fallback() {
    let site = FakeSite::new();
    site.serve_url("https://other.test/record/7", 200, DETAIL);
    let mut enricher = enricher(&site, None).with_key_field(None);

    let mut rec = Record::new().with("url", "https://other.test/record/7");
    enricher.enrich(&mut rec).await.unwrap();

    assert_eq!(site.calls_for_url("https://other.test/record/7"), 1);
    assert!(!rec.get("abstract").unwrap().is_null());
}
