use crate::error::{Result, ScanError};
use crate::result::{FetchRequest, Method};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Raw outcome of one request, before any classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status_code: u16,
    pub body: String,
    pub content_type: Option<String>,
    pub response_time: Duration,
}

impl RawResponse {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
            content_type: None,
            response_time: Duration::from_secs(0),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Anything that can issue a request: an HTTP client, a headless browser
/// driver, or a scripted fake in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &FetchRequest) -> Result<RawResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, request: &FetchRequest) -> Result<RawResponse> {
        (**self).send(request).await
    }
}

/// reqwest-backed transport. One client per run; dropped when the run ends.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn with_timeout(timeout_secs: u64, user_agent: Option<&str>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent.unwrap_or(concat!("Trawler/", env!("CARGO_PKG_VERSION"))))
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs((timeout_secs / 2).max(1)))
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self { client })
    }

    fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ScanError::InvalidHeader(format!("{}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ScanError::InvalidHeader(format!("{}: {}", name, e)))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &FetchRequest) -> Result<RawResponse> {
        let url = request.url.as_str();
        url::Url::parse(url).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", url, e)))?;

        debug!("{} {}", request.method.as_str(), url);
        let start = Instant::now();
        let builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        let mut builder = builder.headers(Self::header_map(&request.headers)?);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let response = builder.send().await?;

        let status_code = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response.text().await?;

        Ok(RawResponse {
            status_code,
            body,
            content_type,
            response_time: start.elapsed(),
        })
    }
}
