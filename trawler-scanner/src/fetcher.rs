use crate::backoff::Backoff;
use crate::classifier::{BlockClassifier, MarkerClassifier};
use crate::error::{AttemptFailure, ScanError};
use crate::result::{FetchRequest, FetchResult};
use crate::transport::{RawResponse, Transport};
use std::time::Duration;
use tracing::{debug, info, warn};

const RETRYABLE_STATUSES: &[u16] = &[500, 502, 503, 504];

/// Retry budget and delay schedule for one logical request.
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl FetchPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::new(base_backoff),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Issues a single logical request with retry, backoff and content
/// validation. Never returns an error: every outcome is a [`FetchResult`].
pub struct PageFetcher<T: Transport> {
    transport: T,
    classifier: Box<dyn BlockClassifier>,
}

impl<T: Transport> PageFetcher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            classifier: Box::new(MarkerClassifier::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn BlockClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn classifier(&self) -> &dyn BlockClassifier {
        self.classifier.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn fetch(
        &self,
        request: &FetchRequest,
        max_retries: u32,
        base_backoff: Duration,
    ) -> FetchResult {
        self.fetch_with_policy(request, &FetchPolicy::new(max_retries, base_backoff))
            .await
    }

    pub async fn fetch_with_policy(&self, request: &FetchRequest, policy: &FetchPolicy) -> FetchResult {
        let max_attempts = policy.max_retries.saturating_add(1);
        let mut last_delay = Duration::ZERO;
        let mut last_failure: Option<AttemptFailure> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let retry = attempt - 1;
                let rate_limited = last_failure
                    .as_ref()
                    .map(AttemptFailure::is_rate_limited)
                    .unwrap_or(false);
                // Never shorter than the previous wait, even after a 429 clears.
                let delay = policy.backoff.delay(retry, rate_limited).max(last_delay);
                last_delay = delay;
                debug!(
                    "Retry {}/{} for {} in {:?}",
                    retry, policy.max_retries, request.url, delay
                );
                tokio::time::sleep(delay).await;
            }

            debug!("Fetching {} (attempt {}/{})", request.url, attempt, max_attempts);

            let response = match self.transport.send(request).await {
                Ok(response) => response,
                Err(ScanError::InvalidUrl(e)) | Err(ScanError::InvalidHeader(e)) => {
                    warn!("Request for {} cannot be issued: {}", request.url, e);
                    return FetchResult::failed(e, attempt);
                }
                Err(e) => {
                    warn!("Attempt {} for {} failed: {}", attempt, request.url, e);
                    last_failure = Some(AttemptFailure::TransientNetwork(e.to_string()));
                    continue;
                }
            };

            match self.classify_attempt(request, &response) {
                Ok(()) => {
                    info!(
                        "Fetched {} bytes from {} in {} attempt(s)",
                        response.body.len(),
                        request.url,
                        attempt
                    );
                    return FetchResult::success(response.body, attempt);
                }
                Err(AttemptFailure::Blocked(reason)) => {
                    warn!("Blocked on {}: {}", request.url, reason);
                    return FetchResult::blocked(reason, attempt);
                }
                Err(failure) if failure.is_retryable() => {
                    warn!("Attempt {} for {} failed: {}", attempt, request.url, failure);
                    last_failure = Some(failure);
                }
                Err(failure) => {
                    warn!("Giving up on {}: {}", request.url, failure);
                    return FetchResult::failed(failure.to_string(), attempt);
                }
            }
        }

        let reason = last_failure
            .map(|f| f.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        warn!(
            "Exhausted {} attempt(s) for {}: {}",
            max_attempts, request.url, reason
        );
        FetchResult::failed(reason, max_attempts)
    }

    fn classify_attempt(
        &self,
        request: &FetchRequest,
        response: &RawResponse,
    ) -> Result<(), AttemptFailure> {
        if let Some(reason) = self.classifier.classify(response) {
            return Err(AttemptFailure::Blocked(reason));
        }

        if response.status_code == 429 {
            return Err(AttemptFailure::RateLimited {
                status: response.status_code,
            });
        }

        if RETRYABLE_STATUSES.contains(&response.status_code) {
            return Err(AttemptFailure::TransientNetwork(format!(
                "HTTP {}",
                response.status_code
            )));
        }

        if !response.is_success() {
            return Err(AttemptFailure::HttpStatus(response.status_code));
        }

        let missing = request.missing_markers(&response.body);
        if !missing.is_empty() {
            return Err(AttemptFailure::ValidationFailure { missing });
        }

        Ok(())
    }
}
