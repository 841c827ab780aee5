pub mod backoff;
pub mod classifier;
pub mod error;
pub mod fetcher;
pub mod result;
pub mod transport;

pub use backoff::Backoff;
pub use classifier::{BlockClassifier, MarkerClassifier};
pub use error::{AttemptFailure, ScanError};
pub use fetcher::{FetchPolicy, PageFetcher};
pub use result::{FetchRequest, FetchResult, FetchStatus, Method};
pub use transport::{HttpTransport, RawResponse, Transport};
