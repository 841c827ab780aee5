// On-disk response cache
//
// One file per key under <dir>/<namespace>/. Entries are never expired or
// mutated in place; a save overwrites the whole file.

use crate::sanitize::sanitize_filename;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use trawler_scanner::{FetchPolicy, FetchRequest, FetchResult, PageFetcher, Transport};

/// A cache key, already sanitized for use as a file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(raw: &str) -> Self {
        CacheKey(sanitize_filename(raw))
    }

    /// `<source>_<page>_<fingerprint>`, e.g. `biorxiv_3_5d41402abc4b`.
    /// The fingerprint covers method, URL and body, so two queries that
    /// share a source name never share an entry.
    pub fn for_page(source: &str, page_index: u32, request: &FetchRequest) -> Self {
        Self::new(&format!(
            "{}_{}_{}",
            source,
            page_index,
            request_fingerprint(request)
        ))
    }

    /// `<source>_<id>` for detail pages, e.g. a DOI or accession.
    pub fn for_entity(source: &str, id: &str) -> Self {
        Self::new(&format!("{}_{}", source, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// First 6 bytes of SHA-256 over method, URL and body, hex encoded.
pub fn request_fingerprint(request: &FetchRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(request.url.as_bytes());
    hasher.update(b"\n");
    if let Some(body) = &request.body {
        hasher.update(body.as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..6])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub body: String,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ResponseCache {
    root: PathBuf,
    extension: String,
}

impl ResponseCache {
    /// `namespace` keeps runs for different keywords or categories apart.
    pub fn new(dir: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            root: dir.as_ref().join(sanitize_filename(namespace)),
            extension: "html".to_string(),
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.{}", key.as_str(), self.extension))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.path_for(key).is_file()
    }

    pub fn load(&self, key: &CacheKey) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn load_entry(&self, key: &CacheKey) -> io::Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        let Some(body) = self.load(key)? else {
            return Ok(None);
        };
        let stored_at = fs::metadata(&path)?.modified()?;
        Ok(Some(CacheEntry {
            key: key.as_str().to_string(),
            body,
            stored_at: DateTime::<Utc>::from(stored_at),
        }))
    }

    /// Unconditional overwrite. Written to a sibling temp file and renamed
    /// so a crash never leaves a half-written body behind.
    pub fn save(&self, key: &CacheKey, body: &str) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("{}.tmp", self.extension));
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        debug!("Cached {} bytes as {}", body.len(), path.display());
        Ok(())
    }

    pub fn len(&self) -> io::Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }
        let suffix = format!(".{}", self.extension);
        let mut count = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().ends_with(&suffix) {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes the whole namespace directory.
    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Cache,
    Network,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Cache => "cache",
            Origin::Network => "network",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachedFetch {
    pub result: FetchResult,
    pub origin: Origin,
}

/// Cache in front of a [`PageFetcher`].
///
/// With `prefer_cache` any stored body is returned as-is, with zero
/// network calls and `attempt_count == 0`. Without it a stored body is
/// only trusted if it still passes the request's markers and the block
/// classifier. Only successful bodies are ever written.
pub struct CachedFetcher<T: Transport> {
    fetcher: PageFetcher<T>,
    cache: Option<ResponseCache>,
    prefer_cache: bool,
}

impl<T: Transport> CachedFetcher<T> {
    pub fn new(fetcher: PageFetcher<T>, cache: Option<ResponseCache>) -> Self {
        Self {
            fetcher,
            cache,
            prefer_cache: false,
        }
    }

    pub fn with_prefer_cache(mut self, prefer_cache: bool) -> Self {
        self.prefer_cache = prefer_cache;
        self
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    pub fn fetcher(&self) -> &PageFetcher<T> {
        &self.fetcher
    }

    pub async fn fetch(
        &self,
        request: &FetchRequest,
        key: &CacheKey,
        policy: &FetchPolicy,
    ) -> io::Result<CachedFetch> {
        if let Some(cache) = &self.cache {
            if let Some(body) = cache.load(key)? {
                if self.prefer_cache {
                    debug!("Cache hit for {} (preferred)", key);
                    return Ok(CachedFetch {
                        result: FetchResult::success(body, 0),
                        origin: Origin::Cache,
                    });
                }
                let missing = request.missing_markers(&body);
                if missing.is_empty() && !self.fetcher.classifier().is_blocked_body(&body) {
                    debug!("Cache hit for {}", key);
                    return Ok(CachedFetch {
                        result: FetchResult::success(body, 0),
                        origin: Origin::Cache,
                    });
                }
                warn!("Cached body for {} is stale, refetching", key);
            }
        }

        let result = self.fetcher.fetch_with_policy(request, policy).await;
        if let (Some(cache), Some(body)) = (&self.cache, result.body.as_deref()) {
            cache.save(key, body)?;
        }
        Ok(CachedFetch {
            result,
            origin: Origin::Network,
        })
    }
}
