// Bot-challenge detection

use crate::transport::RawResponse;

/// Decides whether a response is a bot-challenge / block page rather than
/// real content.
pub trait BlockClassifier: Send + Sync {
    /// Returns a short reason when the response is a block page.
    fn classify(&self, response: &RawResponse) -> Option<String>;

    /// Same check for a body with no status attached, e.g. a cached page.
    fn is_blocked_body(&self, body: &str) -> bool {
        self.classify(&RawResponse::new(200, body)).is_some()
    }
}

/// Fragments only challenge pages carry: Cloudflare challenge script and
/// form ids, Incapsula resource paths and incident banners.
pub const DEFAULT_BLOCK_SIGNATURES: &[&str] = &[
    "cf-chl-",
    "cf_chl_",
    "_incapsula_resource",
    "incapsula incident id",
    "request unsuccessful. incapsula",
];

/// Page titles of interstitials, matched against the start of `<title>`.
pub const DEFAULT_BLOCK_TITLES: &[&str] = &[
    "just a moment",
    "attention required",
    "access denied",
    "robot check",
];

/// Words that count only on a refusal status. A listing may legitimately
/// mention captchas; a 403 that does is a wall.
pub const DEFAULT_REFUSAL_MARKERS: &[&str] = &["captcha", "access denied"];

const REFUSAL_STATUSES: &[u16] = &[403, 429, 503];

/// Flags a response as a block page by challenge signature, interstitial
/// title, or a refusal status paired with a refusal word. All matching is
/// case-insensitive.
#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    signatures: Vec<String>,
    titles: Vec<String>,
    refusal_markers: Vec<String>,
}

fn lowered<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|m| m.as_ref().trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .collect()
}

/// Lowercased, trimmed text of the first `<title>` element.
fn page_title(lowered_body: &str) -> Option<&str> {
    let open = lowered_body.find("<title")?;
    let after_open = &lowered_body[open..];
    let content_start = after_open.find('>')? + 1;
    let content = &after_open[content_start..];
    let end = content.find("</title")?;
    Some(content[..end].trim())
}

impl MarkerClassifier {
    pub fn new() -> Self {
        Self {
            signatures: lowered(DEFAULT_BLOCK_SIGNATURES),
            titles: lowered(DEFAULT_BLOCK_TITLES),
            refusal_markers: lowered(DEFAULT_REFUSAL_MARKERS),
        }
    }

    /// Site-specific signatures that flag a body wherever they appear.
    /// Replaces the built-in rules.
    pub fn with_markers<I>(markers: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            signatures: lowered(markers),
            titles: Vec::new(),
            refusal_markers: Vec::new(),
        }
    }

    /// A classifier that never flags anything.
    pub fn disabled() -> Self {
        Self {
            signatures: Vec::new(),
            titles: Vec::new(),
            refusal_markers: Vec::new(),
        }
    }
}

impl Default for MarkerClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockClassifier for MarkerClassifier {
    fn classify(&self, response: &RawResponse) -> Option<String> {
        if self.signatures.is_empty() && self.titles.is_empty() && self.refusal_markers.is_empty() {
            return None;
        }
        let body = response.body.to_lowercase();
        let status = response.status_code;

        if let Some(sig) = self.signatures.iter().find(|m| body.contains(m.as_str())) {
            return Some(format!("challenge signature '{}' (HTTP {})", sig, status));
        }

        if let Some(title) = page_title(&body) {
            if let Some(t) = self.titles.iter().find(|t| title.starts_with(t.as_str())) {
                return Some(format!("challenge page title '{}' (HTTP {})", t, status));
            }
        }

        if REFUSAL_STATUSES.contains(&status) {
            if let Some(m) = self.refusal_markers.iter().find(|m| body.contains(m.as_str())) {
                return Some(format!("refusal '{}' (HTTP {})", m, status));
            }
        }

        None
    }
}
