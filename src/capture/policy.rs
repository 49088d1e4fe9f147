//! Restricted-page policy: pages the platform never lets us inject into.
//!
//! Checked BEFORE any injection attempt. A match is a policy boundary,
//! not a transient failure, so callers never retry.

use regex::Regex;
use std::sync::LazyLock;

static RESTRICTED_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)^(chrome|edge|brave|opera|vivaldi)://").unwrap(),
            "Browser-internal page",
        ),
        (
            Regex::new(r"(?i)^(chrome|moz|ms-browser)-extension://").unwrap(),
            "Extension page",
        ),
        (Regex::new(r"(?i)^about:").unwrap(), "Browser-internal page"),
        (Regex::new(r"(?i)^devtools://").unwrap(), "Developer tools"),
        (Regex::new(r"(?i)^view-source:").unwrap(), "Source viewer"),
        (
            Regex::new(r"(?i)^https?://chrome\.google\.com/webstore").unwrap(),
            "Extension marketplace",
        ),
        (
            Regex::new(r"(?i)^https?://chromewebstore\.google\.com").unwrap(),
            "Extension marketplace",
        ),
        (
            Regex::new(r"(?i)^https?://microsoftedge\.microsoft\.com/addons").unwrap(),
            "Extension marketplace",
        ),
        (
            Regex::new(r"(?i)^https?://addons\.mozilla\.org").unwrap(),
            "Extension marketplace",
        ),
    ]
});

/// Returns the reason a page URL is off-limits, if it is.
pub fn restriction_reason(url: &str) -> Option<&'static str> {
    let url = url.trim();
    RESTRICTED_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(url))
        .map(|(_, reason)| *reason)
}

/// Check if the selector may be injected into a page.
pub fn is_restricted_url(url: &str) -> bool {
    match restriction_reason(url) {
        Some(reason) => {
            log::warn!("[CAPTURE] Restricted page '{}': reason: {}", url, reason);
            true
        }
        None => false,
    }
}
