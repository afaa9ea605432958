//! Episode numbers from episode page URLs.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use tracklist_core::error::Result;

// =============================================================================
// Compiled patterns (tried in order, first match wins)
// =============================================================================

static EPISODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // episode-313
        r"(?i)episode-(\d+)",
        // episode_870, episode870
        r"(?i)episode[_-]?(\d+)",
        // asot-1110, asot_1110
        r"(?i)asot[_-]?(\d+)",
        // listen-now-asot1119
        r"(?i)asot(\d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid episode regex"))
    .collect()
});

/// Extract the episode number from an episode URL or file name.
///
/// ```
/// use tracklist_source::extract_episode_number;
///
/// assert_eq!(
///     extract_episode_number("https://www.astateoftrance.com/asot-1110/").as_deref(),
///     Some("1110")
/// );
/// assert_eq!(extract_episode_number("https://example.com/about"), None);
/// ```
pub fn extract_episode_number(url: &str) -> Option<String> {
    EPISODE_PATTERNS
        .iter()
        .find_map(|re| re.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Read one URL per line, trimmed. Blank lines and `#` comments are skipped.
pub fn read_episode_urls(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// URLs whose episode is not in `stored`, in input order.
///
/// A URL without a recognizable episode number is always pending.
pub fn pending_episode_urls(urls: &[String], stored: &BTreeSet<String>) -> Vec<String> {
    urls.iter()
        .filter(|url| match extract_episode_number(url) {
            Some(episode) => !stored.contains(&episode),
            None => {
                debug!(url = %url, "No episode number in URL");
                true
            }
        })
        .cloned()
        .collect()
}
