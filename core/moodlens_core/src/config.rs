use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:5000/analyze_bulk";
pub const DEFAULT_THRESHOLD: f64 = 0.6;
pub const DEFAULT_TICK_MS: u64 = 1000;
pub const DEFAULT_DEBOUNCE_MS: u64 = 1200;

/// Tunables of the scan/classify/suppress pipeline.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    /// Full URL of the bulk classification endpoint.
    pub endpoint: String,
    /// Minimum score for a selected mood to trigger suppression.
    pub threshold: f64,
    /// Auto-filter tick period (milliseconds).
    pub tick_ms: u64,
    /// Debounce window shared by every trigger path (milliseconds).
    pub debounce_ms: u64,
    /// Use the generic tag selectors when no site profile matches the page.
    pub include_generic_fallback: bool,
    /// Also append the generic tag selectors after a matched site profile.
    pub generic_with_site_profile: bool,
    /// Whether the overlay swallows pointer input over suppressed content.
    pub overlay_blocks_interaction: bool,
    /// Minimum trimmed text length for elements matched by a generic selector.
    pub generic_min_chars: usize,
    /// Minimum trimmed text length for elements matched by a site selector.
    pub structural_min_chars: usize,
    pub generic_selectors: Vec<String>,
    pub request_timeout_ms: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            threshold: DEFAULT_THRESHOLD,
            tick_ms: DEFAULT_TICK_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            include_generic_fallback: true,
            generic_with_site_profile: true,
            overlay_blocks_interaction: true,
            generic_min_chars: 300,
            structural_min_chars: 20,
            generic_selectors: vec!["p".to_string(), "span".to_string()],
            request_timeout_ms: 10_000,
        }
    }
}

impl FilterConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

/// URL prefix and the structural selectors that find content containers on that site.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SiteProfile {
    pub prefix: String,
    pub selectors: Vec<String>,
}

impl SiteProfile {
    fn new(prefix: &str, selectors: &[&str]) -> Self {
        Self {
            prefix: prefix.to_string(),
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub fn default_site_profiles() -> Vec<SiteProfile> {
    vec![
        SiteProfile::new(
            "https://www.youtube.com/",
            &[
                "#contents > ytd-rich-item-renderer",
                "#contents > ytd-video-renderer",
                "#contents > yt-lockup-view-model",
                "ytm-shorts-lockup-view-model",
                "#contents > ytd-comment-thread-renderer",
                "#contents > ytd-comment-view-model",
            ],
        ),
        SiteProfile::new(
            "https://www.reddit.com/",
            &["shreddit-feed > article", "shreddit-comment > [slot='comment']"],
        ),
    ]
}

/// Reads a JSON array of `{ "prefix": ..., "selectors": [...] }` entries.
pub fn load_site_profiles(path: &Path) -> Result<Vec<SiteProfile>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
        path: path.display().to_string(),
        source,
    })
}
