//! Candidate selection: which elements are worth one classifier call.

use ego_tree::NodeId;
use scraper::Selector;
use std::collections::HashSet;
use tracing::debug;

use crate::config::{FilterConfig, SiteProfile};
use crate::error::ConfigError;
use crate::page::Page;
use crate::registry::Registry;

/// Decides the minimum text length. Length is counted in UTF-16 code units, the
/// unit page scripts measure `textContent` in, so an emoji counts as two.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectorKind {
    /// Site-specific container selector; low length bar.
    Structural,
    /// Bare tag selector applied everywhere; noisy, high length bar.
    Generic,
}

#[derive(Clone, Debug)]
pub struct CompiledSelector {
    pub source: String,
    pub kind: SelectorKind,
    pub selector: Selector,
}

impl CompiledSelector {
    pub fn compile(source: &str, kind: SelectorKind) -> Result<Self, ConfigError> {
        let selector = Selector::parse(source).map_err(|e| ConfigError::Selector {
            selector: source.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            kind,
            selector,
        })
    }
}

#[derive(Clone, Debug)]
struct CompiledProfile {
    prefix: String,
    selectors: Vec<CompiledSelector>,
}

/// Site profile table with every selector parsed up front.
#[derive(Clone, Debug)]
pub struct SiteTable {
    profiles: Vec<CompiledProfile>,
    generic: Vec<CompiledSelector>,
}

impl SiteTable {
    pub fn compile(profiles: &[SiteProfile], generic: &[String]) -> Result<Self, ConfigError> {
        let profiles = profiles
            .iter()
            .map(|p| {
                Ok(CompiledProfile {
                    prefix: p.prefix.clone(),
                    selectors: p
                        .selectors
                        .iter()
                        .map(|s| CompiledSelector::compile(s, SelectorKind::Structural))
                        .collect::<Result<_, ConfigError>>()?,
                })
            })
            .collect::<Result<_, ConfigError>>()?;
        let generic = generic
            .iter()
            .map(|s| CompiledSelector::compile(s, SelectorKind::Generic))
            .collect::<Result<_, ConfigError>>()?;
        Ok(Self { profiles, generic })
    }

    /// Selectors to apply for `url`, in application order: the first profile whose
    /// prefix matches, then (per policy) the generic tags.
    pub fn selectors_for(&self, url: &str, config: &FilterConfig) -> Vec<&CompiledSelector> {
        let site = self.profiles.iter().find(|p| url.starts_with(&p.prefix));
        let with_generic = match site {
            Some(_) => config.generic_with_site_profile,
            None => config.include_generic_fallback,
        };
        let mut out: Vec<&CompiledSelector> = site
            .map(|p| p.selectors.iter().collect())
            .unwrap_or_default();
        if with_generic {
            out.extend(self.generic.iter());
        }
        out
    }
}

/// One scan pass. Document order within each selector, selectors concatenated in
/// configured order. A node is judged once, by the first selector that matched it.
pub fn select_candidates(
    page: &Page,
    registry: &Registry,
    table: &SiteTable,
    config: &FilterConfig,
) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for sel in table.selectors_for(page.url(), config) {
        let min_chars = match sel.kind {
            SelectorKind::Generic => config.generic_min_chars,
            SelectorKind::Structural => config.structural_min_chars,
        };
        let matched = page.select(&sel.selector);
        if !matched.is_empty() {
            debug!("selector '{}' matched {} elements", sel.source, matched.len());
        }
        for node in matched {
            if !seen.insert(node) {
                continue;
            }
            if registry.is_analyzed(node) || registry.is_suppressed(node) {
                continue;
            }
            if !page.is_rendered(node) || inside_suppressed(page, registry, node) {
                continue;
            }
            let long_enough = page
                .text_of(node)
                .is_some_and(|t| t.encode_utf16().count() >= min_chars);
            if long_enough {
                out.push(node);
            }
        }
    }
    out
}

// Content under an already-blurred element is hidden; skip it.
fn inside_suppressed(page: &Page, registry: &Registry, node: NodeId) -> bool {
    page.ancestors(node)
        .into_iter()
        .any(|a| registry.is_suppressed(a))
}
