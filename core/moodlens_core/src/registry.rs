//! Side-table of per-element pipeline state: identity, analyzed, suppressed.

use ego_tree::NodeId;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::{HashMap, HashSet};

use crate::page::Page;

/// Width of a generated identity (62^8, roughly 47 bits).
pub const IDENTITY_LEN: usize = 8;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ElementRecord {
    pub identity: Option<String>,
    pub analyzed: bool,
    pub suppressed: bool,
}

#[derive(Default)]
pub struct Registry {
    records: HashMap<NodeId, ElementRecord>,
    issued: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the element's identity, assigning one on first sight. Never changes afterwards.
    pub fn identify(&mut self, node: NodeId) -> String {
        if let Some(id) = self.records.get(&node).and_then(|r| r.identity.clone()) {
            return id;
        }
        let id = loop {
            let candidate = random_token();
            if self.issued.insert(candidate.clone()) {
                break candidate;
            }
        };
        self.records.entry(node).or_default().identity = Some(id.clone());
        id
    }

    #[cfg(test)]
    pub fn record(&self, node: NodeId) -> Option<&ElementRecord> {
        self.records.get(&node)
    }

    pub fn is_analyzed(&self, node: NodeId) -> bool {
        self.records.get(&node).is_some_and(|r| r.analyzed)
    }

    pub fn is_suppressed(&self, node: NodeId) -> bool {
        self.records.get(&node).is_some_and(|r| r.suppressed)
    }

    pub fn mark_analyzed(&mut self, node: NodeId) {
        self.records.entry(node).or_default().analyzed = true;
    }

    /// Returns false if the element was already suppressed.
    pub fn mark_suppressed(&mut self, node: NodeId) -> bool {
        let record = self.records.entry(node).or_default();
        if record.suppressed {
            return false;
        }
        record.suppressed = true;
        true
    }

    /// Drops entries whose nodes are no longer in the document. Their identities stay
    /// reserved so a late response can never be routed to a different element.
    pub fn prune(&mut self, page: &Page) -> usize {
        let before = self.records.len();
        self.records.retain(|node, _| page.is_attached(*node));
        before - self.records.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.issued.clear();
    }

    /// (analyzed, suppressed)
    pub fn counts(&self) -> (usize, usize) {
        self.records.values().fold((0, 0), |(a, s), r| {
            (a + r.analyzed as usize, s + r.suppressed as usize)
        })
    }
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(IDENTITY_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;

    fn page() -> Page {
        Page::parse(
            "https://example.test/",
            "<body><p id='a'>a</p><p id='b'>b</p></body>",
        )
    }

    fn node(p: &Page, css: &str) -> NodeId {
        p.select(&Selector::parse(css).unwrap())[0]
    }

    #[test]
    fn identify_is_stable_per_element() {
        let p = page();
        let mut reg = Registry::new();
        let a = node(&p, "#a");
        let first = reg.identify(a);
        assert_eq!(reg.identify(a), first);
        assert_eq!(first.len(), IDENTITY_LEN);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn distinct_elements_get_distinct_identities() {
        let p = page();
        let mut reg = Registry::new();
        assert_ne!(reg.identify(node(&p, "#a")), reg.identify(node(&p, "#b")));
    }

    #[test]
    fn suppression_mark_is_one_shot() {
        let p = page();
        let mut reg = Registry::new();
        let a = node(&p, "#a");
        assert!(reg.mark_suppressed(a));
        assert!(!reg.mark_suppressed(a));
        assert!(reg.is_suppressed(a));
        assert!(!reg.is_analyzed(a));
        assert_eq!(reg.counts(), (0, 1));
    }

    #[test]
    fn prune_forgets_detached_elements_only() {
        let mut p = page();
        let mut reg = Registry::new();
        let a = node(&p, "#a");
        let b = node(&p, "#b");
        reg.mark_analyzed(a);
        reg.mark_analyzed(b);
        p.remove_matching(&Selector::parse("#a").unwrap());
        assert_eq!(reg.prune(&p), 1);
        assert!(reg.record(a).is_none());
        assert!(reg.is_analyzed(b));
    }
}
