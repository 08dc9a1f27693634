//! Turns a candidate set into one classifier request and routes results back.

use ego_tree::NodeId;
use std::collections::HashMap;

use crate::classifier::{AnalysisItem, Classification};
use crate::page::Page;
use crate::registry::Registry;

/// A request in flight: the text snapshots sent, and where each identity points.
#[derive(Debug)]
pub struct Batch {
    pub generation: u64,
    pub items: Vec<AnalysisItem>,
    pub routes: HashMap<String, NodeId>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Pairs each result with its element. Results whose identity this batch never
    /// sent are dropped and counted.
    pub fn route(&self, results: Vec<Classification>) -> (Vec<(NodeId, Classification)>, usize) {
        let mut routed = Vec::with_capacity(results.len());
        let mut unrouted = 0;
        for result in results {
            match self.routes.get(&result.id) {
                Some(&node) => routed.push((node, result)),
                None => unrouted += 1,
            }
        }
        (routed, unrouted)
    }
}

/// Identifies and marks every candidate analyzed, then snapshots its text.
/// Runs before the request is issued so an overlapping scan cannot pick the same
/// elements again. `None` when there is nothing to send.
pub fn prepare_batch(
    page: &Page,
    registry: &mut Registry,
    generation: u64,
    candidates: &[NodeId],
) -> Option<Batch> {
    let mut items = Vec::with_capacity(candidates.len());
    let mut routes = HashMap::with_capacity(candidates.len());
    for &node in candidates {
        let Some(text) = page.text_of(node) else {
            continue;
        };
        let id = registry.identify(node);
        registry.mark_analyzed(node);
        if routes.insert(id.clone(), node).is_none() {
            items.push(AnalysisItem { id, text });
        }
    }
    if items.is_empty() {
        return None;
    }
    Some(Batch {
        generation,
        items,
        routes,
    })
}
