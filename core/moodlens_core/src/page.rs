//! In-memory host document.
//!
//! Content elements are addressed by their arena handle (`NodeId`). The page never
//! stores pipeline state on the markup itself; see `registry` for that.

use ego_tree::NodeId;
use scraper::{ElementRef, Html, Node, Selector};

// Tags whose content never gets a rendered box.
const NON_RENDERED_TAGS: &[&str] = &["head", "script", "style", "template", "noscript", "title"];

pub const EMPTY_DOCUMENT: &str = "<!DOCTYPE html><html><head></head><body></body></html>";

pub struct Page {
    url: String,
    html: Html,
}

impl Page {
    pub fn parse(url: impl Into<String>, markup: &str) -> Self {
        Self {
            url: url.into(),
            html: Html::parse_document(markup),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Matching elements in document order.
    pub fn select(&self, selector: &Selector) -> Vec<NodeId> {
        self.html.select(selector).map(|el| el.id()).collect()
    }

    pub fn element(&self, node: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(node).and_then(ElementRef::wrap)
    }

    /// Trimmed text content of the element, or `None` if the handle is not an element.
    pub fn text_of(&self, node: NodeId) -> Option<String> {
        let el = self.element(node)?;
        let text: String = el.text().collect();
        Some(text.trim().to_string())
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        let root = self.html.tree.root().id();
        match self.html.tree.get(node) {
            Some(n) => n.id() == root || n.ancestors().any(|a| a.id() == root),
            None => false,
        }
    }

    /// Static stand-in for "has a layout box": attached, and neither the node nor an
    /// ancestor is hidden by tag, `hidden` attribute or inline `display: none`.
    pub fn is_rendered(&self, node: NodeId) -> bool {
        if !self.is_attached(node) {
            return false;
        }
        let Some(n) = self.html.tree.get(node) else {
            return false;
        };
        std::iter::once(n)
            .chain(n.ancestors())
            .filter_map(ElementRef::wrap)
            .all(|el| !hides_content(el))
    }

    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        match self.html.tree.get(node) {
            Some(n) => n.ancestors().map(|a| a.id()).collect(),
            None => Vec::new(),
        }
    }

    pub fn child_ids(&self, node: NodeId) -> Vec<NodeId> {
        match self.html.tree.get(node) {
            Some(n) => n.children().map(|c| c.id()).collect(),
            None => Vec::new(),
        }
    }

    /// First element under `scope` (inclusive) carrying `attr="value"`.
    pub fn find_by_attr(&self, scope: NodeId, attr: &str, value: &str) -> Option<NodeId> {
        let scope = self.html.tree.get(scope)?;
        scope
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().attr(attr) == Some(value))
            .map(|el| el.id())
    }

    pub fn body(&self) -> NodeId {
        self.html
            .tree
            .root()
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "body")
            .map(|el| el.id())
            .unwrap_or_else(|| self.html.root_element().id())
    }

    /// Parses `markup` as a body fragment and appends copies of its top-level nodes
    /// under `parent`. Returns the handles of the appended top-level nodes.
    pub fn graft_fragment(&mut self, parent: NodeId, markup: &str) -> Vec<NodeId> {
        let fragment = Html::parse_fragment(markup);
        let mut grafted = Vec::new();
        for top in fragment.root_element().children() {
            if let Some(id) = copy_subtree(&mut self.html.tree, parent, top) {
                grafted.push(id);
            }
        }
        grafted
    }

    /// Moves `children` (in order) to the end of `new_parent`'s child list.
    pub fn reparent(&mut self, new_parent: NodeId, children: &[NodeId]) {
        for &child in children {
            if child == new_parent {
                continue;
            }
            if let Some(mut parent) = self.html.tree.get_mut(new_parent) {
                parent.append_id(child);
            }
        }
    }

    /// New content arriving at the end of the body.
    pub fn append_markup(&mut self, markup: &str) -> usize {
        let body = self.body();
        self.graft_fragment(body, markup).len()
    }

    /// Detaches every element matching `selector`. Handles stay valid but unattached.
    pub fn remove_matching(&mut self, selector: &Selector) -> usize {
        let doomed = self.select(selector);
        let mut removed = 0;
        for id in doomed {
            if let Some(mut node) = self.html.tree.get_mut(id) {
                node.detach();
                removed += 1;
            }
        }
        removed
    }

    pub fn to_html(&self) -> String {
        self.html.html()
    }
}

fn copy_subtree(
    tree: &mut ego_tree::Tree<Node>,
    parent: NodeId,
    source: ego_tree::NodeRef<'_, Node>,
) -> Option<NodeId> {
    let id = tree.get_mut(parent)?.append(source.value().clone()).id();
    for child in source.children() {
        copy_subtree(tree, id, child);
    }
    Some(id)
}

fn hides_content(el: ElementRef<'_>) -> bool {
    let v = el.value();
    if NON_RENDERED_TAGS.contains(&v.name()) || v.attr("hidden").is_some() {
        return true;
    }
    v.attr("style").is_some_and(|style| {
        let compact: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        compact
            .split(';')
            .any(|decl| decl == "display:none" || decl == "display:none!important")
    })
}
