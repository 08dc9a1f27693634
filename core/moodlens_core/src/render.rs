//! Suppression: blur an element's content and lay a notice over it.
//!
//! The host element's own attributes are never rewritten. Instead a positioned frame
//! is injected as its only child, holding the blurred wrapper (with the original
//! children moved in, untouched) and the overlay.

use ego_tree::NodeId;

use crate::page::Page;
use crate::registry::Registry;

pub const ROLE_ATTR: &str = "data-moodlens-role";
pub const NOTICE: &str = "This content is hidden by MoodLens";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuppressOutcome {
    Applied,
    AlreadySuppressed,
    Stale,
}

/// Idempotent: a second call for the same element is a no-op.
pub fn suppress(
    page: &mut Page,
    registry: &mut Registry,
    node: NodeId,
    label: &str,
    blocks_interaction: bool,
) -> SuppressOutcome {
    if registry.is_suppressed(node) {
        return SuppressOutcome::AlreadySuppressed;
    }
    if page.element(node).is_none() || !page.is_attached(node) {
        return SuppressOutcome::Stale;
    }
    registry.mark_suppressed(node);

    let original = page.child_ids(node);
    let grafted = page.graft_fragment(node, &frame_markup(label, blocks_interaction));
    let wrapper = grafted
        .first()
        .and_then(|&frame| page.find_by_attr(frame, ROLE_ATTR, "wrapper"));
    if let Some(wrapper) = wrapper {
        page.reparent(wrapper, &original);
    }
    SuppressOutcome::Applied
}

fn frame_markup(label: &str, blocks_interaction: bool) -> String {
    let pointer = if blocks_interaction { "all" } else { "none" };
    let content_pointer = if blocks_interaction { "none" } else { "auto" };
    format!(
        concat!(
            r#"<div {role}="frame" style="position: relative;">"#,
            r#"<div {role}="wrapper" style="filter: blur(10px); transition: filter 0.3s ease; width: 100%; height: 100%; pointer-events: {content_pointer};"></div>"#,
            r#"<div {role}="overlay" data-moodlens-mood="{mood}" style="position: absolute; inset: 0; display: flex; flex-direction: column; align-items: center; justify-content: center; background: rgba(0,0,0,0.6); color: white; text-align: center; padding: 20px; border-radius: 8px; backdrop-filter: blur(3px); pointer-events: {pointer};">"#,
            r#"<div>{notice}</div><div>Detected mood: {mood}</div>"#,
            r#"</div></div>"#
        ),
        role = ROLE_ATTR,
        content_pointer = content_pointer,
        pointer = pointer,
        notice = NOTICE,
        mood = escape_html(label),
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
