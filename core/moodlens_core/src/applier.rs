//! Maps one element's mood scores onto a suppress/keep decision.

use ego_tree::NodeId;

use crate::classifier::MoodScores;
use crate::page::Page;
use crate::registry::Registry;
use crate::render::{suppress, SuppressOutcome};

/// Selected moods scoring at or above `threshold`, highest score first.
pub fn suppression_decision(
    scores: &MoodScores,
    selected: &[String],
    threshold: f64,
) -> Vec<(String, f64)> {
    let mut hits: Vec<(String, f64)> = scores
        .iter()
        .filter(|(mood, score)| **score >= threshold && selected.iter().any(|s| s == *mood))
        .map(|(mood, score)| (mood.clone(), *score))
        .collect();
    // Stable: equal scores keep the service's order.
    hits.sort_by(|a, b| b.1.total_cmp(&a.1));
    hits
}

pub fn mood_label(decision: &[(String, f64)]) -> String {
    decision
        .iter()
        .map(|(mood, _)| mood.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// No selected mood passed the threshold; the element stays visible for good.
    Kept,
    Suppressed,
    AlreadySuppressed,
    /// The element left the document while the request was in flight.
    Stale,
}

pub fn apply_result(
    page: &mut Page,
    registry: &mut Registry,
    node: NodeId,
    scores: &MoodScores,
    selected: &[String],
    threshold: f64,
    overlay_blocks_interaction: bool,
) -> ApplyOutcome {
    let decision = suppression_decision(scores, selected, threshold);
    if decision.is_empty() {
        return ApplyOutcome::Kept;
    }
    match suppress(
        page,
        registry,
        node,
        &mood_label(&decision),
        overlay_blocks_interaction,
    ) {
        SuppressOutcome::Applied => ApplyOutcome::Suppressed,
        SuppressOutcome::AlreadySuppressed => ApplyOutcome::AlreadySuppressed,
        SuppressOutcome::Stale => ApplyOutcome::Stale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;

    fn scores(pairs: &[(&str, f64)]) -> MoodScores {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn moods(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn selected_mood_above_threshold_triggers() {
        let s = scores(&[("joy", 0.9), ("anger", 0.65), ("sadness", 0.3)]);
        let d = suppression_decision(&s, &moods(&["anger"]), 0.6);
        assert_eq!(mood_label(&d), "anger");
    }

    #[test]
    fn selected_mood_below_threshold_does_not_trigger() {
        let s = scores(&[("joy", 0.9), ("anger", 0.65), ("sadness", 0.3)]);
        assert!(suppression_decision(&s, &moods(&["sadness"]), 0.6).is_empty());
    }

    #[test]
    fn threshold_is_inclusive_and_label_is_score_ordered() {
        let s = scores(&[("anger", 0.6), ("fear", 0.95), ("joy", 0.7)]);
        let d = suppression_decision(&s, &moods(&["anger", "joy", "fear"]), 0.6);
        assert_eq!(mood_label(&d), "fear, joy, anger");
    }

    #[test]
    fn equal_scores_keep_response_order() {
        let s = scores(&[("sadness", 0.8), ("anger", 0.8), ("fear", 0.9)]);
        let d = suppression_decision(&s, &moods(&["anger", "sadness", "fear"]), 0.6);
        assert_eq!(mood_label(&d), "fear, sadness, anger");
    }

    #[test]
    fn kept_elements_are_left_untouched() {
        let mut page = Page::parse("https://example.test/", "<body><p id='a'>calm words</p></body>");
        let node = page.select(&Selector::parse("#a").unwrap())[0];
        let before = page.to_html();
        let mut reg = Registry::new();
        let outcome = apply_result(
            &mut page,
            &mut reg,
            node,
            &scores(&[("joy", 0.99)]),
            &moods(&["anger"]),
            0.6,
            true,
        );
        assert_eq!(outcome, ApplyOutcome::Kept);
        assert_eq!(page.to_html(), before);
        assert!(!reg.is_suppressed(node));
    }

    #[test]
    fn matching_elements_are_suppressed_once() {
        let mut page = Page::parse("https://example.test/", "<body><p id='a'>furious words</p></body>");
        let node = page.select(&Selector::parse("#a").unwrap())[0];
        let mut reg = Registry::new();
        let s = scores(&[("anger", 0.8)]);
        let selected = moods(&["anger"]);
        assert_eq!(
            apply_result(&mut page, &mut reg, node, &s, &selected, 0.6, true),
            ApplyOutcome::Suppressed
        );
        assert_eq!(
            apply_result(&mut page, &mut reg, node, &s, &selected, 0.6, true),
            ApplyOutcome::AlreadySuppressed
        );
    }
}
