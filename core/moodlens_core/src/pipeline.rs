//! One filter pass: scan, tag, submit, apply.
//!
//! All page work happens under the page lock; the lock is released for the
//! classifier call, which is the only suspension point inside a run.

use async_trait::async_trait;
use scraper::Selector;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::applier::{apply_result, ApplyOutcome};
use crate::classifier::Classifier;
use crate::config::FilterConfig;
use crate::dispatch::prepare_batch;
use crate::eligibility::{select_candidates, SiteTable};
use crate::page::Page;
use crate::registry::Registry;
use crate::scheduler::FilterRun;

pub struct PageState {
    pub page: Page,
    pub registry: Registry,
    /// Bumped on every navigation; batches from an older document are dropped.
    pub generation: u64,
}

impl PageState {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            registry: Registry::new(),
            generation: 0,
        }
    }

    pub fn navigate(&mut self, page: Page) {
        self.page = page;
        self.registry.clear();
        self.generation += 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Discarded {
    Network,
    Protocol,
    Navigated,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub submitted: usize,
    pub suppressed: usize,
    pub kept: usize,
    pub stale: usize,
    pub unrouted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discarded: Option<Discarded>,
}

#[derive(Serialize)]
pub struct PageSnapshot {
    pub url: String,
    pub generation: u64,
    pub analyzed: usize,
    pub suppressed: usize,
    pub html: String,
}

pub struct MoodFilter {
    state: Arc<Mutex<PageState>>,
    classifier: Arc<dyn Classifier>,
    sites: SiteTable,
    config: FilterConfig,
}

impl MoodFilter {
    pub fn new(
        page: Page,
        classifier: Arc<dyn Classifier>,
        sites: SiteTable,
        config: FilterConfig,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(PageState::new(page))),
            classifier,
            sites,
            config,
        }
    }

    pub async fn run_once(&self, selected: &[String]) -> RunReport {
        let mut report = RunReport::default();

        let batch = {
            let mut state = self.state.lock().await;
            let PageState {
                page,
                registry,
                generation,
            } = &mut *state;
            let pruned = registry.prune(page);
            if pruned > 0 {
                debug!("forgot {pruned} detached elements");
            }
            let candidates = select_candidates(page, registry, &self.sites, &self.config);
            prepare_batch(page, registry, *generation, &candidates)
        };
        let Some(batch) = batch else {
            return report;
        };

        report.submitted = batch.len();
        info!("MoodLens: Sending {} elements for analysis.", batch.len());

        let results = match self.classifier.classify(&batch.items).await {
            Ok(results) => results,
            Err(err) => {
                error!("MoodLens API Error: {err}");
                report.discarded = Some(match err {
                    crate::error::ClassifyError::Protocol(_) => Discarded::Protocol,
                    _ => Discarded::Network,
                });
                return report;
            }
        };

        let mut state = self.state.lock().await;
        if state.generation != batch.generation {
            info!("page changed while classifying; dropping {} results", results.len());
            report.discarded = Some(Discarded::Navigated);
            return report;
        }

        let (routed, unrouted) = batch.route(results);
        report.unrouted = unrouted;
        if unrouted > 0 {
            debug!("{unrouted} results referenced unknown elements");
        }

        let PageState { page, registry, .. } = &mut *state;
        for (node, result) in routed {
            match apply_result(
                page,
                registry,
                node,
                &result.scores,
                selected,
                self.config.threshold,
                self.config.overlay_blocks_interaction,
            ) {
                ApplyOutcome::Suppressed => report.suppressed += 1,
                ApplyOutcome::Kept => report.kept += 1,
                ApplyOutcome::Stale => report.stale += 1,
                ApplyOutcome::AlreadySuppressed => {}
            }
        }
        report
    }

    /// Replaces the document (navigation). In-flight batches for the old one are dropped.
    pub async fn navigate(&self, url: &str, markup: &str) {
        self.state.lock().await.navigate(Page::parse(url, markup));
    }

    pub async fn append_content(&self, markup: &str) -> usize {
        self.state.lock().await.page.append_markup(markup)
    }

    pub async fn remove_content(&self, selector: &Selector) -> usize {
        let mut state = self.state.lock().await;
        let removed = state.page.remove_matching(selector);
        let PageState { page, registry, .. } = &mut *state;
        registry.prune(page);
        removed
    }

    pub async fn snapshot(&self) -> PageSnapshot {
        let state = self.state.lock().await;
        let (analyzed, suppressed) = state.registry.counts();
        PageSnapshot {
            url: state.page.url().to_string(),
            generation: state.generation,
            analyzed,
            suppressed,
            html: state.page.to_html(),
        }
    }
}

#[async_trait]
impl FilterRun for MoodFilter {
    async fn run(&self, moods: Vec<String>) {
        let report = self.run_once(&moods).await;
        if report.submitted > 0 {
            info!(
                "run done: submitted={} suppressed={} kept={} unrouted={} discarded={:?}",
                report.submitted, report.suppressed, report.kept, report.unrouted, report.discarded
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{AnalysisItem, Classification, MoodScores};
    use crate::config::default_site_profiles;
    use crate::error::ClassifyError;
    use tokio::sync::Notify;

    const REDDIT: &str = "https://www.reddit.com/r/all/";

    /// Scores each item from keywords in its text.
    #[derive(Default)]
    struct KeywordClassifier {
        calls: std::sync::Mutex<Vec<Vec<AnalysisItem>>>,
        mode: Mode,
        gate: Option<Arc<Notify>>,
    }

    #[derive(Default, Clone, Copy, PartialEq)]
    enum Mode {
        #[default]
        Keywords,
        Malformed,
        Down,
        Foreign,
    }

    impl KeywordClassifier {
        fn with_mode(mode: Mode) -> Self {
            Self {
                mode,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Vec<AnalysisItem>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Classifier for KeywordClassifier {
        async fn classify(
            &self,
            items: &[AnalysisItem],
        ) -> Result<Vec<Classification>, ClassifyError> {
            self.calls.lock().unwrap().push(items.to_vec());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match self.mode {
                Mode::Malformed => {
                    return crate::classifier::decode_response(serde_json::json!({"oops": true}))
                }
                Mode::Down => return Err(ClassifyError::Status(503)),
                _ => {}
            }
            let mut out: Vec<Classification> = items
                .iter()
                .map(|item| {
                    let mut scores = MoodScores::new();
                    let anger = if item.text.contains("furious") { 0.65 } else { 0.05 };
                    scores.insert("joy".to_string(), if item.text.contains("happy") { 0.9 } else { 0.1 });
                    scores.insert("anger".to_string(), anger);
                    scores.insert("sadness".to_string(), 0.3);
                    Classification {
                        id: item.id.clone(),
                        scores,
                    }
                })
                .collect();
            if self.mode == Mode::Foreign {
                out.push(Classification {
                    id: "notours1".to_string(),
                    scores: MoodScores::from([("anger".to_string(), 1.0)]),
                });
            }
            Ok(out)
        }
    }

    fn feed(posts: &[&str]) -> String {
        let articles: String = posts
            .iter()
            .enumerate()
            .map(|(i, text)| format!("<article id='p{i}'>{text}</article>"))
            .collect();
        format!("<html><body><shreddit-feed>{articles}</shreddit-feed></body></html>")
    }

    fn filter(markup: &str, classifier: Arc<KeywordClassifier>) -> MoodFilter {
        let config = FilterConfig::default();
        let sites = SiteTable::compile(&default_site_profiles(), &config.generic_selectors).unwrap();
        MoodFilter::new(Page::parse(REDDIT, markup), classifier, sites, config)
    }

    fn anger() -> Vec<String> {
        vec!["anger".to_string()]
    }

    async fn overlays(f: &MoodFilter) -> usize {
        let state = f.state.lock().await;
        state
            .page
            .select(&Selector::parse("[data-moodlens-role='overlay']").unwrap())
            .len()
    }

    #[tokio::test]
    async fn suppresses_only_selected_moods_over_threshold() {
        let classifier = Arc::new(KeywordClassifier::default());
        let f = filter(
            &feed(&["I am absolutely furious about this thread", "such a happy little puppy video"]),
            classifier.clone(),
        );
        let report = f.run_once(&anger()).await;
        assert_eq!(report.submitted, 2);
        assert_eq!(report.suppressed, 1);
        assert_eq!(report.kept, 1);
        assert_eq!(overlays(&f).await, 1);
        let html = f.snapshot().await.html;
        assert!(html.contains("Detected mood: anger"));
    }

    #[tokio::test]
    async fn analyzed_elements_are_never_resubmitted() {
        let classifier = Arc::new(KeywordClassifier::default());
        let f = filter(
            &feed(&["I am absolutely furious about this thread", "such a happy little puppy video"]),
            classifier.clone(),
        );
        f.run_once(&anger()).await;
        let second = f.run_once(&anger()).await;
        assert_eq!(second, RunReport::default());
        assert_eq!(classifier.calls().len(), 1);

        // short generic content stays below the bar
        assert_eq!(f.append_content("<p>late arrival</p>").await, 1);
        {
            let mut state = f.state.lock().await;
            let feed_node = state.page.select(&Selector::parse("shreddit-feed").unwrap())[0];
            state
                .page
                .graft_fragment(feed_node, "<article id='p9'>another furious rant appears here</article>");
        }
        let third = f.run_once(&anger()).await;
        assert_eq!(third.submitted, 1);
        assert_eq!(classifier.calls()[1][0].text, "another furious rant appears here");
        assert_eq!(overlays(&f).await, 2);
    }

    #[tokio::test]
    async fn empty_candidate_set_makes_no_call() {
        let classifier = Arc::new(KeywordClassifier::default());
        let f = filter(&feed(&["too short"]), classifier.clone());
        assert_eq!(f.run_once(&anger()).await, RunReport::default());
        assert!(classifier.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_response_suppresses_nothing() {
        let classifier = Arc::new(KeywordClassifier::with_mode(Mode::Malformed));
        let f = filter(&feed(&["I am absolutely furious about this thread"]), classifier.clone());
        let report = f.run_once(&anger()).await;
        assert_eq!(report.discarded, Some(Discarded::Protocol));
        assert_eq!(overlays(&f).await, 0);
        let snap = f.snapshot().await;
        assert_eq!((snap.analyzed, snap.suppressed), (1, 0));
    }

    #[tokio::test]
    async fn failed_batch_is_not_retried() {
        let classifier = Arc::new(KeywordClassifier::with_mode(Mode::Down));
        let f = filter(&feed(&["I am absolutely furious about this thread"]), classifier.clone());
        assert_eq!(f.run_once(&anger()).await.discarded, Some(Discarded::Network));
        assert_eq!(f.run_once(&anger()).await, RunReport::default());
        assert_eq!(classifier.calls().len(), 1);
        assert_eq!(overlays(&f).await, 0);
    }

    #[tokio::test]
    async fn foreign_identities_are_skipped_per_item() {
        let classifier = Arc::new(KeywordClassifier::with_mode(Mode::Foreign));
        let f = filter(&feed(&["I am absolutely furious about this thread"]), classifier);
        let report = f.run_once(&anger()).await;
        assert_eq!(report.unrouted, 1);
        assert_eq!(report.suppressed, 1);
    }

    #[tokio::test]
    async fn overlapping_runs_submit_each_element_once() {
        let gate = Arc::new(Notify::new());
        let classifier = Arc::new(KeywordClassifier {
            gate: Some(gate.clone()),
            ..KeywordClassifier::default()
        });
        let f = Arc::new(filter(
            &feed(&["I am absolutely furious about this thread"]),
            classifier.clone(),
        ));

        let first = tokio::spawn({
            let f = f.clone();
            async move { f.run_once(&anger()).await }
        });
        while classifier.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        // request still outstanding: a second scan finds nothing new
        assert_eq!(f.run_once(&anger()).await, RunReport::default());

        gate.notify_one();
        let report = first.await.unwrap();
        assert_eq!(report.suppressed, 1);
        assert_eq!(classifier.calls().len(), 1);
    }

    #[tokio::test]
    async fn results_for_a_replaced_document_are_dropped() {
        let gate = Arc::new(Notify::new());
        let classifier = Arc::new(KeywordClassifier {
            gate: Some(gate.clone()),
            ..KeywordClassifier::default()
        });
        let f = Arc::new(filter(
            &feed(&["I am absolutely furious about this thread"]),
            classifier.clone(),
        ));

        let run = tokio::spawn({
            let f = f.clone();
            async move { f.run_once(&anger()).await }
        });
        while classifier.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        f.navigate(REDDIT, &feed(&["a brand new page full of furious words"])).await;
        gate.notify_one();

        assert_eq!(run.await.unwrap().discarded, Some(Discarded::Navigated));
        assert_eq!(overlays(&f).await, 0);
        let snap = f.snapshot().await;
        assert_eq!(snap.generation, 1);
        assert_eq!(snap.analyzed, 0);
    }

    #[tokio::test]
    async fn removed_content_is_forgotten() {
        let classifier = Arc::new(KeywordClassifier::default());
        let f = filter(&feed(&["I am absolutely furious about this thread"]), classifier);
        f.run_once(&anger()).await;
        assert_eq!(f.remove_content(&Selector::parse("article").unwrap()).await, 1);
        let snap = f.snapshot().await;
        assert_eq!((snap.analyzed, snap.suppressed), (0, 0));
    }
}
