//! Remote mood classifier: `POST /analyze_bulk`, text in, per-item mood scores out.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use indexmap::IndexMap;
use std::time::Duration;

use crate::error::ClassifyError;

/// One element's text snapshot, as sent.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalysisItem {
    pub id: String,
    pub text: String,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    items: &'a [AnalysisItem],
}

/// Mood scores in the order the service listed them.
pub type MoodScores = IndexMap<String, f64>;

/// Scores for one submitted item. Extra response fields (`mood`, `confidence`) are ignored.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Classification {
    pub id: String,
    pub scores: MoodScores,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, items: &[AnalysisItem]) -> Result<Vec<Classification>, ClassifyError>;
}

pub struct HttpClassifier {
    client: Client,
    endpoint: String,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ClassifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, items: &[AnalysisItem]) -> Result<Vec<Classification>, ClassifyError> {
        let res = self
            .client
            .post(&self.endpoint)
            .json(&AnalyzeRequest { items })
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(ClassifyError::Status(res.status().as_u16()));
        }
        let body = res.bytes().await?;
        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| ClassifyError::Protocol(format!("body is not json: {e}")))?;
        decode_response(value)
    }
}

/// Strict decode: the whole batch is rejected if the body is not an array or any
/// element is not `{id: string, scores: {string: number}}`.
pub fn decode_response(body: Value) -> Result<Vec<Classification>, ClassifyError> {
    let Value::Array(items) = body else {
        return Err(ClassifyError::Protocol("expected a json array".to_string()));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value::<Classification>(item)
                .map_err(|e| ClassifyError::Protocol(format!("item {i}: {e}")))
        })
        .collect()
}
