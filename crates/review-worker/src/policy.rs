//! Policy model client: move priors over HTTP.

use std::collections::BTreeMap;
use std::time::Duration;

use review_core::{AnalysisRecord, EngineKind};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::ReviewError;
use crate::gateway::{EvalRequest, Evaluator};

#[derive(Serialize)]
struct PriorQuery {
    fen: String,
    legal_moves: usize,
}

#[derive(Deserialize)]
struct PriorResponse {
    moves: BTreeMap<String, f64>,
}

/// Policy evaluator backed by a remote model endpoint. Each request yields
/// exactly one record; there is no depth dimension.
pub struct PolicyEvaluator {
    client: Client,
    url: String,
}

impl PolicyEvaluator {
    pub fn new(url: impl Into<String>) -> Result<Self, ReviewError> {
        let client = Client::builder()
            .user_agent("GameReview/1.0")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ReviewError::EngineInit(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn fetch(&self, request: &EvalRequest) -> Result<AnalysisRecord, String> {
        let query = PriorQuery {
            fen: request.fen.clone(),
            legal_moves: request.legal_moves,
        };

        let resp = self
            .client
            .post(&self.url)
            .json(&query)
            .send()
            .await
            .map_err(|e| format!("Request error: {e}"))?;

        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }

        let parsed: PriorResponse = resp
            .json()
            .await
            .map_err(|e| format!("Body parse error: {e}"))?;

        // Negative priors are a model bug; drop them rather than propagate
        let priors: BTreeMap<String, f64> = parsed
            .moves
            .into_iter()
            .filter(|(_, p)| *p >= 0.0)
            .collect();

        Ok(AnalysisRecord::Policy { priors })
    }
}

impl Evaluator for PolicyEvaluator {
    fn kind(&self) -> EngineKind {
        EngineKind::Policy
    }

    fn evaluate(
        &self,
        request: EvalRequest,
        mut cancel: watch::Receiver<bool>,
    ) -> mpsc::Receiver<Result<AnalysisRecord, String>> {
        let (tx, rx) = mpsc::channel(1);
        let client = self.client.clone();
        let url = self.url.clone();

        tokio::spawn(async move {
            let this = PolicyEvaluator { client, url };
            tokio::select! {
                result = this.fetch(&request) => {
                    let _ = tx.send(result).await;
                }
                _ = cancel.changed() => {
                    debug!(fen = %request.fen, "Policy request abandoned");
                }
            }
        });

        rx
    }
}
