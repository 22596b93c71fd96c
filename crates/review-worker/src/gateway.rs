//! Engine gateway: one evaluator slot per engine kind, streaming handles,
//! and last-request-wins arbitration per board state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use review_core::{AnalysisRecord, EngineKind};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::ReviewError;

/// One evaluation request. `legal_moves` comes from the tree so terminal
/// positions never reach an engine.
#[derive(Debug, Clone)]
pub struct EvalRequest {
    pub fen: String,
    pub legal_moves: usize,
    pub depth_hint: u32,
}

/// An engine backend. `evaluate` returns immediately; records arrive on the
/// channel progressively (deeper over time for tactical engines, a single
/// record for policy models). On error the implementation sends one `Err`
/// and closes the channel.
pub trait Evaluator: Send + Sync {
    fn kind(&self) -> EngineKind;

    fn evaluate(
        &self,
        request: EvalRequest,
        cancel: watch::Receiver<bool>,
    ) -> mpsc::Receiver<Result<AnalysisRecord, String>>;
}

/// Live handle to one in-flight evaluation.
#[derive(Debug)]
pub struct EvalHandle {
    fen: String,
    rx: mpsc::Receiver<Result<AnalysisRecord, String>>,
    cancel: Arc<watch::Sender<bool>>,
}

impl EvalHandle {
    /// Await the next (deeper) record. Returns `None` once the stream ends
    /// or the request was cancelled; results that race a cancellation are
    /// dropped here so a superseded request can never deliver.
    pub async fn next(&mut self) -> Option<Result<AnalysisRecord, ReviewError>> {
        if self.is_cancelled() {
            return None;
        }
        match self.rx.recv().await {
            Some(Ok(record)) if !self.is_cancelled() => Some(Ok(record)),
            Some(Ok(_)) => None,
            Some(Err(e)) => Some(Err(ReviewError::EngineEvaluationFailed(e))),
            None => None,
        }
    }

    pub fn cancel(&self) {
        // The evaluator may have already dropped its receiver; the flag
        // still has to flip for `is_cancelled` and `next`.
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn fen(&self) -> &str {
        &self.fen
    }
}

enum Slot {
    Ready(Arc<dyn Evaluator>),
    Failed(String),
}

/// Routes evaluation requests to the registered evaluators.
///
/// Never queues: a request for a kind without a ready evaluator fails with
/// `EngineNotReady`, and a second request for a board state already being
/// evaluated cancels the first.
pub struct EngineGateway {
    slots: Mutex<HashMap<EngineKind, Slot>>,
    in_flight: Mutex<HashMap<(EngineKind, String), Arc<watch::Sender<bool>>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl EngineGateway {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Install an evaluator. A kind can only be registered once; after a
    /// recorded initialization failure the slot opens up again.
    pub fn register(&self, evaluator: Arc<dyn Evaluator>) -> Result<(), ReviewError> {
        let kind = evaluator.kind();
        let mut slots = lock(&self.slots);
        match slots.get(&kind) {
            Some(Slot::Ready(_)) => Err(ReviewError::EngineInit(format!(
                "{} evaluator already registered",
                kind.as_str()
            ))),
            _ => {
                slots.insert(kind, Slot::Ready(evaluator));
                Ok(())
            }
        }
    }

    /// Record a terminal initialization failure for a kind, freeing the
    /// slot for a replacement.
    pub fn mark_failed(&self, kind: EngineKind, reason: impl Into<String>) {
        lock(&self.slots).insert(kind, Slot::Failed(reason.into()));
    }

    pub fn is_ready(&self, kind: EngineKind) -> bool {
        matches!(lock(&self.slots).get(&kind), Some(Slot::Ready(_)))
    }

    /// Why a kind last failed to initialize, if it did.
    pub fn failure(&self, kind: EngineKind) -> Option<String> {
        match lock(&self.slots).get(&kind) {
            Some(Slot::Failed(reason)) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Start an evaluation. Terminal positions resolve immediately without
    /// touching the evaluator.
    pub fn evaluate(
        &self,
        kind: EngineKind,
        request: EvalRequest,
    ) -> Result<EvalHandle, ReviewError> {
        let evaluator = match lock(&self.slots).get(&kind) {
            Some(Slot::Ready(ev)) => ev.clone(),
            _ => return Err(ReviewError::EngineNotReady(kind)),
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        let fen = request.fen.clone();

        if request.legal_moves == 0 {
            let (tx, rx) = mpsc::channel(1);
            // Capacity 1 and a fresh channel: this send cannot fail
            let _ = tx.try_send(Ok(AnalysisRecord::Terminal));
            return Ok(EvalHandle {
                fen,
                rx,
                cancel: cancel_tx,
            });
        }

        {
            let mut in_flight = lock(&self.in_flight);
            // Drop entries whose handles are gone
            in_flight.retain(|_, tx| Arc::strong_count(tx) > 1);
            let key = (kind, fen.clone());
            if let Some(previous) = in_flight.insert(key, cancel_tx.clone()) {
                debug!(fen = %fen, kind = kind.as_str(), "Superseding in-flight evaluation");
                previous.send_replace(true);
            }
        }

        let rx = evaluator.evaluate(request, cancel_rx);
        Ok(EvalHandle {
            fen,
            rx,
            cancel: cancel_tx,
        })
    }
}

impl Default for EngineGateway {
    fn default() -> Self {
        Self::new()
    }
}
