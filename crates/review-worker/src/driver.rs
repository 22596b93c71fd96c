//! Deep-analysis driver: walks the main line and fills the cache through
//! the gateway, one position at a time.

use std::sync::Arc;

use review_core::tree::TreeError;
use review_core::{EngineKind, NodeId};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::ReviewError;
use crate::gateway::{EngineGateway, EvalRequest};
use crate::review::SharedReview;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Running,
    Cancelling,
    Completed,
    Failed,
}

/// Progress of the current pass, published over a watch channel.
#[derive(Debug, Clone, Default)]
pub struct DriverProgress {
    pub total_moves: usize,
    pub current_index: usize,
    pub current_san: Option<String>,
    pub analyzing: bool,
    pub target_depth: u32,
}

/// Outcome of one pass.
#[derive(Debug, Default)]
pub struct DriverReport {
    pub analyzed: usize,
    pub skipped: usize,
    pub failures: Vec<(NodeId, String)>,
    pub cancelled: bool,
}

struct NodeTask {
    id: NodeId,
    fen: String,
    san: Option<String>,
    legal_moves: usize,
}

/// State machine for whole-game analysis passes. One pass at a time; a
/// second `run` while one is active fails with `DriverBusy`.
pub struct AnalysisDriver {
    state_tx: watch::Sender<DriverState>,
    progress_tx: watch::Sender<DriverProgress>,
    cancel_tx: watch::Sender<bool>,
}

impl AnalysisDriver {
    pub fn new() -> Self {
        Self {
            state_tx: watch::channel(DriverState::Idle).0,
            progress_tx: watch::channel(DriverProgress::default()).0,
            cancel_tx: watch::channel(false).0,
        }
    }

    pub fn state(&self) -> DriverState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DriverState> {
        self.state_tx.subscribe()
    }

    pub fn progress(&self) -> DriverProgress {
        self.progress_tx.borrow().clone()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<DriverProgress> {
        self.progress_tx.subscribe()
    }

    /// Request cancellation of the active pass. Returns true when a run
    /// was actually cancelled; outside `Running` this is a no-op.
    pub fn cancel(&self) -> bool {
        let mut cancelled = false;
        self.state_tx.send_if_modified(|s| {
            if *s == DriverState::Running {
                *s = DriverState::Cancelling;
                cancelled = true;
                true
            } else {
                false
            }
        });
        if cancelled {
            self.cancel_tx.send_replace(true);
        }
        cancelled
    }

    /// Run one pass over the main line. Nodes already cached at or beyond
    /// `target_depth` are skipped; per-node evaluation failures are
    /// recorded and the pass continues.
    pub async fn run(
        &self,
        review: SharedReview,
        gateway: Arc<EngineGateway>,
        engines: &[EngineKind],
        target_depth: u32,
    ) -> Result<DriverReport, ReviewError> {
        let mut started = false;
        self.state_tx.send_if_modified(|s| {
            if matches!(
                *s,
                DriverState::Idle | DriverState::Completed | DriverState::Failed
            ) {
                *s = DriverState::Running;
                started = true;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(ReviewError::DriverBusy);
        }
        self.cancel_tx.send_replace(false);

        // An engine missing up front fails the whole pass
        for &kind in engines {
            if !gateway.is_ready(kind) {
                self.state_tx.send_replace(DriverState::Failed);
                return Err(ReviewError::EngineNotReady(kind));
            }
        }

        let (game_id, nodes) = match collect_main_line(&review).await {
            Ok(v) => v,
            Err(e) => {
                self.state_tx.send_replace(DriverState::Failed);
                return Err(e.into());
            }
        };

        info!(
            game_id = %game_id,
            positions = nodes.len(),
            target_depth,
            "Starting analysis pass"
        );
        self.progress_tx.send_replace(DriverProgress {
            total_moves: nodes.len(),
            current_index: 0,
            current_san: None,
            analyzing: true,
            target_depth,
        });

        let mut report = DriverReport::default();
        let mut cancel_rx = self.cancel_tx.subscribe();

        'pass: for (index, task) in nodes.iter().enumerate() {
            self.progress_tx.send_replace(DriverProgress {
                total_moves: nodes.len(),
                current_index: index,
                current_san: task.san.clone(),
                analyzing: true,
                target_depth,
            });

            for &kind in engines {
                if *cancel_rx.borrow() {
                    report.cancelled = true;
                    break 'pass;
                }

                let already_done = {
                    let review = review.lock().await;
                    match kind {
                        EngineKind::Tactical => {
                            review.cache.has_tactical_at(task.id, target_depth)
                        }
                        EngineKind::Policy => {
                            review.cache.get(task.id, kind).is_some()
                        }
                    }
                };
                if already_done {
                    report.skipped += 1;
                    continue;
                }

                let request = EvalRequest {
                    fen: task.fen.clone(),
                    legal_moves: task.legal_moves,
                    depth_hint: target_depth,
                };
                let mut handle = match gateway.evaluate(kind, request) {
                    Ok(h) => h,
                    Err(e) => {
                        warn!(node = task.id.index(), error = %e, "Evaluation refused");
                        report.failures.push((task.id, e.to_string()));
                        continue;
                    }
                };

                let mut stored = false;
                loop {
                    tokio::select! {
                        changed = cancel_rx.changed() => {
                            if changed.is_err() || *cancel_rx.borrow() {
                                handle.cancel();
                                report.cancelled = true;
                                break 'pass;
                            }
                        }
                        item = handle.next() => match item {
                            Some(Ok(record)) => {
                                let mut review = review.lock().await;
                                review.cache.put(task.id, kind, record);
                                stored = true;
                            }
                            Some(Err(e)) => {
                                warn!(node = task.id.index(), error = %e, "Evaluation failed");
                                report.failures.push((task.id, e.to_string()));
                                break;
                            }
                            None => break,
                        }
                    }
                }
                if stored {
                    report.analyzed += 1;
                }
            }
        }

        let final_state = if report.cancelled {
            DriverState::Idle
        } else {
            DriverState::Completed
        };
        self.state_tx.send_replace(final_state);
        self.progress_tx.send_replace(DriverProgress {
            total_moves: nodes.len(),
            current_index: nodes.len(),
            current_san: None,
            analyzing: false,
            target_depth,
        });
        info!(
            game_id = %game_id,
            analyzed = report.analyzed,
            skipped = report.skipped,
            failures = report.failures.len(),
            cancelled = report.cancelled,
            "Analysis pass finished"
        );
        Ok(report)
    }
}

impl Default for AnalysisDriver {
    fn default() -> Self {
        Self::new()
    }
}

async fn collect_main_line(
    review: &SharedReview,
) -> Result<(String, Vec<NodeTask>), TreeError> {
    let review = review.lock().await;
    let tree = &review.tree;
    let mut nodes = Vec::new();
    for id in tree.main_line(tree.root()) {
        let node = tree.node(id)?;
        nodes.push(NodeTask {
            id,
            fen: node.fen.clone(),
            san: node.san.clone(),
            legal_moves: tree.legal_move_count(id)?,
        });
    }
    Ok((review.game_id.clone(), nodes))
}
