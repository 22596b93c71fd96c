//! Learn-from-mistakes session: replay detected mistakes one at a time.

use std::sync::Arc;

use review_core::mistakes::{find_mistakes, DetectorConfig, Mistake};
use review_core::EngineKind;
use shakmaty::Color;
use tracing::info;

use crate::driver::{AnalysisDriver, DriverState};
use crate::error::ReviewError;
use crate::gateway::EngineGateway;
use crate::review::SharedReview;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Inactive,
    SelectingPlayer,
    Presenting,
    SolutionShown,
    Finished,
}

/// Outcome of one attempt at the current mistake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Correct,
    Incorrect,
}

/// Session state machine. Every transition is explicit; an invalid call
/// fails with `SessionInvalidState` and leaves the session untouched.
#[derive(Debug)]
pub struct MistakeSession {
    state: SessionState,
    color: Option<Color>,
    mistakes: Vec<Mistake>,
    index: usize,
}

impl MistakeSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Inactive,
            color: None,
            mistakes: Vec::new(),
            index: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Open the session for player selection.
    pub fn begin(&mut self) -> Result<(), ReviewError> {
        if self.state != SessionState::Inactive {
            return Err(ReviewError::SessionInvalidState(
                "begin requires an inactive session",
            ));
        }
        self.state = SessionState::SelectingPlayer;
        Ok(())
    }

    /// Choose whose mistakes to drill. An empty list finishes immediately.
    pub fn select_player(
        &mut self,
        color: Color,
        mistakes: Vec<Mistake>,
    ) -> Result<SessionState, ReviewError> {
        if self.state != SessionState::SelectingPlayer {
            return Err(ReviewError::SessionInvalidState(
                "select_player requires player selection",
            ));
        }
        self.color = Some(color);
        self.mistakes = mistakes;
        self.index = 0;
        self.state = if self.mistakes.is_empty() {
            SessionState::Finished
        } else {
            SessionState::Presenting
        };
        Ok(self.state)
    }

    /// The mistake currently presented, if any.
    pub fn current(&self) -> Option<&Mistake> {
        match self.state {
            SessionState::Presenting | SessionState::SolutionShown => {
                self.mistakes.get(self.index)
            }
            _ => None,
        }
    }

    /// `(zero-based index, total)` of the drill.
    pub fn progress(&self) -> (usize, usize) {
        (self.index, self.mistakes.len())
    }

    /// Reveal the engine's move for the current mistake. Does not advance.
    pub fn show_solution(&mut self) -> Result<&Mistake, ReviewError> {
        if self.state != SessionState::Presenting {
            return Err(ReviewError::SessionInvalidState(
                "show_solution requires a presented mistake",
            ));
        }
        self.state = SessionState::SolutionShown;
        self.mistakes
            .get(self.index)
            .ok_or(ReviewError::SessionInvalidState("no current mistake"))
    }

    /// Grade a guess against the engine's best move. Never advances, so the
    /// user can retry.
    pub fn submit_attempt(&mut self, uci: &str) -> Result<Attempt, ReviewError> {
        if self.state != SessionState::Presenting {
            return Err(ReviewError::SessionInvalidState(
                "submit_attempt requires a presented mistake",
            ));
        }
        let current = self
            .mistakes
            .get(self.index)
            .ok_or(ReviewError::SessionInvalidState("no current mistake"))?;
        Ok(if current.best_uci == uci {
            Attempt::Correct
        } else {
            Attempt::Incorrect
        })
    }

    /// Advance to the next mistake, hiding any shown solution.
    pub fn next(&mut self) -> Result<SessionState, ReviewError> {
        match self.state {
            SessionState::Presenting | SessionState::SolutionShown => {
                self.index += 1;
                self.state = if self.index >= self.mistakes.len() {
                    SessionState::Finished
                } else {
                    SessionState::Presenting
                };
                Ok(self.state)
            }
            _ => Err(ReviewError::SessionInvalidState(
                "next requires an active drill",
            )),
        }
    }

    /// Abandon the session from any state.
    pub fn stop(&mut self) {
        self.state = SessionState::Inactive;
        self.color = None;
        self.mistakes.clear();
        self.index = 0;
    }
}

impl Default for MistakeSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Open a session for `color`, running a deep-analysis pass first when the
/// main line is not yet covered at `target_depth`.
pub async fn start_session(
    session: &mut MistakeSession,
    review: &SharedReview,
    driver: &AnalysisDriver,
    gateway: Arc<EngineGateway>,
    engines: &[EngineKind],
    color: Color,
    cfg: &DetectorConfig,
    target_depth: u32,
) -> Result<SessionState, ReviewError> {
    session.begin()?;

    let incomplete = {
        let review = review.lock().await;
        let tree = &review.tree;
        let mut missing = false;
        for id in tree.main_line(tree.root()) {
            if !review.cache.has_tactical_at(id, target_depth) {
                missing = true;
                break;
            }
        }
        missing
    };

    if incomplete {
        info!(target_depth, "Session needs analysis, running a pass first");
        let report = driver
            .run(review.clone(), gateway, engines, target_depth)
            .await?;
        if report.cancelled || driver.state() != DriverState::Completed {
            session.stop();
            return Err(ReviewError::SessionInvalidState(
                "analysis pass did not complete",
            ));
        }
    }

    let mistakes = {
        let review = review.lock().await;
        find_mistakes(&review.tree, &review.cache, color, cfg)
    };
    info!(count = mistakes.len(), "Session mistakes selected");
    session.select_player(color, mistakes)
}
