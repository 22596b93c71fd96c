//! The in-memory review a worker operates on: one game tree plus its
//! analysis cache, shared between the driver, session and auto-saver.

use std::sync::Arc;

use review_core::pgn;
use review_core::snapshot::{self, SnapshotNode};
use review_core::tree::TreeError;
use review_core::{AnalysisCache, GameTree};
use tokio::sync::Mutex;

use crate::error::ReviewError;

#[derive(Debug)]
pub struct GameReview {
    pub game_id: String,
    pub tree: GameTree,
    pub cache: AnalysisCache,
}

impl GameReview {
    pub fn new(game_id: impl Into<String>, tree: GameTree) -> Self {
        Self {
            game_id: game_id.into(),
            tree,
            cache: AnalysisCache::new(),
        }
    }

    /// Build a review by replaying a main line of SAN moves.
    pub fn from_san_moves(
        game_id: impl Into<String>,
        start_fen: Option<&str>,
        moves: &[String],
    ) -> Result<Self, TreeError> {
        let mut tree = match start_fen {
            Some(fen) => GameTree::from_fen(fen)?,
            None => GameTree::new(),
        };
        let mut at = tree.root();
        for san in moves {
            at = tree.add_san(at, san)?;
        }
        tree.to_root();
        Ok(Self::new(game_id, tree))
    }

    /// Build a review from PGN text.
    pub fn from_pgn(game_id: impl Into<String>, text: &str) -> Result<Self, ReviewError> {
        let game = pgn::parse_pgn(text)
            .ok_or_else(|| TreeError::InvalidMove("no moves found in PGN".into()))?;
        Ok(Self::from_san_moves(
            game_id,
            game.metadata.start_fen.as_deref(),
            &game.moves,
        )?)
    }

    /// Combined mutation counter: changes whenever the tree or the cache
    /// accepts a write.
    pub fn revision(&self) -> u64 {
        self.tree.revision() + self.cache.revision()
    }

    pub fn snapshot(&self) -> Result<SnapshotNode, TreeError> {
        snapshot::snapshot(&self.tree, &self.cache)
    }

    pub fn snapshot_json(&self) -> Result<serde_json::Value, ReviewError> {
        let snap = self.snapshot()?;
        Ok(serde_json::to_value(snap)?)
    }
}

/// Shared handle used by the async components.
pub type SharedReview = Arc<Mutex<GameReview>>;

pub fn shared(review: GameReview) -> SharedReview {
    Arc::new(Mutex::new(review))
}
