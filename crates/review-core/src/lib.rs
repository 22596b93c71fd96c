//! Core domain types for game review: position tree, analysis cache,
//! mistake detection, PGN parsing and snapshot serialization.

pub mod analysis;
pub mod mistakes;
pub mod pgn;
pub mod score;
pub mod snapshot;
pub mod tree;

pub use analysis::{AnalysisCache, AnalysisRecord, CandidateMove, EngineKind};
pub use mistakes::{find_mistakes, DetectorConfig, Mistake, Severity};
pub use score::Score;
pub use tree::{GameTree, NodeId, PositionNode, TreeError};
