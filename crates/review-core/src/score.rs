//! Engine score arithmetic shared by the cache and the mistake detector.

use serde::{Deserialize, Serialize};

/// Cap on the centipawn loss attributed to a single move.
pub const MAX_CP_LOSS: i32 = 500;

/// Centipawn value a mate-in-1 maps onto; longer mates score slightly less
/// so shorter mates always compare higher.
const MATE_BASE_CP: i32 = 10_000;

/// An engine evaluation from the perspective of the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Score {
    /// Centipawns; positive favors the side to move.
    Cp(i32),
    /// Mate in N moves; negative means the side to move gets mated.
    Mate(i32),
}

impl Score {
    /// Project onto a single centipawn scale so mate and cp scores compare.
    pub fn to_cp(self) -> i32 {
        match self {
            Score::Cp(cp) => cp,
            Score::Mate(m) if m >= 0 => MATE_BASE_CP - m.min(100) * 10,
            Score::Mate(m) => -(MATE_BASE_CP - (-m).min(100) * 10),
        }
    }

    /// Flip to the opponent's perspective (one ply later).
    pub fn negate(self) -> Score {
        match self {
            Score::Cp(cp) => Score::Cp(-cp),
            Score::Mate(m) => Score::Mate(-m),
        }
    }
}

/// Centipawn loss of `played` relative to `best`, clamped to `0..=MAX_CP_LOSS`.
///
/// Both scores must be from the same side's perspective (the mover's, before
/// the move is made).
pub fn cp_loss(best: Score, played: Score) -> i32 {
    (best.to_cp() - played.to_cp()).clamp(0, MAX_CP_LOSS)
}
