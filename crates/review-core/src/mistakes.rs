//! Deterministic mistake detection over the main line.

use shakmaty::Color;

use crate::analysis::{AnalysisCache, AnalysisRecord, EngineKind};
use crate::score::{cp_loss, Score};
use crate::tree::{GameTree, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Inaccuracy,
    Blunder,
}

/// One detected mistake: the position it was made in, the move played and
/// the engine's preferred alternative.
#[derive(Debug, Clone, PartialEq)]
pub struct Mistake {
    /// Position the player moved from.
    pub node: NodeId,
    /// Ply index of the played move.
    pub ply: u32,
    pub color: Color,
    pub played_uci: String,
    pub played_san: String,
    pub best_uci: String,
    pub best_san: String,
    pub cp_loss: i32,
    pub severity: Severity,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Loss at or above this is at least an inaccuracy.
    pub inaccuracy_threshold: i32,
    /// Loss at or above this is a blunder.
    pub blunder_threshold: i32,
    /// Tactical records shallower than this are not trusted as evidence.
    pub min_depth: u32,
    /// Also require a policy record on the position before flagging it.
    pub require_policy: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            inaccuracy_threshold: 50,
            blunder_threshold: 200,
            min_depth: 12,
            require_policy: false,
        }
    }
}

fn classify(loss: i32, cfg: &DetectorConfig) -> Option<Severity> {
    if loss >= cfg.blunder_threshold {
        Some(Severity::Blunder)
    } else if loss >= cfg.inaccuracy_threshold {
        Some(Severity::Inaccuracy)
    } else {
        None
    }
}

/// Scan the main line for moves by `color` that lose ground against the
/// cached tactical evaluation. Positions without sufficient cached evidence
/// are skipped, never guessed at. Output is ordered by ply.
pub fn find_mistakes(
    tree: &GameTree,
    cache: &AnalysisCache,
    color: Color,
    cfg: &DetectorConfig,
) -> Vec<Mistake> {
    let mut out = Vec::new();

    for id in tree.main_line(tree.root()) {
        let node = match tree.node(id) {
            Ok(n) => n,
            Err(_) => continue,
        };
        if node.side_to_move != color {
            continue;
        }
        let child_id = match node.children.first() {
            Some(&c) => c,
            None => continue,
        };
        let child = match tree.node(child_id) {
            Ok(n) => n,
            Err(_) => continue,
        };

        let record = match cache.get(id, EngineKind::Tactical) {
            Some(r @ AnalysisRecord::Tactical { .. }) if r.depth() >= cfg.min_depth => r,
            _ => continue,
        };
        if cfg.require_policy && cache.get(id, EngineKind::Policy).is_none() {
            continue;
        }
        let best = match record.best() {
            Some(b) => b,
            None => continue,
        };

        let (played_uci, played_san) = match (&child.uci, &child.san) {
            (Some(u), Some(s)) => (u.clone(), s.clone()),
            _ => continue,
        };

        // Score of the played move: from the candidate list when present,
        // otherwise from the child position's evaluation, flipped back to
        // the mover's perspective.
        let played_score = record.score_of(&played_uci).or_else(|| {
            match cache.get(child_id, EngineKind::Tactical) {
                Some(r @ AnalysisRecord::Tactical { .. }) if r.depth() >= cfg.min_depth => {
                    r.best().map(|b| b.score.negate())
                }
                Some(AnalysisRecord::Terminal) => {
                    // Mate delivered, or stalemate reached
                    Some(if child.is_check {
                        Score::Mate(1)
                    } else {
                        Score::Cp(0)
                    })
                }
                _ => None,
            }
        });
        let played_score = match played_score {
            Some(s) => s,
            None => continue,
        };

        let loss = cp_loss(best.score, played_score);
        if let Some(severity) = classify(loss, cfg) {
            out.push(Mistake {
                node: id,
                ply: child.ply,
                color,
                played_uci,
                played_san,
                best_uci: best.uci.clone(),
                best_san: best.san.clone(),
                cp_loss: loss,
                severity,
            });
        }
    }

    out
}
