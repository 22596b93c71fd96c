//! Analysis records and the per-node, per-engine evaluation cache.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::score::Score;
use crate::tree::NodeId;

/// Which engine produced a record. One evaluator per kind is live at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Neural move-prior model: move -> probability.
    Policy,
    /// Classical search engine: ranked candidate lines with scores.
    Tactical,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Policy => "policy",
            EngineKind::Tactical => "tactical",
        }
    }
}

/// One candidate move in a tactical record, with its evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMove {
    pub uci: String,
    pub san: String,
    pub score: Score,
}

/// A single engine evaluation of one position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnalysisRecord {
    /// Move priors from the policy model. Values are non-negative and need
    /// not sum to one.
    Policy { priors: BTreeMap<String, f64> },
    /// Candidate lines from the tactical engine, best first.
    Tactical {
        lines: Vec<CandidateMove>,
        depth: u32,
    },
    /// The position has no legal moves. Distinct from "not evaluated".
    Terminal,
}

impl AnalysisRecord {
    /// Depth used for the replacement rule. `Terminal` is final and
    /// `Policy` records have no depth dimension.
    pub fn depth(&self) -> u32 {
        match self {
            AnalysisRecord::Policy { .. } => 0,
            AnalysisRecord::Tactical { depth, .. } => *depth,
            AnalysisRecord::Terminal => u32::MAX,
        }
    }

    /// Best candidate of a tactical record, if any.
    pub fn best(&self) -> Option<&CandidateMove> {
        match self {
            AnalysisRecord::Tactical { lines, .. } => lines.first(),
            _ => None,
        }
    }

    /// Score of a specific move within a tactical record's candidates.
    pub fn score_of(&self, uci: &str) -> Option<Score> {
        match self {
            AnalysisRecord::Tactical { lines, .. } => {
                lines.iter().find(|c| c.uci == uci).map(|c| c.score)
            }
            _ => None,
        }
    }
}

/// Evaluation cache keyed by node and engine kind.
///
/// Writes are monotone in depth: a record shallower than the cached one is
/// ignored, an equal-or-deeper one replaces it. Re-applying the same write
/// is a no-op in effect.
#[derive(Debug, Clone, Default)]
pub struct AnalysisCache {
    records: HashMap<(NodeId, EngineKind), AnalysisRecord>,
    revision: u64,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: NodeId, kind: EngineKind) -> Option<&AnalysisRecord> {
        self.records.get(&(node, kind))
    }

    /// Insert a record, honoring the depth replacement rule. Returns true
    /// when the cache changed.
    pub fn put(&mut self, node: NodeId, kind: EngineKind, record: AnalysisRecord) -> bool {
        if let Some(existing) = self.records.get(&(node, kind)) {
            if record.depth() < existing.depth() {
                return false;
            }
        }
        self.records.insert((node, kind), record);
        self.revision += 1;
        true
    }

    /// Whether a node has a tactical record at or beyond `depth`, or is
    /// known terminal.
    pub fn has_tactical_at(&self, node: NodeId, depth: u32) -> bool {
        matches!(
            self.get(node, EngineKind::Tactical),
            Some(r) if r.depth() >= depth
        )
    }

    /// Count of accepted writes since creation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records for one node, keyed by engine id (snapshot order).
    pub fn records_for(&self, node: NodeId) -> BTreeMap<String, AnalysisRecord> {
        let mut out = BTreeMap::new();
        for kind in [EngineKind::Policy, EngineKind::Tactical] {
            if let Some(r) = self.get(node, kind) {
                out.insert(kind.as_str().to_string(), r.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tactical(depth: u32, cp: i32) -> AnalysisRecord {
        AnalysisRecord::Tactical {
            lines: vec![CandidateMove {
                uci: "e2e4".into(),
                san: "e4".into(),
                score: Score::Cp(cp),
            }],
            depth,
        }
    }

    #[test]
    fn test_shallower_write_ignored() {
        let mut cache = AnalysisCache::new();
        let node = crate::tree::GameTree::new().root();

        assert!(cache.put(node, EngineKind::Tactical, tactical(18, 30)));
        assert!(!cache.put(node, EngineKind::Tactical, tactical(12, 90)));

        let got = cache.get(node, EngineKind::Tactical).unwrap();
        assert_eq!(got.depth(), 18);
        assert_eq!(cache.revision(), 1);
    }

    #[test]
    fn test_deeper_write_replaces() {
        let mut cache = AnalysisCache::new();
        let node = crate::tree::GameTree::new().root();

        cache.put(node, EngineKind::Tactical, tactical(12, 90));
        assert!(cache.put(node, EngineKind::Tactical, tactical(20, 25)));
        assert_eq!(
            cache.get(node, EngineKind::Tactical).unwrap().depth(),
            20
        );
    }

    #[test]
    fn test_terminal_never_downgraded() {
        let mut cache = AnalysisCache::new();
        let node = crate::tree::GameTree::new().root();

        cache.put(node, EngineKind::Tactical, AnalysisRecord::Terminal);
        assert!(!cache.put(node, EngineKind::Tactical, tactical(30, 0)));
        assert_eq!(
            cache.get(node, EngineKind::Tactical),
            Some(&AnalysisRecord::Terminal)
        );
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut cache = AnalysisCache::new();
        let node = crate::tree::GameTree::new().root();

        cache.put(
            node,
            EngineKind::Policy,
            AnalysisRecord::Policy {
                priors: BTreeMap::from([("e2e4".to_string(), 0.6)]),
            },
        );
        assert!(cache.get(node, EngineKind::Tactical).is_none());
        assert!(cache.get(node, EngineKind::Policy).is_some());
    }
}
