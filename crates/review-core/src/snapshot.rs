//! Tree serialization: nested node snapshots with embedded analysis.
//!
//! Restore replays every move through the tree's validation path, so a
//! hand-edited snapshot can never produce an illegal tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisCache, AnalysisRecord, EngineKind};
use crate::tree::{GameTree, NodeId, TreeError};

/// One serialized tree node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotNode {
    pub board_state: String,
    /// UCI move that led here; absent on the root.
    #[serde(rename = "move", default, skip_serializing_if = "Option::is_none")]
    pub uci: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub san_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SnapshotNode>,
    /// Engine id ("policy"/"tactical") to record.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub analysis: BTreeMap<String, AnalysisRecord>,
}

/// Serialize the whole tree, embedding each node's cached analysis.
pub fn snapshot(tree: &GameTree, cache: &AnalysisCache) -> Result<SnapshotNode, TreeError> {
    build(tree, cache, tree.root())
}

fn build(tree: &GameTree, cache: &AnalysisCache, id: NodeId) -> Result<SnapshotNode, TreeError> {
    let node = tree.node(id)?;
    let mut children = Vec::with_capacity(node.children.len());
    for &child in &node.children {
        children.push(build(tree, cache, child)?);
    }
    Ok(SnapshotNode {
        board_state: node.fen.clone(),
        uci: node.uci.clone(),
        san_text: node.san.clone(),
        children,
        analysis: cache.records_for(id),
    })
}

/// Rebuild a tree and cache from a snapshot. Every move is re-validated;
/// any node that fails validation aborts the restore.
pub fn restore(root: &SnapshotNode) -> Result<(GameTree, AnalysisCache), TreeError> {
    let mut tree = GameTree::from_fen(&root.board_state)?;
    let mut cache = AnalysisCache::new();

    apply_records(&mut cache, tree.root(), &root.analysis);
    let mut stack: Vec<(NodeId, &SnapshotNode)> = root
        .children
        .iter()
        .rev()
        .map(|c| (tree.root(), c))
        .collect();

    while let Some((parent, snap)) = stack.pop() {
        let uci = snap
            .uci
            .as_deref()
            .ok_or_else(|| TreeError::InvalidMove("non-root node without a move".into()))?;
        let id = tree.add_variation(parent, uci, &snap.board_state)?;
        apply_records(&mut cache, id, &snap.analysis);
        for child in snap.children.iter().rev() {
            stack.push((id, child));
        }
    }

    tree.to_root();
    Ok((tree, cache))
}

fn apply_records(cache: &mut AnalysisCache, id: NodeId, records: &BTreeMap<String, AnalysisRecord>) {
    for (engine_id, record) in records {
        let kind = match engine_id.as_str() {
            "policy" => EngineKind::Policy,
            "tactical" => EngineKind::Tactical,
            // Records from engines this build does not know are dropped
            _ => continue,
        };
        cache.put(id, kind, record.clone());
    }
}
