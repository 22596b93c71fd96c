//! Arena-based game tree: every explored position lives in one `Vec`,
//! nodes refer to each other by index.

use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::san::{San, SanPlus};
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Position};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("Invalid move: {0}")]
    InvalidMove(String),

    #[error("Illegal position: {0}")]
    IllegalPosition(String),

    #[error("Unknown node: {0}")]
    UnknownNode(usize),
}

/// Stable handle to a node in the tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One position in the game tree. The first child is the main line.
#[derive(Debug, Clone)]
pub struct PositionNode {
    pub fen: String,
    /// UCI move that led here; `None` only for the root.
    pub uci: Option<String>,
    /// SAN text of that move, computed during validation.
    pub san: Option<String>,
    pub side_to_move: Color,
    pub is_check: bool,
    pub ply: u32,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Position tree with a navigation cursor and a mutation counter.
///
/// Board state is never trusted from callers: every added move is replayed
/// through shakmaty from the parent's position, so each node's FEN is fully
/// determined by the move path from the root.
#[derive(Debug, Clone)]
pub struct GameTree {
    nodes: Vec<PositionNode>,
    root: NodeId,
    current: NodeId,
    revision: u64,
}

impl GameTree {
    /// Tree rooted at the standard starting position.
    pub fn new() -> Self {
        let pos = Chess::default();
        let root = PositionNode {
            fen: Fen::from_position(&pos, EnPassantMode::Legal).to_string(),
            uci: None,
            san: None,
            side_to_move: pos.turn(),
            is_check: false,
            ply: 0,
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            current: NodeId(0),
            revision: 0,
        }
    }

    /// Tree rooted at an arbitrary legal FEN.
    pub fn from_fen(fen: &str) -> Result<Self, TreeError> {
        let parsed: Fen = fen
            .parse()
            .map_err(|e| TreeError::IllegalPosition(format!("{fen}: {e}")))?;
        let pos: Chess = parsed
            .clone()
            .into_position(CastlingMode::Standard)
            .map_err(|e| TreeError::IllegalPosition(format!("{fen}: {e}")))?;

        let root = PositionNode {
            fen: parsed.to_string(),
            uci: None,
            san: None,
            side_to_move: pos.turn(),
            is_check: pos.is_check(),
            ply: 0,
            parent: None,
            children: Vec::new(),
        };

        Ok(Self {
            nodes: vec![root],
            root: NodeId(0),
            current: NodeId(0),
            revision: 0,
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn current(&self) -> NodeId {
        self.current
    }

    /// Count of accepted structural mutations since creation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&PositionNode, TreeError> {
        self.nodes.get(id.0).ok_or(TreeError::UnknownNode(id.0))
    }

    /// Rebuild the shakmaty position for a node from its stored FEN.
    pub fn position_at(&self, id: NodeId) -> Result<Chess, TreeError> {
        let node = self.node(id)?;
        let fen: Fen = node
            .fen
            .parse()
            .map_err(|e| TreeError::IllegalPosition(format!("{}: {e}", node.fen)))?;
        fen.into_position(CastlingMode::Standard)
            .map_err(|e| TreeError::IllegalPosition(format!("{}: {e}", node.fen)))
    }

    /// Add a move below `parent`, validating it against the parent's
    /// position. Returns the existing child when the move is already
    /// present, so repeated additions are idempotent. The cursor moves to
    /// the returned node.
    pub fn add_move(&mut self, parent: NodeId, uci: &str) -> Result<NodeId, TreeError> {
        let pos = self.position_at(parent)?;
        let uci_move = UciMove::from_ascii(uci.as_bytes())
            .map_err(|e| TreeError::InvalidMove(format!("{uci}: {e}")))?;
        let mv = uci_move
            .to_move(&pos)
            .map_err(|e| TreeError::InvalidMove(format!("{uci}: {e}")))?;
        self.insert_child(parent, pos, mv)
    }

    /// Add a move together with the board state the caller believes it
    /// produces. The state is recomputed here before anything is inserted,
    /// so an inconsistent caller cannot corrupt the tree.
    pub fn add_variation(
        &mut self,
        parent: NodeId,
        uci: &str,
        claimed_fen: &str,
    ) -> Result<NodeId, TreeError> {
        let pos = self.position_at(parent)?;
        let uci_move = UciMove::from_ascii(uci.as_bytes())
            .map_err(|e| TreeError::InvalidMove(format!("{uci}: {e}")))?;
        let mv = uci_move
            .to_move(&pos)
            .map_err(|e| TreeError::InvalidMove(format!("{uci}: {e}")))?;

        let claimed: Fen = claimed_fen
            .parse()
            .map_err(|e| TreeError::InvalidMove(format!("{claimed_fen}: {e}")))?;
        let mut after = pos.clone();
        after.play_unchecked(mv.clone());
        let actual = Fen::from_position(&after, EnPassantMode::Legal).to_string();
        if claimed.to_string() != actual {
            return Err(TreeError::InvalidMove(format!(
                "{uci}: claimed position {claimed_fen} does not follow from parent"
            )));
        }
        self.insert_child(parent, pos, mv)
    }

    /// Add a move in SAN notation (used when replaying games).
    pub fn add_san(&mut self, parent: NodeId, san: &str) -> Result<NodeId, TreeError> {
        let pos = self.position_at(parent)?;
        let parsed: San = san
            .parse()
            .map_err(|e| TreeError::InvalidMove(format!("{san}: {e}")))?;
        let mv = parsed
            .to_move(&pos)
            .map_err(|e| TreeError::InvalidMove(format!("{san}: {e}")))?;
        self.insert_child(parent, pos, mv)
    }

    fn insert_child(
        &mut self,
        parent: NodeId,
        mut pos: Chess,
        mv: shakmaty::Move,
    ) -> Result<NodeId, TreeError> {
        let uci = mv.to_uci(CastlingMode::Standard).to_string();

        // One child per distinct move
        let existing = self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c.0].uci.as_deref() == Some(uci.as_str()));
        if let Some(id) = existing {
            self.current = id;
            return Ok(id);
        }

        let san = SanPlus::from_move_and_play_unchecked(&mut pos, mv);
        let fen = Fen::from_position(&pos, EnPassantMode::Legal).to_string();
        let ply = self.nodes[parent.0].ply + 1;

        let id = NodeId(self.nodes.len());
        self.nodes.push(PositionNode {
            fen,
            uci: Some(uci),
            san: Some(san.to_string()),
            side_to_move: pos.turn(),
            is_check: pos.is_check(),
            ply,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        self.current = id;
        self.revision += 1;
        Ok(id)
    }

    /// First-child walk starting at `from` (inclusive).
    pub fn main_line(&self, from: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut next = self.nodes.get(from.0).map(|_| from);
        std::iter::from_fn(move || {
            let id = next?;
            next = self.nodes[id.0].children.first().copied();
            Some(id)
        })
    }

    /// Move the cursor to the current node's first child.
    pub fn forward(&mut self) -> Option<NodeId> {
        let next = self.nodes[self.current.0].children.first().copied()?;
        self.current = next;
        Some(next)
    }

    /// Move the cursor to the current node's parent.
    pub fn back(&mut self) -> Option<NodeId> {
        let prev = self.nodes[self.current.0].parent?;
        self.current = prev;
        Some(prev)
    }

    pub fn to_root(&mut self) {
        self.current = self.root;
    }

    pub fn to_node(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.node(id)?;
        self.current = id;
        Ok(())
    }

    /// Number of legal moves at a node; 0 marks a terminal position.
    pub fn legal_move_count(&self, id: NodeId) -> Result<usize, TreeError> {
        Ok(self.position_at(id)?.legal_moves().len())
    }
}

impl Default for GameTree {
    fn default() -> Self {
        Self::new()
    }
}
