//! End-to-end review flow: PGN -> tree -> analysis pass -> mistakes ->
//! drill session -> snapshot persistence. Engines are scripted in-process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use review_core::mistakes::{find_mistakes, DetectorConfig, Severity};
use review_core::snapshot::{restore, SnapshotNode};
use review_core::{AnalysisRecord, CandidateMove, EngineKind, Score};
use review_worker::autosave::{AutoSaveCoordinator, SaveStatus};
use review_worker::driver::{AnalysisDriver, DriverState};
use review_worker::gateway::{EngineGateway, EvalRequest, Evaluator};
use review_worker::review::{shared, GameReview, SharedReview};
use review_worker::session::{start_session, Attempt, MistakeSession, SessionState};
use review_worker::store::MemoryStore;
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::{CastlingMode, Chess, Color, Position};
use tokio::sync::{mpsc, watch};

/// Tactical engine scripted by FEN. Positions without an override get a
/// neutral single-candidate record.
struct ScriptedEngine {
    overrides: HashMap<String, Vec<CandidateMove>>,
}

impl Evaluator for ScriptedEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Tactical
    }

    fn evaluate(
        &self,
        request: EvalRequest,
        _cancel: watch::Receiver<bool>,
    ) -> mpsc::Receiver<Result<AnalysisRecord, String>> {
        let (tx, rx) = mpsc::channel(1);
        let record = match self.overrides.get(&request.fen) {
            Some(lines) => AnalysisRecord::Tactical {
                lines: lines.clone(),
                depth: request.depth_hint,
            },
            None => neutral_record(&request.fen, request.depth_hint),
        };
        let _ = tx.try_send(Ok(record));
        rx
    }
}

fn neutral_record(fen: &str, depth: u32) -> AnalysisRecord {
    let pos: Chess = fen
        .parse::<Fen>()
        .unwrap()
        .into_position(CastlingMode::Standard)
        .unwrap();
    let mv = match pos.legal_moves().first().cloned() {
        Some(m) => m,
        None => return AnalysisRecord::Terminal,
    };
    let uci = mv.to_uci(CastlingMode::Standard).to_string();
    let mut after = pos.clone();
    let san = SanPlus::from_move_and_play_unchecked(&mut after, mv);
    AnalysisRecord::Tactical {
        lines: vec![CandidateMove {
            uci,
            san: san.to_string(),
            score: Score::Cp(0),
        }],
        depth,
    }
}

fn candidate(uci: &str, san: &str, cp: i32) -> CandidateMove {
    CandidateMove {
        uci: uci.into(),
        san: san.into(),
        score: Score::Cp(cp),
    }
}

/// Review of 1. e4 e5 2. Qh5 Nc6, with the engine scripted to call Qh5 a
/// 280cp blunder.
fn blunder_setup() -> (SharedReview, Arc<EngineGateway>) {
    let review = GameReview::from_pgn("blunder-game", "1. e4 e5 2. Qh5 Nc6 *").unwrap();

    // FEN of the position before White's second move
    let before_qh5 = {
        let tree = &review.tree;
        let id = tree.main_line(tree.root()).nth(2).unwrap();
        tree.node(id).unwrap().fen.clone()
    };

    let mut overrides = HashMap::new();
    overrides.insert(
        before_qh5,
        vec![
            candidate("g1f3", "Nf3", 30),
            candidate("f1c4", "Bc4", 20),
            candidate("d1h5", "Qh5", -250),
        ],
    );

    let gateway = Arc::new(EngineGateway::new());
    gateway
        .register(Arc::new(ScriptedEngine { overrides }))
        .unwrap();

    (shared(review), gateway)
}

#[tokio::test]
async fn test_analysis_pass_then_mistake_detection() {
    let (review, gateway) = blunder_setup();
    let driver = AnalysisDriver::new();

    let report = driver
        .run(review.clone(), gateway, &[EngineKind::Tactical], 18)
        .await
        .unwrap();
    assert_eq!(driver.state(), DriverState::Completed);
    assert!(report.failures.is_empty());
    assert_eq!(report.analyzed, 5);

    let review = review.lock().await;
    let mistakes = find_mistakes(
        &review.tree,
        &review.cache,
        Color::White,
        &DetectorConfig::default(),
    );
    assert_eq!(mistakes.len(), 1);
    let m = &mistakes[0];
    assert_eq!(m.played_san, "Qh5");
    assert_eq!(m.best_san, "Nf3");
    assert_eq!(m.cp_loss, 280);
    assert_eq!(m.severity, Severity::Blunder);

    // Black played nothing the script dislikes
    let black = find_mistakes(
        &review.tree,
        &review.cache,
        Color::Black,
        &DetectorConfig::default(),
    );
    assert!(black.is_empty());
}

#[tokio::test]
async fn test_session_runs_analysis_and_drills_the_blunder() {
    let (review, gateway) = blunder_setup();
    let driver = AnalysisDriver::new();
    let mut session = MistakeSession::new();

    // No analysis has run yet; opening the session triggers the pass
    let state = start_session(
        &mut session,
        &review,
        &driver,
        gateway,
        &[EngineKind::Tactical],
        Color::White,
        &DetectorConfig::default(),
        18,
    )
    .await
    .unwrap();
    assert_eq!(state, SessionState::Presenting);
    assert_eq!(driver.state(), DriverState::Completed);
    assert_eq!(session.progress(), (0, 1));

    assert_eq!(session.submit_attempt("d1h5").unwrap(), Attempt::Incorrect);
    assert_eq!(session.submit_attempt("g1f3").unwrap(), Attempt::Correct);
    let shown = session.show_solution().unwrap();
    assert_eq!(shown.best_san, "Nf3");
    assert_eq!(session.next().unwrap(), SessionState::Finished);
}

#[tokio::test(start_paused = true)]
async fn test_autosave_persists_restorable_snapshot() {
    let (review, gateway) = blunder_setup();
    let store = MemoryStore::new();
    let quiet = Duration::from_secs(2);
    let saver = AutoSaveCoordinator::spawn(store.clone(), review.clone(), quiet);
    let driver = AnalysisDriver::new();

    driver
        .run(review.clone(), gateway, &[EngineKind::Tactical], 18)
        .await
        .unwrap();
    saver.mark_dirty();
    assert_eq!(store.saves(), 0);

    tokio::time::sleep(quiet + Duration::from_millis(100)).await;
    assert_eq!(store.saves(), 1);
    assert_eq!(saver.status(), SaveStatus::Saved);
    saver.shutdown().await;

    // The persisted snapshot restores to an isomorphic review
    let json = store.get("blunder-game").unwrap();
    assert!(json.get("boardState").is_some());
    let snap: SnapshotNode = serde_json::from_value(json).unwrap();
    let (tree, cache) = restore(&snap).unwrap();

    let original = review.lock().await;
    assert_eq!(tree.len(), original.tree.len());
    let line: Vec<_> = tree.main_line(tree.root()).collect();
    assert_eq!(line.len(), 5);
    for id in line {
        assert!(cache.has_tactical_at(id, 18));
    }

    let mistakes = find_mistakes(&tree, &cache, Color::White, &DetectorConfig::default());
    assert_eq!(mistakes.len(), 1);
    assert_eq!(mistakes[0].played_san, "Qh5");
}
