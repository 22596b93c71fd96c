//! Game review worker
//!
//! Analyzes one game from a PGN file: builds the position tree, runs a
//! deep-analysis pass, reports the detected mistakes and persists the
//! snapshot.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use review_core::mistakes::{find_mistakes, DetectorConfig};
use review_core::EngineKind;
use shakmaty::Color;
use tracing::{info, warn};

use review_worker::autosave::AutoSaveCoordinator;
use review_worker::config::ReviewConfig;
use review_worker::driver::AnalysisDriver;
use review_worker::gateway::EngineGateway;
use review_worker::policy::PolicyEvaluator;
use review_worker::review::{shared, GameReview, SharedReview};
use review_worker::store::{MemoryStore, PgSnapshotStore, SnapshotStore};
use review_worker::uci::UciEvaluator;

/// Value following a `--flag` in the raw argument list.
fn arg_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let pgn_path = arg_value(&args, "--pgn").context("--pgn <file> is required")?;
    let color = match arg_value(&args, "--color").as_deref() {
        Some("black") => Color::Black,
        _ => Color::White,
    };

    let config = ReviewConfig::load()?;
    let target_depth = arg_value(&args, "--depth")
        .and_then(|v| v.parse().ok())
        .unwrap_or(config.target_depth);

    let text = std::fs::read_to_string(&pgn_path)
        .with_context(|| format!("Failed to read {pgn_path}"))?;
    let game_id = std::path::Path::new(&pgn_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("game")
        .to_string();

    let review = shared(GameReview::from_pgn(game_id.clone(), &text)?);
    info!(game_id = %game_id, target_depth, "Review loaded");

    // Engines
    let gateway = Arc::new(EngineGateway::new());
    match UciEvaluator::spawn(&config.engine_path, config.multipv).await {
        Ok(evaluator) => gateway.register(Arc::new(evaluator))?,
        Err(e) => {
            gateway.mark_failed(EngineKind::Tactical, e.to_string());
            return Err(e.into());
        }
    }
    let mut engines = vec![EngineKind::Tactical];
    if let Some(url) = &config.policy_url {
        match PolicyEvaluator::new(url) {
            Ok(evaluator) => {
                gateway.register(Arc::new(evaluator))?;
                engines.push(EngineKind::Policy);
            }
            Err(e) => {
                gateway.mark_failed(EngineKind::Policy, e.to_string());
                warn!(error = %e, "Policy model unavailable, continuing without it");
            }
        }
    }

    if let Some(db_url) = &config.database_url {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(db_url)
            .await?;
        info!("Database connection established");
        run_review(
            PgSnapshotStore::new(pool),
            review,
            gateway,
            engines,
            color,
            target_depth,
            config.autosave_quiet,
        )
        .await
    } else {
        info!("No DATABASE_URL, snapshot stays in memory");
        run_review(
            MemoryStore::new(),
            review,
            gateway,
            engines,
            color,
            target_depth,
            config.autosave_quiet,
        )
        .await
    }
}

async fn run_review<S: SnapshotStore>(
    store: S,
    review: SharedReview,
    gateway: Arc<EngineGateway>,
    engines: Vec<EngineKind>,
    color: Color,
    target_depth: u32,
    quiet: Duration,
) -> anyhow::Result<()> {
    let saver = AutoSaveCoordinator::spawn(store, review.clone(), quiet);
    let driver = Arc::new(AnalysisDriver::new());

    let mut progress_rx = driver.subscribe_progress();
    let progress_task = tokio::spawn(async move {
        while progress_rx.changed().await.is_ok() {
            let p = progress_rx.borrow().clone();
            if p.analyzing {
                info!(
                    index = p.current_index,
                    total = p.total_moves,
                    san = p.current_san.as_deref().unwrap_or("-"),
                    "Analyzing"
                );
            }
        }
    });

    let report = driver
        .run(review.clone(), gateway, &engines, target_depth)
        .await?;
    saver.mark_dirty();
    info!(
        analyzed = report.analyzed,
        skipped = report.skipped,
        failures = report.failures.len(),
        "Analysis pass done"
    );

    let mistakes = {
        let review = review.lock().await;
        let cfg = DetectorConfig {
            min_depth: target_depth.min(DetectorConfig::default().min_depth),
            ..DetectorConfig::default()
        };
        find_mistakes(&review.tree, &review.cache, color, &cfg)
    };

    if mistakes.is_empty() {
        println!("No mistakes found for {color:?}.");
    } else {
        println!("{} mistakes for {color:?}:", mistakes.len());
        for m in &mistakes {
            let move_no = (m.ply + 1) / 2;
            println!(
                "  move {:>3} {:8} played {:6} ({:+} cp), best {} [{:?}]",
                move_no, m.played_san, m.played_uci, -m.cp_loss, m.best_san, m.severity
            );
        }
    }

    saver.save_now().await;
    saver.shutdown().await;
    progress_task.abort();
    Ok(())
}
