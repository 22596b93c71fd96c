//! Tactical engine wrapper using the UCI protocol (async I/O).
//!
//! A single manager task owns the engine process; evaluation requests are
//! serialized through a job channel so at most one search is in flight.
//! Each completed search depth is streamed back as its own record.

use std::collections::BTreeMap;

use review_core::{AnalysisRecord, CandidateMove, EngineKind, Score};
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::error::ReviewError;
use crate::gateway::{EvalRequest, Evaluator};

struct Job {
    request: EvalRequest,
    cancel: watch::Receiver<bool>,
    out: mpsc::Sender<Result<AnalysisRecord, String>>,
}

/// Tactical evaluator backed by a UCI engine process.
pub struct UciEvaluator {
    jobs: mpsc::Sender<Job>,
}

impl UciEvaluator {
    /// Spawn the engine, complete the UCI handshake and start the manager
    /// task.
    pub async fn spawn(path: &str, multipv: u32) -> Result<Self, ReviewError> {
        let mut engine = UciProcess::new(path, multipv).await?;
        let (jobs_tx, mut jobs_rx) = mpsc::channel::<Job>(16);

        tokio::spawn(async move {
            while let Some(job) = jobs_rx.recv().await {
                // Superseded or abandoned before the search started
                if job.out.is_closed() || *job.cancel.borrow() {
                    continue;
                }
                if let Err(e) = engine.search(&job).await {
                    warn!(error = %e, fen = %job.request.fen, "Engine search failed");
                    let _ = job.out.send(Err(e.to_string())).await;
                }
            }
            engine.quit().await;
        });

        Ok(Self { jobs: jobs_tx })
    }
}

impl Evaluator for UciEvaluator {
    fn kind(&self) -> EngineKind {
        EngineKind::Tactical
    }

    fn evaluate(
        &self,
        request: EvalRequest,
        cancel: watch::Receiver<bool>,
    ) -> mpsc::Receiver<Result<AnalysisRecord, String>> {
        let (tx, rx) = mpsc::channel(8);
        let job = Job {
            request,
            cancel,
            out: tx.clone(),
        };
        if self.jobs.try_send(job).is_err() {
            let _ = tx.try_send(Err("engine job queue full".to_string()));
        }
        rx
    }
}

/// The engine process with its UCI pipes.
struct UciProcess {
    process: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl UciProcess {
    async fn new(path: &str, multipv: u32) -> Result<Self, ReviewError> {
        let mut process = Command::new(path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| ReviewError::EngineInit(format!("Failed to spawn engine: {e}")))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| ReviewError::EngineInit("Engine stdin unavailable".into()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| ReviewError::EngineInit("Engine stdout unavailable".into()))?;

        let mut engine = Self {
            process,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        // Initialize UCI
        engine.send("uci").await?;
        engine.wait_for("uciok").await?;

        // Configure for analysis
        engine.send("setoption name Threads value 1").await?;
        engine.send("setoption name Hash value 256").await?;
        engine.send("setoption name UCI_AnalyseMode value true").await?;
        engine
            .send(&format!("setoption name MultiPV value {multipv}"))
            .await?;
        engine.send("isready").await?;
        engine.wait_for("readyok").await?;

        Ok(engine)
    }

    async fn send(&mut self, cmd: &str) -> Result<(), ReviewError> {
        debug!(cmd, "engine <");
        self.stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| ReviewError::EngineEvaluationFailed(format!("Failed to write to engine: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| ReviewError::EngineEvaluationFailed(format!("Failed to flush stdin: {e}")))?;
        Ok(())
    }

    async fn next_line(&mut self) -> Result<String, ReviewError> {
        let line = self
            .stdout
            .next_line()
            .await
            .map_err(|e| ReviewError::EngineEvaluationFailed(format!("Failed to read from engine: {e}")))?
            .ok_or_else(|| ReviewError::EngineEvaluationFailed("Engine closed its pipe".into()))?;
        let trimmed = line.trim().to_string();
        debug!(line = %trimmed, "engine >");
        Ok(trimmed)
    }

    async fn wait_for(&mut self, expected: &str) -> Result<(), ReviewError> {
        loop {
            if self.next_line().await? == expected {
                return Ok(());
            }
        }
    }

    /// Read and discard until the search acknowledges the stop.
    async fn drain_to_bestmove(&mut self) -> Result<(), ReviewError> {
        loop {
            if self.next_line().await?.starts_with("bestmove") {
                return Ok(());
            }
        }
    }

    /// Run one search, streaming a tactical record per completed depth.
    async fn search(&mut self, job: &Job) -> Result<(), ReviewError> {
        let pos = position_from_fen(&job.request.fen)?;

        self.send(&format!("position fen {}", job.request.fen)).await?;
        self.send(&format!("go depth {}", job.request.depth_hint)).await?;

        let mut cancel = job.cancel.clone();
        // Candidate lines of the depth currently being reported, by
        // 1-based MultiPV index
        let mut pending: BTreeMap<u32, CandidateMove> = BTreeMap::new();
        let mut pending_depth: u32 = 0;

        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        self.send("stop").await?;
                        self.drain_to_bestmove().await?;
                        return Ok(());
                    }
                }
                line = self.stdout.next_line() => {
                    let line = line
                        .map_err(|e| ReviewError::EngineEvaluationFailed(format!("Failed to read from engine: {e}")))?
                        .ok_or_else(|| ReviewError::EngineEvaluationFailed("Engine closed its pipe".into()))?;
                    let trimmed = line.trim();
                    debug!(line = trimmed, "engine >");

                    if trimmed.starts_with("info") && trimmed.contains(" pv ") {
                        let depth = parse_depth(trimmed).unwrap_or(0);
                        if depth > pending_depth && !pending.is_empty() {
                            if !self.flush(job, &mut pending, pending_depth).await? {
                                return Ok(());
                            }
                        }
                        pending_depth = depth;

                        let idx = parse_multipv_index(trimmed).unwrap_or(1);
                        if let Some(candidate) = parse_candidate(&pos, trimmed) {
                            pending.insert(idx, candidate);
                        }
                    } else if trimmed.starts_with("bestmove") {
                        self.flush(job, &mut pending, pending_depth).await?;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Emit the pending depth's record. Returns false when the receiver is
    /// gone and the search should be stopped.
    async fn flush(
        &mut self,
        job: &Job,
        pending: &mut BTreeMap<u32, CandidateMove>,
        depth: u32,
    ) -> Result<bool, ReviewError> {
        if pending.is_empty() || depth == 0 {
            pending.clear();
            return Ok(true);
        }
        let lines: Vec<CandidateMove> = std::mem::take(pending).into_values().collect();
        let record = AnalysisRecord::Tactical { lines, depth };
        if job.out.send(Ok(record)).await.is_err() {
            self.send("stop").await?;
            self.drain_to_bestmove().await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Send quit and wait for the process to exit.
    async fn quit(&mut self) {
        let _ = self.send("quit").await;
        let _ = self.process.wait().await;
    }
}

impl Drop for UciProcess {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        let _ = self.process.start_kill();
    }
}

fn position_from_fen(fen: &str) -> Result<Chess, ReviewError> {
    let parsed: Fen = fen
        .parse()
        .map_err(|e| ReviewError::EngineEvaluationFailed(format!("Bad FEN {fen}: {e}")))?;
    parsed
        .into_position(CastlingMode::Standard)
        .map_err(|e| ReviewError::EngineEvaluationFailed(format!("Bad FEN {fen}: {e}")))
}

/// Build a candidate from an info line: first PV move plus its score.
fn parse_candidate(pos: &Chess, line: &str) -> Option<CandidateMove> {
    let score = parse_mate(line)
        .map(Score::Mate)
        .or_else(|| parse_cp(line).map(Score::Cp))?;
    let first = parse_pv(line).into_iter().next()?;

    let uci = UciMove::from_ascii(first.as_bytes()).ok()?;
    let mv = uci.to_move(pos).ok()?;
    let mut after = pos.clone();
    let san = SanPlus::from_move_and_play_unchecked(&mut after, mv);

    Some(CandidateMove {
        uci: first,
        san: san.to_string(),
        score,
    })
}

/// Parse search depth from an info line
fn parse_depth(line: &str) -> Option<u32> {
    keyword_value(line, "depth")
}

/// Parse centipawn score from an info line
fn parse_cp(line: &str) -> Option<i32> {
    keyword_value(line, "cp")
}

/// Parse mate score from an info line
fn parse_mate(line: &str) -> Option<i32> {
    keyword_value(line, "mate")
}

/// Parse multipv index from an info line
fn parse_multipv_index(line: &str) -> Option<u32> {
    keyword_value(line, "multipv")
}

fn keyword_value<T: std::str::FromStr>(line: &str, keyword: &str) -> Option<T> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    for (i, part) in parts.iter().enumerate() {
        if *part == keyword && i + 1 < parts.len() {
            return parts[i + 1].parse().ok();
        }
    }
    None
}

/// Parse PV moves from an info line
fn parse_pv(line: &str) -> Vec<String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let mut in_pv = false;
    let mut moves = Vec::new();

    for part in parts {
        if part == "pv" {
            in_pv = true;
            continue;
        }
        if in_pv {
            // PV ends at the next keyword
            if part == "string" {
                break;
            }
            moves.push(part.to_string());
        }
    }

    moves
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cp() {
        let line = "info depth 20 seldepth 25 multipv 1 score cp 35 nodes 100000 pv e2e4";
        assert_eq!(parse_cp(line), Some(35));
    }

    #[test]
    fn test_parse_mate() {
        let line = "info depth 20 score mate 3 nodes 100000 pv e2e4";
        assert_eq!(parse_mate(line), Some(3));
    }

    #[test]
    fn test_parse_depth_and_index() {
        let line = "info depth 14 multipv 2 score cp -12 pv d2d4 d7d5";
        assert_eq!(parse_depth(line), Some(14));
        assert_eq!(parse_multipv_index(line), Some(2));
    }

    #[test]
    fn test_parse_pv() {
        let line = "info depth 20 score cp 35 pv e2e4 e7e5 g1f3";
        let pv = parse_pv(line);
        assert_eq!(pv, vec!["e2e4", "e7e5", "g1f3"]);
    }

    #[test]
    fn test_parse_candidate_computes_san() {
        let pos = Chess::default();
        let line = "info depth 12 multipv 1 score cp 30 pv g1f3 d7d5";
        let candidate = parse_candidate(&pos, line).unwrap();
        assert_eq!(candidate.uci, "g1f3");
        assert_eq!(candidate.san, "Nf3");
        assert_eq!(candidate.score, Score::Cp(30));
    }
}
