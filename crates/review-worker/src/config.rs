//! Worker configuration from environment variables

use std::env;
use std::time::Duration;

use crate::error::ReviewError;

#[derive(Clone, Debug)]
pub struct ReviewConfig {
    /// Path to the tactical UCI engine binary
    pub engine_path: String,

    /// Policy model endpoint; policy analysis is skipped when unset
    pub policy_url: Option<String>,

    /// Database connection URL; snapshots stay in memory when unset
    pub database_url: Option<String>,

    /// Search depth for deep-analysis passes
    pub target_depth: u32,

    /// Candidate lines requested per position
    pub multipv: u32,

    /// Quiet interval before an auto-save fires
    pub autosave_quiet: Duration,
}

impl ReviewConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ReviewError> {
        let engine_path =
            env::var("ENGINE_PATH").unwrap_or_else(|_| "/usr/local/bin/stockfish".to_string());

        let policy_url = env::var("POLICY_URL").ok();
        let database_url = env::var("DATABASE_URL").ok();

        let target_depth = env::var("TARGET_DEPTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(18);

        let multipv = env::var("ENGINE_MULTIPV")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let autosave_quiet_ms = env::var("AUTOSAVE_QUIET_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2_000u64);

        if target_depth == 0 {
            return Err(ReviewError::Config("TARGET_DEPTH must be at least 1"));
        }
        if multipv == 0 {
            return Err(ReviewError::Config("ENGINE_MULTIPV must be at least 1"));
        }

        Ok(Self {
            engine_path,
            policy_url,
            database_url,
            target_depth,
            multipv,
            autosave_quiet: Duration::from_millis(autosave_quiet_ms),
        })
    }
}
