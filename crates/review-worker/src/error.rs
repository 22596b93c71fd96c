//! Worker error types

use review_core::tree::TreeError;
use review_core::EngineKind;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("Configuration error: {0}")]
    Config(&'static str),

    #[error("Engine not ready: {0:?}")]
    EngineNotReady(EngineKind),

    #[error("Engine initialization failed: {0}")]
    EngineInit(String),

    #[error("Engine evaluation failed: {0}")]
    EngineEvaluationFailed(String),

    #[error("Invalid session state: {0}")]
    SessionInvalidState(&'static str),

    #[error("Analysis pass already running")]
    DriverBusy,

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("Persistence error: {0}")]
    Persist(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
