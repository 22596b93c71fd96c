//! Async orchestration for game review: engine gateway, deep-analysis
//! driver, mistake drills and debounced auto-save.

pub mod autosave;
pub mod config;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod policy;
pub mod review;
pub mod session;
pub mod store;
pub mod uci;

pub use error::ReviewError;
