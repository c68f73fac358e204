// src/error.rs
use thiserror::Error;

/// Setup mistakes that are surfaced to the caller.
///
/// Per-frame data problems (low confidence, unreachable targets, coincident
/// joints) never produce one of these; they are absorbed by the pipeline.
#[derive(Debug, Error)]
pub enum RigError {
    #[error("chain not found: {0}")]
    ChainNotFound(String),

    #[error("chain '{id}' needs at least 2 joints, got {count}")]
    TooFewJoints { id: String, count: usize },

    #[error("chain '{id}' base index {base_index} out of range for {joints} joints")]
    InvalidBaseIndex {
        id: String,
        base_index: usize,
        joints: usize,
    },

    #[error("invalid filter window {window} for polynomial order {order}")]
    InvalidFilter { window: usize, order: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RigError>;
