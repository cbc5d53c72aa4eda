//! Error types for the player

use thiserror::Error;

/// Player error types
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] hiqty_core::Error),

    #[error("Watcher error: {0}")]
    Watcher(String),
}

/// Result type for player operations
pub type Result<T> = std::result::Result<T, Error>;
