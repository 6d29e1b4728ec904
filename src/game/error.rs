//! Engine error taxonomy
//!
//! Every error is recovered locally: it is reported to the originating
//! connection as an `error` message and never tears down the process or
//! the connection.

use thiserror::Error;

/// Errors surfaced to clients from room operations
#[derive(Debug, Clone, Error)]
pub enum GameError {
    /// Unknown room, player, or vote target
    #[error("{0}")]
    NotFound(String),

    /// Operation not valid in the room's current phase
    #[error("{0}")]
    InvalidState(String),

    /// Room is full
    #[error("{0}")]
    Capacity(String),

    /// Malformed or out-of-range input
    #[error("{0}")]
    InvalidInput(String),
}

impl GameError {
    /// Stable machine-readable code for the `error` message payload
    pub fn code(&self) -> &'static str {
        match self {
            GameError::NotFound(_) => "not_found",
            GameError::InvalidState(_) => "invalid_state",
            GameError::Capacity(_) => "capacity",
            GameError::InvalidInput(_) => "invalid_input",
        }
    }
}

pub type GameResult<T> = Result<T, GameError>;
