//! Flat, non-hierarchical error type for every stage of the pipeline.
//!
//! Every run-time kind is caught at the outer execution boundary (see
//! `main.rs`) and turned into a single-line diagnostic; nothing here is
//! retried or recovered from internally.

use crate::token::Position;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NSchemeError {
    #[error("{0}")]
    ArgumentError(String),

    #[error("{0}: {1}")]
    ReadError(Position, String),

    #[error("{0}: {1}")]
    ParseError(Position, String),

    #[error("unbound variable: {0}")]
    NameError(String),

    #[error("{0}")]
    TypeError(String),

    #[error("{0}")]
    ArityError(String),

    #[error("{0}")]
    RuntimeError(String),

    /// Not a real error: raised by the `Quit` instruction to unwind the VM
    /// loop cleanly. Always matched out before it would be printed.
    #[error("quit")]
    Quit,
}

pub type Result<T> = std::result::Result<T, NSchemeError>;

impl NSchemeError {
    /// Exit code the CLI should use for this error, per spec §7.
    pub fn exit_code(&self) -> i32 {
        match self {
            NSchemeError::Quit => 0,
            _ => 1,
        }
    }
}
