//! Solver adapter errors

use std::io;

use thiserror::Error;

/// Errors surfaced by the solver adapter.
#[derive(Debug, Error)]
pub enum SmtError {
    /// Malformed solver specification or global options.
    #[error("solver spec error: {0}")]
    Spec(String),
    /// A solver binary could not be started.
    #[error("failed to launch solver {name}: {source}")]
    Launch {
        name: String,
        #[source]
        source: io::Error,
    },
    /// Pipe traffic with a solver failed.
    #[error("solver io error: {0}")]
    Io(#[from] io::Error),
    /// A solver answered something the adapter cannot interpret.
    #[error("solver protocol error: {0}")]
    Protocol(String),
    /// Every solver in the portfolio returned unknown or timed out.
    #[error("all solvers returned unknown or timed out")]
    Indeterminate,
}
