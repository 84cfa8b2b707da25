//! SMT backend adapter.
//!
//! Wraps one or more SMT-LIB2 solvers behind a uniform session contract:
//! an assertion stack, satisfiability checks and model extraction. A
//! check runs as a portfolio — every solver gets the query, the first
//! decisive answer wins and the rest are cancelled. Incrementality is a
//! per-solver option; when it is off the stack is emulated by replaying
//! assertions into a fresh process, so the engine may rely on it for
//! performance only.

mod error;
mod session;
mod spec;

pub mod smtlib;

pub use error::SmtError;
pub use session::Session;
pub use spec::{SolverKind, SolverOptions, SolverSpec};

/// Outcome of a satisfiability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    /// Every solver gave up or timed out; the engine decides whether
    /// this is fatal.
    Unknown,
}
