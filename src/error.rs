//! Engine error implementation

use thiserror::Error;

use octopus_ir::IrError;
use octopus_smt::SmtError;

/// Errors surfaced by the equivalence checker.
///
/// Non-equivalence is not an error; it is the
/// [`Outcome::NotEquivalent`](crate::outcome::Outcome) result. Width and
/// sort violations inside the term algebra are programmer errors and
/// panic instead of appearing here.
#[derive(Debug, Error)]
pub enum Error {
    /// A file could not be read or an input is otherwise unusable.
    #[error("input error: {0}")]
    Input(String),
    /// The IR failed to load or validate.
    #[error(transparent)]
    Ir(#[from] IrError),
    /// The solver backend failed.
    #[error(transparent)]
    Solver(#[from] SmtError),
    /// Every solver answered unknown or timed out on a query the
    /// bisimulation needs decided; soundness forbids guessing.
    #[error("solver returned unknown; the result is indeterminate")]
    Indeterminate,
}
