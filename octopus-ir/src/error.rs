//! IR loading and validation errors

use thiserror::Error;

/// Errors surfaced while loading or validating parser IR.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    /// The input is not well-formed IR JSON: missing keys, unknown
    /// targets, malformed literals.
    #[error("IR schema error: {0}")]
    Schema(String),
    /// The input uses a feature outside the covered subset.
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    /// The IR is well-formed but semantically inconsistent: width
    /// mismatches, reads of never-written registers.
    #[error("IR semantic error: {0}")]
    Semantic(String),
}
