//! Hash-consed bit-vector and boolean term algebra.
//!
//! Terms are interned in an append-only [`TermPool`] and addressed by
//! [`TermId`]; structural equality is handle equality. The pool is the
//! only process-wide cache of the checker and is owned by the engine.

mod bits;
mod eval;
mod simplify;
mod term;

pub use bits::Bits;
pub use eval::{eval, Env, Value};
pub use simplify::simplify;
pub use term::{BitwiseOp, Sort, Term, TermId, TermPool};
