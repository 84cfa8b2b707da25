//! Octopus decides language equivalence of two packet parsers by
//! symbolic bisimulation with leaps.
//!
//! A parser is a finite state machine consuming a packet bit by bit;
//! two parsers are equivalent iff every finite input prefix drives both
//! to the same verdict with identical observable register snapshots, or
//! leaves both uncommitted. The engine explores the pair space
//! symbolically, discharging coverage and feasibility through an SMT
//! portfolio, and emits either a certificate (the discovered
//! bisimulation) or a witness packet.

pub mod buffer;
pub mod checker;
pub mod config;
pub mod engine;
pub mod error;
pub mod outcome;
pub mod replay;

mod exec;
mod step;

pub mod prelude {
    pub use octopus_expr::{Bits, TermId, TermPool};
    pub use octopus_ir::{IrError, Parser};
    pub use octopus_smt::{SatResult, Session, SmtError, SolverOptions, SolverSpec};

    pub use crate::buffer::PacketBits;
    pub use crate::checker::Checker;
    pub use crate::config::{Cfg, Control, PairCfg, RegFile, Verdict};
    pub use crate::engine::{CheckOptions, Engine};
    pub use crate::error::Error;
    pub use crate::outcome::{Certificate, Counterexample, Outcome};
    pub use crate::replay::{replay, Replayed};
}
