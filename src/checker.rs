//! Equivalence checker façade
//!
//! Owns the solver session and the engine knobs; a client loads two
//! parsers, calls [`Checker::check`], and inspects the outcome.

use octopus_ir::Parser;
use octopus_smt::{Session, SolverOptions, SolverSpec};

use crate::engine::{CheckOptions, Engine};
use crate::error::Error;
use crate::outcome::Outcome;

/// A reusable checker bound to a solver portfolio.
pub struct Checker {
    session: Session,
    options: CheckOptions,
}

impl Checker {
    /// A checker over an already opened session.
    pub fn new(session: Session) -> Self {
        Self {
            session,
            options: CheckOptions::default(),
        }
    }

    /// Open the portfolio described by `specs` and build a checker.
    pub fn open(
        specs: &[SolverSpec],
        globals: &SolverOptions,
        options: CheckOptions,
    ) -> Result<Self, Error> {
        Ok(Self {
            session: Session::open(specs, globals)?,
            options,
        })
    }

    pub fn with_options(mut self, options: CheckOptions) -> Self {
        self.options = options;
        self
    }

    /// Decide whether the two parsers are language equivalent.
    pub fn check(&mut self, left: &Parser, right: &Parser) -> Result<Outcome, Error> {
        Engine::new(&mut self.session, left, right, self.options).run()
    }

    /// Total solver queries issued over this checker's lifetime.
    pub fn queries(&self) -> usize {
        self.session.queries()
    }
}
