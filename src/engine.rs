//! Bisimulation engine
//!
//! Breadth-first worklist computation of the largest relation between
//! the two parsers' symbolic configurations that relates the initial
//! pair, preserves observables at terminals, and is closed under
//! lock-step input consumption. With leaps enabled a step consumes
//! `min` of both sides' remaining appetites at once; since neither side
//! branches mid-block, that equals the product of single-bit steps.

use std::collections::{BTreeSet, VecDeque};

use itertools::Itertools;
use tracing::{debug, info, trace};

use octopus_expr::{simplify, Term, TermId, TermPool};
use octopus_ir::Parser;
use octopus_smt::{smtlib, SatResult, Session};

use crate::buffer::PacketBits;
use crate::config::{Cfg, Control, PairCfg};
use crate::error::Error;
use crate::outcome::{Certificate, CertClass, Counterexample, Outcome, SideReport};
use crate::step::{feed, StepCtx};

/// Engine knobs, set from the CLI.
#[derive(Debug, Clone, Copy)]
pub struct CheckOptions {
    /// Consume up to the next branching point of both sides per step
    /// instead of one bit.
    pub leaps: bool,
    /// On an indeterminate answer during a leap, retry the same pair
    /// with single-bit steps before giving up.
    pub fallback_to_naive_on_unknown: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            leaps: true,
            fallback_to_naive_on_unknown: false,
        }
    }
}

/// One proven class of the relation: control tags, pending depths, and
/// the register equalities the class assumes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ClassKey {
    left: Control,
    right: Control,
    pending: (usize, usize),
}

#[derive(Debug)]
struct RelEntry {
    key: ClassKey,
    equal_regs: BTreeSet<String>,
    /// Disjunction of the joint path conditions under which the class
    /// was reached; emitted with the certificate.
    reach: TermId,
}

/// The bisimulation engine for one pair of parsers.
pub struct Engine<'a> {
    left: &'a Parser,
    right: &'a Parser,
    session: &'a mut Session,
    options: CheckOptions,
    pool: TermPool,
    buffer: PacketBits,
    relation: Vec<RelEntry>,
    worklist: VecDeque<PairCfg>,
    pairs_explored: usize,
    leaps_taken: usize,
}

impl<'a> Engine<'a> {
    pub fn new(
        session: &'a mut Session,
        left: &'a Parser,
        right: &'a Parser,
        options: CheckOptions,
    ) -> Self {
        Self {
            left,
            right,
            session,
            options,
            pool: TermPool::new(),
            buffer: PacketBits::new(),
            relation: Vec::new(),
            worklist: VecDeque::new(),
            pairs_explored: 0,
            leaps_taken: 0,
        }
    }

    /// Decide equivalence: run the fixed point to exhaustion or to the
    /// first divergence.
    pub fn run(&mut self) -> Result<Outcome, Error> {
        let left0 = Cfg::initial(&mut self.pool, self.left);
        let right0 = Cfg::initial(&mut self.pool, self.right);
        let lefts = feed(&mut self.left_ctx(), &left0, &[])?;
        let rights = feed(&mut self.right_ctx(), &right0, &[])?;
        let initial = self.product(&lefts, &rights, 0)?;
        self.worklist.extend(initial);

        while let Some(pair) = self.worklist.pop_front() {
            self.pairs_explored += 1;
            trace!(
                left = %pair.left.control.tag(self.left),
                right = %pair.right.control.tag(self.right),
                offset = pair.offset(),
                depth = pair.depth,
                "pair"
            );

            match (pair.left.verdict(), pair.right.verdict()) {
                (Some(l), Some(r)) if l == r => {
                    if let Some(mismatch) = self.snapshot_divergence(&pair)? {
                        info!("observable snapshots diverge at a common verdict");
                        return self.counterexample(&pair, mismatch);
                    }
                    continue;
                }
                (None, None) => {}
                // One side committed (or they committed differently)
                // while the other did not: the prefix separates them.
                _ => {
                    info!("terminal verdicts diverge");
                    let joint = pair.joint_path_cond(&mut self.pool);
                    let joint = simplify(&mut self.pool, joint);
                    return self.counterexample(&pair, joint);
                }
            }

            let joint = pair.joint_path_cond(&mut self.pool);
            let joint = simplify(&mut self.pool, joint);
            let key = ClassKey {
                left: pair.left.control,
                right: pair.right.control,
                pending: (pair.left.pending.len(), pair.right.pending.len()),
            };
            let equal = self.provably_equal_registers(&pair, joint)?;
            if let Some(entry) = self
                .relation
                .iter_mut()
                .find(|entry| entry.key == key && entry.equal_regs.is_subset(&equal))
            {
                let widened = self.pool.bor(entry.reach, joint);
                entry.reach = simplify(&mut self.pool, widened);
                trace!("pair covered by the relation");
                continue;
            }
            self.relation.push(RelEntry {
                key,
                equal_regs: equal,
                reach: joint,
            });

            let chunk = if self.options.leaps {
                let left = pair.left.remaining(self.left).expect("non-terminal");
                let right = pair.right.remaining(self.right).expect("non-terminal");
                left.min(right)
            } else {
                1
            };
            if chunk > 1 {
                self.leaps_taken += 1;
            }
            let successors = match self.expand(&pair, chunk) {
                Err(Error::Indeterminate)
                    if self.options.fallback_to_naive_on_unknown && chunk > 1 =>
                {
                    debug!("leap indeterminate, retrying with single-bit steps");
                    self.expand(&pair, 1)
                }
                other => other,
            }?;
            self.worklist.extend(successors);
        }

        info!(
            pairs = self.pairs_explored,
            classes = self.relation.len(),
            leaps = self.leaps_taken,
            queries = self.session.queries(),
            "equivalent"
        );
        Ok(Outcome::Equivalent {
            certificate: self.certificate(),
        })
    }

    /// Pairs explored so far.
    pub fn pairs_explored(&self) -> usize {
        self.pairs_explored
    }

    fn left_ctx(&mut self) -> StepCtx<'_> {
        StepCtx {
            pool: &mut self.pool,
            session: &mut *self.session,
            parser: self.left,
        }
    }

    fn right_ctx(&mut self) -> StepCtx<'_> {
        StepCtx {
            pool: &mut self.pool,
            session: &mut *self.session,
            parser: self.right,
        }
    }

    /// Feed `chunk` fresh shared bits to both sides and pair up the
    /// jointly satisfiable combinations.
    fn expand(&mut self, pair: &PairCfg, chunk: usize) -> Result<Vec<PairCfg>, Error> {
        let offset = pair.offset();
        let fresh: Vec<TermId> = (0..chunk)
            .map(|i| self.buffer.bit(&mut self.pool, offset + i))
            .collect();
        let lefts = feed(&mut self.left_ctx(), &pair.left, &fresh)?;
        let rights = feed(&mut self.right_ctx(), &pair.right, &fresh)?;
        self.product(&lefts, &rights, pair.depth + 1)
    }

    fn product(
        &mut self,
        lefts: &[Cfg],
        rights: &[Cfg],
        depth: usize,
    ) -> Result<Vec<PairCfg>, Error> {
        let mut out = Vec::new();
        for (left, right) in lefts.iter().cartesian_product(rights) {
            let joint = self.pool.band(left.path_cond, right.path_cond);
            let joint = simplify(&mut self.pool, joint);
            if matches!(self.pool.term(joint), Term::False) {
                continue;
            }
            if !matches!(self.pool.term(joint), Term::True) {
                match self.session.check_sat(&self.pool, joint)? {
                    SatResult::Sat => {}
                    SatResult::Unsat => continue,
                    SatResult::Unknown => return Err(Error::Indeterminate),
                }
            }
            out.push(PairCfg::new(left.clone(), right.clone(), depth));
        }
        Ok(out)
    }

    /// Registers provably equal across the sides under the joint path
    /// condition: same name, same width, and the equality is valid.
    fn provably_equal_registers(
        &mut self,
        pair: &PairCfg,
        joint: TermId,
    ) -> Result<BTreeSet<String>, Error> {
        let mut equal = BTreeSet::new();
        for (name, &left) in &pair.left.regs {
            let Some(&right) = pair.right.regs.get(name) else {
                continue;
            };
            if self.pool.width(left) != self.pool.width(right) {
                continue;
            }
            if left == right {
                equal.insert(name.clone());
                continue;
            }
            let eq = self.pool.eq(left, right);
            let ne = self.pool.bnot(eq);
            let counter = self.pool.band(joint, ne);
            let counter = simplify(&mut self.pool, counter);
            let holds = match self.pool.term(counter) {
                Term::False => true,
                Term::True => false,
                _ => match self.session.check_sat(&self.pool, counter)? {
                    SatResult::Unsat => true,
                    SatResult::Sat => false,
                    SatResult::Unknown => return Err(Error::Indeterminate),
                },
            };
            if holds {
                equal.insert(name.clone());
            }
        }
        Ok(equal)
    }

    /// At a common verdict: a satisfiable formula separating the
    /// observable snapshots, or `None` when they agree everywhere.
    ///
    /// The observable interface is the registers the parsers share by
    /// name; a side-private register is scratch. A shared name with
    /// different widths can never agree.
    fn snapshot_divergence(&mut self, pair: &PairCfg) -> Result<Option<TermId>, Error> {
        let joint = pair.joint_path_cond(&mut self.pool);
        let joint = simplify(&mut self.pool, joint);
        let mut differences = Vec::new();
        for (name, &left) in &pair.left.regs {
            let Some(&right) = pair.right.regs.get(name) else {
                continue;
            };
            if self.pool.width(left) != self.pool.width(right) {
                debug!(register = %name, "observable register widths differ");
                return Ok(Some(joint));
            }
            if left == right {
                continue;
            }
            let eq = self.pool.eq(left, right);
            differences.push(self.pool.bnot(eq));
        }
        let any_diff = self.pool.disj(differences);
        let counter = self.pool.band(joint, any_diff);
        let counter = simplify(&mut self.pool, counter);
        match self.pool.term(counter) {
            Term::False => Ok(None),
            Term::True => Ok(Some(counter)),
            _ => match self.session.check_sat(&self.pool, counter)? {
                SatResult::Unsat => Ok(None),
                SatResult::Sat => Ok(Some(counter)),
                SatResult::Unknown => Err(Error::Indeterminate),
            },
        }
    }

    /// Reconstruct a witness packet from a model of `formula` and report
    /// both sides' concrete end states.
    fn counterexample(&mut self, pair: &PairCfg, formula: TermId) -> Result<Outcome, Error> {
        self.session.push();
        self.session.assert(&self.pool, formula);
        let outcome = self.witness(pair);
        self.session.pop();
        outcome
    }

    fn witness(&mut self, pair: &PairCfg) -> Result<Outcome, Error> {
        let answer = self.session.check(&self.pool)?;
        match answer {
            SatResult::Sat => {
                let mut vars: Vec<TermId> = Vec::new();
                for index in 0..pair.offset() {
                    vars.push(self.buffer.bit(&mut self.pool, index));
                }
                for parser in [self.left, self.right] {
                    for register in parser.registers() {
                        let name = Cfg::init_name(&register.name, register.width);
                        vars.push(self.pool.var(name, register.width));
                    }
                }
                vars.sort_unstable();
                vars.dedup();
                let env = if vars.is_empty() {
                    octopus_expr::Env::new()
                } else {
                    self.session.model(&self.pool, &vars)?
                };
                let packet: Vec<bool> = (0..pair.offset())
                    .map(|index| match &env[&PacketBits::bit_name(index)] {
                        octopus_expr::Value::Bits(bits) => bits.bit(0),
                        octopus_expr::Value::Bool(b) => *b,
                    })
                    .collect();
                let left = self.side_report(&pair.left, self.left, &env);
                let right = self.side_report(&pair.right, self.right, &env);
                info!(bits = packet.len(), "witness packet reconstructed");
                Ok(Outcome::NotEquivalent {
                    counterexample: Counterexample::new(packet, left, right),
                })
            }
            // The separating formula was satisfiable when the pair was
            // enqueued; anything else now means the solver gave up.
            SatResult::Unsat | SatResult::Unknown => Err(Error::Indeterminate),
        }
    }

    fn side_report(&self, cfg: &Cfg, parser: &Parser, env: &octopus_expr::Env) -> SideReport {
        let registers = cfg
            .regs
            .iter()
            .map(|(name, &term)| {
                let value = octopus_expr::eval(&self.pool, env, term).unwrap_bits();
                (name.clone(), value.to_string())
            })
            .collect();
        SideReport {
            verdict: match cfg.verdict() {
                Some(crate::config::Verdict::Accept) => "accept".into(),
                Some(crate::config::Verdict::Reject) => "reject".into(),
                None => "running".into(),
            },
            state: cfg.control.tag(parser),
            registers,
        }
    }

    fn certificate(&self) -> Certificate {
        let classes = self
            .relation
            .iter()
            .map(|entry| CertClass {
                left_state: entry.key.left.tag(self.left),
                right_state: entry.key.right.tag(self.right),
                pending: [entry.key.pending.0, entry.key.pending.1],
                equal_registers: entry.equal_regs.iter().cloned().collect(),
                reach_condition: smtlib::standalone_script(&self.pool, entry.reach),
            })
            .collect();
        Certificate { classes }
    }
}
