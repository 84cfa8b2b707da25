//! Step relation over symbolic configurations
//!
//! One step feeds a chunk of fresh input bits to a side. A side whose
//! pending bits reach its state's appetite executes the block and
//! branches through its select; states with zero appetite resolve
//! immediately (load-time validation guarantees that closure
//! terminates). Every emitted successor is satisfiable on its own side;
//! the engine re-checks joint satisfiability when pairing.

use octopus_expr::{simplify, Term, TermId, TermPool};
use octopus_ir::{Parser, Transition};
use octopus_smt::{SatResult, Session};

use crate::config::{Cfg, Control};
use crate::error::Error;
use crate::exec;

/// Everything a single-side step needs.
pub(crate) struct StepCtx<'a> {
    pub pool: &'a mut TermPool,
    pub session: &'a mut Session,
    pub parser: &'a Parser,
}

/// Feed fresh bits to one side and return its successor configurations
/// in select-arm order.
///
/// The chunk never exceeds the side's remaining appetite, so a block
/// either completes exactly or stays pending.
pub(crate) fn feed(ctx: &mut StepCtx<'_>, cfg: &Cfg, fresh: &[TermId]) -> Result<Vec<Cfg>, Error> {
    let mut cfg = cfg.clone();
    cfg.pending.extend_from_slice(fresh);
    cfg.offset += fresh.len();
    resolve(ctx, cfg)
}

fn resolve(ctx: &mut StepCtx<'_>, cfg: Cfg) -> Result<Vec<Cfg>, Error> {
    let state_id = match cfg.control {
        Control::Accept | Control::Reject => return Ok(vec![cfg]),
        Control::At(id) => id,
    };
    let appetite = ctx.parser.appetite(state_id) as usize;
    if cfg.pending.len() < appetite {
        return Ok(vec![cfg]);
    }
    debug_assert_eq!(cfg.pending.len(), appetite, "overfed state block");

    let state = ctx.parser.state(state_id);
    let regs = exec::execute_block(ctx.pool, ctx.parser, state, &cfg.regs, &cfg.pending)?;
    let ways = exec::outgoing(ctx.pool, &regs, state.transition())?;
    let unconditional = matches!(state.transition(), Transition::Accept | Transition::Reject);

    let mut out = Vec::new();
    for (guard, target) in ways {
        let path_cond = if unconditional {
            cfg.path_cond
        } else {
            let conjoined = ctx.pool.band(cfg.path_cond, guard);
            simplify(ctx.pool, conjoined)
        };
        if matches!(ctx.pool.term(path_cond), Term::False) {
            continue;
        }
        if !matches!(ctx.pool.term(path_cond), Term::True) {
            match ctx.session.check_sat(ctx.pool, path_cond)? {
                SatResult::Sat => {}
                SatResult::Unsat => continue,
                SatResult::Unknown => return Err(Error::Indeterminate),
            }
        }
        let next = Cfg {
            control: target.into(),
            path_cond,
            regs: regs.clone(),
            pending: Vec::new(),
            offset: cfg.offset,
        };
        out.extend(resolve(ctx, next)?);
    }
    Ok(out)
}
