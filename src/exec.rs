//! Symbolic execution of state blocks
//!
//! Runs a state's statement list against the bits collected for it,
//! producing the updated register file, and compiles select scrutinees
//! and pattern rows into guard formulas in arm order.

use octopus_expr::{simplify, TermId, TermPool};
use octopus_ir::{Arm, Expr, Parser, PatternField, State, Statement, Target, Transition};

use crate::config::RegFile;
use crate::error::Error;

/// Compile an IR expression against the current register file.
pub(crate) fn compile_expr(pool: &mut TermPool, regs: &RegFile, expr: &Expr) -> Result<TermId, Error> {
    match expr {
        Expr::Const(bits) => Ok(pool.constant(bits.clone())),
        Expr::Reg(name) => regs.get(name).copied().ok_or_else(|| {
            Error::Ir(octopus_ir::IrError::Semantic(format!(
                "read of register {name} before any write"
            )))
        }),
        Expr::Slice { expr, hi, lo } => {
            let src = compile_expr(pool, regs, expr)?;
            Ok(pool.extract(src, *hi, *lo))
        }
        Expr::Concat(lhs, rhs) => {
            let lhs = compile_expr(pool, regs, lhs)?;
            let rhs = compile_expr(pool, regs, rhs)?;
            Ok(pool.concat(lhs, rhs))
        }
        Expr::Not(arg) => {
            let arg = compile_expr(pool, regs, arg)?;
            Ok(pool.not(arg))
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = compile_expr(pool, regs, lhs)?;
            let rhs = compile_expr(pool, regs, rhs)?;
            Ok(pool.bitwise(*op, lhs, rhs))
        }
    }
}

/// Execute a state's statements against exactly the bits its block
/// consumes, returning the updated register file.
///
/// Bits arrive oldest first and fill each extracted register from its
/// most significant bit down, the order they came off the wire.
pub(crate) fn execute_block(
    pool: &mut TermPool,
    parser: &Parser,
    state: &State,
    regs: &RegFile,
    bits: &[TermId],
) -> Result<RegFile, Error> {
    let mut regs = regs.clone();
    let mut cursor = 0usize;
    for statement in state.statements() {
        match statement {
            Statement::Extract { register } => {
                let width = parser
                    .register_width(register)
                    .expect("validated extract register") as usize;
                let mut value = bits[cursor];
                for &bit in &bits[cursor + 1..cursor + width] {
                    value = pool.concat(value, bit);
                }
                cursor += width;
                regs.insert(register.clone(), value);
            }
            Statement::Assign { lhs, rhs } => {
                let value = compile_expr(pool, &regs, rhs)?;
                let current = regs.get(&lhs.register).copied().ok_or_else(|| {
                    Error::Ir(octopus_ir::IrError::Semantic(format!(
                        "assignment into unwritten register {}",
                        lhs.register
                    )))
                })?;
                let updated = pool.slice_assign(current, value, lhs.lo);
                let updated = simplify(pool, updated);
                regs.insert(lhs.register.clone(), updated);
            }
        }
    }
    debug_assert_eq!(cursor, bits.len(), "block consumed a different bit count");
    Ok(regs)
}

/// Guards for every way out of a select, in arm order.
///
/// Arm `i` fires iff its row matches and no earlier row does; the
/// default is the negation of every row. Guards are simplified so
/// statically impossible arms die before any solver traffic.
pub(crate) fn arm_guards(
    pool: &mut TermPool,
    regs: &RegFile,
    scrutinees: &[Expr],
    arms: &[Arm],
    default: Target,
) -> Result<Vec<(TermId, Target)>, Error> {
    let scrutinees = scrutinees
        .iter()
        .map(|scrutinee| compile_expr(pool, regs, scrutinee))
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(arms.len() + 1);
    let mut rows: Vec<TermId> = Vec::with_capacity(arms.len());
    for arm in arms {
        let row = row_match(pool, &scrutinees, &arm.pattern);
        let mut guard = row;
        for &prior in &rows {
            let miss = pool.bnot(prior);
            guard = pool.band(guard, miss);
        }
        out.push((simplify(pool, guard), arm.target));
        rows.push(row);
    }
    let mut fallthrough = pool.tru();
    for &row in &rows {
        let miss = pool.bnot(row);
        fallthrough = pool.band(fallthrough, miss);
    }
    out.push((simplify(pool, fallthrough), default));
    Ok(out)
}

/// Conjunction of the per-field matches of one pattern row; wildcards
/// contribute nothing.
fn row_match(pool: &mut TermPool, scrutinees: &[TermId], pattern: &[PatternField]) -> TermId {
    debug_assert_eq!(scrutinees.len(), pattern.len(), "pattern arity validated at load");
    let mut row = pool.tru();
    for (&scrutinee, field) in scrutinees.iter().zip(pattern) {
        if let PatternField::Exact(value) = field {
            let value = pool.constant(value.clone());
            let hit = pool.eq(scrutinee, value);
            row = pool.band(row, hit);
        }
    }
    row
}

/// The outgoing guards of a state after its block ran: one entry per
/// feasible-by-syntax way out. Terminal transitions produce a single
/// unconditional entry.
pub(crate) fn outgoing(
    pool: &mut TermPool,
    regs: &RegFile,
    transition: &Transition,
) -> Result<Vec<(TermId, Target)>, Error> {
    match transition {
        Transition::Accept => Ok(vec![(pool.tru(), Target::Accept)]),
        Transition::Reject => Ok(vec![(pool.tru(), Target::Reject)]),
        Transition::Select {
            scrutinees,
            arms,
            default,
        } => arm_guards(pool, regs, scrutinees, arms, *default),
    }
}
