//! Concrete replay of a parser on a literal packet
//!
//! Used to validate witness packets end-to-end: a counterexample is only
//! believable if replaying its bits through both parsers concretely
//! reproduces the divergence.

use std::collections::BTreeMap;

use octopus_expr::{Bits, BitwiseOp};
use octopus_ir::{Expr, Parser, PatternField, Statement, Target, Transition};

use crate::config::Verdict;

/// End state of a concrete run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replayed {
    /// `None` when the packet ran out before the parser committed.
    pub verdict: Option<Verdict>,
    pub registers: BTreeMap<String, Bits>,
}

/// Run a parser on a concrete packet, first-arrived bit first.
///
/// Registers the parser never writes keep the provided initial values,
/// or all-zeros when absent.
pub fn replay(parser: &Parser, packet: &[bool], inits: &BTreeMap<String, Bits>) -> Replayed {
    let mut registers: BTreeMap<String, Bits> = parser
        .registers()
        .iter()
        .map(|register| {
            let value = inits
                .get(&register.name)
                .cloned()
                .unwrap_or_else(|| Bits::zero(register.width));
            (register.name.clone(), value)
        })
        .collect();
    let mut state = parser.start();
    let mut position = 0usize;
    loop {
        let appetite = parser.appetite(state) as usize;
        if position + appetite > packet.len() {
            return Replayed {
                verdict: None,
                registers,
            };
        }
        let mut cursor = position;
        for statement in parser.state(state).statements() {
            match statement {
                Statement::Extract { register } => {
                    let width = parser.register_width(register).expect("validated") as usize;
                    let value = Bits::from_bools_msb(&packet[cursor..cursor + width]);
                    cursor += width;
                    registers.insert(register.clone(), value);
                }
                Statement::Assign { lhs, rhs } => {
                    let value = eval_expr(&registers, rhs);
                    let current = registers[&lhs.register].clone();
                    let updated = splice(&current, &value, lhs.lo);
                    registers.insert(lhs.register.clone(), updated);
                }
            }
        }
        position += appetite;
        let target = match parser.state(state).transition() {
            Transition::Accept => Target::Accept,
            Transition::Reject => Target::Reject,
            Transition::Select {
                scrutinees,
                arms,
                default,
            } => {
                let values: Vec<Bits> = scrutinees
                    .iter()
                    .map(|scrutinee| eval_expr(&registers, scrutinee))
                    .collect();
                arms.iter()
                    .find(|arm| row_matches(&values, &arm.pattern))
                    .map(|arm| arm.target)
                    .unwrap_or(*default)
            }
        };
        state = match target {
            Target::Accept => {
                return Replayed {
                    verdict: Some(Verdict::Accept),
                    registers,
                }
            }
            Target::Reject => {
                return Replayed {
                    verdict: Some(Verdict::Reject),
                    registers,
                }
            }
            Target::State(next) => next,
        };
    }
}

fn row_matches(values: &[Bits], pattern: &[PatternField]) -> bool {
    values.iter().zip(pattern).all(|(value, field)| match field {
        PatternField::Wildcard => true,
        PatternField::Exact(expected) => value == expected,
    })
}

fn splice(current: &Bits, value: &Bits, at: u32) -> Bits {
    let width = current.width();
    let mut out = value.clone();
    if at > 0 {
        out = out.concat(&current.slice(at - 1, 0));
    }
    if at + value.width() < width {
        out = current.slice(width - 1, at + value.width()).concat(&out);
    }
    out
}

fn eval_expr(registers: &BTreeMap<String, Bits>, expr: &Expr) -> Bits {
    match expr {
        Expr::Const(bits) => bits.clone(),
        Expr::Reg(name) => registers[name].clone(),
        Expr::Slice { expr, hi, lo } => eval_expr(registers, expr).slice(*hi, *lo),
        Expr::Concat(lhs, rhs) => eval_expr(registers, lhs).concat(&eval_expr(registers, rhs)),
        Expr::Not(arg) => eval_expr(registers, arg).not(),
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval_expr(registers, lhs);
            let rhs = eval_expr(registers, rhs);
            match op {
                BitwiseOp::And => lhs.and(&rhs),
                BitwiseOp::Or => lhs.or(&rhs),
                BitwiseOp::Xor => lhs.xor(&rhs),
                BitwiseOp::Shl => lhs.shl(shift(&rhs)),
                BitwiseOp::Shr => lhs.shr(shift(&rhs)),
            }
        }
    }
}

fn shift(amount: &Bits) -> u32 {
    match amount.to_u64() {
        Some(value) if value <= u32::MAX as u64 => value as u32,
        _ => u32::MAX,
    }
}
