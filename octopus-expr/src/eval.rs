//! Concrete term evaluation

use std::collections::HashMap;

use crate::{Bits, BitwiseOp, Term, TermId, TermPool};

/// Concrete value of a term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bits(Bits),
    Bool(bool),
}

impl Value {
    /// The bit-vector payload; panics on booleans.
    pub fn unwrap_bits(self) -> Bits {
        match self {
            Value::Bits(bits) => bits,
            Value::Bool(_) => panic!("expected a bit-vector value"),
        }
    }

    /// The boolean payload; panics on bit-vectors.
    pub fn unwrap_bool(self) -> bool {
        match self {
            Value::Bool(b) => b,
            Value::Bits(_) => panic!("expected a boolean value"),
        }
    }
}

/// Assignment of variable names to concrete values.
pub type Env = HashMap<String, Value>;

/// Evaluate a term under an assignment of its free variables.
///
/// Shared nodes are evaluated once. An unbound variable is a programmer
/// error and panics; callers close the environment first.
pub fn eval(pool: &TermPool, env: &Env, id: TermId) -> Value {
    let mut memo = HashMap::new();
    eval_memo(pool, env, id, &mut memo)
}

fn eval_memo(pool: &TermPool, env: &Env, id: TermId, memo: &mut HashMap<TermId, Value>) -> Value {
    if let Some(value) = memo.get(&id) {
        return value.clone();
    }
    let mut bits = |id: TermId, memo: &mut HashMap<TermId, Value>| {
        eval_memo(pool, env, id, memo).unwrap_bits()
    };
    let value = match pool.term(id) {
        Term::Const(value) => Value::Bits(value.clone()),
        Term::Var { name, .. } => env
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("unbound variable {name}")),
        Term::Concat(lhs, rhs) => {
            let high = bits(*lhs, memo);
            Value::Bits(high.concat(&bits(*rhs, memo)))
        }
        Term::Extract { src, hi, lo } => Value::Bits(bits(*src, memo).slice(*hi, *lo)),
        Term::Not(arg) => Value::Bits(bits(*arg, memo).not()),
        Term::Bitwise { op, lhs, rhs } => {
            let lhs = bits(*lhs, memo);
            let rhs = bits(*rhs, memo);
            let out = match op {
                BitwiseOp::And => lhs.and(&rhs),
                BitwiseOp::Or => lhs.or(&rhs),
                BitwiseOp::Xor => lhs.xor(&rhs),
                // A shift amount at or above the width saturates to zero,
                // matching SMT-LIB bvshl/bvlshr.
                BitwiseOp::Shl => lhs.shl(shift_amount(&rhs)),
                BitwiseOp::Shr => lhs.shr(shift_amount(&rhs)),
            };
            Value::Bits(out)
        }
        Term::Eq(lhs, rhs) => Value::Bool(bits(*lhs, memo) == bits(*rhs, memo)),
        Term::Ite { cond, then, other } => {
            if eval_memo(pool, env, *cond, memo).unwrap_bool() {
                eval_memo(pool, env, *then, memo)
            } else {
                eval_memo(pool, env, *other, memo)
            }
        }
        Term::True => Value::Bool(true),
        Term::False => Value::Bool(false),
        Term::BoolNot(arg) => Value::Bool(!eval_memo(pool, env, *arg, memo).unwrap_bool()),
        Term::BoolAnd(lhs, rhs) => Value::Bool(
            eval_memo(pool, env, *lhs, memo).unwrap_bool()
                && eval_memo(pool, env, *rhs, memo).unwrap_bool(),
        ),
        Term::BoolOr(lhs, rhs) => Value::Bool(
            eval_memo(pool, env, *lhs, memo).unwrap_bool()
                || eval_memo(pool, env, *rhs, memo).unwrap_bool(),
        ),
    };
    memo.insert(id, value.clone());
    value
}

fn shift_amount(amount: &Bits) -> u32 {
    match amount.to_u64() {
        Some(value) if value <= u32::MAX as u64 => value as u32,
        _ => u32::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, Value)]) -> Env {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn evaluates_bitwise_structure() {
        let mut pool = TermPool::new();
        let a = pool.var("a", 4);
        let b = pool.var("b", 4);
        let x = pool.xor(a, b);
        let n = pool.not(x);
        let env = env(&[
            ("a", Value::Bits(Bits::from_u64(4, 0b1100))),
            ("b", Value::Bits(Bits::from_u64(4, 0b1010))),
        ]);
        assert_eq!(eval(&pool, &env, n), Value::Bits(Bits::from_u64(4, 0b1001)));
    }

    #[test]
    fn ite_follows_the_condition() {
        let mut pool = TermPool::new();
        let a = pool.var("a", 2);
        let zero = pool.constant_u64(2, 0);
        let one = pool.constant_u64(2, 1);
        let two = pool.constant_u64(2, 2);
        let cond = pool.eq(a, zero);
        let ite = pool.ite(cond, one, two);
        let hit = env(&[("a", Value::Bits(Bits::from_u64(2, 0)))]);
        let miss = env(&[("a", Value::Bits(Bits::from_u64(2, 3)))]);
        assert_eq!(eval(&pool, &hit, ite), Value::Bits(Bits::from_u64(2, 1)));
        assert_eq!(eval(&pool, &miss, ite), Value::Bits(Bits::from_u64(2, 2)));
    }

    #[test]
    fn oversized_shift_is_zero() {
        let mut pool = TermPool::new();
        let a = pool.var("a", 4);
        let k = pool.constant_u64(4, 9);
        let shifted = pool.shl(a, k);
        let env = env(&[("a", Value::Bits(Bits::from_u64(4, 0b1111)))]);
        assert_eq!(eval(&pool, &env, shifted), Value::Bits(Bits::zero(4)));
    }
}
