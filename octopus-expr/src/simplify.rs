//! Sound local term rewriting

use std::collections::HashMap;

use crate::{Bits, BitwiseOp, Term, TermId, TermPool};

/// Simplify a term by memoised bottom-up local rewriting.
///
/// The rewrites never change the represented function and the result is a
/// fixed point: simplifying twice returns the same handle.
pub fn simplify(pool: &mut TermPool, id: TermId) -> TermId {
    Simplifier {
        pool,
        memo: HashMap::new(),
    }
    .walk(id)
}

struct Simplifier<'a> {
    pool: &'a mut TermPool,
    memo: HashMap<TermId, TermId>,
}

impl Simplifier<'_> {
    fn walk(&mut self, id: TermId) -> TermId {
        if let Some(out) = self.memo.get(&id) {
            return *out;
        }
        let out = match self.pool.term(id).clone() {
            Term::Const(_) | Term::Var { .. } | Term::True | Term::False => id,
            Term::Concat(lhs, rhs) => {
                let lhs = self.walk(lhs);
                let rhs = self.walk(rhs);
                self.mk_concat(lhs, rhs)
            }
            Term::Extract { src, hi, lo } => {
                let src = self.walk(src);
                self.mk_extract(src, hi, lo)
            }
            Term::Not(arg) => {
                let arg = self.walk(arg);
                self.mk_not(arg)
            }
            Term::Bitwise { op, lhs, rhs } => {
                let lhs = self.walk(lhs);
                let rhs = self.walk(rhs);
                self.mk_bitwise(op, lhs, rhs)
            }
            Term::Eq(lhs, rhs) => {
                let lhs = self.walk(lhs);
                let rhs = self.walk(rhs);
                self.mk_eq(lhs, rhs)
            }
            Term::Ite { cond, then, other } => {
                let cond = self.walk(cond);
                let then = self.walk(then);
                let other = self.walk(other);
                self.mk_ite(cond, then, other)
            }
            Term::BoolNot(arg) => {
                let arg = self.walk(arg);
                self.mk_bnot(arg)
            }
            Term::BoolAnd(lhs, rhs) => {
                let lhs = self.walk(lhs);
                let rhs = self.walk(rhs);
                self.mk_band(lhs, rhs)
            }
            Term::BoolOr(lhs, rhs) => {
                let lhs = self.walk(lhs);
                let rhs = self.walk(rhs);
                self.mk_bor(lhs, rhs)
            }
        };
        self.memo.insert(id, out);
        out
    }

    fn constant(&self, id: TermId) -> Option<&Bits> {
        match self.pool.term(id) {
            Term::Const(bits) => Some(bits),
            _ => None,
        }
    }

    fn mk_concat(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        if let (Some(high), Some(low)) = (self.constant(lhs), self.constant(rhs)) {
            let folded = high.concat(low);
            return self.pool.constant(folded);
        }
        // Adjacent extracts of the same source fuse back together.
        if let (
            Term::Extract { src: ls, hi: lh, lo: ll },
            Term::Extract { src: rs, hi: rh, lo: rl },
        ) = (self.pool.term(lhs).clone(), self.pool.term(rhs).clone())
        {
            if ls == rs && ll == rh + 1 {
                return self.mk_extract(ls, lh, rl);
            }
        }
        self.pool.concat(lhs, rhs)
    }

    fn mk_extract(&mut self, src: TermId, hi: u32, lo: u32) -> TermId {
        if lo == 0 && hi + 1 == self.pool.width(src) {
            return src;
        }
        match self.pool.term(src).clone() {
            Term::Const(bits) => {
                let sliced = bits.slice(hi, lo);
                self.pool.constant(sliced)
            }
            Term::Extract { src: inner, lo: ilo, .. } => self.mk_extract(inner, ilo + hi, ilo + lo),
            Term::Concat(high, low) => {
                let low_width = self.pool.width(low);
                if lo >= low_width {
                    self.mk_extract(high, hi - low_width, lo - low_width)
                } else if hi < low_width {
                    self.mk_extract(low, hi, lo)
                } else {
                    self.pool.extract(src, hi, lo)
                }
            }
            _ => self.pool.extract(src, hi, lo),
        }
    }

    fn mk_not(&mut self, arg: TermId) -> TermId {
        if let Some(bits) = self.constant(arg) {
            let folded = bits.not();
            return self.pool.constant(folded);
        }
        if let Term::Not(inner) = self.pool.term(arg) {
            return *inner;
        }
        self.pool.not(arg)
    }

    fn mk_bitwise(&mut self, op: BitwiseOp, lhs: TermId, rhs: TermId) -> TermId {
        let width = self.pool.width(lhs);
        if let (Some(a), Some(b)) = (self.constant(lhs), self.constant(rhs)) {
            let folded = match op {
                BitwiseOp::And => a.and(b),
                BitwiseOp::Or => a.or(b),
                BitwiseOp::Xor => a.xor(b),
                BitwiseOp::Shl => a.shl(const_shift(b)),
                BitwiseOp::Shr => a.shr(const_shift(b)),
            };
            return self.pool.constant(folded);
        }
        match op {
            BitwiseOp::And => {
                if lhs == rhs {
                    return lhs;
                }
                if self.is_const_zero(lhs) || self.is_const_zero(rhs) {
                    return self.pool.constant(Bits::zero(width));
                }
                if self.is_const_ones(lhs) {
                    return rhs;
                }
                if self.is_const_ones(rhs) {
                    return lhs;
                }
            }
            BitwiseOp::Or => {
                if lhs == rhs {
                    return lhs;
                }
                if self.is_const_ones(lhs) || self.is_const_ones(rhs) {
                    return self.pool.constant(Bits::ones(width));
                }
                if self.is_const_zero(lhs) {
                    return rhs;
                }
                if self.is_const_zero(rhs) {
                    return lhs;
                }
            }
            BitwiseOp::Xor => {
                if lhs == rhs {
                    return self.pool.constant(Bits::zero(width));
                }
                if self.is_const_zero(lhs) {
                    return rhs;
                }
                if self.is_const_zero(rhs) {
                    return lhs;
                }
            }
            BitwiseOp::Shl | BitwiseOp::Shr => {
                if let Some(amount) = self.constant(rhs) {
                    if amount.is_zero() {
                        return lhs;
                    }
                    if const_shift(amount) >= width {
                        return self.pool.constant(Bits::zero(width));
                    }
                }
            }
        }
        self.pool.bitwise(op, lhs, rhs)
    }

    fn mk_eq(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        if lhs == rhs {
            return self.pool.tru();
        }
        if let (Some(a), Some(b)) = (self.constant(lhs), self.constant(rhs)) {
            return if a == b { self.pool.tru() } else { self.pool.fals() };
        }
        self.pool.eq(lhs, rhs)
    }

    fn mk_ite(&mut self, cond: TermId, then: TermId, other: TermId) -> TermId {
        match self.pool.term(cond) {
            Term::True => return then,
            Term::False => return other,
            _ => {}
        }
        if then == other {
            return then;
        }
        self.pool.ite(cond, then, other)
    }

    fn mk_bnot(&mut self, arg: TermId) -> TermId {
        match self.pool.term(arg) {
            Term::True => self.pool.fals(),
            Term::False => self.pool.tru(),
            Term::BoolNot(inner) => *inner,
            _ => self.pool.bnot(arg),
        }
    }

    fn mk_band(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        if lhs == rhs {
            return lhs;
        }
        match (self.pool.term(lhs), self.pool.term(rhs)) {
            (Term::False, _) | (_, Term::False) => self.pool.fals(),
            (Term::True, _) => rhs,
            (_, Term::True) => lhs,
            _ => self.pool.band(lhs, rhs),
        }
    }

    fn mk_bor(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        if lhs == rhs {
            return lhs;
        }
        match (self.pool.term(lhs), self.pool.term(rhs)) {
            (Term::True, _) | (_, Term::True) => self.pool.tru(),
            (Term::False, _) => rhs,
            (_, Term::False) => lhs,
            _ => self.pool.bor(lhs, rhs),
        }
    }

    fn is_const_zero(&self, id: TermId) -> bool {
        self.constant(id).is_some_and(Bits::is_zero)
    }

    fn is_const_ones(&self, id: TermId) -> bool {
        self.constant(id)
            .is_some_and(|bits| *bits == Bits::ones(bits.width()))
    }
}

fn const_shift(amount: &Bits) -> u32 {
    match amount.to_u64() {
        Some(value) if value <= u32::MAX as u64 => value as u32,
        _ => u32::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{eval, Env, Value};
    use quickcheck_macros::quickcheck;

    #[test]
    fn constant_folding_reaches_fixpoints() {
        let mut pool = TermPool::new();
        let a = pool.constant_u64(4, 0b1100);
        let b = pool.constant_u64(4, 0b1010);
        let and = pool.and(a, b);
        let or = pool.or(and, b);
        assert_eq!(simplify(&mut pool, or), pool.constant_u64(4, 0b1010));
    }

    #[test]
    fn extract_of_concat_cancels_when_aligned() {
        let mut pool = TermPool::new();
        let a = pool.var("a", 4);
        let b = pool.var("b", 6);
        let cat = pool.concat(a, b);
        let high = pool.extract(cat, 9, 6);
        let low = pool.extract(cat, 5, 0);
        assert_eq!(simplify(&mut pool, high), a);
        assert_eq!(simplify(&mut pool, low), b);
        let straddle = pool.extract(cat, 7, 4);
        assert_eq!(simplify(&mut pool, straddle), straddle);
    }

    #[test]
    fn adjacent_extracts_fuse() {
        let mut pool = TermPool::new();
        let a = pool.var("a", 8);
        let high = pool.extract(a, 7, 4);
        let low = pool.extract(a, 3, 0);
        let cat = pool.concat(high, low);
        assert_eq!(simplify(&mut pool, cat), a);
    }

    #[test]
    fn extract_of_extract_composes() {
        let mut pool = TermPool::new();
        let a = pool.var("a", 12);
        let outer = pool.extract(a, 9, 2);
        let inner = pool.extract(outer, 5, 1);
        let expected = pool.extract(a, 7, 3);
        assert_eq!(simplify(&mut pool, inner), expected);
    }

    #[test]
    fn boolean_units_and_dominators() {
        let mut pool = TermPool::new();
        let a = pool.var("a", 1);
        let one = pool.constant_u64(1, 1);
        let guard = pool.eq(a, one);
        let t = pool.tru();
        let f = pool.fals();
        let and_t = pool.band(t, guard);
        let and_f = pool.band(guard, f);
        let or_f = pool.bor(f, guard);
        assert_eq!(simplify(&mut pool, and_t), guard);
        assert_eq!(simplify(&mut pool, and_f), pool.fals());
        assert_eq!(simplify(&mut pool, or_f), guard);
        let nn = pool.bnot(guard);
        let nn = pool.bnot(nn);
        assert_eq!(simplify(&mut pool, nn), guard);
    }

    #[test]
    fn eq_on_identical_terms_is_true() {
        let mut pool = TermPool::new();
        let a = pool.var("a", 4);
        let b = pool.var("b", 4);
        let x = pool.xor(a, b);
        let y = pool.xor(a, b);
        let eq = pool.eq(x, y);
        assert_eq!(simplify(&mut pool, eq), pool.tru());
    }

    #[test]
    fn ite_short_circuits_on_constant_conditions() {
        let mut pool = TermPool::new();
        let a = pool.var("a", 4);
        let b = pool.var("b", 4);
        let t = pool.tru();
        let hit = pool.ite(t, a, b);
        assert_eq!(simplify(&mut pool, hit), a);
        let same = pool.eq(a, b);
        let collapse = pool.ite(same, b, b);
        assert_eq!(simplify(&mut pool, collapse), b);
    }

    fn template(pool: &mut TermPool) -> TermId {
        let a = pool.var("a", 8);
        let b = pool.var("b", 8);
        let cat = pool.concat(a, b);
        let high = pool.extract(cat, 15, 8);
        let mixed = pool.xor(high, b);
        let masked = pool.and(mixed, a);
        let same = pool.eq(masked, a);
        let low = pool.extract(cat, 7, 0);
        pool.ite(same, low, mixed)
    }

    fn template_env(a: u8, b: u8) -> Env {
        [
            ("a".to_string(), Value::Bits(Bits::from_u64(8, a as u64))),
            ("b".to_string(), Value::Bits(Bits::from_u64(8, b as u64))),
        ]
        .into_iter()
        .collect()
    }

    #[quickcheck]
    fn simplify_preserves_evaluation(a: u8, b: u8) -> bool {
        let mut pool = TermPool::new();
        let term = template(&mut pool);
        let simplified = simplify(&mut pool, term);
        let env = template_env(a, b);
        eval(&pool, &env, term) == eval(&pool, &env, simplified)
    }

    #[quickcheck]
    fn simplify_is_idempotent(a: u8, b: u8) -> bool {
        let mut pool = TermPool::new();
        let term = template(&mut pool);
        let constant = pool.constant_u64(8, a.min(b) as u64);
        let grounded = pool.eq(term, constant);
        let once = simplify(&mut pool, grounded);
        simplify(&mut pool, once) == once
    }
}
