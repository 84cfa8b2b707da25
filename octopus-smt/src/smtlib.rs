//! SMT-LIB2 rendering of term DAGs
//!
//! Every compound node of a formula's cone is bound to a `define-fun`
//! named after its pool handle, so shared subterms are written once and
//! deeply shared path conditions never explode into trees. Constants and
//! variables are referenced inline.

use std::collections::HashSet;
use std::fmt::Write;

use octopus_expr::{Bits, BitwiseOp, Sort, Term, TermId, TermPool};

/// The SMT-LIB sort of a term sort.
pub fn sort_smt(sort: Sort) -> String {
    match sort {
        Sort::Bits(width) => format!("(_ BitVec {width})"),
        Sort::Bool => "Bool".into(),
    }
}

/// A bit-vector literal, most-significant bit first.
pub fn bits_literal(bits: &Bits) -> String {
    let mut out = String::with_capacity(bits.width() as usize + 2);
    out.push_str("#b");
    for bit in bits.to_bools_msb() {
        out.push(if bit { '1' } else { '0' });
    }
    out
}

/// A (quoted if necessary) SMT-LIB symbol for a variable name.
pub fn symbol(name: &str) -> String {
    let simple = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '~' | '!' | '$'));
    if simple {
        name.to_string()
    } else {
        format!("|{}|", name.replace('|', "_"))
    }
}

/// Inline reference to a term: a literal, a variable symbol, or the name
/// of its `define-fun` binding.
pub fn term_ref(pool: &TermPool, id: TermId) -> String {
    match pool.term(id) {
        Term::Const(bits) => bits_literal(bits),
        Term::True => "true".into(),
        Term::False => "false".into(),
        Term::Var { name, .. } => symbol(name),
        _ => format!("t{}", id.index()),
    }
}

/// Append declarations and definitions for every node in the cone of
/// `root` that is not yet in `defined`, in dependency order. `defined`
/// is extended with the newly emitted nodes, which are also returned so
/// callers can unwind them when an assertion frame is popped.
pub fn define_cone(
    pool: &TermPool,
    root: TermId,
    defined: &mut HashSet<TermId>,
    out: &mut String,
) -> Vec<TermId> {
    // Iterative post-order: path conditions grow linearly in the packet
    // length and would overflow the stack recursively.
    let mut fresh = Vec::new();
    let mut stack = vec![(root, false)];
    while let Some((id, expanded)) = stack.pop() {
        if defined.contains(&id) {
            continue;
        }
        if expanded {
            defined.insert(id);
            fresh.push(id);
            emit(pool, id, out);
            continue;
        }
        stack.push((id, true));
        for child in children(pool.term(id)) {
            stack.push((child, false));
        }
    }
    fresh
}

fn children(term: &Term) -> Vec<TermId> {
    match term {
        Term::Const(_) | Term::Var { .. } | Term::True | Term::False => Vec::new(),
        Term::Extract { src, .. } => vec![*src],
        Term::Not(arg) | Term::BoolNot(arg) => vec![*arg],
        Term::Concat(lhs, rhs)
        | Term::Bitwise { lhs, rhs, .. }
        | Term::Eq(lhs, rhs)
        | Term::BoolAnd(lhs, rhs)
        | Term::BoolOr(lhs, rhs) => vec![*lhs, *rhs],
        Term::Ite { cond, then, other } => vec![*cond, *then, *other],
    }
}

fn emit(pool: &TermPool, id: TermId, out: &mut String) {
    let body = match pool.term(id) {
        // Inlined at reference sites.
        Term::Const(_) | Term::True | Term::False => return,
        Term::Var { name, width } => {
            let _ = writeln!(
                out,
                "(declare-const {} (_ BitVec {width}))",
                symbol(name)
            );
            return;
        }
        Term::Concat(lhs, rhs) => {
            format!("(concat {} {})", term_ref(pool, *lhs), term_ref(pool, *rhs))
        }
        Term::Extract { src, hi, lo } => {
            format!("((_ extract {hi} {lo}) {})", term_ref(pool, *src))
        }
        Term::Not(arg) => format!("(bvnot {})", term_ref(pool, *arg)),
        Term::Bitwise { op, lhs, rhs } => {
            let op = match op {
                BitwiseOp::And => "bvand",
                BitwiseOp::Or => "bvor",
                BitwiseOp::Xor => "bvxor",
                BitwiseOp::Shl => "bvshl",
                BitwiseOp::Shr => "bvlshr",
            };
            format!("({op} {} {})", term_ref(pool, *lhs), term_ref(pool, *rhs))
        }
        Term::Eq(lhs, rhs) => format!("(= {} {})", term_ref(pool, *lhs), term_ref(pool, *rhs)),
        Term::Ite { cond, then, other } => format!(
            "(ite {} {} {})",
            term_ref(pool, *cond),
            term_ref(pool, *then),
            term_ref(pool, *other)
        ),
        Term::BoolNot(arg) => format!("(not {})", term_ref(pool, *arg)),
        Term::BoolAnd(lhs, rhs) => {
            format!("(and {} {})", term_ref(pool, *lhs), term_ref(pool, *rhs))
        }
        Term::BoolOr(lhs, rhs) => {
            format!("(or {} {})", term_ref(pool, *lhs), term_ref(pool, *rhs))
        }
    };
    let _ = writeln!(
        out,
        "(define-fun t{} () {} {body})",
        id.index(),
        sort_smt(pool.sort(id))
    );
}

/// A self-contained script asserting `root`, suitable for re-checking a
/// certificate obligation outside the engine.
pub fn standalone_script(pool: &TermPool, root: TermId) -> String {
    let mut out = String::new();
    let mut defined = HashSet::new();
    define_cone(pool, root, &mut defined, &mut out);
    let _ = writeln!(out, "(assert {})", term_ref(pool, root));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_and_symbols() {
        assert_eq!(bits_literal(&Bits::from_u64(4, 0b1010)), "#b1010");
        assert_eq!(symbol("in_0"), "in_0");
        assert_eq!(symbol("hdr.tag"), "hdr.tag");
        assert_eq!(symbol("0weird"), "|0weird|");
        assert_eq!(symbol("a b"), "|a b|");
    }

    #[test]
    fn shared_nodes_are_defined_once() {
        let mut pool = TermPool::new();
        let a = pool.var("a", 4);
        let b = pool.var("b", 4);
        let x = pool.xor(a, b);
        let both = pool.eq(x, x);
        let script = standalone_script(&pool, both);
        assert_eq!(script.matches("(declare-const a (_ BitVec 4))").count(), 1);
        assert_eq!(script.matches("(bvxor a b)").count(), 1);
        assert!(script.ends_with(&format!("(assert t{})\n", both.index())));
    }

    #[test]
    fn definitions_come_before_uses() {
        let mut pool = TermPool::new();
        let a = pool.var("a", 8);
        let hi = pool.extract(a, 7, 4);
        let lo = pool.extract(a, 3, 0);
        let eq = pool.eq(hi, lo);
        let script = standalone_script(&pool, eq);
        let hi_def = script.find(&format!("(define-fun t{}", hi.index())).unwrap();
        let eq_def = script.find(&format!("(define-fun t{}", eq.index())).unwrap();
        assert!(hi_def < eq_def);
        let decl = script.find("(declare-const a").unwrap();
        assert!(decl < hi_def);
    }

    #[test]
    fn incremental_cones_skip_defined_nodes() {
        let mut pool = TermPool::new();
        let a = pool.var("a", 4);
        let b = pool.var("b", 4);
        let first = pool.eq(a, b);
        let not = pool.bnot(first);
        let mut defined = HashSet::new();
        let mut out = String::new();
        define_cone(&pool, first, &mut defined, &mut out);
        let mut second = String::new();
        define_cone(&pool, not, &mut defined, &mut second);
        assert!(!second.contains("declare-const"));
        assert!(second.contains(&format!("(not t{})", first.index())));
    }
}
