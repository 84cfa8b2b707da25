//! Closed validation predicate over loaded IR
//!
//! Runs after lowering and before any engine work, so a parser that
//! loads is fully inside the covered subset: assignments are width
//! consistent, every register read is preceded by a write on every path,
//! and no cycle of states consumes zero input.

use std::collections::{HashMap, HashSet};

use crate::{IrError, Parser, StateId, Statement, Target, Transition};

pub(crate) fn validate(parser: &Parser) -> Result<(), IrError> {
    let widths: HashMap<String, u32> = parser
        .registers()
        .iter()
        .map(|register| (register.name.clone(), register.width))
        .collect();
    check_assignment_widths(parser, &widths)?;
    check_reads_follow_writes(parser, &widths)?;
    check_no_silent_cycles(parser)?;
    Ok(())
}

fn check_assignment_widths(parser: &Parser, widths: &HashMap<String, u32>) -> Result<(), IrError> {
    for state in parser.states() {
        for statement in state.statements() {
            if let Statement::Assign { lhs, rhs } = statement {
                let rhs_width = rhs.width(widths)?;
                if rhs_width != lhs.width() {
                    return Err(IrError::Semantic(format!(
                        "assignment to {}[{}:{}] of width {} from expression of width {rhs_width} in state {}",
                        lhs.register,
                        lhs.hi,
                        lhs.lo,
                        lhs.width(),
                        state.name()
                    )));
                }
            }
        }
        if let Transition::Select { scrutinees, .. } = state.transition() {
            for scrutinee in scrutinees {
                scrutinee.width(widths)?;
            }
        }
    }
    Ok(())
}

/// Forward must-analysis: the registers certainly written on every path
/// into each state, then a sequential check of each block against it.
fn check_reads_follow_writes(parser: &Parser, widths: &HashMap<String, u32>) -> Result<(), IrError> {
    let mut defined_in: HashMap<StateId, HashSet<String>> = HashMap::new();
    defined_in.insert(parser.start(), HashSet::new());
    let mut worklist = vec![parser.start()];
    while let Some(id) = worklist.pop() {
        let mut defined = defined_in[&id].clone();
        for statement in parser.state(id).statements() {
            match statement {
                Statement::Extract { register } => {
                    defined.insert(register.clone());
                }
                Statement::Assign { lhs, .. } => {
                    defined.insert(lhs.register.clone());
                }
            }
        }
        for (_, target) in parser.successors(id) {
            if let Target::State(next) = target {
                let changed = match defined_in.get_mut(&next) {
                    None => {
                        defined_in.insert(next, defined.clone());
                        true
                    }
                    Some(at_next) => {
                        let narrowed: HashSet<String> =
                            at_next.intersection(&defined).cloned().collect();
                        let changed = narrowed.len() != at_next.len();
                        *at_next = narrowed;
                        changed
                    }
                };
                if changed {
                    worklist.push(next);
                }
            }
        }
    }
    for (id, entry) in &defined_in {
        let state = parser.state(*id);
        let mut defined = entry.clone();
        let mut check = |reads: &[String], defined: &HashSet<String>| -> Result<(), IrError> {
            for register in reads {
                if !defined.contains(register) {
                    return Err(IrError::Semantic(format!(
                        "register {register} may be read before written in state {}",
                        state.name()
                    )));
                }
            }
            Ok(())
        };
        for statement in state.statements() {
            match statement {
                Statement::Extract { register } => {
                    defined.insert(register.clone());
                }
                Statement::Assign { lhs, rhs } => {
                    let mut reads = Vec::new();
                    rhs.reads(&mut reads);
                    // A partial slice keeps the register's other bits, so
                    // it reads the old value as well.
                    if lhs.width() != widths[&lhs.register] {
                        reads.push(lhs.register.clone());
                    }
                    check(&reads, &defined)?;
                    defined.insert(lhs.register.clone());
                }
            }
        }
        if let Transition::Select { scrutinees, .. } = state.transition() {
            let mut reads = Vec::new();
            for scrutinee in scrutinees {
                scrutinee.reads(&mut reads);
            }
            check(&reads, &defined)?;
        }
    }
    Ok(())
}

/// Reject cycles of states whose blocks consume no input: the engine
/// resolves such states without reading bits, so a cycle would never
/// make progress.
fn check_no_silent_cycles(parser: &Parser) -> Result<(), IrError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        parser: &Parser,
        id: StateId,
        marks: &mut HashMap<StateId, Mark>,
    ) -> Result<(), IrError> {
        match marks.get(&id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(IrError::Unsupported(format!(
                    "cycle of states consuming no input through {}",
                    parser.state(id).name()
                )))
            }
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        for (_, target) in parser.successors(id) {
            if let Target::State(next) = target {
                if parser.appetite(next) == 0 {
                    visit(parser, next, marks)?;
                }
            }
        }
        marks.insert(id, Mark::Done);
        Ok(())
    }

    let mut marks: HashMap<StateId, Mark> = HashMap::new();
    for id in 0..parser.states().len() {
        if parser.appetite(id) == 0 {
            visit(parser, id, &mut marks)?;
        }
    }
    Ok(())
}
