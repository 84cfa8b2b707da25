//! Parser model

use octopus_expr::Bits;

use crate::Expr;

/// Index of a state within its parser.
pub type StateId = usize;

/// A declared register (header fields included) of fixed width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub name: String,
    pub width: u32,
}

/// A register slice written by an assignment; bounds are inclusive with
/// bit `0` least significant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    pub register: String,
    pub hi: u32,
    pub lo: u32,
}

impl Slice {
    pub fn width(&self) -> u32 {
        self.hi - self.lo + 1
    }
}

/// One statement of a state's block, executed in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Consume `width(register)` input bits into the register.
    Extract { register: String },
    /// Overwrite a register slice with the value of an expression.
    Assign { lhs: Slice, rhs: Expr },
}

/// One component of a select pattern row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternField {
    Exact(Bits),
    Wildcard,
}

/// Where a select arm goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    State(StateId),
    Accept,
    Reject,
}

/// A select arm: a pattern row matched against the scrutinee tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arm {
    pub pattern: Vec<PatternField>,
    pub target: Target,
}

/// Terminal transition of a state.
///
/// Loading canonicalises implicit defaults, so a `Select` always carries
/// an explicit default target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Accept,
    Reject,
    Select {
        scrutinees: Vec<Expr>,
        arms: Vec<Arm>,
        default: Target,
    },
}

/// One parser state: an ordered statement block plus its transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    name: String,
    statements: Vec<Statement>,
    transition: Transition,
}

impl State {
    pub(crate) fn new(name: String, statements: Vec<Statement>, transition: Transition) -> Self {
        Self {
            name,
            statements,
            transition,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn transition(&self) -> &Transition {
        &self.transition
    }
}

/// A validated parser: registers, states, and the start state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parser {
    registers: Vec<Register>,
    states: Vec<State>,
    start: StateId,
}

impl Parser {
    pub(crate) fn new(registers: Vec<Register>, states: Vec<State>, start: StateId) -> Self {
        Self {
            registers,
            states,
            start,
        }
    }

    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    /// Declared width of a register.
    pub fn register_width(&self, name: &str) -> Option<u32> {
        self.registers
            .iter()
            .find(|register| register.name == name)
            .map(|register| register.width)
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn state(&self, id: StateId) -> &State {
        &self.states[id]
    }

    pub fn start(&self) -> StateId {
        self.start
    }

    /// Number of input bits a state's block consumes: the sum of its
    /// extract widths. This is the static per-side leap distance.
    pub fn appetite(&self, id: StateId) -> u32 {
        self.states[id]
            .statements
            .iter()
            .map(|statement| match statement {
                Statement::Extract { register } => self
                    .register_width(register)
                    .expect("validated extract register"),
                Statement::Assign { .. } => 0,
            })
            .sum()
    }

    /// Static successor arms of a state in priority order.
    ///
    /// Each entry is a pattern row and its target; `None` is the default
    /// arm, which matches exactly when no earlier row does. Terminal
    /// states have no successors.
    pub fn successors(&self, id: StateId) -> Vec<(Option<&[PatternField]>, Target)> {
        match &self.states[id].transition {
            Transition::Accept | Transition::Reject => Vec::new(),
            Transition::Select { arms, default, .. } => arms
                .iter()
                .map(|arm| (Some(arm.pattern.as_slice()), arm.target))
                .chain(std::iter::once((None, *default)))
                .collect(),
        }
    }
}
