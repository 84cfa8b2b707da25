//! Symbolic configurations

use std::collections::BTreeMap;

use octopus_expr::{TermId, TermPool};
use octopus_ir::{Parser, StateId, Target};

/// Symbolic register file: register name to current term.
pub type RegFile = BTreeMap<String, TermId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Terminal verdict of one side.
pub enum Verdict {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Control position of one side: a live state or a committed verdict.
pub enum Control {
    At(StateId),
    Accept,
    Reject,
}

impl Control {
    /// The committed verdict, if any.
    pub const fn verdict(&self) -> Option<Verdict> {
        match self {
            Control::Accept => Some(Verdict::Accept),
            Control::Reject => Some(Verdict::Reject),
            Control::At(_) => None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        self.verdict().is_some()
    }

    /// Human-readable tag, using the parser's state names.
    pub fn tag(&self, parser: &Parser) -> String {
        match self {
            Control::At(id) => parser.state(*id).name().to_string(),
            Control::Accept => "accept".into(),
            Control::Reject => "reject".into(),
        }
    }
}

impl From<Target> for Control {
    fn from(target: Target) -> Self {
        match target {
            Target::State(id) => Control::At(id),
            Target::Accept => Control::Accept,
            Target::Reject => Control::Reject,
        }
    }
}

/// One side of the bisimulation: control state, path condition, register
/// file, and the input bits consumed but not yet executed.
///
/// Configurations are immutable once built; stepping produces fresh ones.
#[derive(Debug, Clone)]
pub struct Cfg {
    pub control: Control,
    /// Conjunction of the select guards taken to reach this point.
    pub path_cond: TermId,
    pub regs: RegFile,
    /// Bits consumed since entering the current state, oldest first.
    /// Always shorter than the state's appetite.
    pub pending: Vec<TermId>,
    /// Total input bits consumed from the shared buffer.
    pub offset: usize,
}

impl Cfg {
    /// The configuration before any input: start state, empty path
    /// condition, every register holding its opaque initial value.
    ///
    /// The initial value is one opaque variable per register name and
    /// width, shared by both sides, so a register neither side ever
    /// writes compares equal. The width is part of the variable name
    /// because the sides may declare the same name at different widths.
    pub fn initial(pool: &mut TermPool, parser: &Parser) -> Cfg {
        let regs = parser
            .registers()
            .iter()
            .map(|register| {
                let init = pool.var(Self::init_name(&register.name, register.width), register.width);
                (register.name.clone(), init)
            })
            .collect();
        Cfg {
            control: Control::At(parser.start()),
            path_cond: pool.tru(),
            regs,
            pending: Vec::new(),
            offset: 0,
        }
    }

    /// Name of the opaque initial-value variable of a register.
    pub fn init_name(register: &str, width: u32) -> String {
        format!("init_{register}_{width}")
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.control.verdict()
    }

    /// Input bits this side still wants before its next branch; `None`
    /// once terminal.
    pub fn remaining(&self, parser: &Parser) -> Option<usize> {
        match self.control {
            Control::At(id) => {
                Some(parser.appetite(id) as usize - self.pending.len())
            }
            Control::Accept | Control::Reject => None,
        }
    }
}

/// The pair configuration the engine explores: both sides plus the joint
/// breadth-first depth. Both sides always share the same offset — the
/// packet is one packet, consumed in lock-step.
#[derive(Debug, Clone)]
pub struct PairCfg {
    pub left: Cfg,
    pub right: Cfg,
    pub depth: usize,
}

impl PairCfg {
    pub fn new(left: Cfg, right: Cfg, depth: usize) -> Self {
        debug_assert_eq!(left.offset, right.offset, "sides consumed different prefixes");
        Self { left, right, depth }
    }

    /// Bits consumed by both sides.
    pub fn offset(&self) -> usize {
        self.left.offset
    }

    /// Conjunction of both sides' path conditions.
    pub fn joint_path_cond(&self, pool: &mut TermPool) -> TermId {
        pool.band(self.left.path_cond, self.right.path_cond)
    }
}
