//! Checker outcomes: certificates and counterexamples

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Result of an equivalence check.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Equivalent { certificate: Certificate },
    NotEquivalent { counterexample: Counterexample },
}

impl Outcome {
    pub fn is_equivalent(&self) -> bool {
        matches!(self, Outcome::Equivalent { .. })
    }
}

/// The discovered bisimulation as a finite list of observable classes.
///
/// A consumer re-verifies the certificate by discharging, for every
/// class and transition, the coverage implication against the listed
/// reach conditions — no re-exploration needed.
#[derive(Debug, Clone, Serialize)]
pub struct Certificate {
    pub classes: Vec<CertClass>,
}

/// One observable equivalence class of the relation.
#[derive(Debug, Clone, Serialize)]
pub struct CertClass {
    pub left_state: String,
    pub right_state: String,
    /// Input bits each side had consumed into its current block.
    pub pending: [usize; 2],
    /// Registers assumed (and proven) equal across the sides.
    pub equal_registers: Vec<String>,
    /// SMT-LIB2 script asserting the accumulated joint path condition
    /// under which the class is reached.
    pub reach_condition: String,
}

/// A witness separating the two parsers.
#[derive(Debug, Clone, Serialize)]
pub struct Counterexample {
    /// The witness packet, first-arrived bit first.
    pub packet: String,
    pub length: usize,
    pub left: SideReport,
    pub right: SideReport,
}

impl Counterexample {
    pub fn new(packet: Vec<bool>, left: SideReport, right: SideReport) -> Self {
        Self {
            length: packet.len(),
            packet: packet.iter().map(|bit| if *bit { '1' } else { '0' }).collect(),
            left,
            right,
        }
    }

    /// The witness bits in arrival order.
    pub fn bits(&self) -> Vec<bool> {
        self.packet.chars().map(|c| c == '1').collect()
    }
}

/// Where one side ended up on the witness packet.
#[derive(Debug, Clone, Serialize)]
pub struct SideReport {
    /// `accept`, `reject`, or `running` when the side had not committed.
    pub verdict: String,
    pub state: String,
    pub registers: BTreeMap<String, String>,
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "bisimulation with {} classes:", self.classes.len())?;
        for class in &self.classes {
            writeln!(
                f,
                "  ({}, {}) pending {}/{} bits, equal registers: [{}]",
                class.left_state,
                class.right_state,
                class.pending[0],
                class.pending[1],
                class.equal_registers.join(", ")
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "witness packet ({} bits): {}", self.length, self.packet)?;
        for (label, side) in [("left", &self.left), ("right", &self.right)] {
            writeln!(f, "  {label}: {} at {}", side.verdict, side.state)?;
            for (name, value) in &side.registers {
                writeln!(f, "    {name} = {value}")?;
            }
        }
        Ok(())
    }
}
