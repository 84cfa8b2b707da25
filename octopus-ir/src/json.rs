//! IR JSON loading and canonicalisation
//!
//! The accepted schema is a top-level object with `registers`, `states`
//! and an optional `start` (defaulting to the first state); a bare
//! top-level array is treated as the `states` list, with extract
//! statements carrying their own `width` to declare registers implicitly.
//! Unknown keys are ignored; unknown `kind` values are how out-of-subset
//! features present themselves and are rejected as unsupported.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value as Json;

use octopus_expr::{Bits, BitwiseOp};

use crate::validate::validate;
use crate::{Arm, Expr, IrError, Parser, PatternField, Register, Slice, State, Statement, Target, Transition};

#[derive(Debug, Deserialize)]
struct RawParser {
    #[serde(default)]
    registers: Vec<RawRegister>,
    states: Vec<RawState>,
    #[serde(default)]
    start: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRegister {
    name: String,
    width: u32,
}

#[derive(Debug, Deserialize)]
struct RawState {
    name: String,
    #[serde(default)]
    statements: Vec<RawStatement>,
    /// Either the bare string `accept`/`reject` or a select object.
    #[serde(default)]
    transition: Option<Json>,
}

#[derive(Debug, Deserialize)]
struct RawStatement {
    kind: String,
    #[serde(default)]
    register: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    size: Option<Json>,
    #[serde(default)]
    lhs: Option<RawSlice>,
    #[serde(default)]
    rhs: Option<RawExpr>,
}

#[derive(Debug, Deserialize)]
struct RawSlice {
    register: String,
    #[serde(default)]
    hi: Option<u32>,
    #[serde(default)]
    lo: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawTransition {
    kind: String,
    #[serde(default)]
    scrutinees: Vec<RawExpr>,
    #[serde(default)]
    cases: Vec<RawCase>,
    #[serde(default)]
    default: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCase {
    pattern: Json,
    target: String,
}

#[derive(Debug, Deserialize)]
struct RawExpr {
    kind: String,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    value: Option<Json>,
    #[serde(default)]
    register: Option<String>,
    #[serde(default)]
    expr: Option<Box<RawExpr>>,
    #[serde(default)]
    arg: Option<Box<RawExpr>>,
    #[serde(default)]
    lhs: Option<Box<RawExpr>>,
    #[serde(default)]
    rhs: Option<Box<RawExpr>>,
    #[serde(default)]
    hi: Option<u32>,
    #[serde(default)]
    lo: Option<u32>,
}

impl Parser {
    /// Load, canonicalise and validate IR from JSON text.
    pub fn from_json_str(text: &str) -> Result<Parser, IrError> {
        let value: Json =
            serde_json::from_str(text).map_err(|e| IrError::Schema(format!("invalid JSON: {e}")))?;
        Self::from_json_value(value)
    }

    /// Load, canonicalise and validate IR from a JSON value.
    pub fn from_json_value(value: Json) -> Result<Parser, IrError> {
        let value = match value {
            Json::Array(states) => serde_json::json!({ "states": states }),
            other => other,
        };
        let raw: RawParser = serde_json::from_value(value)
            .map_err(|e| IrError::Schema(format!("invalid IR: {e}")))?;
        let parser = Lowerer::default().lower(raw)?;
        validate(&parser)?;
        Ok(parser)
    }
}

#[derive(Default)]
struct Lowerer {
    registers: Vec<Register>,
    widths: HashMap<String, u32>,
    state_ids: HashMap<String, usize>,
}

impl Lowerer {
    fn lower(mut self, raw: RawParser) -> Result<Parser, IrError> {
        if raw.states.is_empty() {
            return Err(IrError::Schema("parser has no states".into()));
        }
        for register in raw.registers {
            self.declare(register.name, register.width)?;
        }
        for (id, state) in raw.states.iter().enumerate() {
            if matches!(state.name.as_str(), "accept" | "reject") {
                return Err(IrError::Schema(format!(
                    "state name {} shadows a terminal verdict",
                    state.name
                )));
            }
            if self.state_ids.insert(state.name.clone(), id).is_some() {
                return Err(IrError::Schema(format!("duplicate state {}", state.name)));
            }
        }
        let start = match &raw.start {
            Some(name) => *self
                .state_ids
                .get(name)
                .ok_or_else(|| IrError::Schema(format!("unknown start state {name}")))?,
            None => 0,
        };
        // Two passes: extracts may declare registers implicitly, and a
        // scrutinee may read a register extracted by a later state.
        for state in &raw.states {
            for statement in &state.statements {
                if statement.kind == "extract" {
                    self.declare_extract(statement)?;
                }
            }
        }
        let states = raw
            .states
            .into_iter()
            .map(|state| self.lower_state(state))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Parser::new(self.registers, states, start))
    }

    fn declare(&mut self, name: String, width: u32) -> Result<(), IrError> {
        if width == 0 {
            return Err(IrError::Semantic(format!("register {name} has width 0")));
        }
        if self.widths.insert(name.clone(), width).is_some() {
            return Err(IrError::Schema(format!("duplicate register {name}")));
        }
        self.registers.push(Register { name, width });
        Ok(())
    }

    fn declare_extract(&mut self, statement: &RawStatement) -> Result<(), IrError> {
        let register = statement
            .register
            .as_ref()
            .ok_or_else(|| IrError::Schema("extract without a register".into()))?;
        match (self.widths.get(register), statement.width) {
            (None, Some(width)) => self.declare(register.clone(), width),
            (None, None) => Err(IrError::Semantic(format!(
                "extract of undeclared register {register}"
            ))),
            (Some(declared), Some(width)) if *declared != width => Err(IrError::Semantic(format!(
                "extract width {width} disagrees with register {register} of width {declared}"
            ))),
            _ => Ok(()),
        }
    }

    fn lower_state(&self, raw: RawState) -> Result<State, IrError> {
        let statements = raw
            .statements
            .into_iter()
            .map(|statement| self.lower_statement(statement))
            .collect::<Result<Vec<_>, _>>()?;
        let transition = match raw.transition {
            None => Transition::Reject,
            Some(Json::String(verdict)) => match verdict.as_str() {
                "accept" => Transition::Accept,
                "reject" => Transition::Reject,
                other => {
                    return Err(IrError::Schema(format!(
                        "transition {other} is neither accept nor reject"
                    )))
                }
            },
            Some(value) => {
                let transition: RawTransition = serde_json::from_value(value)
                    .map_err(|e| IrError::Schema(format!("invalid transition: {e}")))?;
                self.lower_transition(transition)?
            }
        };
        Ok(State::new(raw.name, statements, transition))
    }

    fn lower_statement(&self, raw: RawStatement) -> Result<Statement, IrError> {
        match raw.kind.as_str() {
            "extract" => {
                if raw.size.is_some() {
                    return Err(IrError::Unsupported("variable-width extract".into()));
                }
                let register = raw
                    .register
                    .ok_or_else(|| IrError::Schema("extract without a register".into()))?;
                Ok(Statement::Extract { register })
            }
            "assign" => {
                let lhs = raw
                    .lhs
                    .ok_or_else(|| IrError::Schema("assign without lhs".into()))?;
                let rhs = raw
                    .rhs
                    .ok_or_else(|| IrError::Schema("assign without rhs".into()))?;
                let width = *self.widths.get(&lhs.register).ok_or_else(|| {
                    IrError::Semantic(format!("assignment to undeclared register {}", lhs.register))
                })?;
                let slice = Slice {
                    register: lhs.register,
                    hi: lhs.hi.unwrap_or(width - 1),
                    lo: lhs.lo.unwrap_or(0),
                };
                if slice.lo > slice.hi || slice.hi >= width {
                    return Err(IrError::Semantic(format!(
                        "assignment slice [{}:{}] out of range for register {} of width {width}",
                        slice.hi, slice.lo, slice.register
                    )));
                }
                Ok(Statement::Assign {
                    lhs: slice,
                    rhs: self.lower_expr(rhs)?,
                })
            }
            other => Err(IrError::Unsupported(format!("statement kind {other}"))),
        }
    }

    fn lower_transition(&self, raw: RawTransition) -> Result<Transition, IrError> {
        match raw.kind.as_str() {
            "accept" => Ok(Transition::Accept),
            "reject" => Ok(Transition::Reject),
            "select" => {
                if raw.scrutinees.is_empty() {
                    return Err(IrError::Schema("select without scrutinees".into()));
                }
                let scrutinees = raw
                    .scrutinees
                    .into_iter()
                    .map(|expr| self.lower_expr(expr))
                    .collect::<Result<Vec<_>, _>>()?;
                let widths = scrutinees
                    .iter()
                    .map(|scrutinee| scrutinee.width(&self.widths))
                    .collect::<Result<Vec<_>, _>>()?;
                let arms = raw
                    .cases
                    .into_iter()
                    .map(|case| {
                        Ok(Arm {
                            pattern: self.lower_pattern(case.pattern, &widths)?,
                            target: self.target(&case.target)?,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let default = match raw.default {
                    Some(name) => self.target(&name)?,
                    // Unmatched inputs implicitly reject.
                    None => Target::Reject,
                };
                Ok(Transition::Select {
                    scrutinees,
                    arms,
                    default,
                })
            }
            other => Err(IrError::Unsupported(format!("transition kind {other}"))),
        }
    }

    fn lower_pattern(&self, pattern: Json, widths: &[u32]) -> Result<Vec<PatternField>, IrError> {
        let fields = match pattern {
            Json::Array(fields) => fields,
            single => vec![single],
        };
        if fields.len() != widths.len() {
            return Err(IrError::Schema(format!(
                "pattern arity {} does not match {} scrutinees",
                fields.len(),
                widths.len()
            )));
        }
        fields
            .into_iter()
            .zip(widths)
            .map(|(field, width)| match &field {
                Json::String(text) if text == "_" => Ok(PatternField::Wildcard),
                Json::Object(_) => Err(IrError::Unsupported("masked pattern".into())),
                _ => Ok(PatternField::Exact(parse_bits(*width, &field)?)),
            })
            .collect()
    }

    fn lower_expr(&self, raw: RawExpr) -> Result<Expr, IrError> {
        let require = |field: Option<Box<RawExpr>>, name: &str| {
            field.ok_or_else(|| IrError::Schema(format!("{} expression without {name}", raw.kind)))
        };
        match raw.kind.as_str() {
            "const" => {
                let width = raw
                    .width
                    .ok_or_else(|| IrError::Schema("const expression without width".into()))?;
                let value = raw
                    .value
                    .ok_or_else(|| IrError::Schema("const expression without value".into()))?;
                Ok(Expr::Const(parse_bits(width, &value)?))
            }
            "reg" => {
                let register = raw
                    .register
                    .ok_or_else(|| IrError::Schema("reg expression without register".into()))?;
                Ok(Expr::Reg(register))
            }
            "slice" => {
                let expr = require(raw.expr, "expr")?;
                let hi = raw
                    .hi
                    .ok_or_else(|| IrError::Schema("slice expression without hi".into()))?;
                let lo = raw
                    .lo
                    .ok_or_else(|| IrError::Schema("slice expression without lo".into()))?;
                Ok(Expr::Slice {
                    expr: Box::new(self.lower_expr(*expr)?),
                    hi,
                    lo,
                })
            }
            "concat" => Ok(Expr::Concat(
                Box::new(self.lower_expr(*require(raw.lhs, "lhs")?)?),
                Box::new(self.lower_expr(*require(raw.rhs, "rhs")?)?),
            )),
            "not" => Ok(Expr::Not(Box::new(self.lower_expr(*require(raw.arg, "arg")?)?))),
            op @ ("and" | "or" | "xor" | "shl" | "shr") => {
                let op = match op {
                    "and" => BitwiseOp::And,
                    "or" => BitwiseOp::Or,
                    "xor" => BitwiseOp::Xor,
                    "shl" => BitwiseOp::Shl,
                    _ => BitwiseOp::Shr,
                };
                Ok(Expr::Binary {
                    op,
                    lhs: Box::new(self.lower_expr(*require(raw.lhs, "lhs")?)?),
                    rhs: Box::new(self.lower_expr(*require(raw.rhs, "rhs")?)?),
                })
            }
            other => Err(IrError::Unsupported(format!("expression kind {other}"))),
        }
    }

    fn target(&self, name: &str) -> Result<Target, IrError> {
        match name {
            "accept" => Ok(Target::Accept),
            "reject" => Ok(Target::Reject),
            state => self
                .state_ids
                .get(state)
                .map(|id| Target::State(*id))
                .ok_or_else(|| IrError::Schema(format!("unknown target state {state}"))),
        }
    }
}

fn parse_bits(width: u32, value: &Json) -> Result<Bits, IrError> {
    let parsed = match value {
        Json::Number(number) => number
            .as_u64()
            .and_then(|n| Bits::parse(width, &n.to_string())),
        Json::String(text) => Bits::parse(width, text),
        _ => None,
    };
    parsed.ok_or_else(|| {
        IrError::Schema(format!("literal {value} is not a value of width {width}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Transition;

    #[test]
    fn bare_array_form_declares_registers_from_extract_widths() {
        let parser = Parser::from_json_str(
            r#"[
                {
                    "name": "start",
                    "statements": [{"kind": "extract", "register": "tag", "width": 4}],
                    "transition": {"kind": "accept"}
                }
            ]"#,
        )
        .unwrap();
        assert_eq!(parser.register_width("tag"), Some(4));
        assert_eq!(parser.start(), 0);
    }

    #[test]
    fn missing_transition_canonicalises_to_reject() {
        let parser = Parser::from_json_str(
            r#"{
                "registers": [{"name": "tag", "width": 4}],
                "states": [{"name": "start", "statements": [{"kind": "extract", "register": "tag"}]}]
            }"#,
        )
        .unwrap();
        assert_eq!(*parser.state(0).transition(), Transition::Reject);
    }

    #[test]
    fn transition_accepts_the_bare_string_form() {
        let parser = Parser::from_json_str(
            r#"{
                "registers": [{"name": "tag", "width": 4}],
                "states": [{"name": "start", "statements": [{"kind": "extract", "register": "tag"}], "transition": "accept"}]
            }"#,
        )
        .unwrap();
        assert_eq!(*parser.state(0).transition(), Transition::Accept);
    }

    #[test]
    fn unknown_statement_kind_is_unsupported() {
        let err = Parser::from_json_str(
            r#"{"states": [{"name": "start", "statements": [{"kind": "lookahead"}]}]}"#,
        )
        .unwrap_err();
        assert_eq!(err, IrError::Unsupported("statement kind lookahead".into()));
    }

    #[test]
    fn variable_width_extract_is_unsupported() {
        let err = Parser::from_json_str(
            r#"{
                "registers": [{"name": "tag", "width": 4}],
                "states": [{
                    "name": "start",
                    "statements": [{"kind": "extract", "register": "tag", "size": {"kind": "reg", "register": "tag"}}]
                }]
            }"#,
        )
        .unwrap_err();
        assert_eq!(err, IrError::Unsupported("variable-width extract".into()));
    }

    #[test]
    fn arithmetic_expressions_are_unsupported() {
        let err = Parser::from_json_str(
            r#"{
                "registers": [{"name": "tag", "width": 4}],
                "states": [{
                    "name": "start",
                    "statements": [
                        {"kind": "extract", "register": "tag"},
                        {"kind": "assign", "lhs": {"register": "tag"}, "rhs": {"kind": "add", "lhs": {"kind": "reg", "register": "tag"}, "rhs": {"kind": "reg", "register": "tag"}}}
                    ]
                }]
            }"#,
        )
        .unwrap_err();
        assert_eq!(err, IrError::Unsupported("expression kind add".into()));
    }

    #[test]
    fn unknown_target_is_a_schema_error() {
        let err = Parser::from_json_str(
            r#"{
                "registers": [{"name": "tag", "width": 1}],
                "states": [{
                    "name": "start",
                    "statements": [{"kind": "extract", "register": "tag"}],
                    "transition": {
                        "kind": "select",
                        "scrutinees": [{"kind": "reg", "register": "tag"}],
                        "cases": [{"pattern": 1, "target": "nowhere"}]
                    }
                }]
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, IrError::Schema(_)), "{err}");
    }

    #[test]
    fn oversized_pattern_literal_is_rejected() {
        let err = Parser::from_json_str(
            r#"{
                "registers": [{"name": "tag", "width": 2}],
                "states": [{
                    "name": "start",
                    "statements": [{"kind": "extract", "register": "tag"}],
                    "transition": {
                        "kind": "select",
                        "scrutinees": [{"kind": "reg", "register": "tag"}],
                        "cases": [{"pattern": "0b111", "target": "accept"}]
                    }
                }]
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, IrError::Schema(_)), "{err}");
    }

    #[test]
    fn pattern_arity_must_match_scrutinees() {
        let err = Parser::from_json_str(
            r#"{
                "registers": [{"name": "a", "width": 1}, {"name": "b", "width": 1}],
                "states": [{
                    "name": "start",
                    "statements": [
                        {"kind": "extract", "register": "a"},
                        {"kind": "extract", "register": "b"}
                    ],
                    "transition": {
                        "kind": "select",
                        "scrutinees": [{"kind": "reg", "register": "a"}, {"kind": "reg", "register": "b"}],
                        "cases": [{"pattern": ["_"], "target": "accept"}]
                    }
                }]
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, IrError::Schema(_)), "{err}");
    }

    #[test]
    fn wildcard_and_exact_fields_lower_together() {
        let parser = Parser::from_json_str(
            r#"{
                "registers": [{"name": "a", "width": 2}, {"name": "b", "width": 3}],
                "states": [{
                    "name": "start",
                    "statements": [
                        {"kind": "extract", "register": "a"},
                        {"kind": "extract", "register": "b"}
                    ],
                    "transition": {
                        "kind": "select",
                        "scrutinees": [{"kind": "reg", "register": "a"}, {"kind": "reg", "register": "b"}],
                        "cases": [{"pattern": ["0b10", "_"], "target": "accept"}],
                        "default": "reject"
                    }
                }]
            }"#,
        )
        .unwrap();
        match parser.state(0).transition() {
            Transition::Select { arms, default, .. } => {
                assert_eq!(arms.len(), 1);
                assert_eq!(
                    arms[0].pattern,
                    vec![
                        PatternField::Exact(Bits::from_u64(2, 0b10)),
                        PatternField::Wildcard
                    ]
                );
                assert_eq!(*default, Target::Reject);
            }
            other => panic!("expected select, got {other:?}"),
        }
    }
}
