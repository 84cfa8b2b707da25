//! Solver specifications
//!
//! The CLI syntax is `name[:key=value,...]` with `;` between solvers, e.g.
//! `z3:timeout_ms=5000;cvc5:incremental=false`. Global defaults arrive as
//! a JSON object and are overridden per solver.

use serde_json::Value as Json;

use crate::SmtError;

/// Supported solver families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolverKind {
    Z3,
    Cvc5,
    /// Any other binary speaking SMT-LIB2 on stdin/stdout.
    Other(String),
}

impl SolverKind {
    /// Binary name on the search path.
    pub fn binary(&self) -> &str {
        match self {
            SolverKind::Z3 => "z3",
            SolverKind::Cvc5 => "cvc5",
            SolverKind::Other(name) => name,
        }
    }
}

/// Per-solver options; unset fields fall through to the globals and then
/// to the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolverOptions {
    pub incremental: Option<bool>,
    pub generate_models: Option<bool>,
    pub timeout_ms: Option<u64>,
}

impl SolverOptions {
    /// `self` with unset fields taken from `base`.
    pub fn or(&self, base: &SolverOptions) -> SolverOptions {
        SolverOptions {
            incremental: self.incremental.or(base.incremental),
            generate_models: self.generate_models.or(base.generate_models),
            timeout_ms: self.timeout_ms.or(base.timeout_ms),
        }
    }

    /// Parse a JSON object of option defaults.
    pub fn from_json_str(text: &str) -> Result<SolverOptions, SmtError> {
        let value: Json = serde_json::from_str(text)
            .map_err(|e| SmtError::Spec(format!("invalid global options: {e}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| SmtError::Spec("global options must be a JSON object".into()))?;
        let mut options = SolverOptions::default();
        for (key, value) in object {
            match (key.as_str(), value) {
                ("incremental", Json::Bool(b)) => options.incremental = Some(*b),
                ("generate_models", Json::Bool(b)) => options.generate_models = Some(*b),
                ("timeout_ms", Json::Number(n)) => {
                    options.timeout_ms = Some(n.as_u64().ok_or_else(|| {
                        SmtError::Spec(format!("timeout_ms must be a non-negative integer, got {n}"))
                    })?)
                }
                (key, value) => {
                    return Err(SmtError::Spec(format!(
                        "unrecognised global option {key} = {value}"
                    )))
                }
            }
        }
        Ok(options)
    }
}

/// One solver in the portfolio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverSpec {
    pub kind: SolverKind,
    pub options: SolverOptions,
}

impl SolverSpec {
    /// Parse a single `name[:key=value,...]` entry.
    pub fn parse(text: &str) -> Result<SolverSpec, SmtError> {
        let (name, rest) = match text.split_once(':') {
            Some((name, rest)) => (name, Some(rest)),
            None => (text, None),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(SmtError::Spec("empty solver name".into()));
        }
        let kind = match name {
            "z3" => SolverKind::Z3,
            "cvc5" => SolverKind::Cvc5,
            other => SolverKind::Other(other.to_string()),
        };
        let mut options = SolverOptions::default();
        for pair in rest.into_iter().flat_map(|rest| rest.split(',')) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| SmtError::Spec(format!("expected key=value, got {pair}")))?;
            let parse_bool = || {
                value.parse::<bool>().map_err(|_| {
                    SmtError::Spec(format!("option {key} expects true or false, got {value}"))
                })
            };
            match key.trim() {
                "incremental" => options.incremental = Some(parse_bool()?),
                "generate_models" => options.generate_models = Some(parse_bool()?),
                "timeout_ms" => {
                    options.timeout_ms = Some(value.parse::<u64>().map_err(|_| {
                        SmtError::Spec(format!("option timeout_ms expects milliseconds, got {value}"))
                    })?)
                }
                other => return Err(SmtError::Spec(format!("unrecognised option {other}"))),
            }
        }
        Ok(SolverSpec { kind, options })
    }

    /// Parse a `;`-separated portfolio list.
    pub fn parse_list(text: &str) -> Result<Vec<SolverSpec>, SmtError> {
        let specs = text
            .split(';')
            .filter(|entry| !entry.trim().is_empty())
            .map(SolverSpec::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if specs.is_empty() {
            return Err(SmtError::Spec("empty solver list".into()));
        }
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_parses_with_default_options() {
        let spec = SolverSpec::parse("z3").unwrap();
        assert_eq!(spec.kind, SolverKind::Z3);
        assert_eq!(spec.options, SolverOptions::default());
    }

    #[test]
    fn options_and_portfolio_lists_parse() {
        let specs =
            SolverSpec::parse_list("z3:timeout_ms=5000,incremental=false;cvc5:generate_models=true")
                .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].options.timeout_ms, Some(5000));
        assert_eq!(specs[0].options.incremental, Some(false));
        assert_eq!(specs[1].kind, SolverKind::Cvc5);
        assert_eq!(specs[1].options.generate_models, Some(true));
    }

    #[test]
    fn unknown_binaries_are_allowed_unknown_options_are_not() {
        let spec = SolverSpec::parse("boolector").unwrap();
        assert_eq!(spec.kind, SolverKind::Other("boolector".into()));
        assert!(SolverSpec::parse("z3:seed=7").is_err());
        assert!(SolverSpec::parse_list(";").is_err());
    }

    #[test]
    fn globals_fill_unset_fields_only() {
        let globals = SolverOptions::from_json_str(r#"{"timeout_ms": 10000, "incremental": true}"#)
            .unwrap();
        let spec = SolverSpec::parse("z3:timeout_ms=500").unwrap();
        let merged = spec.options.or(&globals);
        assert_eq!(merged.timeout_ms, Some(500));
        assert_eq!(merged.incremental, Some(true));
        assert!(SolverOptions::from_json_str(r#"{"colour": 1}"#).is_err());
    }
}
