//! Solver sessions and the portfolio check
//!
//! A session drives one subprocess per configured solver over SMT-LIB2
//! pipes. The assertion stack is mirrored client-side; incremental
//! solvers follow it live with `(push)/(pop)`, non-incremental solvers
//! are respawned per query and replay the stack flat. A `check` fans the
//! query out to every solver and takes the first decisive answer,
//! killing the rest; killed solvers respawn and replay on next use.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use octopus_expr::{Bits, Term, TermId, TermPool, Value};

use crate::{smtlib, SatResult, SmtError, SolverKind, SolverOptions, SolverSpec};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy)]
struct Resolved {
    incremental: bool,
    generate_models: bool,
    timeout: Duration,
}

impl Resolved {
    fn from(options: &SolverOptions) -> Self {
        Self {
            incremental: options.incremental.unwrap_or(true),
            generate_models: options.generate_models.unwrap_or(true),
            timeout: Duration::from_millis(options.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
        }
    }
}

struct Live {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    defined: HashSet<TermId>,
    /// Nodes defined per server frame, unwound on `(pop)`.
    defined_log: Vec<Vec<TermId>>,
}

struct SolverProc {
    kind: SolverKind,
    opts: Resolved,
}

enum Answer {
    Decisive(SatResult),
    Unknown,
    Failed(String),
}

/// An open portfolio session.
pub struct Session {
    procs: Vec<SolverProc>,
    live: Vec<Option<Live>>,
    /// Client-side assertion stack; index 0 is the base frame.
    frames: Vec<Vec<TermId>>,
    last_sat: Option<usize>,
    queries: usize,
}

impl Session {
    /// Launch every solver of the portfolio.
    ///
    /// Fails fast when a binary cannot be started; per-solver options are
    /// the spec's own over `globals` over built-in defaults.
    pub fn open(specs: &[SolverSpec], globals: &SolverOptions) -> Result<Session, SmtError> {
        assert!(!specs.is_empty(), "portfolio needs at least one solver");
        let procs: Vec<SolverProc> = specs
            .iter()
            .map(|spec| SolverProc {
                kind: spec.kind.clone(),
                opts: Resolved::from(&spec.options.or(globals)),
            })
            .collect();
        let mut session = Session {
            live: procs.iter().map(|_| None).collect(),
            procs,
            frames: vec![Vec::new()],
            last_sat: None,
            queries: 0,
        };
        let pool = TermPool::new();
        for index in 0..session.procs.len() {
            session.respawn(&pool, index)?;
        }
        Ok(session)
    }

    /// Whether a solver binary answers on the search path.
    pub fn available(binary: &str) -> bool {
        Command::new(binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Number of `check` queries issued so far.
    pub fn queries(&self) -> usize {
        self.queries
    }

    /// Open a new assertion frame.
    pub fn push(&mut self) {
        self.frames.push(Vec::new());
        self.last_sat = None;
        for index in 0..self.procs.len() {
            if !self.procs[index].opts.incremental {
                continue;
            }
            if let Some(live) = &mut self.live[index] {
                live.defined_log.push(Vec::new());
                if writeln!(live.stdin, "(push 1)").and_then(|_| live.stdin.flush()).is_err() {
                    self.drop_proc(index);
                }
            }
        }
    }

    /// Discard the top assertion frame.
    pub fn pop(&mut self) {
        assert!(self.frames.len() > 1, "pop without matching push");
        self.frames.pop();
        self.last_sat = None;
        for index in 0..self.procs.len() {
            if !self.procs[index].opts.incremental {
                continue;
            }
            if let Some(live) = &mut self.live[index] {
                for id in live.defined_log.pop().expect("frame underflow") {
                    live.defined.remove(&id);
                }
                if writeln!(live.stdin, "(pop 1)").and_then(|_| live.stdin.flush()).is_err() {
                    self.drop_proc(index);
                }
            }
        }
    }

    /// Add a boolean formula at the current frame.
    pub fn assert(&mut self, pool: &TermPool, formula: TermId) {
        self.frames.last_mut().expect("base frame").push(formula);
        self.last_sat = None;
        for index in 0..self.procs.len() {
            if !self.procs[index].opts.incremental {
                continue;
            }
            if let Some(live) = &mut self.live[index] {
                let mut script = String::new();
                let fresh = smtlib::define_cone(pool, formula, &mut live.defined, &mut script);
                live.defined_log
                    .last_mut()
                    .expect("frame underflow")
                    .extend(fresh);
                script.push_str(&format!("(assert {})\n", smtlib::term_ref(pool, formula)));
                if live
                    .stdin
                    .write_all(script.as_bytes())
                    .and_then(|_| live.stdin.flush())
                    .is_err()
                {
                    self.drop_proc(index);
                }
            }
        }
    }

    /// Check satisfiability of the conjunction of all stacked assertions.
    ///
    /// First decisive portfolio answer wins; the losers are killed and
    /// respawn with a replay of the stack on their next use. `Unknown`
    /// means every solver gave up or timed out.
    pub fn check(&mut self, pool: &TermPool) -> Result<SatResult, SmtError> {
        self.queries += 1;
        self.last_sat = None;
        let started = Instant::now();

        let mut last_error = None;
        for index in 0..self.procs.len() {
            if let Err(e) = self.prepare(pool, index) {
                warn!(solver = self.procs[index].kind.binary(), error = %e, "solver unavailable for query");
                self.drop_proc(index);
                last_error = Some(e);
            }
        }
        let pids: HashMap<usize, u32> = self
            .live
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|live| (index, live.child.id())))
            .collect();
        if pids.is_empty() {
            return Err(last_error.expect("no solvers prepared"));
        }

        let deadline = self
            .procs
            .iter()
            .map(|proc| proc.opts.timeout)
            .max()
            .expect("nonempty portfolio")
            + Duration::from_millis(500);

        let procs = &self.procs;
        let (sender, receiver) = mpsc::channel();
        let mut outcome = SatResult::Unknown;
        let mut winner = None;
        thread::scope(|scope| {
            for (index, slot) in self.live.iter_mut().enumerate() {
                let Some(live) = slot.as_mut() else { continue };
                let sender = sender.clone();
                let reader = &mut live.stdout;
                scope.spawn(move || {
                    let answer = read_answer(reader);
                    let _ = sender.send((index, answer));
                });
            }
            drop(sender);

            let mut pending = pids.len();
            while pending > 0 {
                let remaining = deadline
                    .checked_sub(started.elapsed())
                    .unwrap_or(Duration::ZERO);
                match receiver.recv_timeout(remaining) {
                    Ok((index, Answer::Decisive(result))) => {
                        winner = Some(index);
                        outcome = result;
                        break;
                    }
                    Ok((index, Answer::Unknown)) => {
                        trace!(solver = procs[index].kind.binary(), "unknown");
                        pending -= 1;
                    }
                    Ok((index, Answer::Failed(reason))) => {
                        warn!(solver = procs[index].kind.binary(), %reason, "solver failed");
                        pending -= 1;
                    }
                    Err(_) => break,
                }
            }
            // Cancel everything that has not answered; readers observe the
            // EOF and terminate, letting the scope join.
            for (&index, &pid) in &pids {
                if Some(index) != winner {
                    kill(pid);
                }
            }
        });

        for index in 0..self.live.len() {
            if self.live[index].is_some() && Some(index) != winner {
                self.drop_proc(index);
            }
        }
        if outcome == SatResult::Sat {
            self.last_sat = winner;
        }
        debug!(
            result = ?outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            query = self.queries,
            "check-sat"
        );
        Ok(outcome)
    }

    /// Concrete values for variables under the model of the last `sat`.
    ///
    /// Only defined right after a `sat` answer from a solver running with
    /// `generate_models`; variables the query never constrained are
    /// declared on the fly and take arbitrary values.
    pub fn model(
        &mut self,
        pool: &TermPool,
        vars: &[TermId],
    ) -> Result<HashMap<String, Value>, SmtError> {
        let index = self
            .last_sat
            .ok_or_else(|| SmtError::Protocol("model requested without a sat answer".into()))?;
        if !self.procs[index].opts.generate_models {
            return Err(SmtError::Protocol(format!(
                "solver {} runs without generate_models",
                self.procs[index].kind.binary()
            )));
        }
        let live = self.live[index].as_mut().expect("sat solver is live");
        let mut names = Vec::with_capacity(vars.len());
        let mut declarations = String::new();
        for &var in vars {
            let name = match pool.term(var) {
                Term::Var { name, .. } => name.clone(),
                other => panic!("model query over a non-variable term {other:?}"),
            };
            let fresh = smtlib::define_cone(pool, var, &mut live.defined, &mut declarations);
            live.defined_log
                .last_mut()
                .expect("frame underflow")
                .extend(fresh);
            names.push(name);
        }
        let mut request = declarations;
        request.push_str("(get-value (");
        for name in &names {
            request.push_str(&smtlib::symbol(name));
            request.push(' ');
        }
        request.push_str("))\n");
        live.stdin.write_all(request.as_bytes())?;
        live.stdin.flush()?;
        let response = read_balanced(&mut live.stdout)?;
        parse_model(&response)
    }

    /// One-shot satisfiability of a single formula conjoined with the
    /// current stack; any model is discarded.
    pub fn check_sat(&mut self, pool: &TermPool, formula: TermId) -> Result<SatResult, SmtError> {
        self.push();
        self.assert(pool, formula);
        let result = self.check(pool);
        self.pop();
        result
    }

    /// Write a fresh process' prologue and bring it up to the client
    /// stack: framed for incremental solvers, flat for the rest.
    fn respawn(&mut self, pool: &TermPool, index: usize) -> Result<(), SmtError> {
        self.drop_proc(index);
        let proc = &self.procs[index];
        let binary = proc.kind.binary().to_string();
        let mut command = Command::new(&binary);
        match &proc.kind {
            SolverKind::Z3 => {
                command.args(["-in", "-smt2"]);
            }
            SolverKind::Cvc5 => {
                command.args(["--lang", "smt2", "--produce-models"]);
                if proc.opts.incremental {
                    command.arg("--incremental");
                }
                command.arg(format!("--tlimit-per={}", proc.opts.timeout.as_millis()));
            }
            SolverKind::Other(_) => {}
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SmtError::Launch {
                name: binary.clone(),
                source,
            })?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));
        let mut live = Live {
            child,
            stdin,
            stdout,
            defined: HashSet::new(),
            defined_log: vec![Vec::new()],
        };

        let mut script = String::new();
        match &proc.kind {
            SolverKind::Z3 => {
                script.push_str(&format!(
                    "(set-option :timeout {})\n",
                    proc.opts.timeout.as_millis()
                ));
                if proc.opts.generate_models {
                    script.push_str("(set-option :produce-models true)\n");
                }
            }
            SolverKind::Cvc5 => {}
            SolverKind::Other(_) => {
                if proc.opts.generate_models {
                    script.push_str("(set-option :produce-models true)\n");
                }
            }
        }
        script.push_str("(set-logic QF_BV)\n");
        for (depth, frame) in self.frames.iter().enumerate() {
            if depth > 0 && proc.opts.incremental {
                script.push_str("(push 1)\n");
                live.defined_log.push(Vec::new());
            }
            for &formula in frame {
                let fresh = smtlib::define_cone(pool, formula, &mut live.defined, &mut script);
                live.defined_log
                    .last_mut()
                    .expect("frame underflow")
                    .extend(fresh);
                script.push_str(&format!("(assert {})\n", smtlib::term_ref(pool, formula)));
            }
        }
        live.stdin.write_all(script.as_bytes())?;
        live.stdin.flush()?;
        trace!(solver = %binary, replayed = self.frames.iter().map(Vec::len).sum::<usize>(), "spawned");
        self.live[index] = Some(live);
        Ok(())
    }

    fn prepare(&mut self, pool: &TermPool, index: usize) -> Result<(), SmtError> {
        if !self.procs[index].opts.incremental || self.live[index].is_none() {
            self.respawn(pool, index)?;
        }
        let live = self.live[index].as_mut().expect("respawned");
        writeln!(live.stdin, "(check-sat)")?;
        live.stdin.flush()?;
        Ok(())
    }

    fn drop_proc(&mut self, index: usize) {
        if let Some(mut live) = self.live[index].take() {
            let _ = live.child.kill();
            let _ = live.child.wait();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for index in 0..self.live.len() {
            self.drop_proc(index);
        }
    }
}

fn kill(pid: u32) {
    // SAFETY: signalling a child process this session spawned.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

fn read_answer(reader: &mut BufReader<ChildStdout>) -> Answer {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => return Answer::Failed("solver closed its output".into()),
            Err(e) => return Answer::Failed(e.to_string()),
            Ok(_) => {}
        }
        match line.trim() {
            "" => continue,
            "sat" => return Answer::Decisive(SatResult::Sat),
            "unsat" => return Answer::Decisive(SatResult::Unsat),
            "unknown" => return Answer::Unknown,
            other if other.starts_with("(error") => return Answer::Failed(other.to_string()),
            _ => continue,
        }
    }
}

/// Read one s-expression, which may span lines.
fn read_balanced(reader: &mut BufReader<ChildStdout>) -> Result<String, SmtError> {
    let mut out = String::new();
    let mut depth = 0usize;
    let mut seen_open = false;
    loop {
        let mut byte = [0u8; 1];
        let n = reader.read(&mut byte)?;
        if n == 0 {
            return Err(SmtError::Protocol("solver closed its output mid-model".into()));
        }
        let c = byte[0] as char;
        out.push(c);
        match c {
            '(' => {
                depth += 1;
                seen_open = true;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                if seen_open && depth == 0 {
                    return Ok(out);
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, PartialEq)]
enum SExpr {
    Atom(String),
    List(Vec<SExpr>),
}

fn parse_sexpr(text: &str) -> Result<SExpr, SmtError> {
    let mut chars = text.chars().peekable();
    let expr = parse_one(&mut chars)?;
    Ok(expr)
}

fn parse_one(chars: &mut std::iter::Peekable<std::str::Chars>) -> Result<SExpr, SmtError> {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
    match chars.peek() {
        None => Err(SmtError::Protocol("unexpected end of model".into())),
        Some('(') => {
            chars.next();
            let mut items = Vec::new();
            loop {
                while chars.peek().is_some_and(|c| c.is_whitespace()) {
                    chars.next();
                }
                match chars.peek() {
                    None => return Err(SmtError::Protocol("unterminated list in model".into())),
                    Some(')') => {
                        chars.next();
                        return Ok(SExpr::List(items));
                    }
                    Some(_) => items.push(parse_one(chars)?),
                }
            }
        }
        Some('|') => {
            chars.next();
            let mut atom = String::new();
            for c in chars.by_ref() {
                if c == '|' {
                    break;
                }
                atom.push(c);
            }
            Ok(SExpr::Atom(atom))
        }
        Some(_) => {
            let mut atom = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '(' || c == ')' {
                    break;
                }
                atom.push(c);
                chars.next();
            }
            Ok(SExpr::Atom(atom))
        }
    }
}

fn parse_model(text: &str) -> Result<HashMap<String, Value>, SmtError> {
    let pairs = match parse_sexpr(text)? {
        SExpr::List(pairs) => pairs,
        other => return Err(SmtError::Protocol(format!("unexpected model shape: {other:?}"))),
    };
    let mut model = HashMap::new();
    for pair in pairs {
        let SExpr::List(pair) = pair else {
            return Err(SmtError::Protocol("model entry is not a pair".into()));
        };
        let [SExpr::Atom(name), value] = pair.as_slice() else {
            return Err(SmtError::Protocol("model entry is not a name/value pair".into()));
        };
        model.insert(name.clone(), parse_value(value)?);
    }
    Ok(model)
}

fn parse_value(value: &SExpr) -> Result<Value, SmtError> {
    match value {
        SExpr::Atom(atom) if atom == "true" => Ok(Value::Bool(true)),
        SExpr::Atom(atom) if atom == "false" => Ok(Value::Bool(false)),
        SExpr::Atom(atom) if atom.starts_with("#b") => {
            let digits = &atom[2..];
            Bits::parse(digits.len() as u32, &format!("0b{digits}"))
                .map(Value::Bits)
                .ok_or_else(|| SmtError::Protocol(format!("bad binary literal {atom}")))
        }
        SExpr::Atom(atom) if atom.starts_with("#x") => {
            let digits = &atom[2..];
            Bits::parse(4 * digits.len() as u32, &format!("0x{digits}"))
                .map(Value::Bits)
                .ok_or_else(|| SmtError::Protocol(format!("bad hex literal {atom}")))
        }
        // cvc5 occasionally prints the indexed form (_ bvN width).
        SExpr::List(items) => {
            let [SExpr::Atom(underscore), SExpr::Atom(bv), SExpr::Atom(width)] = items.as_slice()
            else {
                return Err(SmtError::Protocol(format!("bad model value {items:?}")));
            };
            let value = bv.strip_prefix("bv");
            match (underscore.as_str(), value, width.parse::<u32>()) {
                ("_", Some(value), Ok(width)) => Bits::parse(width, value)
                    .map(Value::Bits)
                    .ok_or_else(|| SmtError::Protocol(format!("bad bit-vector value bv{value}"))),
                _ => Err(SmtError::Protocol(format!("bad model value {items:?}"))),
            }
        }
        SExpr::Atom(atom) => Err(SmtError::Protocol(format!("bad model value {atom}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_responses_parse_in_all_three_shapes() {
        let model = parse_model("((in_0 #b1) (in_1 #b0) (flag true) (wide #x2a) (ix (_ bv5 4)))")
            .unwrap();
        assert_eq!(model["in_0"], Value::Bits(Bits::from_u64(1, 1)));
        assert_eq!(model["in_1"], Value::Bits(Bits::from_u64(1, 0)));
        assert_eq!(model["flag"], Value::Bool(true));
        assert_eq!(model["wide"], Value::Bits(Bits::from_u64(8, 0x2a)));
        assert_eq!(model["ix"], Value::Bits(Bits::from_u64(4, 5)));
    }

    #[test]
    fn quoted_symbols_lose_their_pipes() {
        let model = parse_model("((|odd name| #b11))").unwrap();
        assert_eq!(model["odd name"], Value::Bits(Bits::from_u64(2, 3)));
    }

    #[test]
    fn malformed_models_are_protocol_errors() {
        assert!(parse_model("sat").is_err());
        assert!(parse_model("((x))").is_err());
        assert!(parse_model("((x #q12))").is_err());
    }

    // Live round-trips against z3 are exercised from the engine's
    // integration tests, which skip when no solver is installed.
}
