//! Command-line front-end

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};
use std::time::Instant;

use clap::Parser as ClapParser;
use tracing::debug;

use octopus::prelude::*;
use octopus_ir::IrError;

/// Name of the external compiler producing IR JSON from source parsers.
const FRONTEND: &str = "octopus-p4c";

#[derive(Debug, ClapParser)]
#[command(
    name = "octopus",
    version,
    about = "Decide language equivalence of two packet parsers."
)]
struct Args {
    /// First parser: source file, or IR JSON with --json.
    file1: PathBuf,
    /// Second parser: source file, or IR JSON with --json.
    file2: PathBuf,
    /// Inputs are IR JSON; skip the front-end compiler.
    #[arg(short = 'j', long)]
    json: bool,
    /// Naive bisimulation: explore one bit at a time.
    #[arg(short = 'n', long)]
    naive: bool,
    /// Keep the symbolic engine but disable leaps (ignored with --naive).
    #[arg(short = 'L', long = "disable_leaps")]
    disable_leaps: bool,
    /// Write the certificate or counterexample JSON to FILE.
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
    /// Exit 1 when the parsers are not equivalent.
    #[arg(short = 'f', long = "fail-on-mismatch")]
    fail_on_mismatch: bool,
    /// Print wall time and peak memory.
    #[arg(short = 'S', long)]
    stat: bool,
    /// Solver portfolio, e.g. "z3:timeout_ms=5000;cvc5".
    #[arg(short = 's', long, default_value = "z3")]
    solvers: String,
    /// JSON object of option defaults applied to every solver.
    #[arg(long = "solvers-global-options")]
    solvers_global_options: Option<String>,
    /// On an indeterminate answer during a leap, retry the pair with
    /// single-bit steps before giving up.
    #[arg(long)]
    fallback_to_naive_on_unknown: bool,
    /// More logging; repeat for more detail.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let started = Instant::now();
    let result = run(&args);
    if args.stat {
        let peak = peak_memory_kb()
            .map(|kb| format!("{kb} kB"))
            .unwrap_or_else(|| "unavailable".into());
        println!(
            "time: {:.3}s, peak memory: {peak}",
            started.elapsed().as_secs_f64()
        );
    }
    match result {
        Ok(outcome) if outcome.is_equivalent() => {
            println!("Equivalent");
            ExitCode::SUCCESS
        }
        Ok(_) => {
            println!("Not equivalent");
            if args.fail_on_mismatch {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(error) => {
            if matches!(
                error,
                Error::Indeterminate | Error::Solver(SmtError::Indeterminate)
            ) {
                println!("Inconclusive: {error}");
            } else {
                eprintln!("octopus: {error}");
            }
            ExitCode::from(exit_code(&error))
        }
    }
}

fn run(args: &Args) -> Result<Outcome, Error> {
    let left = load(&args.file1, args.json)?;
    let right = load(&args.file2, args.json)?;

    let specs = SolverSpec::parse_list(&args.solvers)?;
    let globals = match &args.solvers_global_options {
        Some(text) => SolverOptions::from_json_str(text)?,
        None => SolverOptions::default(),
    };
    let options = CheckOptions {
        leaps: !(args.naive || args.disable_leaps),
        fallback_to_naive_on_unknown: args.fallback_to_naive_on_unknown,
    };
    let mut checker = Checker::open(&specs, &globals, options)?;
    let outcome = checker.check(&left, &right)?;
    debug!(queries = checker.queries(), "solver traffic");

    match (&args.output, &outcome) {
        (Some(path), outcome) => {
            let json = serde_json::to_string_pretty(outcome)
                .expect("outcome serialisation cannot fail");
            fs::write(path, json)
                .map_err(|e| Error::Input(format!("cannot write {}: {e}", path.display())))?;
        }
        (None, Outcome::Equivalent { certificate }) => print!("{certificate}"),
        (None, Outcome::NotEquivalent { counterexample }) => print!("{counterexample}"),
    }
    Ok(outcome)
}

fn load(path: &Path, json: bool) -> Result<octopus_ir::Parser, Error> {
    let text = if json {
        fs::read_to_string(path)
            .map_err(|e| Error::Input(format!("cannot read {}: {e}", path.display())))?
    } else {
        compile(path)?
    };
    Ok(octopus_ir::Parser::from_json_str(&text)?)
}

/// Invoke the external front-end to produce IR JSON.
fn compile(path: &Path) -> Result<String, Error> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("parser");
    let out = std::env::temp_dir().join(format!("octopus-{}-{stem}.json", std::process::id()));
    let status = Command::new(FRONTEND)
        .arg(path)
        .arg("-o")
        .arg(&out)
        .status()
        .map_err(|e| {
            Error::Input(format!(
                "cannot run front-end compiler {FRONTEND} (is it on PATH?): {e}"
            ))
        })?;
    if !status.success() {
        return Err(Error::Input(format!(
            "{FRONTEND} failed on {} with {status}",
            path.display()
        )));
    }
    let text = fs::read_to_string(&out)
        .map_err(|e| Error::Input(format!("cannot read compiler output {}: {e}", out.display())))?;
    let _ = fs::remove_file(&out);
    Ok(text)
}

fn exit_code(error: &Error) -> u8 {
    match error {
        Error::Input(_) => 2,
        Error::Ir(IrError::Unsupported(_)) => 4,
        Error::Ir(_) => 2,
        Error::Indeterminate | Error::Solver(SmtError::Indeterminate) => 3,
        Error::Solver(_) => 2,
    }
}

fn peak_memory_kb() -> Option<u64> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|line| line.starts_with("VmHWM:"))?;
    line.split_whitespace().nth(1)?.parse().ok()
}
