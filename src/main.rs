use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};

use blockstep::diagnostic::{Diagnostic, ansi::AnsiRenderer, json, registry};
use blockstep::interpreter::{self, TERMINATED};
use blockstep::world::json_world_blocks;
use blockstep::{BatchEvaluator, EngineConfig, SetupError, SteppingDriver, Verdict};

/// The program failed or a testcase did not pass.
const EXIT_FAILED: u8 = 1;
/// The generated code was rejected before it ran.
const EXIT_SETUP: u8 = 2;
/// Unreadable files, bad JSON, unknown codes.
const EXIT_USAGE: u8 = 3;

#[derive(Parser)]
#[command(name = "blockstep")]
#[command(about = "Run and score programs generated from block diagrams")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a generated program lexes, parses and compiles
    Check {
        file: PathBuf,
        /// Print diagnostics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the parsed program as JSON
    Ast { file: PathBuf },

    /// Step a program to its verdict over a JSON world state
    Run {
        file: PathBuf,
        /// JSON file holding the initial state (defaults to `{}`)
        #[arg(long)]
        state: Option<PathBuf>,
        /// Engine configuration as JSON
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print a snapshot after every step
        #[arg(long)]
        trace: bool,
        /// Delay between steps
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },

    /// Run a program against every testcase in a JSON array
    Score {
        file: PathBuf,
        #[arg(long)]
        testcases: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Explain a diagnostic code such as BLK-P001
    Explain { code: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_default_env().init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Check { file, json } => check(&file, json),
        Commands::Ast { file } => ast(&file),
        Commands::Run { file, state, config, trace, interval_ms } => {
            run(&file, state.as_deref(), config.as_deref(), trace, interval_ms).await
        }
        Commands::Score { file, testcases, config } => score(&file, &testcases, config.as_deref()).await,
        Commands::Explain { code } => explain(&code),
    };
    match result {
        Ok(code) => ExitCode::from(code),
        Err(message) => {
            eprintln!("blockstep: {message}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

type CliResult = Result<u8, String>;

fn read_source(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {e}", path.display()))
}

fn read_json(path: &Path) -> Result<serde_json::Value, String> {
    let text = read_source(path)?;
    serde_json::from_str(&text).map_err(|e| format!("{}: {e}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    match path {
        Some(path) => EngineConfig::from_json_file(path).map_err(|e| e.to_string()),
        None => Ok(EngineConfig::default()),
    }
}

fn report(d: Diagnostic, as_json: bool) {
    if as_json {
        eprintln!("{}", json::render(&d));
    } else {
        let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
        eprint!("{}", renderer.render(&d));
    }
}

fn report_setup(e: &SetupError, source: &str) -> u8 {
    report(Diagnostic::from(e).with_source(source), false);
    EXIT_SETUP
}

fn check(path: &Path, as_json: bool) -> CliResult {
    let source = read_source(path)?;
    match interpreter::compile_program(&source) {
        Ok(program) => {
            log::debug!("{} compiled to {} functions", path.display(), program.functions.len());
            Ok(0)
        }
        Err(e) => {
            report(Diagnostic::from(&e).with_source(source), as_json);
            Ok(EXIT_SETUP)
        }
    }
}

fn ast(path: &Path) -> CliResult {
    let source = read_source(path)?;
    match interpreter::parse_program(&source) {
        Ok(program) => {
            let text = serde_json::to_string_pretty(&program).map_err(|e| e.to_string())?;
            println!("{text}");
            Ok(0)
        }
        Err(e) => {
            report(Diagnostic::from(&e).with_source(source), false);
            Ok(EXIT_SETUP)
        }
    }
}

async fn run(path: &Path, state: Option<&Path>, config: Option<&Path>, trace: bool, interval_ms: u64) -> CliResult {
    let source = read_source(path)?;
    let initial = match state {
        Some(state) => read_json(state)?,
        None => serde_json::json!({}),
    };
    let config = load_config(config)?;

    let mut driver = match SteppingDriver::new(source.clone(), json_world_blocks(), initial, config) {
        Ok(driver) => driver,
        Err(e) => return Ok(report_setup(&e, &source)),
    };
    if trace {
        driver.subscribe(|snapshot| match serde_json::to_string(snapshot) {
            Ok(line) => println!("{line}"),
            Err(e) => log::warn!("cannot encode snapshot: {e}"),
        });
    }

    driver.run(Duration::from_millis(interval_ms)).await;
    let snapshot = driver.snapshot();
    let verdict = snapshot.verdict.unwrap_or_else(|| Verdict::failure(TERMINATED));
    if !trace {
        let state = serde_json::to_string(&snapshot.state).map_err(|e| e.to_string())?;
        println!("{state}");
    }
    print_verdict(&verdict);
    Ok(if verdict.success { 0 } else { EXIT_FAILED })
}

fn print_verdict(verdict: &Verdict) {
    let label = if verdict.success { "success" } else { "failure" };
    if verdict.message.is_empty() {
        eprintln!("{label}");
    } else {
        eprintln!("{label}: {}", verdict.message);
    }
}

async fn score(path: &Path, testcases: &Path, config: Option<&Path>) -> CliResult {
    let source = read_source(path)?;
    let serde_json::Value::Array(states) = read_json(testcases)? else {
        return Err(format!("{}: expected a JSON array of testcases", testcases.display()));
    };
    let config = load_config(config)?;

    let evaluator = BatchEvaluator::new(source.as_str(), &json_world_blocks(), config);
    let results = match evaluator.evaluate(&states).await {
        Ok(results) => results,
        Err(e) => return Ok(report_setup(&e, &source)),
    };

    let text = serde_json::to_string_pretty(&results).map_err(|e| e.to_string())?;
    println!("{text}");
    let passed = results.iter().filter(|r| r.verdict.success).count();
    eprintln!("{passed}/{} testcases passed", results.len());
    Ok(if passed == results.len() { 0 } else { EXIT_FAILED })
}

fn explain(code: &str) -> CliResult {
    match registry::lookup(code) {
        Some(entry) => {
            println!("{}: {}\n", entry.code, entry.short);
            println!("{}", entry.long.trim());
            Ok(0)
        }
        None => Err(format!("unknown error code `{code}`")),
    }
}
