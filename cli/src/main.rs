use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};
use std::sync::Once;

static TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "shdbg::debugger=info,shdbg::exec=warn,shdbg::memory=warn,shdbg_cli=info";

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use shdbg_core::{
    Breakpoint, CaptureApi, CaptureFile, DebugConfig, Debugger, Id, Program, ProgramIndex, ShaderDebugState,
    ShaderVariable,
};
use tracing::info;

mod repl;

#[derive(Debug, Parser)]
#[command(
    name = "shdbg",
    author,
    version,
    about = "Step captured shader invocations on the CPU",
    long_about = None
)]
struct CliArgs {
    #[command(subcommand)]
    command: Commands,
}

/// Inputs shared by every command that opens a session.
#[derive(Debug, Clone, Args)]
struct SessionArgs {
    /// Decoded program (.json, .yaml or .toml)
    #[arg(value_name = "PROGRAM", value_parser = parse_sanitized_path)]
    program: PathBuf,
    /// Captured resources, inputs and invocation setup
    #[arg(long, short, value_parser = parse_sanitized_path)]
    capture: Option<PathBuf>,
    /// TOML file with session options
    #[arg(long, value_parser = parse_sanitized_path)]
    config: Option<PathBuf>,
    /// Stop the session after this many lock-step rounds
    #[arg(long)]
    max_steps: Option<u64>,
    /// Entry point to debug (overrides the capture)
    #[arg(long)]
    entry: Option<String>,
    /// Lane to inspect (overrides the capture)
    #[arg(long)]
    lane: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a session and print every step.
    Run {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Stop before instruction `N` or the first instruction of source line `line:N`
        #[arg(long = "break", value_name = "BREAKPOINT", value_parser = parse_breakpoint)]
        breakpoints: Vec<Breakpoint>,
    },
    /// Step a session interactively.
    Debug {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Check a program for structural errors without running it.
    Validate {
        #[arg(value_name = "PROGRAM", value_parser = parse_sanitized_path)]
        program: PathBuf,
    },
    /// Print the flattened instruction list with program counters.
    Disasm {
        #[arg(value_name = "PROGRAM", value_parser = parse_sanitized_path)]
        program: PathBuf,
    },
}

fn sanitize_path(raw: &str) -> Result<PathBuf> {
    let p = Path::new(raw);

    for comp in p.components() {
        if matches!(comp, Component::ParentDir) {
            bail!("Parent directory components ('..') are not allowed in file paths.");
        }
    }

    Ok(p.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

/// `N` is an instruction index, `line:N` a source line.
fn parse_breakpoint(raw: &str) -> Result<Breakpoint, String> {
    let trimmed = raw.trim();
    if let Some(line) = trimmed.strip_prefix("line:") {
        return line
            .trim()
            .parse()
            .map(Breakpoint::Line)
            .map_err(|_| format!("invalid source line '{line}'"));
    }
    trimmed
        .parse()
        .map(Breakpoint::Instruction)
        .map_err(|_| format!("invalid breakpoint '{raw}' (expected N or line:N)"))
}

fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    !(trimmed.eq_ignore_ascii_case("0") || trimmed.eq_ignore_ascii_case("false") || trimmed.eq_ignore_ascii_case("off"))
}

fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("1")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("on")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn maybe_init_tracing() {
    let raw = match std::env::var("SHDBG_TRACE") {
        Ok(value) => value,
        Err(_) => return,
    };

    if !env_toggle_enabled(&raw) {
        return;
    }

    TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = filter_expr_from(&raw).or_else(|| std::env::var("RUST_LOG").ok());

        let builder = fmt().with_writer(std::io::stderr);

        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };

        let _ = builder.try_init();
    });
}

/// Deserialize a document, choosing the format by file extension.
fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read file '{}'", path.display()))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let parsed = match extension.as_str() {
        "json" => serde_json::from_str(&text).map_err(anyhow::Error::from),
        "yaml" | "yml" => serde_yaml::from_str(&text).map_err(anyhow::Error::from),
        "toml" => toml::from_str(&text).map_err(anyhow::Error::from),
        other => bail!("unsupported file extension '{other}' for '{}' (expected json, yaml or toml)", path.display()),
    };
    parsed.with_context(|| format!("Failed to parse '{}'", path.display()))
}

fn load_config(args: &SessionArgs) -> Result<DebugConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text =
                std::fs::read_to_string(path).with_context(|| format!("Failed to read config '{}'", path.display()))?;
            toml::from_str(&text).with_context(|| format!("Failed to parse config '{}'", path.display()))?
        }
        None => DebugConfig::default(),
    };
    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps;
    }
    Ok(config)
}

fn build_session(args: &SessionArgs) -> Result<Debugger<CaptureApi>> {
    let program: Program = load_document(&args.program)?;
    let capture: CaptureFile = match &args.capture {
        Some(path) => load_document(path)?,
        None => CaptureFile::default(),
    };
    let mut setup = capture.setup.clone();
    if let Some(entry) = &args.entry {
        setup.entry_point = Some(entry.clone());
    }
    if let Some(lane) = args.lane {
        setup.active_lane = lane;
    }
    let config = load_config(args)?;
    let api = CaptureApi::from_capture(&capture);
    let dbg = Debugger::begin_debug(&program, setup, api, shdbg_stdlib::default_registry(), config)?;
    info!(
        entry = %dbg.trace().entry_point,
        lanes = dbg.trace().lane_count,
        "session opened for '{}'",
        args.program.display()
    );
    Ok(dbg)
}

/// One line per step for the inspected lane, followed by the values it changed.
pub(crate) fn describe_state(state: &ShaderDebugState, program: &ProgramIndex, lane: u32) -> String {
    let mut out = format!("[{:>4}]", state.step_index);
    match state.executed.get(lane as usize).copied().flatten() {
        Some(pc) => {
            let text = program.instruction(pc).map(|f| f.inst.to_string()).unwrap_or_default();
            let _ = write!(out, " {pc:>4}: {text}");
        }
        None => out.push_str("       (waiting)"),
    }
    let flags = &state.flags;
    for (set, label) in [
        (flags.sample_load_gather, "sample"),
        (flags.generated_nan_or_inf, "nan/inf"),
        (flags.killed, "killed"),
        (flags.function_return, "return"),
        (flags.suspended, "suspended"),
        (flags.stalled, "stalled"),
        (flags.finished, "finished"),
    ] {
        if set {
            let _ = write!(out, " <{label}>");
        }
    }
    for change in state.changes_for_lane(lane) {
        let target = if change.memory { "*" } else { "" };
        match &change.after {
            Some(value) => {
                let _ = write!(out, "\n       {target}{} = {}", name_or_id(value, change.id), value.value_string());
            }
            None => {
                let _ = write!(out, "\n       {target}{} gone", change.id);
            }
        }
    }
    out
}

fn name_or_id(value: &ShaderVariable, id: Id) -> String {
    if value.name.is_empty() { id.to_string() } else { value.name.clone() }
}

fn run_session(args: &SessionArgs, format: OutputFormat, breakpoints: &[Breakpoint]) -> Result<()> {
    let mut dbg = build_session(args)?;
    let states = if breakpoints.is_empty() { dbg.continue_debug() } else { dbg.run_until(breakpoints) };
    match format {
        OutputFormat::Json => {
            let doc = serde_json::json!({
                "trace": dbg.trace(),
                "states": states,
                "messages": dbg.api().messages(),
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        OutputFormat::Text => {
            let trace = dbg.trace();
            println!(
                "{} ({:?}), {} lane(s), inspecting lane {}",
                trace.entry_point, trace.stage, trace.lane_count, trace.active_lane
            );
            for state in &states {
                println!("{}", describe_state(state, dbg.program(), trace.active_lane));
            }
            if dbg.is_finished() {
                println!("finished after {} step(s)", dbg.rounds());
            } else {
                println!("stopped before instruction {}", dbg.active_lane().pc());
            }
            for message in dbg.api().messages() {
                eprintln!("{message}");
            }
        }
    }
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    let program: Program = load_document(path)?;
    let index = ProgramIndex::build(&program, &[])?;
    println!(
        "{}: ok ({} entry point(s), {} instruction(s))",
        path.display(),
        index.entry_points().len(),
        index.instructions().len()
    );
    Ok(())
}

pub(crate) fn disassemble(index: &ProgramIndex) -> String {
    let mut out = String::new();
    let mut function = None;
    let mut block = None;
    for (pc, flat) in index.instructions().iter().enumerate() {
        if function != Some(flat.function) {
            function = Some(flat.function);
            block = None;
            let name = index.function(flat.function).map(|f| f.name.as_str()).unwrap_or("");
            let _ = writeln!(out, "function {} {name}", flat.function);
        }
        if block != Some(flat.block) {
            block = Some(flat.block);
            let _ = writeln!(out, "  {}:", flat.block);
        }
        let _ = writeln!(out, "{pc:>6}    {}", flat.inst);
    }
    out
}

fn disasm(path: &Path) -> Result<()> {
    let program: Program = load_document(path)?;
    let index = ProgramIndex::build(&program, &[])?;
    print!("{}", disassemble(&index));
    Ok(())
}

fn main() -> Result<()> {
    maybe_init_tracing();

    let CliArgs { command } = CliArgs::parse();

    match command {
        Commands::Run { session, format, breakpoints } => run_session(&session, format, &breakpoints),
        Commands::Debug { session } => {
            let dbg = build_session(&session)?;
            repl::run(dbg)
        }
        Commands::Validate { program } => validate(&program),
        Commands::Disasm { program } => disasm(&program),
    }
}
