//=====================================================
// File: main.rs
//=====================================================
// Goal: Teal CLI entry point
// Objective: Run, compile and inspect .tl sources, and drive persisted
//            sessions through the file store
//=====================================================

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args as ClapArgs, Parser, Subcommand};
use teal::config::TealConfig;
use teal::diagnostic::index_column;
use teal::interpreter::{ScriptError, compile_source, run_executable};
use teal::logging;
use teal::parser::parse_source;
use teal::tokenizer::tokenize_normalized;
use teal_core::{Executable, FileStore, Invocation, InvocationStatus, Value};
use tracing::debug;

const BYTECODE_EXTENSION: &str = "tlc";

#[derive(Parser, Debug)]
#[command(name = "teal", about = "Teal language toolchain", version)]
pub struct Args {
    /// Configuration file; defaults to ./teal.toml or the user config dir.
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a .tl source file or .tlc executable.
    Run(RunArgs),
    /// Compile a .tl source file into a .tlc executable.
    Compile(CompileArgs),
    /// Print the normalized token stream.
    Tokens(InspectArgs),
    /// Print the parsed program as s-expressions.
    Ast(InspectArgs),
    /// Print the instruction listing of a source file or executable.
    Disasm(InspectArgs),
    /// Create a persisted session without running it.
    Start(StartArgs),
    /// Run a persisted session for a bounded number of quanta.
    Resume(ResumeArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Path to the script or executable.
    pub script: PathBuf,

    /// Function to invoke.
    #[arg(long = "entry")]
    pub entry: Option<String>,

    /// Trace every executed instruction.
    #[arg(long = "trace")]
    pub trace: bool,

    /// Print parsed AST before execution.
    #[arg(long = "print-ast")]
    pub print_ast: bool,

    /// Arguments passed to the entry function.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CompileArgs {
    /// Input .tl source file.
    pub input: PathBuf,
    /// Output .tlc file; defaults to the input with its extension replaced.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct InspectArgs {
    pub input: PathBuf,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StartArgs {
    pub script: PathBuf,

    #[arg(long = "session")]
    pub session: String,

    #[arg(long = "entry")]
    pub entry: Option<String>,

    /// Directory for persisted sessions.
    #[arg(long = "state-dir")]
    pub state_dir: Option<PathBuf>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ResumeArgs {
    pub script: PathBuf,

    #[arg(long = "session")]
    pub session: String,

    /// Scheduling quanta to run before checkpointing.
    #[arg(long = "quanta", default_value_t = 1)]
    pub quanta: usize,

    #[arg(long = "state-dir")]
    pub state_dir: Option<PathBuf>,
}

/// Failures either carry a rendered script diagnostic or are plain host errors.
enum Failure {
    Script(ScriptError),
    Host(anyhow::Error),
}

impl From<ScriptError> for Failure {
    fn from(value: ScriptError) -> Self {
        Failure::Script(value)
    }
}

impl From<anyhow::Error> for Failure {
    fn from(value: anyhow::Error) -> Self {
        Failure::Host(value)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match dispatch(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Script(err)) => {
            eprint!("{}", err.render());
            ExitCode::FAILURE
        }
        Err(Failure::Host(err)) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(args: Args) -> Result<(), Failure> {
    let (mut config, source) = TealConfig::load(args.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok());
    if let Command::Run(run) = &args.command {
        config.trace |= run.trace;
    }
    logging::init(config.trace);
    if let Some(path) = source {
        debug!(path = %path.display(), "configuration loaded");
    }

    match args.command {
        Command::Run(run) => run_command(&config, run),
        Command::Compile(compile) => compile_command(compile),
        Command::Tokens(inspect) => tokens_command(inspect),
        Command::Ast(inspect) => ast_command(inspect),
        Command::Disasm(inspect) => disasm_command(inspect),
        Command::Start(start) => start_command(&config, start),
        Command::Resume(resume) => resume_command(&config, resume),
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn is_bytecode(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(BYTECODE_EXTENSION)
}

/// Compile a source file or decode a stored executable, depending on extension.
fn load_executable(path: &Path) -> Result<Executable, Failure> {
    if is_bytecode(path) {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        return Ok(Executable::decode(BufReader::new(file)).map_err(ScriptError::from)?);
    }
    let source = read_source(path)?;
    Ok(compile_source(&path.display().to_string(), &source)?)
}

fn parse_value(text: &str) -> Value {
    if let Ok(int) = text.parse::<i64>() {
        return Value::Integer(int);
    }
    if let Ok(float) = text.parse::<f64>() {
        if float.is_finite() {
            return Value::Float(float);
        }
    }
    Value::String(text.to_string())
}

fn run_command(config: &TealConfig, args: RunArgs) -> Result<(), Failure> {
    if args.print_ast {
        if is_bytecode(&args.script) {
            let path = args.script.display();
            return Err(anyhow!("--print-ast needs a source file, got {path}").into());
        }
        print_ast(&args.script)?;
    }
    let executable = Arc::new(load_executable(&args.script)?);
    let entry = args.entry.unwrap_or_else(|| config.entry.clone());
    let values = args.args.iter().map(|arg| parse_value(arg)).collect();
    let report = run_executable(executable, config.machine_config(), &entry, values)?;
    for line in report.all_output() {
        println!("{line}");
    }
    println!("{}", report.result);
    debug!(
        suspensions = report.suspensions,
        preemptions = report.preemptions,
        "run finished"
    );
    Ok(())
}

fn compile_command(args: CompileArgs) -> Result<(), Failure> {
    let source = read_source(&args.input)?;
    let executable = compile_source(&args.input.display().to_string(), &source)?;
    let output = args
        .output
        .unwrap_or_else(|| args.input.with_extension(BYTECODE_EXTENSION));
    let file = File::create(&output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    executable.encode(file).map_err(ScriptError::from)?;
    println!("wrote {}", output.display());
    Ok(())
}

fn tokens_command(args: InspectArgs) -> Result<(), Failure> {
    let source = read_source(&args.input)?;
    let filename = args.input.display().to_string();
    let tokens = tokenize_normalized(&filename, &source).map_err(ScriptError::from)?;
    for token in tokens {
        let column = index_column(&source, token.index);
        println!("{}:{}\t{:?}\t{:?}", token.line, column, token.kind, token.value);
    }
    Ok(())
}

fn print_ast(path: &Path) -> Result<(), Failure> {
    let source = read_source(path)?;
    let nodes = parse_source(&path.display().to_string(), &source).map_err(ScriptError::from)?;
    for node in nodes {
        println!("{node}");
    }
    Ok(())
}

fn ast_command(args: InspectArgs) -> Result<(), Failure> {
    print_ast(&args.input)
}

fn disasm_command(args: InspectArgs) -> Result<(), Failure> {
    let executable = load_executable(&args.input)?;
    print!("{}", executable.disassemble());
    Ok(())
}

fn open_store(config: &TealConfig, state_dir: Option<PathBuf>) -> Result<FileStore, Failure> {
    let dir = state_dir.unwrap_or_else(|| config.state_dir());
    let store = FileStore::new(&dir).map_err(ScriptError::from)?;
    debug!(dir = %dir.display(), "session store opened");
    Ok(store)
}

fn start_command(config: &TealConfig, args: StartArgs) -> Result<(), Failure> {
    let executable = Arc::new(load_executable(&args.script)?);
    let store = open_store(config, args.state_dir)?;
    let entry = args.entry.unwrap_or_else(|| config.entry.clone());
    let values = args.args.iter().map(|arg| parse_value(arg)).collect();
    Invocation::new(&store, executable, config.machine_config())
        .start(&args.session, &entry, values)
        .map_err(ScriptError::from)?;
    println!("started {}", args.session);
    Ok(())
}

fn resume_command(config: &TealConfig, args: ResumeArgs) -> Result<(), Failure> {
    let executable = Arc::new(load_executable(&args.script)?);
    let store = open_store(config, args.state_dir)?;
    let status = Invocation::new(&store, executable, config.machine_config())
        .resume(&args.session, args.quanta)
        .map_err(ScriptError::from)?;
    match status {
        InvocationStatus::Finished { result, output } => {
            for line in output {
                println!("{line}");
            }
            println!("{result}");
        }
        InvocationStatus::Pending => println!("pending"),
        InvocationStatus::Failed(message) => {
            return Err(anyhow!("session {} failed: {message}", args.session).into());
        }
    }
    Ok(())
}
