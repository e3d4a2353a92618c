use std::path::{Path, PathBuf};

use clap::{Parser as ClapParser, Subcommand as ClapSubcommand, ValueEnum};
use eyre::{WrapErr, bail};
use jitmsg::{CompiledFunction, Session, host_cpu_features, host_cpu_name};
use tracing::{Level, info};

/// Entry points with more parameters are only resolved, not called.
const MAX_CALL_ARGS: usize = 4;

#[allow(clippy::upper_case_acronyms)]
#[derive(ClapParser)]
#[command(name = "jitmsg", version, about = "JIT-compile Cranelift IR on the host")]
pub struct CLI {
    #[command(flatten)]
    pub opts: Options,
    #[command(subcommand)]
    pub command: Subcommand,
}

#[derive(ClapParser, Debug, Clone)]
pub struct Options {
    #[arg(
        long = "log.level",
        default_value_t = Level::WARN,
        value_name = "LOG_LEVEL",
        env = "JITMSG_LOG_LEVEL",
        help = "The verbosity level used for logs.",
        long_help = "Possible values: info, debug, trace, warn, error",
        global = true
    )]
    pub log_level: Level,
    #[arg(
        long = "log.color",
        value_enum,
        default_value_t = LogColor::Auto,
        help = "Output logs with ANSI color codes.",
        env = "JITMSG_LOG_COLOR",
        global = true
    )]
    pub log_color: LogColor,
}

#[derive(ClapSubcommand)]
pub enum Subcommand {
    #[command(name = "host", about = "Print the host target facts")]
    Host,
    #[command(name = "run", about = "Compile a CLIF file and call its entry point")]
    Run {
        #[arg(required = true, value_name = "FILE_PATH", help = "Textual Cranelift IR")]
        path: PathBuf,
        #[arg(
            long = "entry",
            value_name = "NAME",
            help = "Function to resolve, without the `%` sigil"
        )]
        entry: String,
        #[arg(
            value_name = "ARGS",
            allow_negative_numbers = true,
            help = "i64 arguments passed to the entry point"
        )]
        args: Vec<i64>,
    },
}

impl Subcommand {
    pub fn run(self) -> eyre::Result<()> {
        match self {
            Subcommand::Host => print_host(),
            Subcommand::Run { path, entry, args } => run_file(&path, &entry, &args),
        }
    }
}

fn print_host() -> eyre::Result<()> {
    let session = Session::initialize()?;
    println!("cpu:         {}", host_cpu_name());
    println!("triple:      {}", session.target_triple());
    println!("data layout: {}", session.data_layout());
    println!("features:    {}", host_cpu_features());
    Ok(())
}

fn run_file(path: &Path, entry: &str, args: &[i64]) -> eyre::Result<()> {
    let ir = std::fs::read(path).wrap_err_with(|| format!("reading {}", path.display()))?;

    let mut session = Session::initialize()?;
    let function = session
        .compile(entry, &ir)
        .wrap_err_with(|| format!("compiling {}", path.display()))?;
    info!(entry, signature = %function.signature(), "Compiled entry point");

    match function.i64_arity() {
        Some(arity) if arity <= MAX_CALL_ARGS => {
            if args.len() != arity {
                bail!("`{entry}` takes {arity} arguments, got {}", args.len());
            }
            println!("{}", call(&function, args));
        }
        _ => {
            if !args.is_empty() {
                bail!(
                    "`{entry}` has signature {}; only (i64, ...) -> i64 with at most {MAX_CALL_ARGS} parameters can be called",
                    function.signature()
                );
            }
            println!("{:p}", function.as_ptr());
        }
    }
    Ok(())
}

/// Call an `(i64, ...) -> i64` entry point whose arity matches `args`.
#[expect(unsafe_code)]
fn call(function: &CompiledFunction, args: &[i64]) -> i64 {
    let ptr = function.as_ptr();
    // SAFETY: `i64_arity` confirmed the signature, the function uses the
    // host's default calling convention, and the session is still alive.
    unsafe {
        match *args {
            [] => std::mem::transmute::<*const u8, extern "C" fn() -> i64>(ptr)(),
            [a] => std::mem::transmute::<*const u8, extern "C" fn(i64) -> i64>(ptr)(a),
            [a, b] => std::mem::transmute::<*const u8, extern "C" fn(i64, i64) -> i64>(ptr)(a, b),
            [a, b, c] => {
                std::mem::transmute::<*const u8, extern "C" fn(i64, i64, i64) -> i64>(ptr)(a, b, c)
            }
            [a, b, c, d] => std::mem::transmute::<
                *const u8,
                extern "C" fn(i64, i64, i64, i64) -> i64,
            >(ptr)(a, b, c, d),
            _ => unreachable!("arity is checked against MAX_CALL_ARGS"),
        }
    }
}

/// When to emit ANSI colour codes in log output.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogColor {
    /// Colour when standard error is a terminal.
    #[default]
    Auto,
    Always,
    Never,
}
