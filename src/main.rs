//! fcall - call native library functions from the command line
//!
//! Main CLI entry point for inspecting the host calling convention,
//! resolving symbols and performing one-off dynamic calls.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use freecall::arch;
use freecall::ffi::{
    CallSignature, CallStub, LibraryHandle, Loader, OwnedArg, ReturnKind, CALLBACK_CAPACITY,
};
use freecall::FreecallConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fcall")]
#[command(version)]
#[command(about = "Call native shared-library functions without a bridge layer", long_about = None)]
struct Cli {
    /// Configuration file (default: freecall.toml in this or a parent directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the calling convention this build uses
    Info,

    /// Resolve a symbol and print its address
    Resolve {
        /// Library path or short name; `-` searches the whole process
        library: String,

        /// Exported symbol name
        symbol: String,
    },

    /// Call a function with `kind:value` arguments
    Call {
        /// Library path or short name; `-` searches the whole process
        library: String,

        /// Exported symbol name
        symbol: String,

        /// Return kind (void, i32, f64, ptr, text, ...)
        #[arg(short, long, default_value = "void")]
        returns: String,

        /// Number of fixed parameters of a variadic function
        #[arg(long, value_name = "N")]
        fixed: Option<usize>,

        /// Arguments such as i32:-7, f64:2.5, text:hello, ptr:0x1000
        #[arg(value_name = "KIND:VALUE", allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => FreecallConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => FreecallConfig::load_from_cwd().context("Failed to load freecall.toml")?,
    };
    init_logging(&config);

    match cli.command {
        Commands::Info => cmd_info(),
        Commands::Resolve { library, symbol } => cmd_resolve(&config, &library, &symbol),
        Commands::Call {
            library,
            symbol,
            returns,
            fixed,
            args,
        } => cmd_call(&config, &library, &symbol, &returns, fixed, &args),
    }
}

fn init_logging(config: &FreecallConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_info() -> Result<()> {
    let profile = arch::host_profile();
    println!("freecall {}", freecall::VERSION);
    println!("Architecture:       {}", arch::detect_arch());
    println!("Calling convention: {}", profile.convention);
    println!(
        "Integer arguments:  {}",
        profile.int_arg_registers.join(", ")
    );
    println!(
        "Float arguments:    {}",
        profile.float_arg_registers.join(", ")
    );
    println!(
        "Results:            {} / {}",
        profile.int_return_registers.join(", "),
        profile.float_return_registers.join(", ")
    );
    println!(
        "Stack:              {}-byte slots, {:?} packing, {} words max",
        profile.stack_slot_size, profile.stack_packing, profile.max_stack_words
    );
    println!("Variadic rule:      {:?}", profile.variadic);
    println!("Callback capacity:  {}", CALLBACK_CAPACITY);
    Ok(())
}

fn open(loader: &Loader, config: &FreecallConfig, library: &str) -> Result<LibraryHandle> {
    if library == "-" {
        return Ok(LibraryHandle::PROCESS);
    }
    let flags = config.loader.open_flags()?;
    // SAFETY: the user asked for this library; its initializers run as in
    // any dlopen.
    unsafe { loader.open_library(library, flags) }
        .with_context(|| format!("Failed to open {library}"))
}

fn cmd_resolve(config: &FreecallConfig, library: &str, symbol: &str) -> Result<()> {
    let loader = config.loader.build_loader();
    let handle = open(&loader, config, library)?;
    let address = loader.resolve(handle, symbol)?;
    println!("{symbol} = {address}");
    if !handle.is_process() {
        loader.close(handle)?;
    }
    Ok(())
}

fn cmd_call(
    config: &FreecallConfig,
    library: &str,
    symbol: &str,
    returns: &str,
    fixed: Option<usize>,
    raw_args: &[String],
) -> Result<()> {
    let Some(returns) = ReturnKind::parse(returns) else {
        bail!("Unknown return kind: {returns}");
    };
    let args = raw_args
        .iter()
        .map(|raw| {
            OwnedArg::parse(raw)
                .with_context(|| format!("Invalid argument '{raw}' (expected kind:value)"))
        })
        .collect::<Result<Vec<_>>>()?;

    let params = args.iter().map(OwnedArg::kind).collect();
    let signature = match fixed {
        Some(fixed) => CallSignature::variadic(params, returns, fixed),
        None => CallSignature::new(params, returns),
    };

    let loader = config.loader.build_loader();
    let handle = open(&loader, config, library)?;
    let address = loader.resolve(handle, symbol)?;

    // SAFETY: the signature comes from the command line; a wrong one is the
    // user's to answer for, exactly as in C.
    let stub = unsafe { CallStub::compile(signature, address) }?;
    let call_args: Vec<_> = args.iter().map(OwnedArg::as_arg).collect();
    let value = stub.call(&call_args)?;

    if !value.is_void() {
        println!("{value}");
    }
    if !handle.is_process() {
        loader.close(handle)?;
    }
    Ok(())
}
