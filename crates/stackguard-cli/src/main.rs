use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use stackguard_config::{ConfigLoader, LoadedConfig};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;

/// Stack guard diagnostics.
///
/// Inspects the recursion stack guard used by the interpreter: the current
/// thread's stack budget, how deep a script thread can recurse before the
/// guard stops it, and the effective configuration.
///
/// EXAMPLES:
///     stackguard stack --force         Check, then print the stack budget
///     stackguard probe --limit 10000   Recurse until the guard stops it
///     stackguard config --json         Show effective configuration
///
/// ENVIRONMENT VARIABLES:
///     STACKGUARD_JSON               Set to '1' for JSON output by default
///     STACKGUARD_FORCE_STACK        Check regardless of recursion levels
///     STACKGUARD_DISABLE_STACK      Disable stack checks
///     STACKGUARD_FORCE_POOL_STACK   Check on thread-pool threads too
///     STACKGUARD_EXTRA_SPACE        Extra bytes added to every check
///     STACKGUARD_MARGIN_PAGES       Safety margin in pages
///     RUST_LOG                      Log filter (overrides -v)
#[derive(Parser)]
#[command(name = "stackguard")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (default: stackguard.toml searched upwards)
    #[arg(long, short = 'c', global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the stack budget of the current thread
    ///
    /// Runs a stack check for the requested extra space, then prints used,
    /// allocated, extra, margin, maximum, reserve and commit sizes.
    ///
    /// EXAMPLES:
    ///     stackguard stack                  Print the budget
    ///     stackguard stack --force          Fail if the check fails
    ///     stackguard stack --extra 65536    Ask for 64K more stack
    Stack {
        /// Exit with an error when the check reports an overflow
        #[arg(long, short = 'f')]
        force: bool,
        /// Extra stack space to check for, in bytes
        #[arg(long, short = 'e', default_value_t = 0)]
        extra: usize,
        /// Output in JSON format
        #[arg(long, env = "STACKGUARD_JSON")]
        json: bool,
    },

    /// Recurse on a script thread until the guard stops it
    ///
    /// Each level consumes a stack frame of roughly the requested size and
    /// goes through the same policy and check an interpreter would.
    ///
    /// EXAMPLES:
    ///     stackguard probe                      Probe with 4K frames
    ///     stackguard probe --frame-size 65536   Probe with 64K frames
    ///     stackguard probe --limit 1000         Stop at depth 1000
    Probe {
        /// Approximate stack bytes per level (rounded up to 1K, 4K, 16K or 64K)
        #[arg(long, short = 's', default_value_t = 4096)]
        frame_size: usize,
        /// Maximum depth to recurse to
        #[arg(long, short = 'l')]
        limit: Option<usize>,
        /// Output in JSON format
        #[arg(long, env = "STACKGUARD_JSON")]
        json: bool,
    },

    /// Show the effective configuration
    ///
    /// EXAMPLES:
    ///     stackguard config           Print as TOML
    ///     stackguard config --json    Print as JSON
    Config {
        /// Output in JSON format
        #[arg(long, env = "STACKGUARD_JSON")]
        json: bool,
    },

    /// Generate shell completions
    ///
    /// EXAMPLES:
    ///     stackguard completions bash > ~/.local/share/bash-completion/completions/stackguard
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Stack { force, extra, json } => {
            let loaded = load_config(cli.config.as_ref())?;
            commands::stack::run(&loaded.config, force, extra, json)?;
        }
        Commands::Probe {
            frame_size,
            limit,
            json,
        } => {
            let loaded = load_config(cli.config.as_ref())?;
            commands::probe::run(&loaded.config, frame_size, limit, json)?;
        }
        Commands::Config { json } => {
            let loaded = load_config(cli.config.as_ref())?;
            commands::config::run(&loaded, json)?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let mut loader = ConfigLoader::new();
    match path {
        Some(path) => loader
            .load_from_file(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display())),
        None => {
            let cwd = std::env::current_dir()?;
            loader
                .load_from_directory(&cwd)
                .context("Failed to load configuration")
        }
    }
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_writer(io::stderr)
        .with_env_filter(env_filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install logger")
}
