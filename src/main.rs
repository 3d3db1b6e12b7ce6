use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadmotion::cli::util::{CommandContext, OutputFormat, load_config};
use cadmotion::cli::commands;

#[derive(Parser)]
#[command(name = "cadmotion")]
#[command(
    version,
    about = "Translate CAD assembly archives and generate disassembly animations"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, help = "Use this config file instead of the layered defaults")]
    config: Option<PathBuf>,

    #[arg(long)]
    verbose: bool,

    #[arg(long, short)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a zipped CAD archive and follow its translation
    Submit {
        #[arg(help = "Path to the .zip archive")]
        archive: PathBuf,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: OutputFormat,
    },

    /// Show a job's status
    Status {
        #[arg(help = "Job identifier")]
        job_id: String,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: OutputFormat,
    },

    /// Generate an animation script for a completed job
    Animate {
        #[arg(help = "Job identifier")]
        job_id: String,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: OutputFormat,
        #[arg(long, short, help = "Write the script to a file")]
        output: Option<PathBuf>,
    },

    /// Issue a read-only viewer token for a job
    Token {
        #[arg(help = "Job identifier")]
        job_id: String,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: OutputFormat,
    },

    /// Remove job state past the retention window
    Sweep {
        #[arg(long = "dry-run", help = "Report what would be removed")]
        dry_run: bool,
        #[arg(long, conflicts_with = "dry_run", help = "Keep sweeping on the configured interval")]
        watch: bool,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: OutputFormat,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'g', long, help = "Show global config file only")]
        global: bool,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json, toml"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mcadmotion encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Call default hook for backtrace (if RUST_BACKTRACE=1)
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show { global, format } => {
                commands::config::show(global, &format)?;
            }
            ConfigAction::Path => {
                commands::config::path()?;
            }
            ConfigAction::Init { global, force } => {
                if global {
                    commands::config::init_global(force)?;
                } else {
                    commands::config::init_project()?;
                }
            }
        },
        Commands::Status { job_id, format } => {
            let config = load_config(config_path)?;
            let rt = Runtime::new()?;
            rt.block_on(commands::status::run(&config, &job_id, format))?;
        }
        Commands::Sweep {
            dry_run,
            watch,
            format,
        } => {
            let config = load_config(config_path)?;
            let rt = Runtime::new()?;
            if watch {
                rt.block_on(commands::sweep::watch(&config))?;
            } else {
                rt.block_on(commands::sweep::run(&config, dry_run, format))?;
            }
        }
        Commands::Submit { archive, format } => {
            let rt = Runtime::new()?;
            rt.block_on(async {
                let ctx = CommandContext::load(config_path)?;
                commands::submit::run(&ctx, &archive, format).await
            })?;
        }
        Commands::Animate {
            job_id,
            format,
            output,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(async {
                let ctx = CommandContext::load(config_path)?;
                commands::animate::run(&ctx, &job_id, format, output.as_deref()).await
            })?;
        }
        Commands::Token { job_id, format } => {
            let rt = Runtime::new()?;
            rt.block_on(async {
                let ctx = CommandContext::load(config_path)?;
                commands::token::run(&ctx, &job_id, format).await
            })?;
        }
    }

    Ok(())
}
