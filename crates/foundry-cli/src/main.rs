//! Foundry CLI - provision and reconcile a self-hosted platform stack

use clap::{Parser, Subcommand};
use foundry_component::InstallOptions;
use foundry_kube::CancelToken;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod display;
mod error;
mod exit_codes;

use commands::Context;
use error::{CliError, Result};

#[derive(Parser)]
#[command(name = "foundry")]
#[command(author = "Foundry Contributors")]
#[command(version)]
#[command(about = "Provision and reconcile a self-hosted platform stack", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Stack configuration file (default: ~/.config/foundry/stack.yaml)
    #[arg(long, global = true, env = "FOUNDRY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install and inspect stack components
    Component {
        #[command(subcommand)]
        command: ComponentCommands,
    },

    /// Manage the recorded setup state
    Setup {
        #[command(subcommand)]
        command: SetupCommands,
    },
}

#[derive(Subcommand)]
enum ComponentCommands {
    /// Install a component, or bring an existing one back to a healthy state
    Install {
        /// Component name (see `foundry component list`)
        name: String,

        /// Show what would be done without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Version to install instead of the configured or built-in default
        #[arg(long = "version", value_name = "VERSION")]
        component_version: Option<String>,

        /// Storage backend for the `storage` component
        #[arg(long, value_parser = ["local-path", "nfs"])]
        storage_backend: Option<String>,

        /// NFS server address (with --storage-backend nfs)
        #[arg(long)]
        nfs_server: Option<String>,

        /// Exported NFS path (with --storage-backend nfs)
        #[arg(long)]
        nfs_path: Option<String>,
    },

    /// Show the live status of a component
    Status {
        /// Component name
        name: String,
    },

    /// List registered components
    List,

    /// Uninstall a cluster component
    Uninstall {
        /// Component name
        name: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum SetupCommands {
    /// Clear the recorded installation flags (hosts are not touched)
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(debug)
        .init();
}

async fn run(cli: Cli, cancel: CancelToken) -> Result<()> {
    let ctx = Context::load(cli.config, cancel)?;

    match cli.command {
        Commands::Component { command } => match command {
            ComponentCommands::Install {
                name,
                dry_run,
                component_version,
                storage_backend,
                nfs_server,
                nfs_path,
            } => {
                let options = InstallOptions {
                    dry_run,
                    version: component_version,
                    storage_backend,
                    nfs_server,
                    nfs_path,
                };
                commands::install::run(&ctx, &name, options).await
            }
            ComponentCommands::Status { name } => commands::status::run(&ctx, &name).await,
            ComponentCommands::List => commands::list::run(&ctx),
            ComponentCommands::Uninstall { name, yes } => {
                commands::uninstall::run(&ctx, &name, yes).await
            }
        },
        Commands::Setup { command } => match command {
            SetupCommands::Reset { yes } => commands::reset::run(&ctx, yes),
        },
    }
}

fn main() -> ExitCode {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::USAGE_ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = err.print();
            return exit_code(code);
        }
    };
    init_tracing(cli.debug);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => return report(CliError::from(e)),
    };

    let result = runtime.block_on(async {
        // In-flight substrate calls are dropped once the token fires
        let (handle, cancel) = CancelToken::new();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, stopping");
                handle.cancel();
            }
        });
        run(cli, cancel).await
    });

    match result {
        Ok(()) => exit_code(exit_codes::SUCCESS),
        Err(err) => report(err),
    }
}

fn report(err: CliError) -> ExitCode {
    let code = err.exit_code();
    eprintln!("{:?}", miette::Report::new(err));
    exit_code(code)
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
