use std::process::ExitCode;

use clap::{Parser, Subcommand};

use rigbeads::commands::agent::AgentCommand;
use rigbeads::commands::doctor::DoctorArgs;
use rigbeads::commands::redirect::{RedirectCommand, ResolveArgs};
use rigbeads::commands::routes::RoutesCommand;
use rigbeads::error::{BeadsError, ExitError};
use rigbeads::{commands, telemetry};

#[derive(Debug, Parser)]
#[command(
    name = "rigbeads",
    version,
    about = "Store redirects, prefix routing, and agent session beads for multi-rig agent fleets"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the canonical .beads store for a working directory
    Resolve(ResolveArgs),
    /// Manage worktree redirects
    Redirect {
        #[command(subcommand)]
        command: RedirectCommand,
    },
    /// Manage the town's prefix routing table
    Routes {
        #[command(subcommand)]
        command: RoutesCommand,
    },
    /// Agent session bead lifecycle
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },
    /// Check routes and worktree redirects, optionally repairing them
    Doctor(DoctorArgs),
    /// Print the JSON Schema for mayor/rigbeads.toml
    Schema,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Resolve(_) => "resolve",
            Self::Redirect { .. } => "redirect",
            Self::Routes { .. } => "routes",
            Self::Agent { .. } => "agent",
            Self::Doctor(_) => "doctor",
            Self::Schema => "schema",
        }
    }
}

fn main() -> ExitCode {
    let _telemetry = telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Resolve(args) => args.execute(),
        Commands::Redirect { command } => command.execute(),
        Commands::Routes { command } => command.execute(),
        Commands::Agent { command } => command.execute(),
        Commands::Doctor(args) => args.execute(),
        Commands::Schema => commands::schema::run_schema(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let exit_err = e
                .downcast_ref::<ExitError>()
                .or_else(|| e.downcast_ref::<BeadsError>().and_then(BeadsError::exit_error));
            if let Some(exit_err) = exit_err {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
