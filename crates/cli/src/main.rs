//! Emberkeep command-line interface.
//!
//! Subcommands:
//! - `chat`    - Interactive session against the configured model backend
//! - `serve`   - Run the HTTP gateway
//! - `profile` - Show or update the durable profile
//! - `log`     - Inspect the episodic log

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "emberkeep",
    about = "Emberkeep - a local assistant that keeps its memory on disk",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant in an interactive loop
    Chat,

    /// Start the HTTP gateway server
    Serve {
        /// Override the configured bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show or update the durable profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Inspect the episodic log
    Log {
        #[command(subcommand)]
        command: LogCommands,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Print every profile field
    Show,

    /// Merge KEY=VALUE pairs into the profile
    Set {
        /// Fields to update, each as KEY=VALUE
        #[arg(required = true)]
        fields: Vec<String>,
    },
}

#[derive(Subcommand)]
enum LogCommands {
    /// Print the most recent episodes, newest last
    Tail {
        /// How many episodes to print
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Chat => commands::chat::run().await?,
        Commands::Serve { host, port } => commands::serve::run(host, port).await?,
        Commands::Profile { command } => match command {
            ProfileCommands::Show => commands::profile::show().await?,
            ProfileCommands::Set { fields } => commands::profile::set(fields).await?,
        },
        Commands::Log { command } => match command {
            LogCommands::Tail { count } => commands::log::tail(count).await?,
        },
    }

    Ok(())
}
