mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tabrelay")]
#[command(about = "Drive a live web page through a local relay", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server (long-running daemon)
    Serve {
        /// Host to bind to (overrides config server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Execute a script snippet in the connected tab and print its result
    Run {
        /// Snippet to execute (reads stdin when neither this nor --file is given)
        code: Option<String>,

        /// Read the snippet from a file
        #[arg(short, long)]
        file: Option<String>,

        /// Give up after this many seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },

    /// Show relay health and connected browsers
    Status,

    /// Drain and print queued tab notifications
    Notifications,

    /// Ask the relay to re-initialize the in-page agent
    Reinit {
        /// Config object handed to the agent's init hook, as JSON
        #[arg(long, default_value = "{}")]
        config: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the loaded configuration
    Show,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            commands::serve::run(host, port).await?;
        }
        Commands::Run {
            code,
            file,
            timeout_secs,
        } => {
            commands::run_cmd::run(code, file, timeout_secs).await?;
        }
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Notifications => {
            commands::notifications::run().await?;
        }
        Commands::Reinit { config } => {
            commands::reinit::run(&config).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show()?;
            }
            ConfigCommands::Path => {
                commands::config_cmd::path();
            }
        },
    }

    Ok(())
}
