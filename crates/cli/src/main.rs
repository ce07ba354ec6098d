//! loopgate CLI: the main entry point.
//!
//! Commands:
//! - `run`      Send a message to the research agent
//! - `resume`   Deliver a verdict to a suspended session
//! - `sessions` List checkpointed sessions
//! - `show`     Print one session's conversation
//! - `abandon`  Delete a session
//! - `config`   Print the effective configuration

use clap::{Parser, Subcommand, ValueEnum};
use loopgate_config::LoopgateConfig;

mod commands;
mod demo;
mod terminal;

#[derive(Parser)]
#[command(
    name = "loopgate",
    about = "loopgate: human-in-the-loop tool calling",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// How `run` answers approval requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ApprovalMode {
    /// Ask on the terminal
    Prompt,
    /// Approve everything
    Auto,
    /// Deny everything
    Deny,
    /// Suspend and print a resume command
    Defer,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message to the agent
    Run {
        /// The user message
        #[arg(short, long)]
        message: String,

        /// Continue an existing session instead of starting a new one
        #[arg(short, long)]
        session: Option<String>,

        #[arg(long, value_enum, default_value = "prompt")]
        approval: ApprovalMode,

        /// Stream model text as it arrives
        #[arg(long)]
        stream: bool,
    },

    /// Deliver a verdict to a suspended session
    Resume {
        #[arg(short, long)]
        session: String,

        /// APPROVE or DENY
        #[arg(long)]
        verdict: String,

        /// The call the verdict is for (defaults to the pending one)
        #[arg(long)]
        call_id: Option<String>,

        /// How to answer any further approval requests
        #[arg(long, value_enum, default_value = "prompt")]
        approval: ApprovalMode,
    },

    /// List checkpointed sessions
    Sessions,

    /// Print a session's conversation
    Show {
        #[arg(short, long)]
        session: String,

        /// Dump the raw checkpointed state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a session
    Abandon {
        #[arg(short, long)]
        session: String,
    },

    /// Print the effective configuration
    Config {
        /// Print the config file path instead
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = LoopgateConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // RUST_LOG wins over --verbose, which wins over the config file
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }

    match cli.command {
        Commands::Run {
            message,
            session,
            approval,
            stream,
        } => commands::run::run(&config, message, session, approval, stream).await?,
        Commands::Resume {
            session,
            verdict,
            call_id,
            approval,
        } => commands::run::resume(&config, session, &verdict, call_id, approval).await?,
        Commands::Sessions => commands::sessions::list(&config).await?,
        Commands::Show { session, json } => commands::sessions::show(&config, session, json).await?,
        Commands::Abandon { session } => commands::sessions::abandon(&config, session).await?,
        Commands::Config { path } => commands::config_cmd::show(&config, path)?,
    }

    Ok(())
}
