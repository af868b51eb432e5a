// Tidings CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Flags override TIDINGS_* env vars, which override built-in defaults.

mod commands;
mod output;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tidings_core::{AuthUser, PipelineConfig, SessionProvider, StaticSession};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tidings")]
#[command(about = "Tidings CLI - Watch live notifications and manage notification history")]
#[command(version)]
pub struct Cli {
    /// Notification API base URL
    #[arg(
        long,
        env = "TIDINGS_API_URL",
        default_value = "http://localhost:3000/api"
    )]
    pub api_url: String,

    /// Event stream URL (live stream disabled when empty)
    #[arg(long, env = "TIDINGS_SSE_URL")]
    pub sse_url: Option<String>,

    /// Bearer token of the signed-in user
    #[arg(long, env = "TIDINGS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the live pipeline and print notifications as they arrive
    Watch {
        /// Read push payloads as JSON lines from stdin
        #[arg(long)]
        push_stdin: bool,

        /// Additional named event channels (repeatable)
        #[arg(long, short)]
        channel: Vec<String>,
    },

    /// List notification history
    History,

    /// Mark one notification as read
    MarkRead {
        /// Notification ID
        id: String,
    },

    /// Mark every unread notification as read
    MarkAllRead,

    /// Delete all notifications
    Clear,
}

impl Cli {
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = PipelineConfig::from_env()?.with_api_url(self.api_url.clone());
        if let Some(sse_url) = &self.sse_url {
            config = config.with_sse_url(sse_url.clone());
        }
        config.validate()?;
        Ok(config)
    }

    fn session(&self) -> Arc<dyn SessionProvider> {
        match &self.token {
            Some(token) => Arc::new(StaticSession::signed_in(AuthUser::new("cli", token.clone()))),
            None => Arc::new(StaticSession::anonymous()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded environment from {}", path.display());
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tidings=info,tidings_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.pipeline_config()?;
    let session = cli.session();
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Watch {
            push_stdin,
            channel,
        } => {
            let mut channels = config.channels.clone();
            channels.extend(channel);
            commands::watch::run(
                config.with_channels(channels),
                session,
                output_format,
                cli.quiet,
                push_stdin,
            )
            .await
        }
        Commands::History => {
            let store = commands::history::store(&config, session);
            commands::history::list(&store, output_format).await
        }
        Commands::MarkRead { id } => {
            let store = commands::history::store(&config, session);
            commands::history::mark_read(&store, output_format, cli.quiet, &id).await
        }
        Commands::MarkAllRead => {
            let store = commands::history::store(&config, session);
            commands::history::mark_all_read(&store, output_format, cli.quiet).await
        }
        Commands::Clear => {
            let store = commands::history::store(&config, session);
            commands::history::clear(&store, output_format, cli.quiet).await
        }
    }
}
