mod cmd;
mod messages;
mod output;
mod root;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use cmd::Context;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "deployq",
    about = "One deploy at a time per channel: claim the slot, queue behind it, hand it on",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .deployq/ or .git/)
    #[arg(long, global = true, env = "DEPLOYQ_ROOT")]
    root: Option<PathBuf>,

    /// Channel whose deploy slot to use
    #[arg(long, global = true, env = "DEPLOYQ_CHANNEL", default_value = "default")]
    channel: String,

    /// Your user id (defaults to the user name)
    #[arg(long, global = true, env = "DEPLOYQ_USER_ID")]
    user_id: Option<String>,

    /// Your display name
    #[arg(long, global = true, env = "DEPLOYQ_USER_NAME")]
    user_name: Option<String>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Announce a deploy; queues behind the current one if the slot is taken
    Start {
        /// What is being deployed; `@name` and `owner/repo#123` are picked up
        #[arg(required = true, trailing_var_arg = true)]
        subject: Vec<String>,
    },

    /// Finish your deploy and hand the slot to the next in line
    Done,

    /// Abort your deploy, optionally giving a reason
    Abort {
        #[arg(trailing_var_arg = true)]
        reason: Vec<String>,
    },

    /// Leave the queue without deploying
    Leave,

    /// Show who is deploying and who is waiting
    Status,

    /// Show finished and aborted deploys
    History {
        /// Only deploys started after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ctx = Context {
        root: root::resolve_root(cli.root.as_deref()),
        channel: cli.channel,
        user_id: cli.user_id,
        user_name: cli.user_name,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Start { subject } => cmd::deploy::start(&ctx, &subject).await,
        Commands::Done => cmd::deploy::done(&ctx).await,
        Commands::Abort { reason } => cmd::deploy::abort(&ctx, &reason).await,
        Commands::Leave => cmd::deploy::leave(&ctx).await,
        Commands::Status => cmd::status::status(&ctx),
        Commands::History { since } => cmd::status::history(&ctx, since),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
