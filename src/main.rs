mod audit;
mod auth_api;
mod cli;
mod config;
mod error;
mod identity;
mod prompt;
mod session;
mod token_store;
mod users;
mod views;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "useradmin", about = "Admin console for user accounts")]
pub struct Args {
    #[arg(long, help = "Config file path (applied over the default layers)")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "USERADMIN_BASE_URL", help = "API base URL")]
    pub base_url: Option<String>,

    #[arg(long, help = "Where the session tokens are kept")]
    pub session_file: Option<PathBuf>,

    #[arg(long, help = "Do not ask for confirmation before deleting")]
    pub yes: bool,

    #[arg(long, help = "Verbose output (session transitions)")]
    pub verbose: bool,

    #[arg(long, help = "Debug output (HTTP details and settings)")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Log in and keep the session
    Login {
        #[arg(long)]
        username: Option<String>,
        #[arg(long, env = "USERADMIN_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// End the session
    Logout,
    /// Renew the access token
    Refresh,
    /// Show who the session belongs to
    Whoami,
    /// List users
    List,
    /// Show one user
    Show { id: u64 },
    /// Create a user
    Create {
        #[command(flatten)]
        fields: users::UserFields,
    },
    /// Edit a user
    Edit {
        id: u64,
        #[command(flatten)]
        fields: users::UserFields,
    },
    /// Delete a user
    Delete { id: u64 },
}

impl From<Command> for cli::Action {
    fn from(command: Command) -> Self {
        match command {
            Command::Login { username, password } => Self::Login { username, password },
            Command::Logout => Self::Logout,
            Command::Refresh => Self::Refresh,
            Command::Whoami => Self::Whoami,
            Command::List => Self::List,
            Command::Show { id } => Self::Show(id),
            Command::Create { fields } => Self::Save(None, fields),
            Command::Edit { id, fields } => Self::Save(Some(id), fields),
            Command::Delete { id } => Self::Delete(id),
        }
    }
}

fn init_logging(args: &Args) {
    let default_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args);

    let mut cfg = config::Config::load()?;
    if let Some(config_path) = &args.config {
        cfg.merge_file(config_path)?;
    }
    if let Some(base_url) = &args.base_url {
        cfg.api.base_url = base_url.clone();
    }
    if let Some(session_file) = &args.session_file {
        cfg.session.file = Some(session_file.clone());
    }

    if let Err(errors) = cfg.validate() {
        for e in &errors {
            eprintln!("Config error: {}", e);
        }
        bail!("invalid configuration");
    }

    let Some(session_file) = cfg.session_file() else {
        bail!("No home directory found; pass --session-file");
    };
    tracing::debug!(
        base_url = %cfg.api.base_url,
        session_file = %session_file.display(),
        "settings"
    );

    let run_id = uuid::Uuid::new_v4().to_string();
    let audit = match cfg.audit_file() {
        Some(path) => match audit::AuditLog::open(&path, &run_id) {
            Ok(log) => Some(log),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "audit journal disabled");
                None
            }
        },
        None => None,
    };

    let endpoint = auth_api::HttpAuthEndpoint::new(&cfg.api);
    let store = token_store::FileTokenStore::new(&session_file);
    let session_file = store.path().to_path_buf();
    let mut ctx = cli::Context {
        session: session::SessionManager::new(endpoint, store),
        users: Box::new(cfg.api.clone()),
        audit,
        run_id,
        session_file: Some(session_file),
        assume_yes: args.yes,
    };

    let Some(command) = args.command else {
        let prompter = prompt::LinePrompter::new().context("could not open the terminal")?;
        return cli::run_repl(&mut ctx, prompter);
    };

    let action = cli::Action::from(command);
    let outcome = if std::io::stdin().is_terminal() {
        let mut prompter = prompt::LinePrompter::new().context("could not open the terminal")?;
        cli::run_once(&mut ctx, &action, &mut prompter)?
    } else {
        cli::run_once(&mut ctx, &action, &mut prompt::NoPrompt)?
    };

    match outcome {
        views::Outcome::Done => Ok(()),
        views::Outcome::Failed => std::process::exit(1),
        views::Outcome::NeedsLogin => std::process::exit(2),
    }
}
