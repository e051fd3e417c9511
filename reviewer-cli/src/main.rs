use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use reviewer_core::{PullRequestId, Team, TeamMember, TeamName, UserId};
use reviewer_engine::{
    Config, CreatePullRequest, Environment, ErrorKind, InMemoryRepository, SqliteRepository,
    StorageBackend, WorkflowEngine, WorkflowError,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_FAILURE: u8 = 1;
const EXIT_NOT_FOUND: u8 = 2;
const EXIT_CONFLICT: u8 = 3;
const EXIT_ALREADY_EXISTS: u8 = 4;

/// Reviewer: assign and rotate code reviewers across pull requests
#[derive(Parser, Debug)]
#[command(name = "reviewer")]
#[command(about = "Assign and rotate code reviewers across pull requests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create teams and inspect their members
    #[command(subcommand)]
    Team(TeamCommand),
    /// Change user activity and list a user's reviews
    #[command(subcommand)]
    User(UserCommand),
    /// Open, reassign, merge and inspect pull requests
    #[command(subcommand)]
    Pr(PrCommand),
}

#[derive(Subcommand, Debug)]
enum TeamCommand {
    /// Create a team, or add and update members of an existing one
    Add {
        #[arg(long)]
        team: String,

        /// Member as `<id>:<name>` or `<id>:<name>:inactive`
        #[arg(long = "member", required = true)]
        members: Vec<String>,
    },
    /// Show a team and its members
    Get {
        #[arg(long)]
        team: String,
    },
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Mark a user active or inactive for new assignments
    SetActive {
        #[arg(long)]
        user: String,

        #[arg(long, action = ArgAction::Set)]
        active: bool,
    },
    /// List pull requests the user is assigned to review, newest first
    Reviews {
        #[arg(long)]
        user: String,
    },
}

#[derive(Subcommand, Debug)]
enum PrCommand {
    /// Open a pull request and assign up to two reviewers
    Create {
        #[arg(long)]
        id: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        author: String,
    },
    /// Replace one assigned reviewer with another active teammate
    Reassign {
        #[arg(long)]
        id: String,

        #[arg(long)]
        old_reviewer: String,
    },
    /// Mark a pull request merged
    Merge {
        #[arg(long)]
        id: String,
    },
    /// Show a pull request
    Get {
        #[arg(long)]
        id: String,
    },
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// A failed command: the machine-readable code, a message and the exit status.
#[derive(Debug)]
struct Failure {
    code: &'static str,
    message: String,
    exit: u8,
}

impl Failure {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            code: "INVALID_REQUEST",
            message: message.into(),
            exit: EXIT_FAILURE,
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        Self {
            code: "INTERNAL_ERROR",
            message: format!("{:#}", err),
            exit: EXIT_FAILURE,
        }
    }
}

impl From<WorkflowError> for Failure {
    fn from(err: WorkflowError) -> Self {
        let exit = match err.kind() {
            ErrorKind::NotFound => EXIT_NOT_FOUND,
            ErrorKind::Conflict => EXIT_CONFLICT,
            ErrorKind::AlreadyExists => EXIT_ALREADY_EXISTS,
            ErrorKind::Internal => EXIT_FAILURE,
        };
        Self {
            code: err.code(),
            message: err.to_string(),
            exit,
        }
    }
}

fn init_tracing(environment: Environment) {
    let default_level = match environment {
        Environment::Local => "debug",
        Environment::Prod => "info",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries the JSON result; logs go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match environment {
        Environment::Local => builder.with_target(false).init(),
        Environment::Prod => builder.json().init(),
    }
}

fn open_engine(config: &Config) -> Result<WorkflowEngine> {
    match config.storage {
        StorageBackend::Sqlite => {
            let path = config.db_path();
            info!("Opening SQLite state at {}", path.display());
            let repository = SqliteRepository::new(&path)
                .with_context(|| format!("Failed to open database at {}", path.display()))?;
            Ok(WorkflowEngine::with_repository(Arc::new(repository)))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; state is discarded when the command exits");
            Ok(WorkflowEngine::with_repository(Arc::new(
                InMemoryRepository::new(),
            )))
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), Failure> {
    if value.trim().is_empty() {
        return Err(Failure::invalid(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Parse `<id>:<name>[:active|:inactive]`. Members are active unless marked
/// inactive. The name may itself contain `:`; only a trailing flag is split off.
fn parse_member(raw: &str) -> Result<TeamMember, Failure> {
    let (user_id, rest) = raw.split_once(':').unwrap_or((raw, ""));
    let (user_name, is_active) = match rest.rsplit_once(':') {
        Some((name, "inactive")) => (name, false),
        Some((name, "active")) => (name, true),
        _ => (rest, true),
    };

    if user_id.trim().is_empty() || user_name.trim().is_empty() {
        return Err(Failure::invalid(format!(
            "member '{}' must be <id>:<name>[:inactive]",
            raw
        )));
    }
    Ok(TeamMember::new(user_id, user_name, is_active))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, Failure> {
    serde_json::to_string_pretty(value)
        .context("Failed to serialize response")
        .map_err(Failure::internal)
}

async fn run(command: Commands, config: &Config) -> Result<String, Failure> {
    let engine = open_engine(config).map_err(Failure::internal)?;

    match command {
        Commands::Team(TeamCommand::Add { team, members }) => {
            require("team", &team)?;
            let members = members
                .iter()
                .map(|raw| parse_member(raw))
                .collect::<Result<Vec<_>, _>>()?;
            let saved = engine.save_team(Team::new(team, members)).await?;
            to_json(&saved)
        }
        Commands::Team(TeamCommand::Get { team }) => {
            require("team", &team)?;
            to_json(&engine.get_team(&TeamName::from(team)).await?)
        }
        Commands::User(UserCommand::SetActive { user, active }) => {
            require("user", &user)?;
            to_json(&engine.set_user_active(&UserId::from(user), active).await?)
        }
        Commands::User(UserCommand::Reviews { user }) => {
            require("user", &user)?;
            to_json(&engine.get_user_reviews(&UserId::from(user)).await?)
        }
        Commands::Pr(PrCommand::Create { id, name, author }) => {
            require("id", &id)?;
            require("name", &name)?;
            require("author", &author)?;
            let created = engine
                .create_pull_request(CreatePullRequest {
                    pull_request_id: PullRequestId::from(id),
                    pull_request_name: name,
                    author_id: UserId::from(author),
                })
                .await?;
            to_json(&created)
        }
        Commands::Pr(PrCommand::Reassign { id, old_reviewer }) => {
            require("id", &id)?;
            require("old-reviewer", &old_reviewer)?;
            let reassignment = engine
                .reassign_reviewer(&PullRequestId::from(id), &UserId::from(old_reviewer))
                .await?;
            to_json(&reassignment)
        }
        Commands::Pr(PrCommand::Merge { id }) => {
            require("id", &id)?;
            to_json(&engine.merge_pull_request(&PullRequestId::from(id)).await?)
        }
        Commands::Pr(PrCommand::Get { id }) => {
            require("id", &id)?;
            to_json(&engine.get_pull_request(&PullRequestId::from(id)).await?)
        }
    }
}

fn report(failure: Failure) -> ExitCode {
    debug!(code = failure.code, "Command failed: {}", failure.message);
    let body = ErrorResponse {
        error: ErrorDetail {
            code: failure.code,
            message: failure.message,
        },
    };
    match serde_json::to_string_pretty(&body) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize error response: {}", e),
    }
    ExitCode::from(failure.exit)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_FAILURE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(Environment::Local);
            return report(Failure::internal(
                e.context("Failed to load configuration from environment variables"),
            ));
        }
    };
    init_tracing(config.environment);

    match run(cli.command, &config).await {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(failure) => report(failure),
    }
}
