pub mod config;
pub mod error;
pub mod repository;
pub mod workflow;

pub use config::{Config, Environment, StorageBackend};
pub use error::{ConflictReason, ErrorKind, Missing, WorkflowError};
pub use repository::{Directory, InMemoryRepository, PullRequestStore, SqliteRepository};
pub use workflow::{CreatePullRequest, Reassignment, SavedTeam, UserReviews, WorkflowEngine};
