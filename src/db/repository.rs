//! The narrow storage interface the engine depends on.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::models::*;

/// Repository error types.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Not found")]
    NotFound,
    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

/// Storage port used by the monitoring engine.
///
/// The engine only reads targets and sinks and appends checks and alerts.
/// The check queries back the dashboard surface and the instance sweeper.
pub trait Repository: Send + Sync {
    /// All live (not soft-deleted) targets.
    fn list_targets(&self) -> Result<Vec<Target>, RepositoryError>;

    /// A single live target.
    fn get_target(&self, id: TargetId) -> Result<Option<Target>, RepositoryError>;

    fn append_check(&self, outcome: &ProbeOutcome) -> Result<(), RepositoryError>;

    /// Persist an alert and return its id.
    fn append_alert(&self, alert: &Alert) -> Result<i64, RepositoryError>;

    fn list_sinks(&self) -> Result<Vec<NotificationSink>, RepositoryError>;

    /// Checks for a target, newest first, bounded inclusively by `from`/`to`.
    fn list_checks(
        &self,
        target_id: TargetId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Check>, RepositoryError>;

    fn latest_check(&self, target_id: TargetId) -> Result<Option<Check>, RepositoryError>;
}
