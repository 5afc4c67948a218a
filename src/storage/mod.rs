pub mod memory;
#[cfg(feature = "database")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::discord::types::UserId;

pub use memory::InMemoryStore;
#[cfg(feature = "database")]
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to encode answers: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt {table} row: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationType {
    Staff,
    Gsp,
    Fbi,
}

impl ApplicationType {
    pub const ALL: [ApplicationType; 3] = [Self::Staff, Self::Gsp, Self::Fbi];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Gsp => "gsp",
            Self::Fbi => "fbi",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Staff => "STAFF",
            Self::Gsp => "GSP",
            Self::Fbi => "FBI",
        }
    }
}

impl fmt::Display for ApplicationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown application type '{0}'")]
pub struct UnknownApplicationType(pub String);

impl FromStr for ApplicationType {
    type Err = UnknownApplicationType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staff" => Ok(Self::Staff),
            "gsp" => Ok(Self::Gsp),
            "fbi" => Ok(Self::Fbi),
            _ => Err(UnknownApplicationType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Denied,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Denied => "denied",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One question and the applicant's answer, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(alias = "q")]
    pub question: String,
    #[serde(alias = "a")]
    pub answer: String,
}

impl Answer {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub submitter_id: UserId,
    pub submitter_name: String,
    pub kind: ApplicationType,
    pub answers: Vec<Answer>,
    pub status: ApplicationStatus,
    pub reviewer_id: Option<UserId>,
    pub review_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewApplication {
    pub submitter_id: UserId,
    pub submitter_name: String,
    pub kind: ApplicationType,
    pub answers: Vec<Answer>,
}

/// Final decision written by a reviewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewDecision {
    pub status: ApplicationStatus,
    pub reviewer: UserId,
    pub reason: String,
    pub reviewed_at: DateTime<Utc>,
}

/// Result of a conditional pending -> final update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewCommit {
    Committed(Application),
    AlreadyFinalized(Application),
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub action: String,
    pub actor_id: Option<UserId>,
    pub actor_name: Option<String>,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    pub action: String,
    pub actor_id: Option<UserId>,
    pub actor_name: Option<String>,
    pub details: String,
}

impl NewLogEntry {
    pub fn new(action: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            actor_id: None,
            actor_name: None,
            details: details.into(),
        }
    }

    pub fn by(mut self, actor_id: UserId, actor_name: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id);
        self.actor_name = Some(actor_name.into());
        self
    }
}

/// Durable record of applications and audit entries.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_application(&self, application: &NewApplication) -> Result<Application, StoreError>;
    async fn get_application(&self, id: i64) -> Result<Option<Application>, StoreError>;
    /// Newest first.
    async fn list_applications(&self) -> Result<Vec<Application>, StoreError>;
    /// Moves a pending application to its final state; never touches a finalized row.
    async fn finalize_application(&self, id: i64, decision: &ReviewDecision) -> Result<ReviewCommit, StoreError>;
    async fn append_log(&self, entry: &NewLogEntry) -> Result<LogEntry, StoreError>;
    /// Newest first.
    async fn recent_logs(&self, limit: u32) -> Result<Vec<LogEntry>, StoreError>;
    async fn close(&self) {}
}
