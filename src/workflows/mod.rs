pub mod applications;
pub mod info;
pub mod locks;
pub mod moderation;
pub mod tickets;
pub mod verification;

#[cfg(test)]
mod tests;

use std::fmt;
use std::future::Future;
use thiserror::Error;
use tracing::warn;

use crate::discord::types::{Permissions, RoleId, UserId};
use crate::discord::PlatformError;
use crate::identity::IdentityError;
use crate::storage::{ApplicationStatus, StoreError};

pub use locks::KeyedLocks;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("application #{id} was already {status}")]
    AlreadyFinalized { id: i64, status: ApplicationStatus },
    #[error("{operation} failed: {reason}")]
    External { operation: String, reason: String },
}

impl WorkflowError {
    pub fn external(operation: impl Into<String>, error: impl fmt::Display) -> Self {
        Self::External {
            operation: operation.into(),
            reason: error.to_string(),
        }
    }

    /// Text shown to the member who triggered the operation.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(message) | Self::Validation(message) | Self::PermissionDenied(message) => {
                format!("❌ {message}")
            }
            Self::AlreadyFinalized { id, status } => {
                format!("⚠️ Application #{id} has already been {status}.")
            }
            Self::External { operation, .. } => {
                format!("❌ Failed to {operation}. Please try again later or contact staff.")
            }
        }
    }
}

impl From<PlatformError> for WorkflowError {
    fn from(error: PlatformError) -> Self {
        Self::external("reach the platform", error)
    }
}

impl From<StoreError> for WorkflowError {
    fn from(error: StoreError) -> Self {
        Self::external("access the database", error)
    }
}

impl From<IdentityError> for WorkflowError {
    fn from(error: IdentityError) -> Self {
        Self::external("reach the Roblox API", error)
    }
}

/// Secondary actions performed after a workflow's authoritative step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SideEffect {
    AuditEntry,
    LogNotice,
    PublicNotice,
    DirectNotification,
    NoticeEdit,
    RoleGrant,
    Rename,
    AvatarLookup,
    WelcomeMessage,
    ClosingNotice,
    TranscriptUpload,
    ChannelDeletion,
    ExpiryTimer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectOutcome {
    Applied,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideEffectReport {
    pub effect: SideEffect,
    pub outcome: EffectOutcome,
}

/// Outcome of a workflow step plus a report for every side effect it attempted.
///
/// Side-effect failures never roll back the outcome; they are logged and reported here.
#[derive(Debug, Clone)]
pub struct Transition<T> {
    pub outcome: T,
    pub side_effects: Vec<SideEffectReport>,
}

impl<T> Transition<T> {
    pub fn new(outcome: T) -> Self {
        Self {
            outcome,
            side_effects: Vec::new(),
        }
    }

    /// Runs a best-effort side effect and records how it went.
    pub async fn attempt<V, E, F>(&mut self, effect: SideEffect, action: F) -> Option<V>
    where
        E: fmt::Display,
        F: Future<Output = Result<V, E>>,
    {
        match action.await {
            Ok(value) => {
                self.push(effect, EffectOutcome::Applied);
                Some(value)
            }
            Err(error) => {
                warn!(effect = ?effect, error = %error, "Side effect failed");
                self.push(effect, EffectOutcome::Failed(error.to_string()));
                None
            }
        }
    }

    pub fn skip(&mut self, effect: SideEffect, reason: impl Into<String>) {
        self.push(effect, EffectOutcome::Skipped(reason.into()));
    }

    pub fn applied(&mut self, effect: SideEffect) {
        self.push(effect, EffectOutcome::Applied);
    }

    fn push(&mut self, effect: SideEffect, outcome: EffectOutcome) {
        self.side_effects.push(SideEffectReport { effect, outcome });
    }

    pub fn outcome_of(&self, effect: SideEffect) -> Option<&EffectOutcome> {
        self.side_effects
            .iter()
            .rev()
            .find(|report| report.effect == effect)
            .map(|report| &report.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = &SideEffectReport> {
        self.side_effects
            .iter()
            .filter(|report| matches!(report.outcome, EffectOutcome::Failed(_)))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Transition<U> {
        Transition {
            outcome: f(self.outcome),
            side_effects: self.side_effects,
        }
    }
}

/// The member who triggered an interaction, as seen by the workflows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub username: String,
    pub roles: Vec<RoleId>,
    pub permissions: Permissions,
}

impl Actor {
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            roles: Vec::new(),
            permissions: Permissions::empty(),
        }
    }

    pub fn with_roles(mut self, roles: Vec<RoleId>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_administrator(&self) -> bool {
        self.permissions.contains(Permissions::ADMINISTRATOR)
    }
}
