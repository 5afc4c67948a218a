use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::*;

#[derive(Debug, Default)]
struct Tables {
    applications: Vec<Application>,
    logs: Vec<LogEntry>,
}

/// Process-local store, used when the `database` feature is disabled and in tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_application(&self, application: &NewApplication) -> Result<Application, StoreError> {
        let mut tables = self.tables.lock().await;
        let stored = Application {
            id: tables.applications.len() as i64 + 1,
            submitter_id: application.submitter_id,
            submitter_name: application.submitter_name.clone(),
            kind: application.kind,
            answers: application.answers.clone(),
            status: ApplicationStatus::Pending,
            reviewer_id: None,
            review_reason: None,
            created_at: Utc::now(),
            reviewed_at: None,
        };
        tables.applications.push(stored.clone());
        Ok(stored)
    }

    async fn get_application(&self, id: i64) -> Result<Option<Application>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.applications.iter().find(|a| a.id == id).cloned())
    }

    async fn list_applications(&self) -> Result<Vec<Application>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.applications.iter().rev().cloned().collect())
    }

    async fn finalize_application(&self, id: i64, decision: &ReviewDecision) -> Result<ReviewCommit, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(application) = tables.applications.iter_mut().find(|a| a.id == id) else {
            return Ok(ReviewCommit::Missing);
        };
        if application.status != ApplicationStatus::Pending {
            return Ok(ReviewCommit::AlreadyFinalized(application.clone()));
        }
        application.status = decision.status;
        application.reviewer_id = Some(decision.reviewer);
        application.review_reason = Some(decision.reason.clone());
        application.reviewed_at = Some(decision.reviewed_at);
        Ok(ReviewCommit::Committed(application.clone()))
    }

    async fn append_log(&self, entry: &NewLogEntry) -> Result<LogEntry, StoreError> {
        let mut tables = self.tables.lock().await;
        let stored = LogEntry {
            id: tables.logs.len() as i64 + 1,
            action: entry.action.clone(),
            actor_id: entry.actor_id,
            actor_name: entry.actor_name.clone(),
            details: entry.details.clone(),
            created_at: Utc::now(),
        };
        tables.logs.push(stored.clone());
        Ok(stored)
    }

    async fn recent_logs(&self, limit: u32) -> Result<Vec<LogEntry>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.logs.iter().rev().take(limit as usize).cloned().collect())
    }
}
