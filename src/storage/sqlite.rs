use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

use super::*;

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS applications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        discord_user_id TEXT NOT NULL,
        discord_username TEXT NOT NULL,
        application_type TEXT NOT NULL,
        answers TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        reviewer_discord_id TEXT,
        review_reason TEXT,
        created_at TEXT NOT NULL,
        reviewed_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        action TEXT NOT NULL,
        user_discord_id TEXT,
        user_username TEXT,
        details TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
];

/// SQLite-backed store for applications and audit entries.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database and ensure the schema exists.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        info!("Database schema ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_time(table: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            reason: format!("bad timestamp '{raw}': {e}"),
        })
}

fn parse_user(table: &'static str, raw: &str) -> Result<UserId, StoreError> {
    raw.parse().map_err(|_| StoreError::Corrupt {
        table,
        reason: format!("bad user id '{raw}'"),
    })
}

fn application_from_row(row: &SqliteRow) -> Result<Application, StoreError> {
    let kind: String = row.try_get("application_type")?;
    let status: String = row.try_get("status")?;
    let answers: String = row.try_get("answers")?;
    let submitter: String = row.try_get("discord_user_id")?;
    let reviewer: Option<String> = row.try_get("reviewer_discord_id")?;
    let created_at: String = row.try_get("created_at")?;
    let reviewed_at: Option<String> = row.try_get("reviewed_at")?;

    Ok(Application {
        id: row.try_get("id")?,
        submitter_id: parse_user("applications", &submitter)?,
        submitter_name: row.try_get("discord_username")?,
        kind: kind.parse().map_err(|e: UnknownApplicationType| StoreError::Corrupt {
            table: "applications",
            reason: e.to_string(),
        })?,
        answers: serde_json::from_str(&answers)?,
        status: ApplicationStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
            table: "applications",
            reason: format!("unknown status '{status}'"),
        })?,
        reviewer_id: reviewer
            .as_deref()
            .map(|raw| parse_user("applications", raw))
            .transpose()?,
        review_reason: row.try_get("review_reason")?,
        created_at: parse_time("applications", &created_at)?,
        reviewed_at: reviewed_at
            .as_deref()
            .map(|raw| parse_time("applications", raw))
            .transpose()?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<LogEntry, StoreError> {
    let actor: Option<String> = row.try_get("user_discord_id")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(LogEntry {
        id: row.try_get("id")?,
        action: row.try_get("action")?,
        actor_id: actor.as_deref().map(|raw| parse_user("logs", raw)).transpose()?,
        actor_name: row.try_get("user_username")?,
        details: row.try_get("details")?,
        created_at: parse_time("logs", &created_at)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_application(&self, application: &NewApplication) -> Result<Application, StoreError> {
        let answers = serde_json::to_string(&application.answers)?;
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO applications (discord_user_id, discord_username, application_type, answers, status, created_at)
            VALUES (?1, ?2, ?3, ?4, 'pending', ?5)
            "#,
        )
        .bind(application.submitter_id.to_string())
        .bind(&application.submitter_name)
        .bind(application.kind.as_str())
        .bind(answers)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Application {
            id: result.last_insert_rowid(),
            submitter_id: application.submitter_id,
            submitter_name: application.submitter_name.clone(),
            kind: application.kind,
            answers: application.answers.clone(),
            status: ApplicationStatus::Pending,
            reviewer_id: None,
            review_reason: None,
            created_at,
            reviewed_at: None,
        })
    }

    async fn get_application(&self, id: i64) -> Result<Option<Application>, StoreError> {
        let row = sqlx::query("SELECT * FROM applications WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(application_from_row).transpose()
    }

    async fn list_applications(&self) -> Result<Vec<Application>, StoreError> {
        let rows = sqlx::query("SELECT * FROM applications ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(application_from_row).collect()
    }

    async fn finalize_application(&self, id: i64, decision: &ReviewDecision) -> Result<ReviewCommit, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE applications
            SET status = ?1, reviewer_discord_id = ?2, review_reason = ?3, reviewed_at = ?4
            WHERE id = ?5 AND status = 'pending'
            "#,
        )
        .bind(decision.status.as_str())
        .bind(decision.reviewer.to_string())
        .bind(&decision.reason)
        .bind(decision.reviewed_at.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        let current = self.get_application(id).await?;
        Ok(match (result.rows_affected(), current) {
            (_, None) => ReviewCommit::Missing,
            (0, Some(application)) => ReviewCommit::AlreadyFinalized(application),
            (_, Some(application)) => ReviewCommit::Committed(application),
        })
    }

    async fn append_log(&self, entry: &NewLogEntry) -> Result<LogEntry, StoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO logs (action, user_discord_id, user_username, details, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&entry.action)
        .bind(entry.actor_id.map(|id| id.to_string()))
        .bind(&entry.actor_name)
        .bind(&entry.details)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(LogEntry {
            id: result.last_insert_rowid(),
            action: entry.action.clone(),
            actor_id: entry.actor_id,
            actor_name: entry.actor_name.clone(),
            details: entry.details.clone(),
            created_at,
        })
    }

    async fn recent_logs(&self, limit: u32) -> Result<Vec<LogEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM logs ORDER BY id DESC LIMIT ?1")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(log_from_row).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Database connections closed");
    }
}
