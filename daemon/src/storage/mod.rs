//! SQLite persistence for the daemon.
//!
//! One pool per data directory. The `clone_tasks` table is the durable side
//! of the clone manager: a row exists exactly while the owning task has not
//! reached a terminal state, so an interrupted clone is picked up again on
//! the next startup scan.

use anyhow::Result;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};

/// One pending clone, as persisted. Column names are fixed by the legacy
/// table layout; note that `dest_id` holds the peer id and `worktree_parent`
/// holds the fully resolved worktree path.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CloneTaskRow {
    pub repo_id: String,
    pub repo_name: String,
    pub token: String,
    pub dest_id: String,
    pub worktree_parent: String,
    pub passwd: Option<String>,
    pub server_addr: String,
    pub server_port: String,
    pub email: String,
}

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("eddyd.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        // No schema-version table; migrations are additive and idempotent.
        for sql in [include_str!("migrations/001_init.sql")] {
            for stmt in sql.split(';') {
                let stmt = stmt.trim();
                if !stmt.is_empty() {
                    sqlx::query(stmt).execute(pool).await?;
                }
            }
        }
        Ok(())
    }

    // ─── Clone tasks ────────────────────────────────────────────────────────

    /// Replace the row keyed by `repo_id` atomically. Durable once this
    /// returns; admission relies on that ordering.
    pub async fn upsert_clone_task(&self, row: &CloneTaskRow) -> Result<()> {
        sqlx::query(
            "REPLACE INTO clone_tasks \
             (repo_id, repo_name, token, dest_id, worktree_parent, passwd, \
              server_addr, server_port, email) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.repo_id)
        .bind(&row.repo_name)
        .bind(&row.token)
        .bind(&row.dest_id)
        .bind(&row.worktree_parent)
        .bind(&row.passwd)
        .bind(&row.server_addr)
        .bind(&row.server_port)
        .bind(&row.email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_clone_task(&self, repo_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM clone_tasks WHERE repo_id = ?")
            .bind(repo_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All pending rows, in unspecified order. Used by the startup scan.
    pub async fn scan_clone_tasks(&self) -> Result<Vec<CloneTaskRow>> {
        Ok(sqlx::query_as("SELECT * FROM clone_tasks")
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn clone_task_exists(&self, repo_id: &str) -> Result<bool> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM clone_tasks WHERE repo_id = ?")
            .bind(repo_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 > 0)
    }
}
