use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

/// Singleton database wrapper, same shape as the teacher's `Database`.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .context("failed to create database directory")?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to SQLite database")?;

        info!(db_url, "connected to database");

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS paper_positions (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                status TEXT NOT NULL,
                entry_price REAL NOT NULL,
                quantity REAL NOT NULL,
                leverage REAL NOT NULL,
                margin REAL NOT NULL,
                liquidation_price REAL NOT NULL,
                stop_loss REAL NOT NULL,
                take_profit REAL NOT NULL,
                open_time TEXT NOT NULL,
                close_time TEXT,
                close_price REAL,
                realized_pnl REAL NOT NULL DEFAULT 0,
                exit_reason TEXT,
                highest_price REAL NOT NULL DEFAULT 0,
                lowest_price REAL NOT NULL DEFAULT 0,
                signal_id TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create paper_positions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS paper_account (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                balance REAL NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create paper_account table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create settings table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                confidence REAL NOT NULL,
                entry_price REAL NOT NULL,
                stop_loss REAL NOT NULL,
                tp1 REAL NOT NULL,
                tp2 REAL NOT NULL,
                tp3 REAL NOT NULL,
                indicators_json TEXT NOT NULL,
                reasons_json TEXT NOT NULL,
                outcome_json TEXT,
                status TEXT NOT NULL,
                generated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create signals table")?;

        // Permissive migration: attempt to add columns that later schema
        // revisions introduced, discarding "duplicate column" errors.
        let _ = sqlx::query("ALTER TABLE signals ADD COLUMN outcome_json TEXT")
            .execute(&mut *conn)
            .await;

        info!("persistence schema initialised");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_creates_expected_tables() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table'")
            .fetch_all(&db.pool)
            .await
            .unwrap();
        let names: Vec<String> = rows.into_iter().map(|(n,)| n).collect();
        assert!(names.contains(&"paper_positions".to_string()));
        assert!(names.contains(&"paper_account".to_string()));
        assert!(names.contains(&"settings".to_string()));
        assert!(names.contains(&"signals".to_string()));
    }
}
