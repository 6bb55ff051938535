use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

/// Key/value backing store for `settings::Settings`'s durable copy. The
/// in-memory `Settings` holder is the source of truth during a run (and
/// itself persists via atomic JSON file); this repository additionally
/// records the same data in SQLite so `StateRecoveryService` has a single
/// place to query on restart.
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("failed to persist setting")?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("failed to load setting")?;
        row.map(|r| r.try_get::<String, _>("value").map_err(Into::into)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::db::Database;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let repo = SettingsRepository::new(db.pool.clone());
        assert_eq!(repo.get("risk_percent").await.unwrap(), None);

        repo.set("risk_percent", "1.5").await.unwrap();
        assert_eq!(repo.get("risk_percent").await.unwrap(), Some("1.5".to_string()));

        repo.set("risk_percent", "2.0").await.unwrap();
        assert_eq!(repo.get("risk_percent").await.unwrap(), Some("2.0".to_string()));
    }
}
