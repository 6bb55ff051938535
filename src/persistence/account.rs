use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

/// Single-row table backing the paper account's balance.
pub struct AccountRepository {
    pool: SqlitePool,
}

impl AccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, balance: f64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO paper_account (id, balance) VALUES (1, ?)
            ON CONFLICT(id) DO UPDATE SET balance = excluded.balance
            "#,
        )
        .bind(balance)
        .execute(&self.pool)
        .await
        .context("failed to persist paper account balance")?;
        Ok(())
    }

    pub async fn load(&self) -> Result<Option<f64>> {
        let row = sqlx::query("SELECT balance FROM paper_account WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .context("failed to load paper account balance")?;
        row.map(|r| r.try_get::<f64, _>("balance").map_err(Into::into)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::db::Database;

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let repo = AccountRepository::new(db.pool.clone());
        assert_eq!(repo.load().await.unwrap(), None);

        repo.save(10_000.0).await.unwrap();
        assert_eq!(repo.load().await.unwrap(), Some(10_000.0));

        repo.save(9_850.25).await.unwrap();
        assert_eq!(repo.load().await.unwrap(), Some(9_850.25));
    }
}
