//! Runtime state tracking: clean-shutdown detection.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

const CLEAN_SHUTDOWN_KEY: &str = "clean_shutdown";

impl Database {
    /// Check if the last shutdown was unclean
    ///
    /// Returns true if the previous session did not call [`Database::set_clean_shutdown`],
    /// meaning records may have been left enqueued or downloading by a crash. A fresh
    /// database (no session yet) counts as clean.
    pub async fn was_unclean_shutdown(&self) -> Result<bool> {
        let value = self.runtime_value(CLEAN_SHUTDOWN_KEY).await?;
        Ok(value.is_some_and(|v| v != "true"))
    }

    /// Mark that a session has started; cleared by [`Database::set_clean_shutdown`]
    pub async fn set_clean_start(&self) -> Result<()> {
        self.set_runtime_value(CLEAN_SHUTDOWN_KEY, "false").await
    }

    /// Mark that the session is ending gracefully
    pub async fn set_clean_shutdown(&self) -> Result<()> {
        self.set_runtime_value(CLEAN_SHUTDOWN_KEY, "true").await
    }

    async fn runtime_value(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read runtime state '{}': {}",
                    key, e
                )))
            })
    }

    async fn set_runtime_value(&self, key: &str, value: &str) -> Result<()> {
        let _writer = self.writer.lock().await;
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to write runtime state '{}': {}",
                key, e
            )))
        })?;

        Ok(())
    }
}
