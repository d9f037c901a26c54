//! Persistent log of conversation turns.
//!
//! The router reads it for repeated-greeting and repeated-question checks;
//! the chat service appends one row per completed turn.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::models::{millis_to_utc, ConversationTurn};

#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Records a turn. Failures are logged and swallowed: the answer has
    /// already been computed and must still reach the user.
    pub async fn append(&self, query: &str, response: &str) {
        if let Err(e) = self.try_append(query, response).await {
            tracing::error!(error = %e, "failed to store conversation turn");
        }
    }

    pub async fn try_append(&self, query: &str, response: &str) -> Result<i64> {
        let now = chrono::Utc::now().timestamp_millis();
        let result = sqlx::query(
            "INSERT INTO chat_history (user_query, bot_response, timestamp) VALUES (?, ?, ?)",
        )
        .bind(query)
        .bind(response)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn most_recent_turn(&self) -> Result<Option<ConversationTurn>> {
        let row = sqlx::query(
            "SELECT id, user_query, bot_response, timestamp FROM chat_history ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_turn(&r)))
    }

    /// Latest answer given to exactly this query string. The match is on the
    /// stored text as typed, so "Hi there" and "hi there" are different
    /// questions.
    pub async fn find_latest_answer(&self, exact_query: &str) -> Result<Option<String>> {
        let answer: Option<String> = sqlx::query_scalar(
            "SELECT bot_response FROM chat_history WHERE user_query = ? ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .bind(exact_query)
        .fetch_optional(&self.pool)
        .await?;

        Ok(answer)
    }

    pub async fn recent_history(&self, limit: i64) -> Result<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            "SELECT id, user_query, bot_response, timestamp FROM chat_history ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_turn).collect())
    }
}

fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> ConversationTurn {
    ConversationTurn {
        id: row.get("id"),
        user_query: row.get("user_query"),
        bot_response: row.get("bot_response"),
        timestamp: millis_to_utc(row.get("timestamp")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn store() -> (TempDir, HistoryStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("history.sqlite"))
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, HistoryStore::new(pool))
    }

    #[tokio::test]
    async fn empty_history_has_no_recent_turn() {
        let (_tmp, store) = store().await;
        assert!(store.most_recent_turn().await.unwrap().is_none());
        assert!(store.recent_history(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn most_recent_turn_is_last_appended() {
        let (_tmp, store) = store().await;
        store.append("first", "one").await;
        store.append("second", "two").await;

        let turn = store.most_recent_turn().await.unwrap().unwrap();
        assert_eq!(turn.user_query, "second");
        assert_eq!(turn.bot_response, "two");
    }

    #[tokio::test]
    async fn find_latest_answer_is_exact_and_most_recent() {
        let (_tmp, store) = store().await;
        store.append("What is 1?", "old").await;
        store.append("What is 1?", "new").await;

        assert_eq!(
            store.find_latest_answer("What is 1?").await.unwrap(),
            Some("new".to_string())
        );
        assert_eq!(store.find_latest_answer("what is 1?").await.unwrap(), None);
        assert_eq!(store.find_latest_answer(" What is 1?").await.unwrap(), None);
    }

    #[tokio::test]
    async fn recent_history_is_newest_first_and_limited() {
        let (_tmp, store) = store().await;
        for i in 0..5 {
            store.append(&format!("q{}", i), &format!("a{}", i)).await;
        }

        let turns = store.recent_history(3).await.unwrap();
        let queries: Vec<&str> = turns.iter().map(|t| t.user_query.as_str()).collect();
        assert_eq!(queries, vec!["q4", "q3", "q2"]);
    }
}
