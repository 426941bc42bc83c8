use super::{DbPool, Exchange};
use anyhow::Result;
use tracing::debug;

/// Storage seam for chat history. Trait so the memory and orchestration
/// layers can run against a test double instead of a live pool.
#[async_trait::async_trait]
pub trait ExchangeStore: Send + Sync {
    /// Append one exchange; the database assigns id and created_at.
    async fn insert_exchange(
        &self,
        user_id: Option<String>,
        question: &str,
        answer: &str,
    ) -> Result<Exchange>;

    /// Most recent exchanges for one user bucket, newest first. A `None`
    /// user id selects the anonymous (NULL) bucket, not all rows.
    async fn recent_exchanges(&self, user_id: Option<String>, limit: i64)
        -> Result<Vec<Exchange>>;
}

pub struct Repository {
    pub pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create the chat_history table if missing. Dev/demo convenience;
    /// production schema is managed out of band.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS chat_history (
                id BIGSERIAL PRIMARY KEY,
                user_id VARCHAR(64),
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#,
        )
        .execute(self.pool.get_pool())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_history_user_id ON chat_history (user_id)",
        )
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl ExchangeStore for Repository {
    async fn insert_exchange(
        &self,
        user_id: Option<String>,
        question: &str,
        answer: &str,
    ) -> Result<Exchange> {
        let exchange = sqlx::query_as::<_, Exchange>(
            r#"INSERT INTO chat_history (user_id, question, answer)
               VALUES ($1, $2, $3)
               RETURNING id, user_id, question, answer, created_at"#,
        )
        .bind(user_id.as_deref())
        .bind(question)
        .bind(answer)
        .fetch_one(self.pool.get_pool())
        .await?;

        debug!("Persisted exchange {} for user {:?}", exchange.id, user_id);

        Ok(exchange)
    }

    async fn recent_exchanges(
        &self,
        user_id: Option<String>,
        limit: i64,
    ) -> Result<Vec<Exchange>> {
        let exchanges = sqlx::query_as::<_, Exchange>(
            r#"SELECT id, user_id, question, answer, created_at
               FROM chat_history
               WHERE user_id IS NOT DISTINCT FROM $1
               ORDER BY id DESC
               LIMIT $2"#,
        )
        .bind(user_id.as_deref())
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;

        debug!(
            "Loaded {} recent exchanges for user {:?}",
            exchanges.len(),
            user_id
        );

        Ok(exchanges)
    }
}
