use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// One persisted question/answer pair. Rows are append-only; the core never
/// updates or deletes them.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Exchange {
    pub id: i64,
    pub user_id: Option<String>,
    pub question: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}
