use crate::models::chat::{ChatRequest, ChatResponse};
use crate::services::ChatOrchestrator;
use crate::utils::error::ApiError;
use axum::{extract::Extension, Json};
use std::sync::Arc;
use tracing::info;

pub async fn chat_handler(
    Extension(orchestrator): Extension<Arc<ChatOrchestrator>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    // Validation boundary: empty questions never reach retrieval/generation.
    let question = request.question.trim();
    if question.is_empty() {
        return Err(ApiError::BadRequest(
            "Question must not be empty".to_string(),
        ));
    }

    info!(
        "Chat request: user={:?}, question_len={}",
        request.user_id,
        question.len()
    );

    let result = orchestrator
        .handle(request.user_id.as_deref(), question)
        .await?;

    Ok(Json(ChatResponse {
        answer: result.answer,
        sources: result.sources,
    }))
}
