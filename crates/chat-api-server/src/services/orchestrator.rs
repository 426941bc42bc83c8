use crate::config::ChatConfig;
use crate::database::ExchangeStore;
use crate::services::generation::GenerationBackend;
use crate::services::invoker::ResilientInvoker;
use crate::services::memory::ConversationMemory;
use crate::services::retrieval::{RetrievedPassage, Retriever};
use crate::utils::error::ApiError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// The outward result of one chat request: an answer (possibly the degraded
/// placeholder) and the unique source identifiers behind it.
#[derive(Debug, Clone)]
pub struct ChatResult {
    pub answer: String,
    pub sources: Vec<String>,
}

/// Composes memory, retrieval, resilient generation and persistence for one
/// chat request.
pub struct ChatOrchestrator {
    memory: ConversationMemory,
    store: Arc<dyn ExchangeStore>,
    retriever: Arc<dyn Retriever>,
    primary: Arc<dyn GenerationBackend>,
    fallback: Arc<dyn GenerationBackend>,
    invoker: ResilientInvoker,
    config: ChatConfig,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<dyn ExchangeStore>,
        retriever: Arc<dyn Retriever>,
        primary: Arc<dyn GenerationBackend>,
        fallback: Arc<dyn GenerationBackend>,
        invoker: ResilientInvoker,
        config: ChatConfig,
    ) -> Self {
        Self {
            memory: ConversationMemory::new(store.clone()),
            store,
            retriever,
            primary,
            fallback,
            invoker,
            config,
        }
    }

    /// Handle one question. Persists exactly one exchange when some
    /// generation attempt produced an answer; persists nothing and returns
    /// the configured degraded answer when both backends failed. Storage
    /// errors propagate as hard request failures.
    pub async fn handle(
        &self,
        user_id: Option<&str>,
        question: &str,
    ) -> Result<ChatResult, ApiError> {
        let window = self
            .memory
            .load_window(user_id, self.config.memory_window)
            .await
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

        let passages = match self
            .retriever
            .retrieve(question, self.config.retrieval_top_k)
            .await
        {
            Ok(passages) => passages,
            Err(e) if self.config.degrade_on_retrieval_error => {
                warn!("Retrieval failed, answering without context: {}", e);
                Vec::new()
            }
            Err(e) => return Err(ApiError::RetrievalError(e.to_string())),
        };

        let outcome = self
            .invoker
            .invoke(
                self.primary.as_ref(),
                self.fallback.as_ref(),
                question,
                &passages,
                &window,
            )
            .await;

        let generated = match outcome {
            Some(generated) => generated,
            None => {
                // No answer from either backend: degraded response, nothing
                // written to history.
                return Ok(ChatResult {
                    answer: self.config.degraded_answer.clone(),
                    sources: Vec::new(),
                });
            }
        };

        let exchange = self
            .store
            .insert_exchange(user_id.map(str::to_string), question, &generated.answer)
            .await
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

        info!(
            "Chat exchange {} persisted for user {:?}",
            exchange.id, user_id
        );

        Ok(ChatResult {
            answer: generated.answer,
            sources: unique_sources(&generated.source_passages),
        })
    }
}

/// Source identifiers in first-seen order, duplicates and absent sources
/// dropped.
fn unique_sources(passages: &[RetrievedPassage]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for passage in passages {
        if let Some(source) = &passage.source {
            if seen.insert(source.clone()) {
                sources.push(source.clone());
            }
        }
    }
    sources
}
