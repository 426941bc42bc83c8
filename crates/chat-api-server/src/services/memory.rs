use crate::database::{Exchange, ExchangeStore};
use crate::models::chat::ChatMessage;
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

/// Bounded, chronologically ordered slice of one user's recent history.
/// Derived per request from storage; `Clone` so primary and fallback
/// generation attempts each get an independent copy.
#[derive(Debug, Clone, Default)]
pub struct ConversationWindow {
    exchanges: Vec<Exchange>,
}

impl ConversationWindow {
    pub fn new(exchanges: Vec<Exchange>) -> Self {
        Self { exchanges }
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    /// Replay the window as alternating user/assistant prompt turns,
    /// oldest exchange first.
    pub fn as_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.exchanges.len() * 2);
        for exchange in &self.exchanges {
            messages.push(ChatMessage::user(exchange.question.clone()));
            messages.push(ChatMessage::assistant(exchange.answer.clone()));
        }
        messages
    }
}

/// Reconstructs conversation windows from persisted exchanges. Read-only;
/// storage failures propagate to the caller.
pub struct ConversationMemory {
    store: Arc<dyn ExchangeStore>,
}

impl ConversationMemory {
    pub fn new(store: Arc<dyn ExchangeStore>) -> Self {
        Self { store }
    }

    /// Load up to `limit` recent exchanges for the user bucket. Storage
    /// returns newest first; the window is reversed to chronological order
    /// before any prompt replay.
    pub async fn load_window(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<ConversationWindow> {
        let mut exchanges = self
            .store
            .recent_exchanges(user_id.map(str::to_string), limit as i64)
            .await?;
        exchanges.reverse();

        debug!(
            "Conversation window for user {:?}: {} exchanges",
            user_id,
            exchanges.len()
        );

        Ok(ConversationWindow::new(exchanges))
    }
}
