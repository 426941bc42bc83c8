pub mod embedding_service;
pub mod generation;
pub mod invoker;
pub mod memory;
pub mod orchestrator;
pub mod retrieval;

pub use embedding_service::EmbeddingService;
pub use generation::{GeneratedAnswer, GenerationBackend, GenerationError, LlmBackend};
pub use invoker::{ResilientInvoker, RetryPolicy};
pub use memory::{ConversationMemory, ConversationWindow};
pub use orchestrator::{ChatOrchestrator, ChatResult};
pub use retrieval::{QdrantRetriever, RetrievedPassage, Retriever};
