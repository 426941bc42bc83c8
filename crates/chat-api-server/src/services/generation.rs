use crate::config::LlmConfig;
use crate::models::chat::ChatMessage;
use crate::services::memory::ConversationWindow;
use crate::services::retrieval::RetrievedPassage;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Generation failures the invoker needs to tell apart: rate limiting is
/// transient and worth a bounded retry, anything else fails fast to the
/// fallback backend.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Generation failed: {0}")]
    Model(String),
}

/// Successful generation output: the answer text plus the passages the
/// prompt was grounded on, carried through for source attribution.
#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub answer: String,
    pub source_passages: Vec<RetrievedPassage>,
}

/// One text-generation backend (primary or fallback model).
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn generate(
        &self,
        question: &str,
        passages: &[RetrievedPassage],
        window: &ConversationWindow,
    ) -> Result<GeneratedAnswer, GenerationError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

/// OpenAI-compatible chat-completions backend.
pub struct LlmBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: usize,
    temperature: f32,
    system_prompt: String,
}

impl LlmBackend {
    pub fn new(config: &LlmConfig, model: String, system_prompt: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            system_prompt,
        }
    }

    /// System instruction + retrieved context, replayed history turns, then
    /// the current question.
    fn build_messages(
        &self,
        question: &str,
        passages: &[RetrievedPassage],
        window: &ConversationWindow,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(window.len() * 2 + 2);
        messages.push(ChatMessage::system(format!(
            "{}\n\n{}",
            self.system_prompt,
            format_context(passages)
        )));
        messages.extend(window.as_messages());
        messages.push(ChatMessage::user(question));
        messages
    }
}

fn format_context(passages: &[RetrievedPassage]) -> String {
    if passages.is_empty() {
        return String::from("No relevant context was found.");
    }

    let mut context = String::from("Relevant context:\n\n");
    for passage in passages {
        context.push_str(&format!(
            "[Source: {}]\n{}\n\n",
            passage.source.as_deref().unwrap_or("unknown"),
            passage.content
        ));
    }
    context
}

/// Best-effort answer extraction. A response of unexpected shape is coerced
/// to a string instead of failing the whole exchange; the flag reports
/// whether the typed completion shape actually parsed, since a coerced
/// answer cannot vouch for the context it was prompted with.
fn extract_answer(body: &str) -> (String, bool) {
    if let Ok(parsed) = serde_json::from_str::<ChatCompletionResponse>(body) {
        if let Some(choice) = parsed.choices.first() {
            return (choice.message.content.clone(), true);
        }
    }

    warn!("Unexpected completion response shape, coercing body to text");

    let answer = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        Err(_) => body.trim().to_string(),
    };
    (answer, false)
}

#[async_trait::async_trait]
impl GenerationBackend for LlmBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        question: &str,
        passages: &[RetrievedPassage],
        window: &ConversationWindow,
    ) -> Result<GeneratedAnswer, GenerationError> {
        let messages = self.build_messages(question, passages, window);
        debug!(
            "Calling model {} with {} messages",
            self.model,
            messages.len()
        );

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&request);

        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GenerationError::Model(format!("Failed to call LLM API: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::RateLimited(format!(
                "LLM API rate limited: {}",
                body
            )));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Model(format!(
                "LLM API error: {} - {}",
                status, body
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::Model(format!("Failed to read LLM response: {}", e)))?;

        let (answer, parsed) = extract_answer(&body);
        // A coerced answer carries no source attribution.
        let source_passages = if parsed { passages.to_vec() } else { Vec::new() };

        Ok(GeneratedAnswer {
            answer,
            source_passages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::database::Exchange;
    use chrono::Utc;

    fn config(base_url: &str) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            api_key: None,
            primary_model: "main".to_string(),
            fallback_model: "small".to_string(),
            timeout_seconds: 30,
            max_tokens: 512,
            temperature: 0.1,
            max_retries: 5,
            initial_backoff_seconds: 2,
            max_backoff_seconds: 60,
        }
    }

    fn backend() -> LlmBackend {
        LlmBackend::new(
            &config("http://localhost:8080"),
            "main".to_string(),
            "Answer from context.".to_string(),
        )
    }

    fn passage(content: &str, source: Option<&str>) -> RetrievedPassage {
        RetrievedPassage {
            content: content.to_string(),
            source: source.map(str::to_string),
        }
    }

    #[test]
    fn messages_are_system_history_then_question() {
        let window = ConversationWindow::new(vec![Exchange {
            id: 1,
            user_id: None,
            question: "earlier question".to_string(),
            answer: "earlier answer".to_string(),
            created_at: Utc::now(),
        }]);
        let passages = vec![passage("refund policy text", Some("policy.md"))];

        let messages = backend().build_messages("current question", &passages, &window);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("Answer from context."));
        assert!(messages[0].content.contains("refund policy text"));
        assert!(messages[0].content.contains("policy.md"));
        assert_eq!(messages[1], ChatMessage::user("earlier question"));
        assert_eq!(messages[2], ChatMessage::assistant("earlier answer"));
        assert_eq!(messages[3], ChatMessage::user("current question"));
    }

    #[test]
    fn context_notes_when_nothing_was_retrieved() {
        let messages = backend().build_messages("q", &[], &ConversationWindow::default());
        assert!(messages[0].content.contains("No relevant context"));
    }

    #[test]
    fn extracts_answer_from_completion_shape() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        assert_eq!(extract_answer(body), ("hello".to_string(), true));
    }

    #[test]
    fn coerces_unexpected_json_shape_to_text() {
        let body = r#"{"output":"raw model text"}"#;
        let (answer, parsed) = extract_answer(body);
        assert!(answer.contains("raw model text"));
        assert!(!parsed);
    }

    #[test]
    fn coerces_non_json_body_to_text() {
        assert_eq!(extract_answer("  plain text  "), ("plain text".to_string(), false));
    }

    #[tokio::test]
    async fn coerced_response_carries_no_source_attribution() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"output": "raw model text"})),
            )
            .mount(&server)
            .await;

        let backend = LlmBackend::new(
            &config(&server.uri()),
            "main".to_string(),
            "Answer from context.".to_string(),
        );
        let passages = vec![passage("refund policy text", Some("policy.md"))];

        let result = backend
            .generate("q", &passages, &ConversationWindow::default())
            .await
            .unwrap();

        assert!(result.answer.contains("raw model text"));
        assert!(result.source_passages.is_empty());
    }

    #[tokio::test]
    async fn well_formed_response_keeps_source_attribution() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "from context"}}]
            })))
            .mount(&server)
            .await;

        let backend = LlmBackend::new(
            &config(&server.uri()),
            "main".to_string(),
            "Answer from context.".to_string(),
        );
        let passages = vec![passage("refund policy text", Some("policy.md"))];

        let result = backend
            .generate("q", &passages, &ConversationWindow::default())
            .await
            .unwrap();

        assert_eq!(result.answer, "from context");
        assert_eq!(result.source_passages.len(), 1);
    }
}
