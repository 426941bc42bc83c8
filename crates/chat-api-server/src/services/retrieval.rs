use crate::config::VectorIndexConfig;
use crate::services::EmbeddingService;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// A text span returned by similarity search, with the identifier of the
/// document it came from when the index recorded one.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub content: String,
    pub source: Option<String>,
}

/// Read-only similarity search over the vector index. Idempotent; no retry
/// logic lives here, transient failures propagate to the caller.
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>>;
}

#[derive(Debug, Serialize)]
struct SearchRequest {
    vector: Vec<f32>,
    limit: usize,
    with_payload: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    #[serde(default)]
    payload: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ScoredPoint {
    fn into_passage(self) -> RetrievedPassage {
        let mut payload = self.payload.unwrap_or_default();

        // Ingestion writes "text"; LangChain-style payloads use "page_content".
        let content = ["text", "page_content", "content"]
            .iter()
            .find_map(|key| payload.remove(*key))
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        let source = payload
            .remove("source")
            .and_then(|v| v.as_str().map(str::to_string));

        RetrievedPassage { content, source }
    }
}

/// Qdrant-backed retriever. The collection is pre-provisioned with a vector
/// dimensionality matching the embedding model; that is a deployment-time
/// concern, not a per-request parameter.
pub struct QdrantRetriever {
    client: Client,
    base_url: String,
    collection: String,
    embedding_service: Arc<EmbeddingService>,
}

impl QdrantRetriever {
    pub fn new(config: VectorIndexConfig, embedding_service: Arc<EmbeddingService>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url,
            collection: config.collection,
            embedding_service,
        }
    }
}

#[async_trait::async_trait]
impl Retriever for QdrantRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>> {
        let vector = self.embedding_service.embed(query).await?;

        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection
        );

        let response = self
            .client
            .post(&url)
            .json(&SearchRequest {
                vector,
                limit: k,
                with_payload: true,
            })
            .send()
            .await
            .context("Failed to connect to vector index")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Vector index error ({}): {}", status, body);
        }

        let search: SearchResponse = response
            .json()
            .await
            .context("Failed to parse vector index response")?;

        let passages: Vec<RetrievedPassage> = search
            .result
            .into_iter()
            .map(ScoredPoint::into_passage)
            .collect();

        debug!("Retrieved {} passages for query", passages.len());

        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(payload: serde_json::Value) -> ScoredPoint {
        ScoredPoint {
            payload: payload.as_object().cloned(),
        }
    }

    #[test]
    fn passage_reads_text_and_source_from_payload() {
        let passage = point(json!({"text": "chunk body", "source": "faq.md"})).into_passage();
        assert_eq!(passage.content, "chunk body");
        assert_eq!(passage.source.as_deref(), Some("faq.md"));
    }

    #[test]
    fn passage_accepts_langchain_page_content_key() {
        let passage = point(json!({"page_content": "chunk body"})).into_passage();
        assert_eq!(passage.content, "chunk body");
        assert!(passage.source.is_none());
    }

    #[test]
    fn passage_tolerates_missing_payload_fields() {
        let passage = point(json!({})).into_passage();
        assert!(passage.content.is_empty());
        assert!(passage.source.is_none());
    }

    #[tokio::test]
    async fn same_query_twice_yields_the_same_ordered_passages() {
        use crate::config::EmbeddingConfig;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embedding"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"embedding": [0.1, 0.2, 0.3]})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/collections/faqs/points/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    {"payload": {"text": "first chunk", "source": "a.md"}},
                    {"payload": {"text": "second chunk", "source": "b.md"}}
                ]
            })))
            .mount(&server)
            .await;

        let embedding_service = Arc::new(EmbeddingService::new(EmbeddingConfig {
            base_url: server.uri(),
            model: "minilm".to_string(),
            dimension: 3,
        }));
        let retriever = QdrantRetriever::new(
            VectorIndexConfig {
                base_url: server.uri(),
                collection: "faqs".to_string(),
            },
            embedding_service,
        );

        let first = retriever.retrieve("how do refunds work?", 4).await.unwrap();
        let second = retriever.retrieve("how do refunds work?", 4).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first[0].source.as_deref(), Some("a.md"));
        assert_eq!(first[1].source.as_deref(), Some("b.md"));
        assert_eq!(first, second);
    }
}
