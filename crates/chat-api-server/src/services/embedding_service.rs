use crate::config::EmbeddingConfig;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    content: String,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    input: Option<String>,
}

#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url,
            model: config.model,
            dimension: config.dimension,
        }
    }

    /// Generate an embedding for a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for {} chars", text.len());

        let request = EmbeddingRequest {
            content: text.to_string(),
            model: self.model.clone(),
            input: Some(text.to_string()), // Send both for compatibility
        };

        let url = format!("{}/embedding", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to connect to embedding server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let json_value: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse embedding response as JSON")?;

        let embedding = parse_embedding(&json_value)?;

        if embedding.is_empty() {
            anyhow::bail!("Generated embedding is empty");
        }

        if embedding.len() != self.dimension {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            );
        }

        Ok(embedding)
    }
}

/// Accepts llama.cpp ({"embedding": [...]}), OpenAI ({"data": [{"embedding":
/// [...]}]}) and bare-array response shapes.
fn parse_embedding(json_value: &serde_json::Value) -> Result<Vec<f32>> {
    let floats = |v: &serde_json::Value| -> Vec<f32> {
        v.as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|x| x.as_f64().map(|f| f as f32))
                    .collect()
            })
            .unwrap_or_default()
    };

    if json_value["embedding"].is_array() {
        return Ok(floats(&json_value["embedding"]));
    }

    if let Some(data) = json_value["data"].as_array() {
        if let Some(first) = data.first() {
            if first["embedding"].is_array() {
                return Ok(floats(&first["embedding"]));
            }
        }
        anyhow::bail!("Unrecognized embedding response format: {}", json_value);
    }

    if let Some(arr) = json_value.as_array() {
        if let Some(first) = arr.first() {
            if first["embedding"].is_array() {
                return Ok(floats(&first["embedding"]));
            }
        }
        return Ok(floats(json_value));
    }

    anyhow::bail!("Unrecognized embedding response format: {}", json_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_llama_cpp_shape() {
        let value = json!({"embedding": [0.1, 0.2, 0.3]});
        assert_eq!(parse_embedding(&value).unwrap().len(), 3);
    }

    #[test]
    fn parses_openai_data_shape() {
        let value = json!({"data": [{"embedding": [0.1, 0.2]}]});
        assert_eq!(parse_embedding(&value).unwrap().len(), 2);
    }

    #[test]
    fn parses_bare_array_shape() {
        let value = json!([0.5, 0.25]);
        assert_eq!(parse_embedding(&value).unwrap(), vec![0.5, 0.25]);
    }

    #[test]
    fn rejects_unknown_shape() {
        let value = json!({"vectors": true});
        assert!(parse_embedding(&value).is_err());
    }
}
