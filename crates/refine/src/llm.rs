use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ModelError;

/// The external model service consulted during refinement.
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Generate a completion that must be a JSON document.
    async fn generate_json(&self, prompt: &str) -> Result<String, ModelError>;

    /// Cheap reachability check made once before a refinement batch.
    async fn health_check(&self) -> Result<(), ModelError> {
        Ok(())
    }

    fn model_name(&self) -> &str;
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str, // "json" for structured output
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

impl OllamaClient {
    /// `endpoint` is either `host:port` or a full base URL.
    pub fn new(endpoint: &str, model: &str, timeout: Duration, temperature: f32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for the model service")?;

        Ok(Self {
            base_url: base_url(endpoint),
            model: model.to_string(),
            temperature,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn base_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    }
}

#[async_trait]
impl ModelService for OllamaClient {
    async fn generate_json(&self, prompt: &str) -> Result<String, ModelError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json", // Force JSON output
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ModelError::Status(response.status().as_u16()));
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        // JSON mode can still produce truncated output
        serde_json::from_str::<serde_json::Value>(&ollama_response.response)
            .map_err(|e| ModelError::InvalidResponse(format!("not JSON: {}", e)))?;

        Ok(ollama_response.response)
    }

    async fn health_check(&self) -> Result<(), ModelError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ModelError::Status(response.status().as_u16()));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        if tags.models.iter().any(|m| m.name.contains(&self.model)) {
            Ok(())
        } else {
            let available: Vec<_> = tags.models.into_iter().map(|m| m.name).collect();
            Err(ModelError::InvalidResponse(format!(
                "model {:?} not found, available: {:?}",
                self.model, available
            )))
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OllamaClient {
        OllamaClient::new(&server.uri(), "llama3", Duration::from_secs(5), 0.1).unwrap()
    }

    #[test]
    fn test_base_url_from_host_port() {
        assert_eq!(base_url("localhost:11434"), "http://localhost:11434");
        assert_eq!(base_url("https://models.example/"), "https://models.example");
    }

    #[tokio::test]
    async fn test_generate_json_returns_model_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "{\"type\": \"City\"}"
            })))
            .mount(&server)
            .await;

        let out = client(&server).generate_json("prompt").await.unwrap();
        assert_eq!(out, "{\"type\": \"City\"}");
    }

    #[tokio::test]
    async fn test_generate_json_rejects_non_json_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "City, probably"
            })))
            .mount(&server)
            .await;

        let err = client(&server).generate_json("prompt").await.unwrap_err();
        assert!(matches!(err, ModelError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server).generate_json("prompt").await.unwrap_err();
        assert!(matches!(err, ModelError::Status(503)));
    }

    #[tokio::test]
    async fn test_health_check_requires_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "mistral:latest"}]
            })))
            .mount(&server)
            .await;

        let err = client(&server).health_check().await.unwrap_err();
        assert!(err.to_string().contains("llama3"));
    }
}
