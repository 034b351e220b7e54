
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{AnswerGenerator, EmbeddingProvider};
use crate::config::OllamaConfig;
use crate::{RagError, Result};

/// Returned when generation succeeds but the model sends back no text
pub const EMPTY_ANSWER_FALLBACK: &str = "Unable to generate response.";

const PASSAGE_DELIMITER: &str = "\n\n---\n\n";

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    embed_model: String,
    max_in_flight: usize,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> anyhow::Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            embed_model: config.embed_model.clone(),
            max_in_flight: config.max_in_flight,
            agent: build_agent(Duration::from_secs(config.timeout_secs)),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Check that the server answers at all
    #[inline]
    pub fn ping(&self) -> anyhow::Result<()> {
        let url = self
            .base_url
            .join("/api/version")
            .context("Failed to build ping URL")?;

        debug!("Pinging Ollama server at {}", url);

        self.agent
            .get(url.as_str())
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(describe_http_error)
            .context("Failed to ping Ollama server")?;

        debug!("Server ping successful");
        Ok(())
    }

    /// Test connection to the Ollama server and verify both models are pulled
    #[inline]
    pub fn health_check(&self) -> anyhow::Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().context("Server ping failed")?;

        for wanted in [&self.embed_model, &self.model] {
            validate_model(&models, wanted).context("Model validation failed")?;
        }

        info!(
            "Health check passed for Ollama server at {} with models {} and {}",
            self.base_url, self.embed_model, self.model
        );
        Ok(())
    }

    /// List all models available on the server
    #[inline]
    pub fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .agent
            .get(url.as_str())
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(describe_http_error)
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// POST a JSON body and decode the JSON reply.
    ///
    /// ureq is blocking, so the exchange runs on tokio's blocking pool.
    async fn post_json<B, R>(&self, endpoint: &str, body: &B) -> anyhow::Result<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(endpoint)
            .with_context(|| format!("Failed to build {} URL", endpoint))?;

        let request_json = serde_json::to_string(body)
            .with_context(|| format!("Failed to serialize {} request", endpoint))?;

        let agent = self.agent.clone();
        let response_text = tokio::task::spawn_blocking(move || {
            agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .await
        .context("HTTP worker task failed")?
        .map_err(describe_http_error)
        .with_context(|| format!("Request to {} failed", endpoint))?;

        serde_json::from_str(&response_text)
            .with_context(|| format!("Failed to parse {} response", endpoint))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        let request = EmbedRequest {
            model: &self.embed_model,
            prompt: text,
        };

        let response: EmbedResponse = self
            .post_json("/api/embeddings", &request)
            .await
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))?;

        if response.embedding.is_empty() {
            return Err(RagError::Embedding(format!(
                "Model '{}' returned an empty embedding",
                self.embed_model
            )));
        }

        debug!(
            "Generated embedding with {} dimensions",
            response.embedding.len()
        );
        Ok(response.embedding)
    }

    #[inline]
    fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}

#[async_trait]
impl AnswerGenerator for OllamaClient {
    async fn generate_answer(&self, question: &str, passages: &[String]) -> Result<String> {
        let prompt = build_answer_prompt(question, passages);
        debug!(
            "Generating answer from {} passages (prompt length: {})",
            passages.len(),
            prompt.len()
        );

        let request = GenerateRequest {
            model: &self.model,
            prompt: &prompt,
            stream: false,
        };

        let response: GenerateResponse = self
            .post_json("/api/generate", &request)
            .await
            .map_err(|e| RagError::Generation(format!("{:#}", e)))?;

        match response.response {
            Some(answer) if !answer.trim().is_empty() => Ok(answer),
            _ => {
                warn!("Model '{}' returned an empty answer", self.model);
                Ok(EMPTY_ANSWER_FALLBACK.to_string())
            }
        }
    }
}

/// Build the generation prompt: instructions, delimited context, then the question
#[inline]
pub fn build_answer_prompt(question: &str, passages: &[String]) -> String {
    let context = passages.join(PASSAGE_DELIMITER);

    format!(
        "You are a helpful assistant that answers questions about company policies and documents.\n\
         Use only the provided context to answer the user's question.\n\
         If the answer cannot be found in the context, say so clearly.\n\
         Always be concise and professional.\n\
         \n\
         Context:\n\
         {}\n\
         \n\
         Question: {}\n\
         \n\
         Please provide a clear and concise answer based on the context above.",
        context, question
    )
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

fn validate_model(models: &[ModelInfo], wanted: &str) -> anyhow::Result<()> {
    // Ollama reports "name:tag"; a bare name refers to ":latest"
    let matches = |name: &str| name == wanted || name == format!("{}:latest", wanted);

    if models.iter().any(|m| matches(&m.name)) {
        debug!("Model {} is available", wanted);
        return Ok(());
    }

    let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
    warn!(
        "Model {} not found. Available models: {:?}",
        wanted, available
    );
    Err(anyhow!(
        "Model '{}' is not available. Available models: {:?}",
        wanted,
        available
    ))
}

fn describe_http_error(error: ureq::Error) -> anyhow::Error {
    match error {
        ureq::Error::StatusCode(status) => anyhow!("Ollama responded with HTTP {}", status),
        other => anyhow!("Transport error: {}", other),
    }
}
