//! Generative text engine
//!
//! Client for a vLLM-style serving runtime speaking the OpenAI-compatible
//! HTTP API. Decoding must be effectively deterministic: the seed is always
//! pinned and sent with every request, temperature and nucleus/top-k
//! settings are fixed job parameters, and beam search is never requested.

use crate::error::{EngineError, Result};
use crate::input::EngineInput;
use crate::{ComputeEngine, EngineSession, ModelSource};
use async_trait::async_trait;
use axon_types::{EngineKind, EngineParams, StructuredOutput};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct GenerativeEngine {
    base_url: String,
    client: reqwest::Client,
}

impl GenerativeEngine {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| EngineError::Load(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl ComputeEngine for GenerativeEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Generative
    }

    async fn prepare(&self, model: &ModelSource) -> Result<Box<dyn EngineSession>> {
        let model_id = match model {
            ModelSource::Identifier(id) => id.clone(),
            ModelSource::Artifact(handle) => {
                return Err(EngineError::Load(format!(
                    "generative engine takes a model identifier, got artifact '{}'",
                    handle.content_address
                )))
            }
        };

        // The serving runtime owns model loading; prepare only confirms the
        // identifier is actually served.
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Load(format!("serving runtime unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(EngineError::Load(format!(
                "model listing failed: HTTP {}",
                response.status()
            )));
        }

        let listing: ModelList = response
            .json()
            .await
            .map_err(|e| EngineError::Load(format!("malformed model listing: {}", e)))?;

        if !listing.data.iter().any(|entry| entry.id == model_id) {
            return Err(EngineError::Load(format!(
                "model '{}' is not served at {}",
                model_id, self.base_url
            )));
        }

        tracing::info!(model = %model_id, endpoint = %self.base_url, "generative model resolved");

        Ok(Box::new(GenerativeSession {
            model_id,
            base_url: self.base_url.clone(),
            client: self.client.clone(),
        }))
    }
}

pub struct GenerativeSession {
    model_id: String,
    base_url: String,
    client: reqwest::Client,
}

#[async_trait]
impl EngineSession for GenerativeSession {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn execute(
        &self,
        input: &EngineInput,
        params: &EngineParams,
    ) -> Result<StructuredOutput> {
        crate::validate_params(params)?;

        let prompts = match input {
            EngineInput::Prompts(prompts) => prompts,
            EngineInput::Tensors(_) => {
                return Err(EngineError::Input(
                    "generative engine takes prompts, got tensors".to_string(),
                ))
            }
        };

        let request = CompletionRequest {
            model: &self.model_id,
            prompt: prompts,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            seed: params.seed,
        };

        let url = format!("{}/v1/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Execution(format!("completion request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(EngineError::Execution(format!(
                "completion failed: HTTP {}",
                response.status()
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Execution(format!("malformed completion: {}", e)))?;

        if completion.choices.len() != prompts.len() {
            return Err(EngineError::Execution(format!(
                "expected {} completions, got {}",
                prompts.len(),
                completion.choices.len()
            )));
        }

        // Choices arrive keyed by index; realign positionally with the
        // prompt list before anything downstream sees them.
        let mut choices = completion.choices;
        choices.sort_by_key(|choice| choice.index);
        let texts = choices.into_iter().map(|choice| choice.text).collect();

        tracing::debug!(
            model = %self.model_id,
            prompts = prompts.len(),
            "generative inference complete"
        );

        Ok(StructuredOutput::Texts(texts))
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a [String],
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    top_k: i32,
    seed: u64,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    index: usize,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_artifact_source_rejected() {
        let engine =
            GenerativeEngine::new("http://localhost:8000", Duration::from_secs(5)).unwrap();
        let handle = axon_types::ArtifactHandle {
            content_address: "ipfs://QmModel".to_string(),
            local_path: std::path::PathBuf::from("/tmp/model"),
            size_bytes: 0,
            origin: axon_types::ArtifactOrigin::RemoteFetched,
        };
        let result = engine.prepare(&ModelSource::Artifact(handle)).await;
        assert!(matches!(result, Err(EngineError::Load(_))));
    }

    #[test]
    fn test_request_serialization() {
        let prompts = vec!["hello".to_string()];
        let request = CompletionRequest {
            model: "m",
            prompt: &prompts,
            max_tokens: 10,
            temperature: 0.0,
            top_p: 1.0,
            top_k: -1,
            seed: 0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "m");
        assert_eq!(json["prompt"][0], "hello");
        assert_eq!(json["seed"], 0);
        assert_eq!(json["top_k"], -1);
    }
}
