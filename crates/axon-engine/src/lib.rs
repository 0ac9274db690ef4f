//! Compute Engine Capability
//!
//! Polymorphic execution contract for the worker: each engine kind turns a
//! model reference plus materialized input into structured output under a
//! strict determinism contract. Same engine version, same model, same
//! input, same parameters must yield bitwise-identical structured output on
//! every honest node.
//!
//! New engine kinds implement [`ComputeEngine`] and register with the
//! [`EngineRegistry`]; nothing downstream branches on concrete types.

pub mod error;
pub mod generative;
pub mod input;
pub mod tensor;

pub use error::{EngineError, Result};
pub use generative::GenerativeEngine;
pub use input::{parse_input, EngineInput};
pub use tensor::TensorEngine;

use async_trait::async_trait;
use axon_types::{ArtifactHandle, EngineKind, EngineParams, StructuredOutput};
use std::collections::HashMap;
use std::sync::Arc;

/// Where a session's model comes from
#[derive(Debug, Clone)]
pub enum ModelSource {
    /// A fetched content-addressed model artifact on disk
    Artifact(ArtifactHandle),
    /// A model identifier resolved by the engine's own runtime
    Identifier(String),
}

impl ModelSource {
    pub fn describe(&self) -> &str {
        match self {
            ModelSource::Artifact(handle) => &handle.content_address,
            ModelSource::Identifier(id) => id,
        }
    }
}

/// An engine variant able to prepare execution sessions
#[async_trait]
pub trait ComputeEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Load and validate the model, returning an executable session.
    /// Failures here are `EngineError::Load` and fatal for the job.
    async fn prepare(&self, model: &ModelSource) -> Result<Box<dyn EngineSession>>;
}

/// A prepared model, ready to execute inputs
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Model identifier recorded in the result metadata
    fn model_id(&self) -> &str;

    async fn execute(
        &self,
        input: &EngineInput,
        params: &EngineParams,
    ) -> Result<StructuredOutput>;

    /// Execute a large prompt list in fixed-size chunks
    ///
    /// Chunks run strictly sequentially, never interleaved, and outputs are
    /// concatenated in original prompt order, so the aggregate is
    /// indistinguishable from a single non-batched call over the same list.
    async fn execute_batch(
        &self,
        input: &EngineInput,
        params: &EngineParams,
    ) -> Result<StructuredOutput> {
        let prompts = match input {
            EngineInput::Prompts(prompts)
                if params.batch_size > 0 && prompts.len() > params.batch_size =>
            {
                prompts
            }
            _ => return self.execute(input, params).await,
        };

        let mut all = Vec::with_capacity(prompts.len());
        for chunk in prompts.chunks(params.batch_size) {
            let output = self
                .execute(&EngineInput::Prompts(chunk.to_vec()), params)
                .await?;
            match output {
                StructuredOutput::Texts(texts) => all.extend(texts),
                StructuredOutput::Tensors(_) => {
                    return Err(EngineError::Execution(
                        "batch chunk produced non-text output".to_string(),
                    ))
                }
            }
        }
        Ok(StructuredOutput::Texts(all))
    }
}

/// Reject parameter sets that could make decoding nondeterministic
pub fn validate_params(params: &EngineParams) -> Result<()> {
    if params.max_tokens == 0 {
        return Err(EngineError::Input("max_tokens must be positive".to_string()));
    }
    if !params.temperature.is_finite() || params.temperature < 0.0 {
        return Err(EngineError::Input(format!(
            "temperature must be a finite non-negative value, got {}",
            params.temperature
        )));
    }
    if !params.top_p.is_finite() || params.top_p <= 0.0 || params.top_p > 1.0 {
        return Err(EngineError::Input(format!(
            "top_p must be in (0, 1], got {}",
            params.top_p
        )));
    }
    if params.batch_size == 0 {
        return Err(EngineError::Input("batch_size must be positive".to_string()));
    }
    Ok(())
}

/// Engine lookup by kind, shared across all pipelines
#[derive(Default)]
pub struct EngineRegistry {
    engines: HashMap<EngineKind, Arc<dyn ComputeEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: Arc<dyn ComputeEngine>) {
        self.engines.insert(engine.kind(), engine);
    }

    pub fn get(&self, kind: EngineKind) -> Result<Arc<dyn ComputeEngine>> {
        self.engines.get(&kind).cloned().ok_or_else(|| {
            EngineError::Load(format!("no engine registered for kind '{}'", kind))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoSession;

    #[async_trait]
    impl EngineSession for EchoSession {
        fn model_id(&self) -> &str {
            "echo"
        }

        async fn execute(
            &self,
            input: &EngineInput,
            _params: &EngineParams,
        ) -> Result<StructuredOutput> {
            match input {
                EngineInput::Prompts(prompts) => Ok(StructuredOutput::Texts(
                    prompts.iter().map(|p| format!("{}!", p)).collect(),
                )),
                EngineInput::Tensors(_) => {
                    Err(EngineError::Input("echo takes prompts".to_string()))
                }
            }
        }
    }

    fn params_with_batch(batch_size: usize) -> EngineParams {
        EngineParams {
            batch_size,
            ..EngineParams::default()
        }
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let session = EchoSession;
        let prompts: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let input = EngineInput::Prompts(prompts);

        let batched = session
            .execute_batch(&input, &params_with_batch(2))
            .await
            .unwrap();
        let unbatched = session
            .execute(&input, &params_with_batch(2))
            .await
            .unwrap();

        assert_eq!(batched, unbatched);
        match batched {
            StructuredOutput::Texts(texts) => {
                assert_eq!(texts, vec!["a!", "b!", "c!"]);
            }
            _ => panic!("expected texts"),
        }
    }

    #[tokio::test]
    async fn test_small_batch_falls_through() {
        let session = EchoSession;
        let input = EngineInput::Prompts(vec!["only".to_string()]);
        let output = session
            .execute_batch(&input, &params_with_batch(8))
            .await
            .unwrap();
        assert_eq!(
            output,
            StructuredOutput::Texts(vec!["only!".to_string()])
        );
    }

    #[test]
    fn test_validate_params() {
        assert!(validate_params(&EngineParams::default()).is_ok());

        let zero_tokens = EngineParams {
            max_tokens: 0,
            ..EngineParams::default()
        };
        assert!(validate_params(&zero_tokens).is_err());

        let nan_temperature = EngineParams {
            temperature: f64::NAN,
            ..EngineParams::default()
        };
        assert!(validate_params(&nan_temperature).is_err());

        let bad_top_p = EngineParams {
            top_p: 0.0,
            ..EngineParams::default()
        };
        assert!(validate_params(&bad_top_p).is_err());

        let zero_batch = EngineParams {
            batch_size: 0,
            ..EngineParams::default()
        };
        assert!(validate_params(&zero_batch).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = EngineRegistry::new();
        assert!(matches!(
            registry.get(EngineKind::Tensor),
            Err(EngineError::Load(_))
        ));
    }
}
