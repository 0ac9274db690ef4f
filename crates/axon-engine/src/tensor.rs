//! ONNX tensor engine
//!
//! Runs named-tensor inference over a locally fetched ONNX graph with
//! tract. The graph is typed but never optimized: no fusion, no constant
//! folding passes that could reorder floating-point evaluation, and
//! execution is single-plan sequential on CPU. Output must be bitwise
//! identical across machines running the same engine version.

use crate::error::{EngineError, Result};
use crate::input::EngineInput;
use crate::{ComputeEngine, EngineSession, ModelSource};
use async_trait::async_trait;
use axon_types::{EngineKind, EngineParams, NamedTensor, StructuredOutput};
use std::sync::Arc;
use tract_onnx::prelude::*;

pub struct TensorEngine;

impl TensorEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TensorEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComputeEngine for TensorEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Tensor
    }

    async fn prepare(&self, model: &ModelSource) -> Result<Box<dyn EngineSession>> {
        let handle = match model {
            ModelSource::Artifact(handle) => handle.clone(),
            ModelSource::Identifier(id) => {
                return Err(EngineError::Load(format!(
                    "tensor engine requires a fetched model artifact, got identifier '{}'",
                    id
                )))
            }
        };

        let model_ref = handle.content_address.clone();
        let path = handle.local_path.clone();

        let loaded = tokio::task::spawn_blocking(move || -> Result<LoadedModel> {
            let inference_model = tract_onnx::onnx()
                .model_for_path(&path)
                .map_err(|e| EngineError::Load(format!("cannot read ONNX graph: {}", e)))?;

            // Typed, not optimized: optimization passes may fuse or reorder
            // operations and change floating-point evaluation order.
            let typed = inference_model
                .into_typed()
                .map_err(|e| EngineError::Load(format!("cannot type ONNX graph: {}", e)))?;

            let input_names = typed
                .inputs
                .iter()
                .map(|outlet| outlet_name(&typed, *outlet))
                .collect();
            let output_names = typed
                .outputs
                .iter()
                .map(|outlet| outlet_name(&typed, *outlet))
                .collect();

            let plan = typed
                .into_runnable()
                .map_err(|e| EngineError::Load(format!("cannot plan ONNX graph: {}", e)))?;

            Ok(LoadedModel {
                plan: Arc::new(plan),
                input_names,
                output_names,
            })
        })
        .await
        .map_err(|e| EngineError::Load(format!("model load task failed: {}", e)))??;

        tracing::info!(
            model = %model_ref,
            inputs = ?loaded.input_names,
            outputs = ?loaded.output_names,
            "ONNX model loaded"
        );

        Ok(Box::new(TensorSession {
            model_ref,
            plan: loaded.plan,
            input_names: loaded.input_names,
            output_names: loaded.output_names,
        }))
    }
}

struct LoadedModel {
    plan: Arc<TypedRunnableModel<TypedModel>>,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

pub struct TensorSession {
    model_ref: String,
    plan: Arc<TypedRunnableModel<TypedModel>>,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

#[async_trait]
impl EngineSession for TensorSession {
    fn model_id(&self) -> &str {
        &self.model_ref
    }

    async fn execute(
        &self,
        input: &EngineInput,
        params: &EngineParams,
    ) -> Result<StructuredOutput> {
        crate::validate_params(params)?;

        let provided = match input {
            EngineInput::Tensors(tensors) => tensors,
            EngineInput::Prompts(_) => {
                return Err(EngineError::Input(
                    "tensor engine takes named tensors, got prompts".to_string(),
                ))
            }
        };

        // Feed in the model's declared input order, by name.
        // Keep owned `Tensor`s (which are `Send`) here; convert to the
        // non-`Send` `TValue` inside the blocking task below.
        let mut feeds: Vec<Tensor> = Vec::new();
        for name in &self.input_names {
            let tensor = provided
                .iter()
                .find(|t| &t.name == name)
                .ok_or_else(|| EngineError::Input(format!("missing input: {}", name)))?;
            if !tensor.is_well_formed() {
                return Err(EngineError::Input(format!(
                    "input '{}': shape {:?} does not hold {} values",
                    name,
                    tensor.shape,
                    tensor.values.len()
                )));
            }
            let fed = Tensor::from_shape(&tensor.shape, &tensor.values)
                .map_err(|e| EngineError::Input(format!("input '{}': {}", name, e)))?;
            feeds.push(fed);
        }

        let plan = Arc::clone(&self.plan);
        let output_names = self.output_names.clone();

        // tract evaluation is CPU-bound; keep it off the async executor
        let outputs = tokio::task::spawn_blocking(move || -> Result<Vec<NamedTensor>> {
            let feeds: TVec<TValue> = feeds.into_iter().map(|t| t.into()).collect();
            let produced = plan
                .run(feeds)
                .map_err(|e| EngineError::Execution(format!("inference failed: {}", e)))?;

            let mut materialized = Vec::with_capacity(produced.len());
            for (name, value) in output_names.iter().zip(produced.iter()) {
                let view = value.to_array_view::<f32>().map_err(|e| {
                    EngineError::Execution(format!(
                        "output '{}' has unsupported datum type: {}",
                        name, e
                    ))
                })?;
                materialized.push(NamedTensor {
                    name: name.clone(),
                    shape: view.shape().to_vec(),
                    values: view.iter().copied().collect(),
                });
            }
            Ok(materialized)
        })
        .await
        .map_err(|e| EngineError::Execution(format!("inference task failed: {}", e)))??;

        tracing::debug!(
            model = %self.model_ref,
            outputs = outputs.len(),
            "tensor inference complete"
        );

        Ok(StructuredOutput::Tensors(outputs))
    }
}

fn outlet_name(model: &TypedModel, outlet: OutletId) -> String {
    model
        .outlet_label(outlet)
        .map(|label| label.to_string())
        .unwrap_or_else(|| model.node(outlet.node).name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identifier_source_rejected() {
        let engine = TensorEngine::new();
        let result = engine
            .prepare(&ModelSource::Identifier("resnet50".to_string()))
            .await;
        assert!(matches!(result, Err(EngineError::Load(_))));
    }

    #[tokio::test]
    async fn test_unreadable_model_is_load_error() {
        let engine = TensorEngine::new();
        let handle = axon_types::ArtifactHandle {
            content_address: "ipfs://QmMissing".to_string(),
            local_path: std::path::PathBuf::from("/nonexistent/model.onnx"),
            size_bytes: 0,
            origin: axon_types::ArtifactOrigin::RemoteFetched,
        };
        let result = engine.prepare(&ModelSource::Artifact(handle)).await;
        assert!(matches!(result, Err(EngineError::Load(_))));
    }
}
