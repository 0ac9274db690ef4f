//! Commitment document construction
//!
//! Builds the JSON document whose canonical hash is submitted on-chain.
//! Tensor results commit to the bare output map, matching the engine's
//! declared outputs exactly. Generative results additionally bind the model
//! identifier, the sampling parameters and the prompts, so two runs that
//! happen to produce equal text under different configurations still commit
//! to different hashes.

use crate::{finite_number, CanonError, Result};
use axon_types::{EngineMetadata, NamedTensor, StructuredOutput};
use serde_json::{Map, Number, Value};

/// Build the document to hash for a finished execution
pub fn result_document(
    output: &StructuredOutput,
    metadata: &EngineMetadata,
    prompts: &[String],
) -> Result<Value> {
    match output {
        StructuredOutput::Tensors(tensors) => tensor_document(tensors),
        StructuredOutput::Texts(texts) => generative_document(texts, metadata, prompts),
    }
}

/// Bare output map: tensor name to nested numeric array
pub fn tensor_document(tensors: &[NamedTensor]) -> Result<Value> {
    let mut doc = Map::new();
    for tensor in tensors {
        doc.insert(tensor.name.clone(), nested_tensor(tensor)?);
    }
    Ok(Value::Object(doc))
}

/// Generated texts plus the configuration that produced them
pub fn generative_document(
    texts: &[String],
    metadata: &EngineMetadata,
    prompts: &[String],
) -> Result<Value> {
    let mut params = Map::new();
    params.insert(
        "max_tokens".to_string(),
        Value::Number(Number::from(metadata.params.max_tokens)),
    );
    params.insert(
        "temperature".to_string(),
        Value::Number(finite_number(metadata.params.temperature)?),
    );
    params.insert(
        "seed".to_string(),
        Value::Number(Number::from(metadata.params.seed)),
    );

    let mut doc = Map::new();
    doc.insert("model".to_string(), Value::String(metadata.model.clone()));
    doc.insert(
        "prompts".to_string(),
        Value::Array(prompts.iter().cloned().map(Value::String).collect()),
    );
    doc.insert(
        "outputs".to_string(),
        Value::Array(texts.iter().cloned().map(Value::String).collect()),
    );
    doc.insert("params".to_string(), Value::Object(params));
    Ok(Value::Object(doc))
}

/// Rebuild the nested array form from a row-major flattening
fn nested_tensor(tensor: &NamedTensor) -> Result<Value> {
    if !tensor.is_well_formed() {
        return Err(CanonError::MalformedTensor {
            name: tensor.name.clone(),
            shape: tensor.shape.clone(),
            values: tensor.values.len(),
        });
    }
    build_nested(&tensor.shape, &tensor.values)
}

fn build_nested(shape: &[usize], values: &[f32]) -> Result<Value> {
    match shape {
        [] => Ok(Value::Number(finite_number(f64::from(values[0]))?)),
        [n] => {
            let mut row = Vec::with_capacity(*n);
            for v in &values[..*n] {
                row.push(Value::Number(finite_number(f64::from(*v))?));
            }
            Ok(Value::Array(row))
        }
        [n, rest @ ..] => {
            let stride: usize = rest.iter().product();
            let mut outer = Vec::with_capacity(*n);
            for chunk in values.chunks(stride).take(*n) {
                outer.push(build_nested(rest, chunk)?);
            }
            Ok(Value::Array(outer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_value;
    use axon_types::{EngineKind, EngineParams};

    fn tensor(name: &str, shape: Vec<usize>, values: Vec<f32>) -> NamedTensor {
        NamedTensor {
            name: name.to_string(),
            shape,
            values,
        }
    }

    fn generative_metadata(max_tokens: u32) -> EngineMetadata {
        EngineMetadata {
            model: "m".to_string(),
            kind: EngineKind::Generative,
            params: EngineParams {
                max_tokens,
                temperature: 0.0,
                seed: 0,
                ..EngineParams::default()
            },
        }
    }

    #[test]
    fn test_tensor_document_shape() {
        let doc = tensor_document(&[tensor("y", vec![1, 1], vec![3.0])]).unwrap();
        let canonical = crate::to_canonical_json(&doc).unwrap();
        assert_eq!(canonical, r#"{"y":[[3.0]]}"#);
    }

    #[test]
    fn test_tensor_document_pinned_hash() {
        let output = StructuredOutput::Tensors(vec![tensor("y", vec![1, 1], vec![3.0])]);
        let doc = result_document(&output, &generative_metadata(100), &[]).unwrap();
        assert_eq!(
            hash_value(&doc).unwrap().to_hex(),
            "0x333f1d3deec43d6902ccd8c9efb03d97f6a166e74cde711e52117d9104cf8642"
        );
    }

    #[test]
    fn test_nested_reconstruction() {
        let doc = tensor_document(&[tensor("m", vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])])
            .unwrap();
        let canonical = crate::to_canonical_json(&doc).unwrap();
        assert_eq!(canonical, r#"{"m":[[1.0,2.0,3.0],[4.0,5.0,6.0]]}"#);
    }

    #[test]
    fn test_scalar_tensor() {
        let doc = tensor_document(&[tensor("s", vec![], vec![2.5])]).unwrap();
        let canonical = crate::to_canonical_json(&doc).unwrap();
        assert_eq!(canonical, r#"{"s":2.5}"#);
    }

    #[test]
    fn test_malformed_tensor_rejected() {
        let result = tensor_document(&[tensor("bad", vec![2, 2], vec![1.0])]);
        assert!(matches!(result, Err(CanonError::MalformedTensor { .. })));
    }

    #[test]
    fn test_non_finite_tensor_rejected() {
        let result = tensor_document(&[tensor("nan", vec![1], vec![f32::NAN])]);
        assert!(matches!(result, Err(CanonError::NonFiniteNumber(_))));
    }

    #[test]
    fn test_generative_document_pinned_hash() {
        let metadata = generative_metadata(64);
        let doc = generative_document(
            &["ok".to_string()],
            &metadata,
            &["p".to_string()],
        )
        .unwrap();
        let canonical = crate::to_canonical_json(&doc).unwrap();
        assert_eq!(
            canonical,
            r#"{"model":"m","outputs":["ok"],"params":{"max_tokens":64,"seed":0,"temperature":0.0},"prompts":["p"]}"#
        );
        assert_eq!(
            hash_value(&doc).unwrap().to_hex(),
            "0xd673e179a0ac2b879cfc77eccb6e0dc727c3a83838818a269a3200cf0383a79f"
        );
    }

    #[test]
    fn test_parameter_change_changes_hash() {
        // Identical output payload under different max_tokens must not
        // collide on the same commitment.
        let texts = vec!["same output".to_string()];
        let prompts = vec!["prompt".to_string()];

        let doc_a =
            generative_document(&texts, &generative_metadata(100), &prompts).unwrap();
        let doc_b =
            generative_document(&texts, &generative_metadata(200), &prompts).unwrap();

        assert_ne!(hash_value(&doc_a).unwrap(), hash_value(&doc_b).unwrap());
    }

    #[test]
    fn test_output_order_significant() {
        let metadata = generative_metadata(100);
        let prompts = vec!["a".to_string(), "b".to_string()];

        let doc_ab = generative_document(
            &["x".to_string(), "y".to_string()],
            &metadata,
            &prompts,
        )
        .unwrap();
        let doc_ba = generative_document(
            &["y".to_string(), "x".to_string()],
            &metadata,
            &prompts,
        )
        .unwrap();

        assert_ne!(hash_value(&doc_ab).unwrap(), hash_value(&doc_ba).unwrap());
    }
}
