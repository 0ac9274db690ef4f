//! Input materialization
//!
//! Fetched input artifacts are JSON documents. Tensor jobs carry an object
//! mapping input names to nested numeric arrays; generative jobs carry an
//! ordered prompt list, either bare or under a `prompts` key.

use crate::error::{EngineError, Result};
use axon_types::{EngineKind, NamedTensor};
use serde_json::Value;

/// Materialized job input, ordered
#[derive(Debug, Clone, PartialEq)]
pub enum EngineInput {
    Tensors(Vec<NamedTensor>),
    Prompts(Vec<String>),
}

impl EngineInput {
    pub fn prompts(&self) -> Option<&[String]> {
        match self {
            EngineInput::Prompts(p) => Some(p),
            EngineInput::Tensors(_) => None,
        }
    }
}

/// Parse raw input bytes for the given engine kind
pub fn parse_input(bytes: &[u8], kind: EngineKind) -> Result<EngineInput> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| EngineError::Input(format!("input is not valid JSON: {}", e)))?;

    match kind {
        EngineKind::Tensor => parse_tensor_input(&value),
        EngineKind::Generative => parse_prompt_input(&value),
    }
}

fn parse_tensor_input(value: &Value) -> Result<EngineInput> {
    let map = value
        .as_object()
        .ok_or_else(|| EngineError::Input("tensor input must be a JSON object".to_string()))?;

    if map.is_empty() {
        return Err(EngineError::Input("tensor input has no entries".to_string()));
    }

    let mut tensors = Vec::with_capacity(map.len());
    for (name, entry) in map {
        let (shape, values) = flatten_numeric(entry)
            .map_err(|reason| EngineError::Input(format!("input '{}': {}", name, reason)))?;
        tensors.push(NamedTensor {
            name: name.clone(),
            shape,
            values,
        });
    }
    Ok(EngineInput::Tensors(tensors))
}

fn parse_prompt_input(value: &Value) -> Result<EngineInput> {
    let list = match value {
        Value::Array(items) => items,
        Value::Object(map) => map
            .get("prompts")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                EngineError::Input("generative input must carry a 'prompts' array".to_string())
            })?,
        _ => {
            return Err(EngineError::Input(
                "generative input must be a prompt array".to_string(),
            ))
        }
    };

    let mut prompts = Vec::with_capacity(list.len());
    for item in list {
        match item.as_str() {
            Some(s) => prompts.push(s.to_string()),
            None => {
                return Err(EngineError::Input(
                    "prompt entries must be strings".to_string(),
                ))
            }
        }
    }

    if prompts.is_empty() {
        return Err(EngineError::Input("prompt list is empty".to_string()));
    }
    Ok(EngineInput::Prompts(prompts))
}

/// Flatten a nested numeric array to (shape, row-major values)
///
/// The nesting must be rectangular: every sub-array at the same depth has
/// the same length, and leaves are numbers at a uniform depth.
fn flatten_numeric(value: &Value) -> std::result::Result<(Vec<usize>, Vec<f32>), String> {
    let mut shape = Vec::new();
    let mut cursor = value;
    loop {
        match cursor {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err("empty dimension".to_string());
                }
                shape.push(items.len());
                cursor = &items[0];
            }
            Value::Number(_) => break,
            _ => return Err("expected nested numeric arrays".to_string()),
        }
    }

    let mut values = Vec::with_capacity(shape.iter().product());
    collect_values(value, &shape, 0, &mut values)?;
    Ok((shape, values))
}

fn collect_values(
    value: &Value,
    shape: &[usize],
    depth: usize,
    out: &mut Vec<f32>,
) -> std::result::Result<(), String> {
    if depth == shape.len() {
        let n = value
            .as_f64()
            .ok_or_else(|| format!("non-numeric leaf at depth {}", depth))?;
        if !n.is_finite() {
            return Err("non-finite number in input".to_string());
        }
        out.push(n as f32);
        return Ok(());
    }

    let items = value
        .as_array()
        .ok_or_else(|| format!("ragged nesting at depth {}", depth))?;
    if items.len() != shape[depth] {
        return Err(format!(
            "ragged dimension at depth {}: expected {}, got {}",
            depth,
            shape[depth],
            items.len()
        ));
    }
    for item in items {
        collect_values(item, shape, depth + 1, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tensor_input() {
        let input = parse_input(br#"{"x": [[1.0, 2.0]]}"#, EngineKind::Tensor).unwrap();
        match input {
            EngineInput::Tensors(tensors) => {
                assert_eq!(tensors.len(), 1);
                assert_eq!(tensors[0].name, "x");
                assert_eq!(tensors[0].shape, vec![1, 2]);
                assert_eq!(tensors[0].values, vec![1.0, 2.0]);
            }
            _ => panic!("expected tensors"),
        }
    }

    #[test]
    fn test_parse_tensor_integers_coerced() {
        let input = parse_input(br#"{"x": [1, 2, 3]}"#, EngineKind::Tensor).unwrap();
        match input {
            EngineInput::Tensors(tensors) => {
                assert_eq!(tensors[0].shape, vec![3]);
                assert_eq!(tensors[0].values, vec![1.0, 2.0, 3.0]);
            }
            _ => panic!("expected tensors"),
        }
    }

    #[test]
    fn test_ragged_tensor_rejected() {
        let result = parse_input(br#"{"x": [[1.0], [2.0, 3.0]]}"#, EngineKind::Tensor);
        assert!(matches!(result, Err(EngineError::Input(_))));
    }

    #[test]
    fn test_non_numeric_leaf_rejected() {
        let result = parse_input(br#"{"x": [["a"]]}"#, EngineKind::Tensor);
        assert!(matches!(result, Err(EngineError::Input(_))));
    }

    #[test]
    fn test_parse_bare_prompt_list() {
        let input = parse_input(br#"["a", "b"]"#, EngineKind::Generative).unwrap();
        assert_eq!(
            input.prompts().unwrap(),
            &["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_parse_wrapped_prompt_list() {
        let input = parse_input(br#"{"prompts": ["hello"]}"#, EngineKind::Generative).unwrap();
        assert_eq!(input.prompts().unwrap(), &["hello".to_string()]);
    }

    #[test]
    fn test_empty_prompts_rejected() {
        let result = parse_input(br#"[]"#, EngineKind::Generative);
        assert!(matches!(result, Err(EngineError::Input(_))));
    }

    #[test]
    fn test_invalid_json_rejected() {
        let result = parse_input(b"not json", EngineKind::Tensor);
        assert!(matches!(result, Err(EngineError::Input(_))));
    }
}
