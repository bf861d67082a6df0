//! Value transformers for transformable attributes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use docsync_codec::{from_cbor, parse_json, to_canonical_cbor, to_json, Value};

use crate::error::{CoreError, CoreResult};

/// Converts an application value to bytes and back.
///
/// Transformers are registered by name; transformable attributes refer to
/// them from the schema.
pub trait ValueTransformer: Send + Sync {
    /// Content type recorded on the attachment.
    fn content_type(&self) -> &str;

    /// Value to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented.
    fn transform(&self, value: &Value) -> CoreResult<Vec<u8>>;

    /// Bytes back to a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are malformed.
    fn reverse(&self, bytes: &[u8]) -> CoreResult<Value>;
}

/// Stores values as JSON text.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonTransformer;

impl ValueTransformer for JsonTransformer {
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn transform(&self, value: &Value) -> CoreResult<Vec<u8>> {
        let json = to_json(value)?;
        serde_json::to_vec(&json).map_err(|e| CoreError::invalid_document(e.to_string()))
    }

    fn reverse(&self, bytes: &[u8]) -> CoreResult<Value> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| CoreError::invalid_document(format!("transformed JSON: {e}")))?;
        Ok(parse_json(text)?)
    }
}

/// Stores values as canonical CBOR. Unlike JSON this keeps byte strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct CborTransformer;

impl ValueTransformer for CborTransformer {
    fn content_type(&self) -> &str {
        "application/cbor"
    }

    fn transform(&self, value: &Value) -> CoreResult<Vec<u8>> {
        Ok(to_canonical_cbor(value)?)
    }

    fn reverse(&self, bytes: &[u8]) -> CoreResult<Value> {
        Ok(from_cbor(bytes)?)
    }
}

/// Named transformers available to a datastore.
///
/// `"json"` and `"cbor"` are always registered.
#[derive(Clone)]
pub struct TransformerRegistry {
    transformers: HashMap<String, Arc<dyn ValueTransformer>>,
}

impl TransformerRegistry {
    /// Registry with the built-in transformers.
    #[must_use]
    pub fn new() -> Self {
        let mut transformers: HashMap<String, Arc<dyn ValueTransformer>> = HashMap::new();
        transformers.insert("json".to_string(), Arc::new(JsonTransformer));
        transformers.insert("cbor".to_string(), Arc::new(CborTransformer));
        Self { transformers }
    }

    /// Registers (or replaces) a transformer.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, transformer: Arc<dyn ValueTransformer>) -> Self {
        self.transformers.insert(name.into(), transformer);
        self
    }

    /// Looks up a transformer.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ValueTransformer>> {
        self.transformers.get(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transformers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_transformer_round_trip() {
        let value = Value::object([("k", Value::Array(vec![Value::Integer(1), Value::Null]))]);
        let bytes = JsonTransformer.transform(&value).unwrap();
        assert_eq!(bytes, br#"{"k":[1,null]}"#.to_vec());
        assert_eq!(JsonTransformer.reverse(&bytes).unwrap(), value);
    }

    #[test]
    fn cbor_transformer_keeps_bytes() {
        let value = Value::Bytes(vec![0, 1, 2]);
        assert!(JsonTransformer.transform(&value).is_err());
        let bytes = CborTransformer.transform(&value).unwrap();
        assert_eq!(CborTransformer.reverse(&bytes).unwrap(), value);
    }

    #[test]
    fn registry_builtins() {
        let registry = TransformerRegistry::new();
        assert_eq!(registry.names(), vec!["cbor", "json"]);
        assert!(registry.get("json").is_some());
        assert!(registry.get("xml").is_none());
    }
}
