// Value Codecs
// Byte encodings used by durable intermediates and serialized materializations

use crate::error::{EngineError, EngineResult};
use crate::types::Value;

use std::fmt;

/// Converts values to and from bytes
pub trait Codec: Send + Sync + fmt::Debug {
    /// Short name, used in logs and materialization descriptions
    fn name(&self) -> &str;

    fn encode(&self, value: &Value) -> EngineResult<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> EngineResult<Value>;
}

/// Default codec for every type without a storage plugin
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn encode(&self, value: &Value) -> EngineResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> EngineResult<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct YamlCodec;

impl Codec for YamlCodec {
    fn name(&self) -> &str {
        "yaml"
    }

    fn encode(&self, value: &Value) -> EngineResult<Vec<u8>> {
        Ok(serde_yaml::to_string(value)?.into_bytes())
    }

    fn decode(&self, bytes: &[u8]) -> EngineResult<Value> {
        Ok(serde_yaml::from_slice(bytes)?)
    }
}

/// Raw UTF-8 text; only string values can be encoded
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl Codec for TextCodec {
    fn name(&self) -> &str {
        "text"
    }

    fn encode(&self, value: &Value) -> EngineResult<Vec<u8>> {
        match value {
            Value::String(s) => Ok(s.clone().into_bytes()),
            other => Err(EngineError::codec(format!(
                "text codec can only encode strings, got {}",
                other.preview(40)
            ))),
        }
    }

    fn decode(&self, bytes: &[u8]) -> EngineResult<Value> {
        String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(EngineError::codec)
    }
}
