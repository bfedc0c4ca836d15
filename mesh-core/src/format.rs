use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Raised when a payload cannot be serialized or unserialized.
#[derive(Debug, Clone)]
pub struct FormatError(pub String);

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "format error: {}", self.0)
    }
}

impl std::error::Error for FormatError {}

impl From<FormatError> for crate::error::MeshError {
    fn from(err: FormatError) -> Self {
        crate::error::MeshError::Internal(err.to_string())
    }
}

/// A wire serialization format.
pub trait Format: Send + Sync {
    fn name(&self) -> &'static str;
    fn mimetype(&self) -> &'static str;
    fn serialize(&self, value: &Value) -> Result<String, FormatError>;
    fn unserialize(&self, text: &str) -> Result<Value, FormatError>;
}

/// JSON, the default format on every transport.
pub struct Json;

impl Format for Json {
    fn name(&self) -> &'static str {
        "json"
    }

    fn mimetype(&self) -> &'static str {
        "application/json"
    }

    fn serialize(&self, value: &Value) -> Result<String, FormatError> {
        serde_json::to_string(value).map_err(|err| FormatError(err.to_string()))
    }

    fn unserialize(&self, text: &str) -> Result<Value, FormatError> {
        serde_json::from_str(text).map_err(|err| FormatError(err.to_string()))
    }
}

/// URL-encoded form pairs, used for HTTP query strings.
///
/// Only a top-level object can be represented. Nested values are carried as
/// JSON within the pair value; unserialization attempts the inverse and
/// falls back to the raw string.
pub struct UrlEncoded;

impl Format for UrlEncoded {
    fn name(&self) -> &'static str {
        "urlencoded"
    }

    fn mimetype(&self) -> &'static str {
        "application/x-www-form-urlencoded"
    }

    fn serialize(&self, value: &Value) -> Result<String, FormatError> {
        let members = match value {
            Value::Object(members) => members,
            Value::Null => return Ok(String::new()),
            _ => return Err(FormatError("urlencoded payloads must be objects".into())),
        };

        let mut encoder = form_urlencoded::Serializer::new(String::new());
        for (key, member) in members {
            let encoded = match member {
                Value::String(text) => text.clone(),
                other => serde_json::to_string(other).map_err(|err| FormatError(err.to_string()))?,
            };
            encoder.append_pair(key, &encoded);
        }
        Ok(encoder.finish())
    }

    fn unserialize(&self, text: &str) -> Result<Value, FormatError> {
        let mut members = Map::new();
        for (key, value) in form_urlencoded::parse(text.as_bytes()) {
            let parsed = serde_json::from_str(&value).unwrap_or(Value::String(value.into_owned()));
            members.insert(key.into_owned(), parsed);
        }
        Ok(Value::Object(members))
    }
}

/// Formats indexed by both name and mimetype.
#[derive(Clone, Default)]
pub struct FormatRegistry {
    formats: HashMap<String, Arc<dyn Format>>,
}

impl FormatRegistry {
    pub fn new() -> FormatRegistry {
        FormatRegistry::default()
    }

    /// The registry holding the standard formats.
    pub fn standard() -> FormatRegistry {
        let mut registry = FormatRegistry::new();
        registry.register(Arc::new(Json));
        registry.register(Arc::new(UrlEncoded));
        registry
    }

    pub fn register(&mut self, format: Arc<dyn Format>) {
        self.formats.insert(format.name().to_string(), format.clone());
        self.formats.insert(format.mimetype().to_string(), format);
    }

    /// Look a format up by name or mimetype; mimetype parameters
    /// (`; charset=...`) are ignored.
    pub fn get(&self, key: &str) -> Option<Arc<dyn Format>> {
        let key = key.split(';').next().unwrap_or(key).trim();
        self.formats.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}
