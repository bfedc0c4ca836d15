use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{json, Value};

use crate::status::Status;

/// Raised when a declarative construct (resource, endpoint, bundle, mount)
/// is shaped illegally.
#[derive(Debug, Clone)]
pub struct SpecificationError(pub String);

impl SpecificationError {
    pub fn new(message: impl Into<String>) -> Self {
        SpecificationError(message.into())
    }
}

impl fmt::Display for SpecificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "specification error: {}", self.0)
    }
}

impl std::error::Error for SpecificationError {}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorDetail {
    pub fn new(token: impl Into<String>) -> Self {
        ErrorDetail {
            token: token.into(),
            title: None,
            message: None,
        }
    }

    pub fn with_message(token: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorDetail {
            token: token.into(),
            title: None,
            message: Some(message.into()),
        }
    }

    fn serialize(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A structural (schema or validator) failure.
///
/// Carries flat errors plus per-attribute errors; serializes to the
/// canonical `{errors, structure}` payload returned with INVALID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuralError {
    pub errors: Vec<ErrorDetail>,
    pub structure: BTreeMap<String, StructuralError>,
}

impl StructuralError {
    pub fn new(token: impl Into<String>) -> Self {
        StructuralError {
            errors: vec![ErrorDetail::new(token)],
            structure: BTreeMap::new(),
        }
    }

    pub fn with_message(token: impl Into<String>, message: impl Into<String>) -> Self {
        StructuralError {
            errors: vec![ErrorDetail::with_message(token, message)],
            structure: BTreeMap::new(),
        }
    }

    pub fn empty() -> Self {
        StructuralError::default()
    }

    /// True when this error carries any failure at any level.
    pub fn substantive(&self) -> bool {
        !self.errors.is_empty() || self.structure.values().any(StructuralError::substantive)
    }

    /// Merge another error's flat and per-attribute failures into this one.
    pub fn merge(&mut self, other: StructuralError) {
        self.errors.extend(other.errors);
        for (attr, error) in other.structure {
            self.attach(attr, error);
        }
    }

    /// Merge an error under a particular attribute.
    pub fn attach(&mut self, attr: impl Into<String>, error: StructuralError) {
        self.structure
            .entry(attr.into())
            .and_modify(|existing| existing.merge(error.clone()))
            .or_insert(error);
    }

    /// Serialize into the canonical `{errors, structure}` payload.
    pub fn serialize(&self) -> Value {
        let errors = if self.errors.is_empty() {
            Value::Null
        } else {
            Value::Array(self.errors.iter().map(ErrorDetail::serialize).collect())
        };

        let structure = if self.structure.is_empty() {
            Value::Null
        } else {
            let mut map = serde_json::Map::new();
            for (attr, error) in &self.structure {
                map.insert(attr.clone(), error.serialize());
            }
            Value::Object(map)
        };

        json!({"errors": errors, "structure": structure})
    }
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "structural error: {}", self.serialize())
    }
}

impl std::error::Error for StructuralError {}

/// A request failure declared for a recognized non-OK status.
#[derive(Debug, Clone)]
pub struct RequestError {
    pub status: Status,
    pub content: Option<Value>,
}

impl RequestError {
    pub fn new(status: Status) -> Self {
        RequestError {
            status,
            content: None,
        }
    }

    pub fn with_content(status: Status, content: Value) -> Self {
        RequestError {
            status,
            content: Some(content),
        }
    }

    /// Construct the declared error for a status, when the status is an
    /// error status; valid statuses have no error form.
    pub fn construct(status: Status, content: Option<Value>) -> Option<Self> {
        if status.is_error() {
            Some(RequestError { status, content })
        } else {
            None
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.content {
            Some(content) => write!(f, "{}: {}", self.status, content),
            None => write!(f, "{}", self.status),
        }
    }
}

impl std::error::Error for RequestError {}

/// A transport-level connection failure, reported by clients.
#[derive(Debug, Clone)]
pub enum ConnectionError {
    Refused(String),
    TimedOut(String),
    Failed(String),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Refused(target) => write!(f, "connection refused: {target}"),
            ConnectionError::TimedOut(target) => write!(f, "connection timed out: {target}"),
            ConnectionError::Failed(target) => write!(f, "connection failed: {target}"),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// The error type flowing through dispatch and the client surface.
#[derive(Debug)]
pub enum MeshError {
    Specification(SpecificationError),
    Structural(StructuralError),
    Request(RequestError),
    Connection(ConnectionError),
    Internal(String),
}

impl MeshError {
    pub fn internal(message: impl Into<String>) -> Self {
        MeshError::Internal(message.into())
    }
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshError::Specification(err) => err.fmt(f),
            MeshError::Structural(err) => err.fmt(f),
            MeshError::Request(err) => err.fmt(f),
            MeshError::Connection(err) => err.fmt(f),
            MeshError::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for MeshError {}

impl From<SpecificationError> for MeshError {
    fn from(err: SpecificationError) -> Self {
        MeshError::Specification(err)
    }
}

impl From<StructuralError> for MeshError {
    fn from(err: StructuralError) -> Self {
        MeshError::Structural(err)
    }
}

impl From<RequestError> for MeshError {
    fn from(err: RequestError) -> Self {
        MeshError::Request(err)
    }
}

impl From<ConnectionError> for MeshError {
    fn from(err: ConnectionError) -> Self {
        MeshError::Connection(err)
    }
}
