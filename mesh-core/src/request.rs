use std::any::Any;
use std::collections::HashMap;

use serde_json::Value;

use crate::address::Address;
use crate::status::Status;

/// The backend instance acquired for a specific endpoint's subject. The
/// framework treats the value opaquely; handlers downcast it back.
pub type SubjectValue = Box<dyn Any + Send + Sync>;

/// A request flowing through the pipeline.
#[derive(Debug, Default)]
pub struct Request {
    pub address: Address,
    pub data: Option<Value>,
    pub context: HashMap<String, String>,
    pub mimetype: Option<String>,
    pub identity: Option<String>,
    /// True when the payload arrived in serialized form; schema processing
    /// then coerces string scalars.
    pub serialized: bool,
}

impl Request {
    pub fn new(address: Address) -> Request {
        Request {
            address,
            ..Request::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Request {
        self.data = Some(data);
        self
    }

    pub fn with_context(mut self, context: HashMap<String, String>) -> Request {
        self.context = context;
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Request {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Request {
        self.mimetype = Some(mimetype.into());
        self.serialized = true;
        self
    }
}

/// A response under construction within the pipeline; frozen at the
/// transport boundary.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: Option<Status>,
    pub data: Option<Value>,
    pub context: HashMap<String, String>,
    pub mimetype: Option<String>,
}

impl Response {
    pub fn new() -> Response {
        Response::default()
    }

    /// Set the status, keeping any data already present.
    pub fn set(&mut self, status: Status) -> &mut Response {
        self.status = Some(status);
        self
    }

    /// Set the status and replace the data.
    pub fn construct(&mut self, status: Status, data: Option<Value>) -> &mut Response {
        self.status = Some(status);
        if data.is_some() {
            self.data = data;
        }
        self
    }

    /// True when the response carries a non-error status.
    pub fn ok(&self) -> bool {
        self.status.map(Status::is_valid).unwrap_or(false)
    }
}
