use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::address::Address;
use crate::client::ClientHandle;
use crate::error::{MeshError, RequestError, SpecificationError};
use crate::format::Format;
use crate::request::{Request, Response};
use crate::server::{EndpointTable, ServerCore};
use crate::specification::Specification;
use crate::status::Status;

/// A payload handed to the in-process server: already-structured, or
/// serialized in a declared mimetype. The core dispatches identically.
pub enum Payload {
    Structured(Value),
    Serialized { mimetype: String, text: String },
}

/// The in-process server: direct invocation of the pipeline, no wire.
pub struct InternalServer {
    core: ServerCore,
    endpoints: EndpointTable,
}

impl InternalServer {
    pub fn new(core: ServerCore) -> InternalServer {
        let endpoints = EndpointTable::compile(&core);
        InternalServer { core, endpoints }
    }

    pub fn core(&self) -> &ServerCore {
        &self.core
    }

    /// Dispatch a request by address, returning the finalized response.
    pub fn dispatch(
        &self,
        address: &Address,
        context: HashMap<String, String>,
        payload: Option<Payload>,
    ) -> Response {
        let mut response = Response::new();

        let entry = match self.endpoints.get(&address.routing_key()) {
            Some(entry) => entry,
            None => {
                response.set(Status::NotFound);
                return response;
            }
        };

        let mut request = Request::new(address.clone()).with_context(context);
        let mut format: Option<Arc<dyn Format>> = None;

        match payload {
            Some(Payload::Structured(data)) => {
                request.data = Some(data);
            }
            Some(Payload::Serialized { mimetype, text }) => {
                let serializer = match self.core.formats().get(&mimetype) {
                    Some(serializer) => serializer,
                    None => {
                        response.set(Status::BadRequest);
                        return response;
                    }
                };
                match serializer.unserialize(&text) {
                    Ok(data) => {
                        request = request.with_mimetype(serializer.mimetype());
                        request.data = Some(data);
                        format = Some(serializer);
                    }
                    Err(_) => {
                        response.set(Status::BadRequest);
                        return response;
                    }
                }
            }
            None => {}
        }

        entry.endpoint.process(
            entry.controller.handler.as_ref(),
            &request,
            &mut response,
            self.core.mediators(),
        );

        if let Some(format) = format {
            response.mimetype = Some(format.mimetype().to_string());
        }
        response
    }
}

/// A client bound directly to an in-process server.
pub struct InternalClient {
    server: Arc<InternalServer>,
    specification: Arc<Specification>,
    name: String,
    context: HashMap<String, String>,
    format: Option<Arc<dyn Format>>,
}

impl InternalClient {
    pub fn new(server: &Arc<InternalServer>, bundle: &str) -> Result<InternalClient, SpecificationError> {
        let bundle = server
            .core()
            .bundle(bundle)
            .ok_or_else(|| SpecificationError::new(format!("unknown bundle {bundle:?}")))?;

        let specification = Arc::new(bundle.specify()?);
        Ok(InternalClient {
            server: server.clone(),
            name: specification.name.clone(),
            specification,
            context: HashMap::new(),
            format: None,
        })
    }

    /// Context entries merged into every request.
    pub fn with_context(mut self, context: HashMap<String, String>) -> InternalClient {
        self.context = context;
        self
    }

    /// Serialize payloads through a format instead of passing structured
    /// values; exercises the same path as a remote client.
    pub fn with_format(mut self, format: Arc<dyn Format>) -> InternalClient {
        self.format = Some(format);
        self
    }

    /// Execute an endpoint by address text.
    pub fn execute(
        &self,
        target: &str,
        subject: Option<&str>,
        data: Option<Value>,
    ) -> Result<Response, MeshError> {
        let address = Address::parse(target)
            .map_err(|_| MeshError::Request(RequestError::new(Status::BadRequest)))?;
        self.execute_address(address, subject, data)
    }

    /// Execute an endpoint by structured address.
    pub fn execute_address(
        &self,
        address: Address,
        subject: Option<&str>,
        data: Option<Value>,
    ) -> Result<Response, MeshError> {
        let address = match subject {
            Some(subject) => address.with_subject(subject),
            None => address,
        };

        let payload = match (&self.format, data) {
            (Some(format), Some(data)) => Some(Payload::Serialized {
                mimetype: format.mimetype().to_string(),
                text: format.serialize(&data)?,
            }),
            (None, Some(data)) => Some(Payload::Structured(data)),
            _ => None,
        };

        let response = self
            .server
            .dispatch(&address, self.context.clone(), payload);

        if response.ok() {
            Ok(response)
        } else {
            let status = response.status.unwrap_or(Status::ServerError);
            Err(MeshError::Request(RequestError {
                status,
                content: response.data,
            }))
        }
    }
}

impl ClientHandle for InternalClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn specification(&self) -> Arc<Specification> {
        self.specification.clone()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
