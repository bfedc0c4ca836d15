//! Core runtime for the mesh API framework.
//!
//! A developer declares resources (named entities with typed schemas),
//! controllers (versioned handler sets), and bundles (collections of
//! resource/controller mounts). The framework derives the standard
//! endpoints from each resource's shape, compiles a routing table keyed by
//! versioned addresses, and dispatches requests through a validation →
//! mediation → handler → response-validation pipeline that behaves
//! identically on every transport.

pub mod address;
pub mod bundle;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod format;
pub mod internal;
pub mod request;
pub mod resource;
pub mod schema;
pub mod server;
pub mod specification;
pub mod standard;
pub mod status;

pub mod controller;

pub use address::{Address, AddressParser, ParseError, Subject, Version};
pub use bundle::{Bundle, BundleBuilder, BundleEntry, Mount, Registry, VersionBound};
pub use client::{ClientHandle, ClientRegistry};
pub use controller::{Controller, ControllerBuilder, ControllerFamily};
pub use endpoint::{
    Endpoint, EndpointDecl, EndpointResponse, FieldDecl, FieldEntry, Handler, Mediator, Validator,
};
pub use error::{
    ConnectionError, ErrorDetail, MeshError, RequestError, SpecificationError, StructuralError,
};
pub use format::{Format, FormatError, FormatRegistry, Json, UrlEncoded};
pub use internal::{InternalClient, InternalServer, Payload};
pub use request::{Request, Response, SubjectValue};
pub use resource::{
    Configuration, EndpointConstructor, Resource, ResourceBuilder, ResourceFamily,
};
pub use server::{EndpointTable, RouteEntry, ServerCore};
pub use specification::{Found, SpecEndpoint, SpecResource, Specification};
pub use standard::{standard_configuration, DEFAULT_ENDPOINTS, RETURNING, VALIDATED_ENDPOINTS};
pub use status::{Status, STATUS_CODES};
