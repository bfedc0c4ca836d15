use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::address::{Address, Subject};
use crate::error::{MeshError, SpecificationError, StructuralError};
use crate::request::{Request, Response, SubjectValue};
use crate::resource::Resource;
use crate::schema::{Field, Phase};
use crate::status::Status;

/// A validation function invoked after schema processing.
pub type ValidatorFn = Arc<dyn Fn(&Value) -> Result<(), StructuralError> + Send + Sync>;

/// A named validator, optionally bound to a target attribute and a set of
/// endpoint names.
#[derive(Clone)]
pub struct Validator {
    pub name: String,
    pub attr: Option<String>,
    pub endpoints: Option<Vec<String>>,
    pub function: ValidatorFn,
}

impl Validator {
    pub fn new<F>(name: impl Into<String>, function: F) -> Validator
    where
        F: Fn(&Value) -> Result<(), StructuralError> + Send + Sync + 'static,
    {
        Validator {
            name: name.into(),
            attr: None,
            endpoints: None,
            function: Arc::new(function),
        }
    }

    /// Direct validation errors at a particular schema attribute.
    pub fn attr(mut self, attr: impl Into<String>) -> Validator {
        self.attr = Some(attr.into());
        self
    }

    /// Restrict this validator to the named endpoints. Without this, the
    /// configuration's validated-endpoint list applies.
    pub fn endpoints<I, S>(mut self, endpoints: I) -> Validator
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = Some(endpoints.into_iter().map(Into::into).collect());
        self
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("name", &self.name)
            .field("attr", &self.attr)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

/// A request mediator, invoked before validation. Setting any status on the
/// response short-circuits the pipeline.
pub trait Mediator: Send + Sync {
    fn before_validation(
        &self,
        endpoint: &Endpoint,
        request: &Request,
        response: &mut Response,
    ) -> Result<(), StructuralError> {
        let _ = (endpoint, request, response);
        Ok(())
    }
}

/// The handler side of a controller version.
pub trait Handler: Send + Sync {
    /// Acquire the backend instance identified by `subject`. Both the
    /// subject and the returned value are treated opaquely.
    fn acquire(&self, subject: &str) -> Option<SubjectValue> {
        let _ = subject;
        None
    }

    /// Dispatch a validated request. Populate the response directly, or
    /// return a structural error (INVALID), a declared request error (its
    /// status), or any other error (SERVER_ERROR).
    fn dispatch(
        &self,
        endpoint: &Endpoint,
        request: &Request,
        response: &mut Response,
        subject: Option<&SubjectValue>,
        data: Option<Value>,
    ) -> Result<(), MeshError>;
}

/// A response definition for a resource endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointResponse {
    pub status: Status,
    pub schema: Option<Field>,
}

impl EndpointResponse {
    pub fn new(status: Status, schema: Option<Field>) -> EndpointResponse {
        let schema = schema.map(|field| {
            if field.name.is_none() {
                field.with_name("response")
            } else {
                field
            }
        });
        EndpointResponse { status, schema }
    }

    pub fn describe(&self, verbose: bool, omissions: Option<&[String]>) -> Value {
        let schema = match &self.schema {
            Some(schema) => omit_fields(schema, omissions).describe(verbose),
            None => Value::Null,
        };
        serde_json::json!({"status": self.status.token(), "schema": schema})
    }

    pub fn reconstruct(
        status: Status,
        description: &Value,
    ) -> Result<EndpointResponse, SpecificationError> {
        let schema = match description.get("schema") {
            Some(Value::Null) | None => None,
            Some(schema) => Some(Field::reconstruct(schema)?),
        };
        Ok(EndpointResponse { status, schema })
    }
}

/// Replace omitted attributes of a structure with bare same-named fields.
fn omit_fields(schema: &Field, omissions: Option<&[String]>) -> Field {
    let omissions = match omissions {
        Some(omissions) if !omissions.is_empty() => omissions,
        _ => return schema.clone(),
    };

    let mut replaced = schema.clone();
    if let Some(fields) = replaced.structure_fields() {
        let mut fields = fields.clone();
        for name in omissions {
            if fields.contains_key(name) {
                fields.insert(name.clone(), Field::any().with_name(name.clone()));
            }
        }
        replaced = Field {
            kind: crate::schema::FieldKind::Structure { fields },
            ..replaced
        };
    }
    replaced
}

/// An endpoint definition for a resource.
#[derive(Clone)]
pub struct Endpoint {
    pub name: String,
    pub resource_name: String,
    pub method: Option<String>,
    pub schema: Option<Field>,
    pub responses: BTreeMap<Status, EndpointResponse>,
    pub specific: bool,
    pub subject_required: bool,
    pub batch: bool,
    pub auto_constructed: bool,
    pub title: Option<String>,
    pub description: Option<String>,
    pub validators: Vec<Arc<Validator>>,
    pub metadata: Map<String, Value>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("resource", &self.resource_name)
            .field("method", &self.method)
            .field("specific", &self.specific)
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_name, self.name)
    }
}

impl Endpoint {
    pub fn empty(name: impl Into<String>, resource_name: impl Into<String>) -> Endpoint {
        Endpoint {
            name: name.into(),
            resource_name: resource_name.into(),
            method: None,
            schema: None,
            responses: BTreeMap::new(),
            specific: false,
            subject_required: true,
            batch: false,
            auto_constructed: false,
            title: None,
            description: None,
            validators: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// Bind resource and endpoint names onto an address, with a subject
    /// placeholder when this endpoint is specific.
    pub fn attach(&self, address: &Address) -> Address {
        let mut attached = address
            .clone()
            .with_resource(self.resource_name.clone())
            .with_endpoint(self.name.clone());
        if self.specific {
            attached = attached.expecting_subject();
        }
        attached
    }

    /// Run the attached validators over processed data, merging
    /// per-attribute errors under their target attribute.
    pub fn validate(&self, data: &Value) -> Result<(), StructuralError> {
        if self.batch {
            let items = match data {
                Value::Array(items) => items,
                _ => return self.validate_item(data),
            };

            let mut error = StructuralError::empty();
            for (index, item) in items.iter().enumerate() {
                if let Err(item_error) = self.validate_item(item) {
                    error.attach(index.to_string(), item_error);
                }
            }
            if error.substantive() {
                return Err(error);
            }
            Ok(())
        } else {
            self.validate_item(data)
        }
    }

    fn validate_item(&self, data: &Value) -> Result<(), StructuralError> {
        let mut error = StructuralError::empty();
        for validator in &self.validators {
            if let Err(failure) = (validator.function)(data) {
                match &validator.attr {
                    Some(attr) => error.attach(attr.clone(), failure),
                    None => error.merge(failure),
                }
            }
        }

        if error.substantive() {
            Err(error)
        } else {
            Ok(())
        }
    }

    /// Process a request through the pipeline: mediation, subject
    /// resolution, inbound validation, dispatch, and response validation.
    /// Exactly one status is set on the response when this returns.
    pub fn process(
        &self,
        handler: &dyn Handler,
        request: &Request,
        response: &mut Response,
        mediators: &[Arc<dyn Mediator>],
    ) {
        for mediator in mediators {
            match mediator.before_validation(self, request, response) {
                Ok(()) => {
                    if response.status.is_some() {
                        return;
                    }
                }
                Err(error) => {
                    tracing::info!(endpoint = %self, "request failed during mediation");
                    response.construct(Status::Invalid, Some(error.serialize()));
                    return;
                }
            }
        }

        let requested_subject = request.address.subject.as_ref().and_then(Subject::value);
        let mut subject: Option<SubjectValue> = None;
        if self.specific {
            match requested_subject {
                Some(id) => {
                    subject = handler.acquire(id);
                    if subject.is_none() && self.subject_required {
                        tracing::info!(endpoint = %self, subject = id, "unknown subject");
                        response.set(Status::Gone);
                        return;
                    }
                }
                None => {
                    response.set(Status::BadRequest);
                    return;
                }
            }
        } else if requested_subject.is_some() {
            tracing::info!(endpoint = %self, "request improperly specified a subject");
            response.set(Status::BadRequest);
            return;
        }

        let mut data: Option<Value> = None;
        if let Some(schema) = &self.schema {
            if let Some(payload) = request.data.as_ref().filter(|payload| !payload.is_null()) {
                match schema.process(payload, Phase::Inbound, request.serialized) {
                    Ok(processed) => data = Some(processed),
                    Err(error) => {
                        tracing::info!(endpoint = %self, "request failed schema validation");
                        response.construct(Status::Invalid, Some(error.serialize()));
                    }
                }
            }

            if response.status.is_none() && !self.validators.is_empty() {
                let subject_data = data.clone().unwrap_or(Value::Null);
                if let Err(error) = self.validate(&subject_data) {
                    tracing::info!(endpoint = %self, "request failed resource validation");
                    response.construct(Status::Invalid, Some(error.serialize()));
                }
            }
        } else if request.data.as_ref().map(is_substantial).unwrap_or(false) {
            tracing::info!(endpoint = %self, "request improperly specified data");
            response.set(Status::BadRequest);
            return;
        }

        if response.status.is_none() {
            match handler.dispatch(self, request, response, subject.as_ref(), data) {
                Ok(()) => {
                    if response.status.is_none() {
                        response.set(Status::Ok);
                    }
                }
                Err(MeshError::Structural(error)) => {
                    tracing::info!(endpoint = %self, "dispatch raised a structural error");
                    response.construct(Status::Invalid, Some(error.serialize()));
                }
                Err(MeshError::Request(error)) => {
                    response.construct(error.status, error.content);
                    return;
                }
                Err(error) => {
                    tracing::error!(endpoint = %self, %error, "dispatch failed");
                    response.data = None;
                    response.set(Status::ServerError);
                    return;
                }
            }
        }

        let status = match response.status {
            Some(status) => status,
            None => return,
        };

        let definition = match self.responses.get(&status) {
            Some(definition) => definition,
            None => {
                if status.is_error() && !response.data.as_ref().map(is_substantial).unwrap_or(false)
                {
                    return;
                }
                tracing::error!(endpoint = %self, %status, "response has an undeclared status");
                response.set(Status::ServerError);
                return;
            }
        };

        if let Some(schema) = &definition.schema {
            let payload = response.data.clone().unwrap_or(Value::Null);
            match schema.process(&payload, Phase::Outbound, request.serialized) {
                Ok(processed) => {
                    response.data = if processed.is_null() {
                        None
                    } else {
                        Some(processed)
                    };
                }
                Err(error) => {
                    tracing::error!(endpoint = %self, %error, "response failed schema validation");
                    response.data = None;
                    response.set(Status::ServerError);
                }
            }
        } else if response.data.as_ref().map(is_substantial).unwrap_or(false) {
            tracing::error!(endpoint = %self, "response improperly specified data");
            response.set(Status::ServerError);
        }
    }

    /// Emit a serializable description of this endpoint.
    pub fn describe(
        &self,
        address: Option<&Address>,
        verbose: bool,
        omissions: Option<&[String]>,
    ) -> Value {
        let mut map = Map::new();
        map.insert("name".into(), Value::String(self.name.clone()));

        if self.batch || verbose {
            map.insert("batch".into(), Value::Bool(self.batch));
        }
        if self.specific || verbose {
            map.insert("specific".into(), Value::Bool(self.specific));
        }
        if !self.subject_required || verbose {
            map.insert("subject_required".into(), Value::Bool(self.subject_required));
        }
        if let Some(method) = &self.method {
            map.insert("method".into(), Value::String(method.clone()));
        } else if verbose {
            map.insert("method".into(), Value::Null);
        }
        if let Some(title) = &self.title {
            map.insert("title".into(), Value::String(title.clone()));
        } else if verbose {
            map.insert("title".into(), Value::Null);
        }
        if let Some(description) = &self.description {
            map.insert("description".into(), Value::String(description.clone()));
        } else if verbose {
            map.insert("description".into(), Value::Null);
        }

        if let Some(address) = address {
            let attached = self.attach(address);
            map.insert("address".into(), Value::String(attached.to_string()));
            map.insert(
                "path".into(),
                Value::String(attached.render_with("pbrsuvf", Some("id"), Some("id"))),
            );
        }

        let schema = match &self.schema {
            Some(schema) => omit_fields(schema, omissions).describe(verbose),
            None => Value::Null,
        };
        map.insert("schema".into(), schema);

        let mut responses = Map::new();
        for (status, response) in &self.responses {
            responses.insert(
                status.token().to_string(),
                response.describe(verbose, omissions),
            );
        }
        map.insert("responses".into(), Value::Object(responses));

        Value::Object(map)
    }

    /// Rebuild an endpoint from its description. The description carries no
    /// validators or metadata; those exist only server-side.
    pub fn reconstruct(
        resource_name: &str,
        description: &Value,
    ) -> Result<Endpoint, SpecificationError> {
        let map = description
            .as_object()
            .ok_or_else(|| SpecificationError::new("endpoint description must be an object"))?;
        let name = map
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| SpecificationError::new("endpoint description lacks a name"))?;

        let mut endpoint = Endpoint::empty(name, resource_name);
        endpoint.method = map.get("method").and_then(Value::as_str).map(str::to_string);
        endpoint.title = map.get("title").and_then(Value::as_str).map(str::to_string);
        endpoint.description = map
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        endpoint.specific = map.get("specific").and_then(Value::as_bool).unwrap_or(false);
        endpoint.batch = map.get("batch").and_then(Value::as_bool).unwrap_or(false);
        endpoint.subject_required = map
            .get("subject_required")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        endpoint.schema = match map.get("schema") {
            Some(Value::Null) | None => None,
            Some(schema) => Some(Field::reconstruct(schema)?),
        };

        if let Some(responses) = map.get("responses").and_then(Value::as_object) {
            for (token, description) in responses {
                let status: Status = token
                    .parse()
                    .map_err(|_| SpecificationError::new(format!("unknown status {token:?}")))?;
                endpoint
                    .responses
                    .insert(status, EndpointResponse::reconstruct(status, description)?);
            }
        }

        Ok(endpoint)
    }
}

/// Empty containers and empty strings do not count as payload data.
fn is_substantial(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(_) => true,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(members) => !members.is_empty(),
    }
}

// ── Declarative construction ────────────────────────────────────────────

/// A schema entry in an endpoint declaration: a literal field or a
/// reference to a field on the enclosing resource's schema.
#[derive(Debug, Clone)]
pub enum FieldDecl {
    Field(Field),
    Reference(String),
}

/// A `fields` overlay entry: insert a field, re-reference a resource field
/// (optionally renaming), or remove an inherited one.
#[derive(Debug, Clone)]
pub enum FieldEntry {
    Insert(Field),
    Reference(String),
    Remove,
}

/// The declaration of an endpoint on a resource builder.
///
/// Every attribute is optional; attributes that are set overlay the base
/// endpoint, which is an inherited endpoint or a standard constructor
/// named by [`EndpointDecl::extending`].
#[derive(Debug, Clone, Default)]
pub struct EndpointDecl {
    pub(crate) base: Option<String>,
    pub(crate) method: Option<String>,
    pub(crate) title: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) specific: Option<bool>,
    pub(crate) subject_required: Option<bool>,
    pub(crate) batch: Option<bool>,
    pub(crate) schema: Option<Vec<(String, FieldDecl)>>,
    pub(crate) fields: Vec<(String, FieldEntry)>,
    pub(crate) responses: Vec<(Status, Option<Field>)>,
    pub(crate) metadata: Map<String, Value>,
    pub(crate) support_returning: bool,
    pub(crate) valid_responses: Option<Vec<Status>>,
    pub(crate) invalid_responses: Option<Vec<Status>>,
    pub(crate) operators: Vec<(String, Field)>,
}

impl EndpointDecl {
    pub fn new() -> EndpointDecl {
        EndpointDecl::default()
    }

    /// Declare this endpoint as extending a base: an inherited endpoint or
    /// a standard constructor of the resource's configuration.
    pub fn extending(base: impl Into<String>) -> EndpointDecl {
        EndpointDecl {
            base: Some(base.into()),
            ..EndpointDecl::default()
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> EndpointDecl {
        self.method = Some(method.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> EndpointDecl {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> EndpointDecl {
        self.description = Some(description.into());
        self
    }

    pub fn specific(mut self, specific: bool) -> EndpointDecl {
        self.specific = Some(specific);
        self
    }

    pub fn subject_required(mut self, subject_required: bool) -> EndpointDecl {
        self.subject_required = Some(subject_required);
        self
    }

    pub fn batch(mut self, batch: bool) -> EndpointDecl {
        self.batch = Some(batch);
        self
    }

    /// Declare a schema field; replaces any base schema.
    pub fn schema_field(mut self, name: impl Into<String>, field: Field) -> EndpointDecl {
        self.schema
            .get_or_insert_with(Vec::new)
            .push((name.into(), FieldDecl::Field(field)));
        self
    }

    /// Declare a schema field referencing the resource's schema.
    pub fn schema_ref(
        mut self,
        name: impl Into<String>,
        reference: impl Into<String>,
    ) -> EndpointDecl {
        self.schema
            .get_or_insert_with(Vec::new)
            .push((name.into(), FieldDecl::Reference(reference.into())));
        self
    }

    /// Merge a field into the (possibly inherited) schema.
    pub fn field(mut self, name: impl Into<String>, field: Field) -> EndpointDecl {
        self.fields.push((name.into(), FieldEntry::Insert(field)));
        self
    }

    /// Merge a re-reference to a resource field, renaming it when the
    /// names differ.
    pub fn field_ref(
        mut self,
        name: impl Into<String>,
        reference: impl Into<String>,
    ) -> EndpointDecl {
        self.fields
            .push((name.into(), FieldEntry::Reference(reference.into())));
        self
    }

    /// Remove an inherited schema field.
    pub fn remove_field(mut self, name: impl Into<String>) -> EndpointDecl {
        self.fields.push((name.into(), FieldEntry::Remove));
        self
    }

    pub fn response(mut self, status: Status, schema: Option<Field>) -> EndpointDecl {
        self.responses.push((status, schema));
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> EndpointDecl {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Opt a standard mutation endpoint into per-request `returning`.
    pub fn support_returning(mut self, support: bool) -> EndpointDecl {
        self.support_returning = support;
        self
    }

    pub fn valid_responses<I: IntoIterator<Item = Status>>(mut self, statuses: I) -> EndpointDecl {
        self.valid_responses = Some(statuses.into_iter().collect());
        self
    }

    pub fn invalid_responses<I: IntoIterator<Item = Status>>(
        mut self,
        statuses: I,
    ) -> EndpointDecl {
        self.invalid_responses = Some(statuses.into_iter().collect());
        self
    }

    /// An additional query operator for a standard query endpoint.
    pub fn operator(mut self, name: impl Into<String>, field: Field) -> EndpointDecl {
        self.operators.push((name.into(), field));
        self
    }

    /// Construct the endpoint, overlaying this declaration onto the base.
    pub(crate) fn construct(
        &self,
        name: &str,
        resource: &Resource,
        base: Option<Endpoint>,
    ) -> Result<Endpoint, SpecificationError> {
        let mut endpoint = match base {
            Some(base) => Endpoint {
                name: name.to_string(),
                resource_name: resource.name.clone().unwrap_or_default(),
                auto_constructed: false,
                validators: Vec::new(),
                ..base
            },
            None => Endpoint::empty(name, resource.name.clone().unwrap_or_default()),
        };

        if let Some(method) = &self.method {
            endpoint.method = Some(method.clone());
        }
        if let Some(title) = &self.title {
            endpoint.title = Some(title.clone());
        }
        if let Some(description) = &self.description {
            endpoint.description = Some(description.clone());
        }
        if let Some(specific) = self.specific {
            endpoint.specific = specific;
        }
        if let Some(subject_required) = self.subject_required {
            endpoint.subject_required = subject_required;
        }
        if let Some(batch) = self.batch {
            endpoint.batch = batch;
        }

        if let Some(schema) = &self.schema {
            let mut fields = BTreeMap::new();
            for (name, decl) in schema {
                match decl {
                    FieldDecl::Field(field) => {
                        fields.insert(name.clone(), field.clone().with_name(name.clone()));
                    }
                    FieldDecl::Reference(reference) => {
                        if let Some(field) = resource.schema.get(reference) {
                            fields.insert(name.clone(), field.clone());
                        }
                    }
                }
            }
            endpoint.schema = Some(Field::structure(fields).with_name("endpoint"));
        }

        if !self.fields.is_empty() {
            let mut fields = endpoint
                .schema
                .as_ref()
                .and_then(Field::structure_fields)
                .cloned()
                .unwrap_or_default();

            for (name, entry) in &self.fields {
                match entry {
                    FieldEntry::Insert(field) => {
                        let field = if field.name.is_none() {
                            field.clone().with_name(name.clone())
                        } else {
                            field.clone()
                        };
                        fields.insert(name.clone(), field);
                    }
                    FieldEntry::Reference(reference) => {
                        let field = resource.schema.get(reference).ok_or_else(|| {
                            SpecificationError::new(format!(
                                "endpoint {name:?} references unknown field {reference:?}"
                            ))
                        })?;
                        let field = if field.name.as_deref() != Some(name.as_str()) {
                            field.clone().with_name(name.clone())
                        } else {
                            field.clone()
                        };
                        fields.insert(name.clone(), field);
                    }
                    FieldEntry::Remove => {
                        fields.remove(name);
                    }
                }
            }

            let structure_name = endpoint
                .schema
                .as_ref()
                .and_then(|schema| schema.name.clone())
                .unwrap_or_else(|| "endpoint".to_string());
            endpoint.schema = Some(Field::structure(fields).with_name(structure_name));
        }

        for (status, schema) in &self.responses {
            endpoint
                .responses
                .insert(*status, EndpointResponse::new(*status, schema.clone()));
        }

        for (key, value) in &self.metadata {
            endpoint.metadata.insert(key.clone(), value.clone());
        }

        Ok(endpoint)
    }
}
