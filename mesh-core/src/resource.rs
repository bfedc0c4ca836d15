use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::address::{Address, Version};
use crate::controller::Controller;
use crate::endpoint::{Endpoint, EndpointDecl, Handler, Validator};
use crate::error::{MeshError, SpecificationError};
use crate::request::{Request, Response, SubjectValue};
use crate::schema::{Field, Schema};
use crate::status::Status;

/// Synthesizes a standard endpoint from a resource's shape, optionally
/// overlaid by a declaration.
pub trait EndpointConstructor: Send + Sync {
    fn construct(
        &self,
        resource: &Resource,
        declaration: Option<&EndpointDecl>,
    ) -> Result<Endpoint, SpecificationError>;
}

/// The handler installed on mounts constructed without a controller.
struct UnimplementedHandler;

impl Handler for UnimplementedHandler {
    fn dispatch(
        &self,
        endpoint: &Endpoint,
        _request: &Request,
        _response: &mut Response,
        _subject: Option<&SubjectValue>,
        _data: Option<Value>,
    ) -> Result<(), MeshError> {
        tracing::warn!(endpoint = %endpoint, "no handler implemented");
        Err(MeshError::Request(crate::error::RequestError::new(
            Status::Unimplemented,
        )))
    }
}

/// The conventions shared by a family of resources: the standard endpoint
/// constructors, which of them apply by default, which are validated, and
/// the identifier field.
#[derive(Clone)]
pub struct Configuration {
    pub standard_endpoints: HashMap<String, Arc<dyn EndpointConstructor>>,
    pub default_endpoints: Vec<String>,
    pub validated_endpoints: Vec<String>,
    pub id_field: Field,
    pub default_handler: Arc<dyn Handler>,
}

impl Configuration {
    /// A bare configuration: integer `id`, no standard endpoints.
    pub fn new() -> Configuration {
        Configuration {
            standard_endpoints: HashMap::new(),
            default_endpoints: Vec::new(),
            validated_endpoints: Vec::new(),
            id_field: Field::integer().with_name("id").nonnull(true),
            default_handler: Arc::new(UnimplementedHandler),
        }
    }

    pub fn standard_endpoint(
        mut self,
        name: impl Into<String>,
        constructor: Arc<dyn EndpointConstructor>,
    ) -> Configuration {
        self.standard_endpoints.insert(name.into(), constructor);
        self
    }

    pub fn default_endpoints<I, S>(mut self, names: I) -> Configuration
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_endpoints = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn validated_endpoints<I, S>(mut self, names: I) -> Configuration
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validated_endpoints = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn id_field(mut self, field: Field) -> Configuration {
        self.id_field = field;
        self
    }

    pub fn default_handler(mut self, handler: Arc<dyn Handler>) -> Configuration {
        self.default_handler = handler;
        self
    }

    /// The name of the identifier field.
    pub fn id_name(&self) -> &str {
        self.id_field.name.as_deref().unwrap_or("id")
    }
}

impl Default for Configuration {
    fn default() -> Configuration {
        Configuration::new()
    }
}

/// A resource definition: a named, versioned schema plus its operations.
///
/// Resources are assembled once by a [`ResourceBuilder`] and immutable
/// afterwards.
pub struct Resource {
    pub configuration: Arc<Configuration>,
    pub name: Option<String>,
    pub title: String,
    pub version: Option<u32>,
    pub is_abstract: bool,
    pub composite_key: Vec<String>,
    pub schema: Schema,
    pub id_field: Option<String>,
    pub endpoints: BTreeMap<String, Arc<Endpoint>>,
    pub validators: BTreeMap<String, Arc<Validator>>,
    pub description: Option<String>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("abstract", &self.is_abstract)
            .finish()
    }
}

impl Resource {
    pub fn builder(name: impl Into<String>, version: u32) -> ResourceBuilder {
        ResourceBuilder::new(name, version)
    }

    /// The identifier field, when present.
    pub fn identifier(&self) -> Option<&Field> {
        self.id_field.as_deref().and_then(|name| self.schema.get(name))
    }

    /// Yield `(address, endpoint)` for every endpoint, with the address
    /// pre-populated for routing-key computation.
    pub fn enumerate_endpoints(&self, address: &Address) -> Vec<(Address, Arc<Endpoint>)> {
        self.endpoints
            .values()
            .map(|endpoint| (endpoint.attach(address), endpoint.clone()))
            .collect()
    }

    /// Emit a serializable description of this resource: the artifact a
    /// [`Specification`](crate::specification::Specification) is built from.
    pub fn describe(
        &self,
        controller: Option<&Controller>,
        address: Option<&Address>,
        verbose: bool,
        omissions: Option<&[String]>,
    ) -> Value {
        let address = match address {
            Some(address) => address
                .clone()
                .with_resource(self.name.clone().unwrap_or_default()),
            None => Address {
                resource: self.name.clone(),
                ..Address::default()
            },
        };

        let mut map = Map::new();
        map.insert("__subject__".into(), Value::String("resource".into()));
        map.insert(
            "name".into(),
            self.name.clone().map(Value::String).unwrap_or(Value::Null),
        );
        map.insert("title".into(), Value::String(self.title.clone()));
        map.insert("abstract".into(), Value::Bool(self.is_abstract));
        map.insert(
            "composite_key".into(),
            Value::Array(
                self.composite_key
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );

        if let Some(description) = &self.description {
            map.insert("description".into(), Value::String(description.clone()));
        } else if verbose {
            map.insert("description".into(), Value::Null);
        }

        if !address.bundle.is_empty() {
            map.insert("id".into(), Value::String(address.to_string()));
        }

        let version = match controller {
            Some(controller) => controller.version,
            None => Version(self.version.unwrap_or(0), 0),
        };
        map.insert("version".into(), version.as_value());

        let mut schema = Map::new();
        for (name, field) in self.schema.iter() {
            let described = match omissions {
                Some(omissions) if omissions.contains(name) => {
                    Field::any().with_name(name.clone()).describe(verbose)
                }
                _ => field.describe(verbose),
            };
            schema.insert(name.clone(), described);
        }
        map.insert("schema".into(), Value::Object(schema));

        let mut endpoints = Map::new();
        for (name, endpoint) in &self.endpoints {
            endpoints.insert(
                name.clone(),
                endpoint.describe(Some(&address), verbose, omissions),
            );
        }
        map.insert("endpoints".into(), Value::Object(endpoints));

        Value::Object(map)
    }

    /// Rebuild a resource from a description. Inverse of
    /// [`Resource::describe`] for schema, endpoints, composite key,
    /// version, and identifier binding.
    pub fn reconstruct(
        description: &Value,
        configuration: Arc<Configuration>,
    ) -> Result<Arc<Resource>, SpecificationError> {
        let map = description
            .as_object()
            .ok_or_else(|| SpecificationError::new("resource description must be an object"))?;

        let name = map
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| SpecificationError::new("resource description lacks a name"))?
            .to_string();
        let version = map
            .get("version")
            .and_then(Version::from_value)
            .ok_or_else(|| SpecificationError::new("resource description lacks a version"))?;

        let schema = match map.get("schema") {
            Some(schema) => Schema::reconstruct(schema)?,
            None => Schema::new(),
        };

        let id_name = configuration.id_name().to_string();
        let id_field = schema.contains(&id_name).then_some(id_name);

        let mut endpoints = BTreeMap::new();
        if let Some(descriptions) = map.get("endpoints").and_then(Value::as_object) {
            for (endpoint_name, description) in descriptions {
                endpoints.insert(
                    endpoint_name.clone(),
                    Arc::new(Endpoint::reconstruct(&name, description)?),
                );
            }
        }

        let composite_key = map
            .get("composite_key")
            .and_then(Value::as_array)
            .map(|keys| {
                keys.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Arc::new(Resource {
            configuration,
            title: map
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or(&name)
                .to_string(),
            name: Some(name),
            version: Some(version.major()),
            is_abstract: map
                .get("abstract")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            composite_key,
            schema,
            id_field,
            endpoints,
            validators: BTreeMap::new(),
            description: map
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        }))
    }
}

/// The declarative assembly of a [`Resource`].
///
/// Collection happens through the chained methods; [`ResourceBuilder::build`]
/// runs the resolution phase, rejecting illegal shapes and synthesizing the
/// standard endpoints.
pub struct ResourceBuilder {
    configuration: Option<Arc<Configuration>>,
    name: Option<String>,
    title: Option<String>,
    version: Option<u32>,
    is_abstract: bool,
    composite_key: Vec<String>,
    bases: Vec<Arc<Resource>>,
    fields: Vec<(String, Option<Field>)>,
    endpoints: Vec<(String, Option<EndpointDecl>)>,
    requested: Option<Vec<String>>,
    validators: Vec<(String, Option<Validator>)>,
    description: Option<String>,
}

impl ResourceBuilder {
    pub fn new(name: impl Into<String>, version: u32) -> ResourceBuilder {
        ResourceBuilder {
            configuration: None,
            name: Some(name.into()),
            title: None,
            version: Some(version),
            is_abstract: false,
            composite_key: Vec::new(),
            bases: Vec::new(),
            fields: Vec::new(),
            endpoints: Vec::new(),
            requested: None,
            validators: Vec::new(),
            description: None,
        }
    }

    /// Begin an abstract base resource: unnamed, unversioned, usable only
    /// through [`ResourceBuilder::inherit`].
    pub fn abstract_base() -> ResourceBuilder {
        ResourceBuilder {
            configuration: None,
            name: None,
            title: None,
            version: None,
            is_abstract: true,
            composite_key: Vec::new(),
            bases: Vec::new(),
            fields: Vec::new(),
            endpoints: Vec::new(),
            requested: None,
            validators: Vec::new(),
            description: None,
        }
    }

    pub fn configuration(mut self, configuration: Arc<Configuration>) -> ResourceBuilder {
        self.configuration = Some(configuration);
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> ResourceBuilder {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> ResourceBuilder {
        self.description = Some(description.into());
        self
    }

    pub fn composite_key<I, S>(mut self, attrs: I) -> ResourceBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.composite_key = attrs.into_iter().map(Into::into).collect();
        self
    }

    /// Inherit a base resource's schema, endpoints, and validators. Later
    /// bases override earlier ones.
    pub fn inherit(mut self, base: &Arc<Resource>) -> ResourceBuilder {
        self.bases.push(base.clone());
        self
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> ResourceBuilder {
        self.fields.push((name.into(), Some(field)));
        self
    }

    /// Explicitly erase an inherited field.
    pub fn remove_field(mut self, name: impl Into<String>) -> ResourceBuilder {
        self.fields.push((name.into(), None));
        self
    }

    pub fn endpoint(mut self, name: impl Into<String>, decl: EndpointDecl) -> ResourceBuilder {
        self.endpoints.push((name.into(), Some(decl)));
        self
    }

    /// Explicitly erase an inherited endpoint.
    pub fn remove_endpoint(mut self, name: impl Into<String>) -> ResourceBuilder {
        self.endpoints.push((name.into(), None));
        self
    }

    /// Request an explicit set of standard endpoints instead of the
    /// configuration's defaults.
    pub fn endpoints<I, S>(mut self, names: I) -> ResourceBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requested = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn validator(mut self, validator: Validator) -> ResourceBuilder {
        self.validators.push((validator.name.clone(), Some(validator)));
        self
    }

    /// Explicitly erase an inherited validator.
    pub fn remove_validator(mut self, name: impl Into<String>) -> ResourceBuilder {
        self.validators.push((name.into(), None));
        self
    }

    /// Resolve the declaration into an immutable resource.
    pub fn build(self) -> Result<Arc<Resource>, SpecificationError> {
        let configuration = self
            .configuration
            .clone()
            .or_else(|| self.bases.first().map(|base| base.configuration.clone()))
            .ok_or_else(|| SpecificationError::new("resource lacks a configuration"))?;

        if self.is_abstract {
            if self.bases.len() > 1 {
                return Err(SpecificationError::new(
                    "an abstract resource may only inherit from a single abstract base",
                ));
            }
            if let Some(base) = self.bases.first() {
                if !base.is_abstract || base.name.is_some() {
                    return Err(SpecificationError::new(
                        "an abstract resource may only inherit from an unnamed abstract base",
                    ));
                }
            }
        } else {
            let concrete = self.bases.iter().filter(|base| !base.is_abstract).count();
            if concrete > 1 {
                return Err(SpecificationError::new(
                    "a concrete resource must inherit from at most one concrete base",
                ));
            }
            match self.version {
                Some(version) if version >= 1 => {}
                _ => {
                    return Err(SpecificationError::new(format!(
                        "resource {:?} declares an invalid version",
                        self.name.as_deref().unwrap_or("")
                    )))
                }
            }
        }

        // Collection: merge bases in declaration order, later bases win.
        let mut schema = Schema::new();
        let mut endpoints: BTreeMap<String, Endpoint> = BTreeMap::new();
        let mut validators: BTreeMap<String, Validator> = BTreeMap::new();
        let mut inherited: BTreeSet<String> = BTreeSet::new();

        for base in &self.bases {
            schema.merge(&base.schema);
            for (name, endpoint) in &base.endpoints {
                let mut endpoint = (**endpoint).clone();
                endpoint.validators.clear();
                endpoints.insert(name.clone(), endpoint);
                inherited.insert(name.clone());
            }
            for (name, validator) in &base.validators {
                validators.insert(name.clone(), (**validator).clone());
            }
        }

        let mut removed_fields = BTreeSet::new();
        for (name, field) in self.fields {
            match field {
                Some(field) => schema.insert(name, field),
                None => {
                    schema.remove(&name);
                    removed_fields.insert(name);
                }
            }
        }

        let id_name = configuration.id_name().to_string();
        if let Some(field) = schema.get_mut(&id_name) {
            field.is_identifier = true;
        } else if !removed_fields.contains(&id_name) {
            schema.insert(id_name.clone(), configuration.id_field.clone().identifier(true));
        }
        let id_field = schema.contains(&id_name).then_some(id_name);

        for key in &self.composite_key {
            if !schema.contains(key) {
                return Err(SpecificationError::new(format!(
                    "resource {:?} declares an invalid composite key",
                    self.name.as_deref().unwrap_or("")
                )));
            }
        }

        let title = self.title.unwrap_or_else(|| match &self.name {
            Some(name) => {
                let mut chars = name.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
            None => String::new(),
        });

        let mut resource = Resource {
            configuration: configuration.clone(),
            name: self.name,
            title,
            version: self.version,
            is_abstract: self.is_abstract,
            composite_key: self.composite_key,
            schema,
            id_field,
            endpoints: BTreeMap::new(),
            validators: BTreeMap::new(),
            description: self.description,
        };

        // Resolution: declared endpoints overlay their bases.
        let mut removed_endpoints = BTreeSet::new();
        for (name, decl) in self.endpoints {
            let decl = match decl {
                Some(decl) => decl,
                None => {
                    removed_endpoints.insert(name);
                    continue;
                }
            };

            let base = match &decl.base {
                Some(base_name) => {
                    if let Some(existing) = endpoints.get(base_name) {
                        Some(existing.clone())
                    } else if let Some(constructor) =
                        configuration.standard_endpoints.get(base_name)
                    {
                        Some(constructor.construct(&resource, Some(&decl))?)
                    } else {
                        return Err(SpecificationError::new(format!(
                            "endpoint {name:?} extends unknown base {base_name:?}"
                        )));
                    }
                }
                None => None,
            };

            let endpoint = decl.construct(&name, &resource, base)?;
            inherited.remove(&name);
            endpoints.insert(name, endpoint);
        }

        // Standard-endpoint synthesis, honoring the replacement rule for
        // inherited auto-constructed endpoints.
        if resource.name.is_some() {
            let requested = self
                .requested
                .unwrap_or_else(|| configuration.default_endpoints.clone());
            for name in requested {
                let constructor =
                    configuration.standard_endpoints.get(&name).ok_or_else(|| {
                        SpecificationError::new(format!(
                            "resource {:?} requests unknown standard endpoint {name:?}",
                            resource.name.as_deref().unwrap_or("")
                        ))
                    })?;

                let synthesize = match endpoints.get(&name) {
                    Some(existing) => inherited.contains(&name) && existing.auto_constructed,
                    None => true,
                };
                if synthesize && !removed_endpoints.contains(&name) {
                    endpoints.insert(name.clone(), constructor.construct(&resource, None)?);
                }
            }
        }

        let mut removed_validators = BTreeSet::new();
        for (name, validator) in self.validators {
            match validator {
                Some(validator) => {
                    validators.insert(name, validator);
                }
                None => {
                    validators.remove(&name);
                    removed_validators.insert(name);
                }
            }
        }

        for name in &removed_endpoints {
            endpoints.remove(name);
        }
        for name in &removed_validators {
            validators.remove(name);
        }

        // Attach each validator to every endpoint it targets.
        let validators: BTreeMap<String, Arc<Validator>> = validators
            .into_iter()
            .map(|(name, validator)| (name, Arc::new(validator)))
            .collect();

        for validator in validators.values() {
            let targets = validator
                .endpoints
                .as_ref()
                .unwrap_or(&configuration.validated_endpoints);
            for target in targets {
                if let Some(endpoint) = endpoints.get_mut(target) {
                    endpoint.validators.push(validator.clone());
                }
            }
        }

        resource.endpoints = endpoints
            .into_iter()
            .map(|(name, endpoint)| (name, Arc::new(endpoint)))
            .collect();
        resource.validators = validators;

        Ok(Arc::new(resource))
    }
}

/// The declared versions of a named resource.
#[derive(Default)]
pub struct ResourceFamily {
    versions: BTreeMap<u32, Arc<Resource>>,
}

impl ResourceFamily {
    pub fn new() -> ResourceFamily {
        ResourceFamily::default()
    }

    /// Collect versions of a resource into a family.
    pub fn of<I>(resources: I) -> Result<Arc<ResourceFamily>, SpecificationError>
    where
        I: IntoIterator<Item = Arc<Resource>>,
    {
        let mut family = ResourceFamily::new();
        for resource in resources {
            family.insert(resource)?;
        }
        Ok(Arc::new(family))
    }

    pub fn insert(&mut self, resource: Arc<Resource>) -> Result<(), SpecificationError> {
        let version = resource.version.ok_or_else(|| {
            SpecificationError::new("only versioned resources can join a family")
        })?;

        if let Some(existing) = self.versions.values().next() {
            if existing.name != resource.name {
                return Err(SpecificationError::new("mismatching resources in family"));
            }
        }
        if self.versions.contains_key(&version) {
            return Err(SpecificationError::new(format!(
                "cannot declare duplicate version of {:?}",
                resource.name.as_deref().unwrap_or("")
            )));
        }

        self.versions.insert(version, resource);
        Ok(())
    }

    pub fn name(&self) -> Option<&str> {
        self.versions.values().next().and_then(|r| r.name.as_deref())
    }

    pub fn get(&self, major: u32) -> Option<&Arc<Resource>> {
        self.versions.get(&major)
    }

    pub fn contains(&self, major: u32) -> bool {
        self.versions.contains_key(&major)
    }

    pub fn minimum_version(&self) -> Option<u32> {
        self.versions.keys().next().copied()
    }

    pub fn maximum_version(&self) -> Option<u32> {
        self.versions.keys().next_back().copied()
    }

    pub fn latest(&self) -> Option<&Arc<Resource>> {
        self.versions.values().next_back()
    }

    pub fn versions(&self) -> impl Iterator<Item = (&u32, &Arc<Resource>)> {
        self.versions.iter()
    }
}
