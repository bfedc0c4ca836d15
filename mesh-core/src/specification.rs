use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::address::{Address, Version};
use crate::endpoint::Endpoint;
use crate::error::SpecificationError;
use crate::schema::Schema;

/// An endpoint as described to clients: the reconstructed definition plus
/// its bound address and wire path.
pub struct SpecEndpoint {
    pub endpoint: Endpoint,
    pub address: Option<String>,
    pub path: Option<String>,
}

/// A resource as described to clients.
pub struct SpecResource {
    pub name: String,
    pub title: String,
    pub version: Version,
    pub composite_key: Vec<String>,
    pub schema: Schema,
    pub endpoints: BTreeMap<String, Arc<SpecEndpoint>>,
}

impl SpecResource {
    fn parse(description: &Value) -> Result<SpecResource, SpecificationError> {
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

        let mut endpoints = BTreeMap::new();
        if let Some(descriptions) = map.get("endpoints").and_then(Value::as_object) {
            for (endpoint_name, description) in descriptions {
                let endpoint = Endpoint::reconstruct(&name, description)?;
                let detail = description.as_object();
                endpoints.insert(
                    endpoint_name.clone(),
                    Arc::new(SpecEndpoint {
                        endpoint,
                        address: detail
                            .and_then(|map| map.get("address"))
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        path: detail
                            .and_then(|map| map.get("path"))
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    }),
                );
            }
        }

        Ok(SpecResource {
            title: map
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or(&name)
                .to_string(),
            name,
            version,
            composite_key: map
                .get("composite_key")
                .and_then(Value::as_array)
                .map(|keys| {
                    keys.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            schema,
            endpoints,
        })
    }
}

enum SpecEntry {
    Bundle(SpecBundle),
    Resource(Arc<SpecResource>),
}

struct SpecBundle {
    versions: BTreeMap<Version, BTreeMap<String, SpecEntry>>,
}

/// The leaf a specification lookup resolves to.
#[derive(Clone)]
pub enum Found {
    Resource(Arc<SpecResource>),
    Endpoint(Arc<SpecEndpoint>),
}

impl Found {
    pub fn endpoint(&self) -> Option<&Arc<SpecEndpoint>> {
        match self {
            Found::Endpoint(endpoint) => Some(endpoint),
            Found::Resource(_) => None,
        }
    }
}

/// The immutable, language-neutral description of a bundle: the artifact
/// shipped to clients, indexed by address signature.
pub struct Specification {
    pub name: String,
    pub description: Option<String>,
    versions: BTreeMap<Version, BTreeMap<String, SpecEntry>>,
    cache: DashMap<String, Found>,
}

impl fmt::Debug for Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Specification(name={:?})", self.name)
    }
}

impl Specification {
    /// Reconstruct a specification from a bundle description.
    pub fn new(description: &Value) -> Result<Specification, SpecificationError> {
        let map = description
            .as_object()
            .ok_or_else(|| SpecificationError::new("bundle description must be an object"))?;

        let name = map
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| SpecificationError::new("bundle description lacks a name"))?
            .to_string();

        Ok(Specification {
            name,
            description: map
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            versions: Self::parse_versions(map.get("versions"))?,
            cache: DashMap::new(),
        })
    }

    fn parse_versions(
        versions: Option<&Value>,
    ) -> Result<BTreeMap<Version, BTreeMap<String, SpecEntry>>, SpecificationError> {
        let versions = versions
            .and_then(Value::as_object)
            .ok_or_else(|| SpecificationError::new("bundle description lacks its versions"))?;

        let mut parsed = BTreeMap::new();
        for (version, resources) in versions {
            let version: Version = version
                .parse()
                .map_err(|_| SpecificationError::new(format!("invalid version {version:?}")))?;

            let resources = resources
                .as_object()
                .ok_or_else(|| SpecificationError::new("bundle version must be an object"))?;

            let mut entries = BTreeMap::new();
            for (name, candidate) in resources {
                let subject = candidate
                    .get("__subject__")
                    .and_then(Value::as_str)
                    .unwrap_or("resource");
                let entry = match subject {
                    "bundle" => SpecEntry::Bundle(SpecBundle {
                        versions: Self::parse_versions(candidate.get("versions"))?,
                    }),
                    "resource" => SpecEntry::Resource(Arc::new(SpecResource::parse(candidate)?)),
                    other => {
                        return Err(SpecificationError::new(format!(
                            "unknown description subject {other:?}"
                        )))
                    }
                };
                entries.insert(name.clone(), entry);
            }
            parsed.insert(version, entries);
        }
        Ok(parsed)
    }

    /// Walk the bundle chain of an address down to its resource or
    /// endpoint. Lookups are memoized by routing signature; the cache is
    /// insert-once and safe under concurrent readers.
    pub fn find(&self, address: &Address) -> Result<Found, SpecificationError> {
        if !address.require("b") {
            return Err(SpecificationError::new(format!(
                "address {address} carries no bundle chain"
            )));
        }

        let signature = address.routing_key();
        if let Some(found) = self.cache.get(&signature) {
            return Ok(found.value().clone());
        }

        let not_found =
            || SpecificationError::new(format!("no specification entry for {signature:?}"));

        let mut chain = address.bundle.iter();
        let (head, head_version) = chain.next().ok_or_else(not_found)?;
        if head != &self.name {
            return Err(not_found());
        }

        let mut entries = self.versions.get(head_version).ok_or_else(not_found)?;
        for (name, version) in chain {
            match entries.get(name) {
                Some(SpecEntry::Bundle(bundle)) => {
                    entries = bundle.versions.get(version).ok_or_else(not_found)?;
                }
                _ => return Err(not_found()),
            }
        }

        let resource = match &address.resource {
            Some(name) => match entries.get(name) {
                Some(SpecEntry::Resource(resource)) => resource,
                _ => return Err(not_found()),
            },
            None => return Err(not_found()),
        };

        let found = match &address.endpoint {
            Some(endpoint) => match resource.endpoints.get(endpoint) {
                Some(endpoint) => Found::Endpoint(endpoint.clone()),
                None => return Err(not_found()),
            },
            None => Found::Resource(resource.clone()),
        };

        self.cache.insert(signature, found.clone());
        Ok(found)
    }
}
