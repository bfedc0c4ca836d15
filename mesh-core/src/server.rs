use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::bundle::Bundle;
use crate::controller::Controller;
use crate::endpoint::{Endpoint, Mediator};
use crate::error::SpecificationError;
use crate::format::{Format, FormatRegistry, Json};
use crate::resource::Resource;

/// The transport-independent server state: bundles, formats, and
/// mediators. Immutable once a transport starts accepting traffic.
pub struct ServerCore {
    bundles: BTreeMap<String, Arc<Bundle>>,
    formats: FormatRegistry,
    default_format: Arc<dyn Format>,
    mediators: Vec<Arc<dyn Mediator>>,
}

impl ServerCore {
    pub fn new<I>(bundles: I) -> Result<ServerCore, SpecificationError>
    where
        I: IntoIterator<Item = Arc<Bundle>>,
    {
        let mut table = BTreeMap::new();
        for bundle in bundles {
            if table.contains_key(bundle.name()) {
                return Err(SpecificationError::new(format!(
                    "duplicate bundle {:?}",
                    bundle.name()
                )));
            }
            table.insert(bundle.name().to_string(), bundle);
        }

        Ok(ServerCore {
            bundles: table,
            formats: FormatRegistry::standard(),
            default_format: Arc::new(Json),
            mediators: Vec::new(),
        })
    }

    pub fn with_format(mut self, format: Arc<dyn Format>) -> ServerCore {
        self.formats.register(format);
        self
    }

    pub fn with_default_format(mut self, format: Arc<dyn Format>) -> ServerCore {
        self.formats.register(format.clone());
        self.default_format = format;
        self
    }

    pub fn with_mediator(mut self, mediator: Arc<dyn Mediator>) -> ServerCore {
        self.mediators.push(mediator);
        self
    }

    pub fn bundles(&self) -> impl Iterator<Item = &Arc<Bundle>> {
        self.bundles.values()
    }

    pub fn bundle(&self, name: &str) -> Option<&Arc<Bundle>> {
        self.bundles.get(name)
    }

    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }

    pub fn default_format(&self) -> &Arc<dyn Format> {
        &self.default_format
    }

    pub fn mediators(&self) -> &[Arc<dyn Mediator>] {
        &self.mediators
    }
}

/// One compiled route: the resource, controller, and endpoint serving an
/// address.
#[derive(Clone)]
pub struct RouteEntry {
    pub resource: Arc<Resource>,
    pub controller: Arc<Controller>,
    pub endpoint: Arc<Endpoint>,
}

/// The routing table shared by the in-process and message transports,
/// keyed by the `ebr` rendering of each endpoint's address.
pub struct EndpointTable {
    entries: HashMap<String, RouteEntry>,
}

impl EndpointTable {
    pub fn compile(core: &ServerCore) -> EndpointTable {
        let mut entries = HashMap::new();
        for bundle in core.bundles() {
            for (address, resource, controller) in bundle.enumerate_resources(None) {
                for (endpoint_address, endpoint) in resource.enumerate_endpoints(&address) {
                    entries.insert(
                        endpoint_address.routing_key(),
                        RouteEntry {
                            resource: resource.clone(),
                            controller: controller.clone(),
                            endpoint,
                        },
                    );
                }
            }
        }
        EndpointTable { entries }
    }

    pub fn get(&self, routing_key: &str) -> Option<&RouteEntry> {
        self.entries.get(routing_key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn routing_keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}
