use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::address::Version;
use crate::endpoint::Handler;
use crate::error::SpecificationError;
use crate::resource::{Resource, ResourceFamily};

/// A controller: the handler side of a resource version, identified by
/// `(resource_name, (major, minor))`.
#[derive(Clone)]
pub struct Controller {
    pub name: String,
    pub resource: Arc<Resource>,
    pub version: Version,
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Controller[{}/{}]",
            self.resource.name.as_deref().unwrap_or("?"),
            self.version
        )
    }
}

/// The declared versions of a controller over one resource family.
///
/// Assembled once through [`ControllerFamily::builder`]; a mount binds a
/// family, and version resolution picks the member serving each bundle
/// version.
pub struct ControllerFamily {
    resource_name: String,
    versions: BTreeMap<Version, Arc<Controller>>,
}

impl ControllerFamily {
    pub fn builder(resources: &Arc<ResourceFamily>) -> ControllerBuilder {
        ControllerBuilder {
            resources: resources.clone(),
            versions: Vec::new(),
        }
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn get(&self, version: Version) -> Option<&Arc<Controller>> {
        self.versions.get(&version)
    }

    pub fn contains(&self, version: Version) -> bool {
        self.versions.contains_key(&version)
    }

    pub fn minimum_version(&self) -> Option<Version> {
        self.versions.keys().next().copied()
    }

    pub fn maximum_version(&self) -> Option<Version> {
        self.versions.keys().next_back().copied()
    }

    pub fn versions(&self) -> impl DoubleEndedIterator<Item = (&Version, &Arc<Controller>)> {
        self.versions.iter()
    }
}

impl fmt::Debug for ControllerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerFamily")
            .field("resource", &self.resource_name)
            .field("versions", &self.versions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Collects `(version, handler)` declarations and validates them against
/// the resource family on build.
pub struct ControllerBuilder {
    resources: Arc<ResourceFamily>,
    versions: Vec<(Version, Arc<dyn Handler>)>,
}

impl ControllerBuilder {
    pub fn version(mut self, version: Version, handler: Arc<dyn Handler>) -> ControllerBuilder {
        self.versions.push((version, handler));
        self
    }

    pub fn build(self) -> Result<Arc<ControllerFamily>, SpecificationError> {
        let resource_name = self
            .resources
            .name()
            .ok_or_else(|| SpecificationError::new("controllers require a named resource"))?
            .to_string();

        let mut versions = BTreeMap::new();
        for (version, handler) in self.versions {
            if version.major() < 1 {
                return Err(SpecificationError::new(format!(
                    "controller for {resource_name:?} declares an invalid version {version}"
                )));
            }

            let resource = self.resources.get(version.major()).ok_or_else(|| {
                SpecificationError::new(format!(
                    "controller for {resource_name:?} specifies unknown resource version {}",
                    version.major()
                ))
            })?;

            if versions.contains_key(&version) {
                return Err(SpecificationError::new(format!(
                    "controller for {resource_name:?} specifies duplicate version {version}"
                )));
            }

            versions.insert(
                version,
                Arc::new(Controller {
                    name: format!("{resource_name}/{version}"),
                    resource: resource.clone(),
                    version,
                    handler,
                }),
            );
        }

        if versions.is_empty() {
            return Err(SpecificationError::new(format!(
                "controller for {resource_name:?} declares no versions"
            )));
        }

        Ok(Arc::new(ControllerFamily {
            resource_name,
            versions,
        }))
    }
}
