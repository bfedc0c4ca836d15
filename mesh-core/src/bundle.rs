use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::address::{Address, Version};
use crate::controller::{Controller, ControllerFamily};
use crate::error::SpecificationError;
use crate::resource::{Resource, ResourceFamily};
use crate::specification::Specification;

/// The name-to-family registry backing string-based mounts.
///
/// Populated at initialization; a mount naming a resource or controller
/// resolves against it when the bundle is built.
#[derive(Default)]
pub struct Registry {
    resources: HashMap<String, Arc<ResourceFamily>>,
    controllers: HashMap<String, Arc<ControllerFamily>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn register_resources(&mut self, name: impl Into<String>, family: Arc<ResourceFamily>) {
        self.resources.insert(name.into(), family);
    }

    pub fn register_controllers(
        &mut self,
        name: impl Into<String>,
        family: Arc<ControllerFamily>,
    ) {
        self.controllers.insert(name.into(), family);
    }

    pub fn resources(&self, name: &str) -> Option<&Arc<ResourceFamily>> {
        self.resources.get(name)
    }

    pub fn controllers(&self, name: &str) -> Option<&Arc<ControllerFamily>> {
        self.controllers.get(name)
    }
}

/// A reference to a mount target: direct, or by registry name.
enum MountTarget<T> {
    Direct(Arc<T>),
    Named(String),
}

impl<T> Clone for MountTarget<T> {
    fn clone(&self) -> Self {
        match self {
            MountTarget::Direct(family) => MountTarget::Direct(family.clone()),
            MountTarget::Named(name) => MountTarget::Named(name.clone()),
        }
    }
}

/// A version bound on a mount: a controller version pair, or a bare
/// resource major pinned to `(major, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionBound {
    Pair(Version),
    Major(u32),
}

impl From<Version> for VersionBound {
    fn from(version: Version) -> VersionBound {
        VersionBound::Pair(version)
    }
}

impl From<u32> for VersionBound {
    fn from(major: u32) -> VersionBound {
        VersionBound::Major(major)
    }
}

impl VersionBound {
    fn resolve(
        self,
        controllers: &ControllerFamily,
    ) -> Result<Version, SpecificationError> {
        let version = match self {
            VersionBound::Pair(version) => version,
            VersionBound::Major(major) => Version(major, 0),
        };
        if controllers.contains(version) {
            Ok(version)
        } else {
            Err(SpecificationError::new(format!(
                "mount of {:?} bounds an undeclared controller version {version}",
                controllers.resource_name()
            )))
        }
    }
}

/// Mounts a resource/controller pair, or a nested bundle, within a bundle.
#[derive(Clone)]
pub struct Mount {
    kind: MountKind,
    min_version: Option<VersionBound>,
    max_version: Option<VersionBound>,
}

#[derive(Clone)]
enum MountKind {
    Pair {
        resource: MountTarget<ResourceFamily>,
        controller: Option<MountTarget<ControllerFamily>>,
    },
    Recursive {
        bundles: BTreeMap<Version, Arc<Bundle>>,
    },
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MountKind::Pair { resource, .. } => {
                let name = match resource {
                    MountTarget::Direct(family) => family.name().unwrap_or("?").to_string(),
                    MountTarget::Named(name) => name.clone(),
                };
                write!(f, "Mount({name:?})")
            }
            MountKind::Recursive { bundles } => {
                let name = bundles.values().next().map(|b| b.name()).unwrap_or("?");
                write!(f, "Mount(nested {name:?})")
            }
        }
    }
}

impl Mount {
    /// Mount a resource family with its controller family.
    pub fn new(resources: &Arc<ResourceFamily>, controllers: &Arc<ControllerFamily>) -> Mount {
        Mount {
            kind: MountKind::Pair {
                resource: MountTarget::Direct(resources.clone()),
                controller: Some(MountTarget::Direct(controllers.clone())),
            },
            min_version: None,
            max_version: None,
        }
    }

    /// Mount a resource family without a controller; the configuration's
    /// default handler serves every version.
    pub fn resource(resources: &Arc<ResourceFamily>) -> Mount {
        Mount {
            kind: MountKind::Pair {
                resource: MountTarget::Direct(resources.clone()),
                controller: None,
            },
            min_version: None,
            max_version: None,
        }
    }

    /// Mount by registry name. Unresolvable names skip the mount when the
    /// bundle is built.
    pub fn named(resource: impl Into<String>, controller: Option<&str>) -> Mount {
        Mount {
            kind: MountKind::Pair {
                resource: MountTarget::Named(resource.into()),
                controller: controller.map(|name| MountTarget::Named(name.to_string())),
            },
            min_version: None,
            max_version: None,
        }
    }

    /// Embed an inner bundle per version under this mount's slot.
    pub fn recursive<I>(bundles: I) -> Mount
    where
        I: IntoIterator<Item = (Version, Arc<Bundle>)>,
    {
        Mount {
            kind: MountKind::Recursive {
                bundles: bundles.into_iter().collect(),
            },
            min_version: None,
            max_version: None,
        }
    }

    pub fn min_version(mut self, bound: impl Into<VersionBound>) -> Mount {
        self.min_version = Some(bound.into());
        self
    }

    pub fn max_version(mut self, bound: impl Into<VersionBound>) -> Mount {
        self.max_version = Some(bound.into());
        self
    }

    /// Resolve references and compute the serving-version list. Returns
    /// `None` when a named target cannot be resolved.
    fn construct(
        &self,
        registry: Option<&Registry>,
    ) -> Result<Option<ResolvedMount>, SpecificationError> {
        match &self.kind {
            MountKind::Recursive { bundles } => Ok(Some(ResolvedMount {
                versions: bundles.keys().copied().collect(),
                binding: ResolvedBinding::Recursive(bundles.clone()),
            })),
            MountKind::Pair {
                resource,
                controller,
            } => {
                let resources = match resource {
                    MountTarget::Direct(family) => family.clone(),
                    MountTarget::Named(name) => {
                        match registry.and_then(|registry| registry.resources(name)) {
                            Some(family) => family.clone(),
                            None => {
                                tracing::warn!(resource = %name, "failed to resolve mount");
                                return Ok(None);
                            }
                        }
                    }
                };

                let controllers = match controller {
                    Some(MountTarget::Direct(family)) => Some(family.clone()),
                    Some(MountTarget::Named(name)) => {
                        match registry.and_then(|registry| registry.controllers(name)) {
                            Some(family) => Some(family.clone()),
                            None => {
                                tracing::warn!(controller = %name, "failed to resolve controller");
                                None
                            }
                        }
                    }
                    None => None,
                };

                let controllers = match controllers {
                    Some(family) => family,
                    None => default_controllers(&resources)?,
                };

                let min = match self.min_version {
                    Some(bound) => bound.resolve(&controllers)?,
                    None => controllers.minimum_version().ok_or_else(|| {
                        SpecificationError::new("mounted controller declares no versions")
                    })?,
                };
                let max = match self.max_version {
                    Some(bound) => bound.resolve(&controllers)?,
                    None => controllers.maximum_version().ok_or_else(|| {
                        SpecificationError::new("mounted controller declares no versions")
                    })?,
                };

                let versions: Vec<Version> = controllers
                    .versions()
                    .map(|(version, _)| *version)
                    .filter(|version| *version >= min && *version <= max)
                    .collect();

                Ok(Some(ResolvedMount {
                    versions,
                    binding: ResolvedBinding::Pair(controllers),
                }))
            }
        }
    }
}

/// Synthesize a default controller family over a resource family: one
/// controller per resource version, served by the configuration's default
/// handler.
fn default_controllers(
    resources: &Arc<ResourceFamily>,
) -> Result<Arc<ControllerFamily>, SpecificationError> {
    let mut builder = ControllerFamily::builder(resources);
    for (major, resource) in resources.versions() {
        builder = builder.version(
            Version(*major, 0),
            resource.configuration.default_handler.clone(),
        );
    }
    builder.build()
}

struct ResolvedMount {
    versions: Vec<Version>,
    binding: ResolvedBinding,
}

enum ResolvedBinding {
    Pair(Arc<ControllerFamily>),
    Recursive(BTreeMap<Version, Arc<Bundle>>),
}

impl ResolvedMount {
    /// The staleness rule: the highest serving version not exceeding the
    /// asked bundle version.
    fn get(&self, version: Version) -> Option<(String, BundleEntry)> {
        let candidate = self
            .versions
            .iter()
            .rev()
            .find(|candidate| version >= **candidate)?;

        match &self.binding {
            ResolvedBinding::Pair(controllers) => {
                let controller = controllers.get(*candidate)?;
                let name = controller.resource.name.clone()?;
                Some((
                    name,
                    BundleEntry::Pair(controller.resource.clone(), controller.clone()),
                ))
            }
            ResolvedBinding::Recursive(bundles) => {
                let bundle = bundles.get(candidate)?;
                Some((bundle.name().to_string(), BundleEntry::Nested(bundle.clone())))
            }
        }
    }
}

/// One slot of a bundle version: a resource/controller pair or a nested
/// bundle.
#[derive(Clone)]
pub enum BundleEntry {
    Pair(Arc<Resource>, Arc<Controller>),
    Nested(Arc<Bundle>),
}

/// A named, versioned container of resource/controller pairs.
pub struct Bundle {
    name: String,
    description: Option<String>,
    mounts: Vec<Mount>,
    ordering: Vec<Version>,
    versions: BTreeMap<Version, BTreeMap<String, BundleEntry>>,
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("name", &self.name)
            .field("versions", &self.ordering)
            .finish()
    }
}

impl Bundle {
    pub fn builder(name: impl Into<String>) -> BundleBuilder {
        BundleBuilder {
            name: name.into(),
            description: None,
            mounts: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The compiled version table.
    pub fn versions(&self) -> &BTreeMap<Version, BTreeMap<String, BundleEntry>> {
        &self.versions
    }

    pub fn ordering(&self) -> &[Version] {
        &self.ordering
    }

    /// Rebuild this bundle, optionally renamed, optionally transforming
    /// each mount (a transformer returning `None` drops the mount).
    pub fn clone_as(
        &self,
        name: Option<&str>,
        transformer: Option<&dyn Fn(Mount) -> Option<Mount>>,
        registry: Option<&Registry>,
    ) -> Result<Arc<Bundle>, SpecificationError> {
        let mut builder = Bundle::builder(name.unwrap_or(&self.name));
        if let Some(description) = &self.description {
            builder = builder.description(description.clone());
        }

        for mount in &self.mounts {
            let mount = match transformer {
                Some(transformer) => match transformer(mount.clone()) {
                    Some(mount) => mount,
                    None => continue,
                },
                None => mount.clone(),
            };
            builder = builder.mount(mount);
        }

        builder.build(registry)
    }

    /// The sorted bundle versions within an inclusive range; an exact
    /// `version` returns a singleton or nothing.
    pub fn slice(
        &self,
        version: Option<Version>,
        min_version: Option<Version>,
        max_version: Option<Version>,
    ) -> Vec<Version> {
        if let Some(version) = version {
            return if self.versions.contains_key(&version) {
                vec![version]
            } else {
                Vec::new()
            };
        }

        self.ordering
            .iter()
            .copied()
            .filter(|candidate| min_version.map(|min| *candidate >= min).unwrap_or(true))
            .filter(|candidate| max_version.map(|max| *candidate <= max).unwrap_or(true))
            .collect()
    }

    /// Yield `(address, resource, controller)` for every resource of every
    /// version, addresses pre-populated for routing.
    pub fn enumerate_resources(
        &self,
        address: Option<&Address>,
    ) -> Vec<(Address, Arc<Resource>, Arc<Controller>)> {
        let base = address.cloned().unwrap_or_default();
        let mut enumerated = Vec::new();

        for (version, entries) in &self.versions {
            let subaddress = base.extend(self.name.clone(), *version);
            for entry in entries.values() {
                match entry {
                    BundleEntry::Nested(bundle) => {
                        enumerated.extend(bundle.enumerate_resources(Some(&subaddress)));
                    }
                    BundleEntry::Pair(resource, controller) => {
                        let address = subaddress
                            .clone()
                            .with_resource(resource.name.clone().unwrap_or_default());
                        enumerated.push((address, resource.clone(), controller.clone()));
                    }
                }
            }
        }
        enumerated
    }

    /// Construct a serializable description of this bundle, optionally
    /// limited to the named target resources.
    pub fn describe(
        &self,
        address: Option<&Address>,
        targets: Option<&[&str]>,
        verbose: bool,
        omissions: Option<&[String]>,
    ) -> Value {
        let base = address.cloned().unwrap_or_default();

        let mut description = Map::new();
        description.insert("__subject__".into(), Value::String("bundle".into()));
        description.insert("name".into(), Value::String(self.name.clone()));
        if verbose || self.description.is_some() {
            description.insert(
                "description".into(),
                self.description
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            );
        }
        if base.bundle.is_empty() {
            description.insert("__version__".into(), Value::Number(1.into()));
        }

        let mut versions = Map::new();
        for (version, entries) in &self.versions {
            let mut items = Map::new();
            for (name, entry) in entries {
                if let Some(targets) = targets {
                    if !targets.contains(&name.as_str()) {
                        continue;
                    }
                }
                let subaddress = base.extend(self.name.clone(), *version);
                let item = match entry {
                    BundleEntry::Nested(bundle) => {
                        bundle.describe(Some(&subaddress), None, verbose, omissions)
                    }
                    BundleEntry::Pair(resource, controller) => {
                        resource.describe(Some(controller), Some(&subaddress), verbose, omissions)
                    }
                };
                items.insert(name.clone(), item);
            }
            versions.insert(version.to_string(), Value::Object(items));
        }
        description.insert("versions".into(), Value::Object(versions));

        Value::Object(description)
    }

    /// Build the immutable specification artifact for this bundle.
    pub fn specify(&self) -> Result<Specification, SpecificationError> {
        Specification::new(&self.describe(None, None, false, None))
    }
}

/// Collects mounts and compiles the bundle's version table.
pub struct BundleBuilder {
    name: String,
    description: Option<String>,
    mounts: Vec<Mount>,
}

impl BundleBuilder {
    pub fn description(mut self, description: impl Into<String>) -> BundleBuilder {
        self.description = Some(description.into());
        self
    }

    pub fn mount(mut self, mount: Mount) -> BundleBuilder {
        self.mounts.push(mount);
        self
    }

    pub fn mounts<I: IntoIterator<Item = Mount>>(mut self, mounts: I) -> BundleBuilder {
        self.mounts.extend(mounts);
        self
    }

    pub fn build(self, registry: Option<&Registry>) -> Result<Arc<Bundle>, SpecificationError> {
        let mut kept = Vec::new();
        let mut resolved = Vec::new();
        for mount in self.mounts {
            if let Some(resolution) = mount.construct(registry)? {
                kept.push(mount);
                resolved.push(resolution);
            }
        }

        // Collate: the union of mount versions orders the bundle; each
        // mount binds its best serving version into every bundle version.
        let mut ordering: Vec<Version> = resolved
            .iter()
            .flat_map(|mount| mount.versions.iter().copied())
            .collect();
        ordering.sort();
        ordering.dedup();

        let mut versions: BTreeMap<Version, BTreeMap<String, BundleEntry>> = BTreeMap::new();
        for mount in &resolved {
            for version in &ordering {
                if let Some((name, entry)) = mount.get(*version) {
                    let slot = versions.entry(*version).or_default();
                    if slot.contains_key(&name) {
                        return Err(SpecificationError::new(format!(
                            "bundle {:?} mounts duplicate resource {name:?} at version {version}",
                            self.name
                        )));
                    }
                    slot.insert(name, entry);
                }
            }
        }

        Ok(Arc::new(Bundle {
            name: self.name,
            description: self.description,
            mounts: kept,
            ordering,
            versions,
        }))
    }
}
