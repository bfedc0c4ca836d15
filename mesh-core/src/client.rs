use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;

use crate::specification::Specification;

/// The contract every transport client satisfies: a name (its bundle) and
/// the specification it operates against.
pub trait ClientHandle: Send + Sync {
    fn name(&self) -> &str;

    fn specification(&self) -> Arc<Specification>;

    /// Access the concrete client for transport-specific calls.
    fn as_any(&self) -> &dyn Any;
}

/// Clients indexed by bundle name.
///
/// A dependency-injection slot rather than a process-wide singleton:
/// construct one, register clients at initialization, and pass it to
/// whatever needs lookup-by-name.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<String, Arc<dyn ClientHandle>>,
}

impl ClientRegistry {
    pub fn new() -> ClientRegistry {
        ClientRegistry::default()
    }

    /// Register a client under its bundle name, returning the handle.
    pub fn register(&self, client: Arc<dyn ClientHandle>) -> Arc<dyn ClientHandle> {
        self.clients.insert(client.name().to_string(), client.clone());
        client
    }

    /// Drop the registration for a bundle name, if the given client holds
    /// it.
    pub fn unregister(&self, client: &Arc<dyn ClientHandle>) {
        self.clients
            .remove_if(client.name(), |_, registered| Arc::ptr_eq(registered, client));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ClientHandle>> {
        self.clients.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }
}
