//! The API-to-endpoint routing table and the logic that folds registry
//! events into it. This is the hard-engineering core named in the spec:
//! many concurrent readers on the request path, one writer (the watch
//! loop) applying events under an exclusive lock.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use crate::types::{Action, Endpoint, Event, API_METADATA_KEY, API_VER_METADATA_KEY};

/// `API -> version -> Endpoint`. Readers take a shared lock; the watch loop
/// is the sole writer and takes an exclusive one.
#[derive(Default)]
pub struct RoutingTable {
    inner: RwLock<HashMap<String, HashMap<String, Endpoint>>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        RoutingTable::default()
    }

    /// Non-blocking in the common case: a shared lock over an in-memory map.
    pub fn lookup(&self, api: &str, version: &str) -> Option<Endpoint> {
        let table = self.inner.read().expect("routing table lock poisoned");
        table.get(api)?.get(version).cloned()
    }

    /// Applies one registry event. Called only by the watch loop.
    pub fn apply(&self, event: &Event) {
        let mut table = self.inner.write().expect("routing table lock poisoned");
        match event.action {
            Action::Create | Action::Update => create_or_update(&mut table, event),
            Action::Delete => {
                if event.service.nodes.is_empty() {
                    remove_service(&mut table, &event.service.name);
                } else {
                    remove_service_endpoints(&mut table, event);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> HashMap<String, HashMap<String, Endpoint>> {
        self.inner.read().expect("routing table lock poisoned").clone()
    }
}

fn create_or_update(table: &mut HashMap<String, HashMap<String, Endpoint>>, event: &Event) {
    for endpoint in &event.service.endpoints {
        let (apis, version) = match advertised_apis(endpoint) {
            Some(v) => v,
            None => {
                debug!(
                    endpoint = %endpoint.name,
                    "skipping endpoint without post_api/post_api_ver metadata"
                );
                continue;
            }
        };

        for api in apis {
            let versions = table.entry(api).or_default();
            versions.entry(version.clone()).or_insert_with(|| Endpoint {
                service: event.service.name.clone(),
                method: endpoint.name.clone(),
            });
        }
    }
}

fn remove_service(table: &mut HashMap<String, HashMap<String, Endpoint>>, service_name: &str) {
    table.retain(|_api, versions| {
        versions.retain(|_version, endpoint| endpoint.service != service_name);
        !versions.is_empty()
    });
}

fn remove_service_endpoints(table: &mut HashMap<String, HashMap<String, Endpoint>>, event: &Event) {
    for endpoint in &event.service.endpoints {
        let (apis, version) = match advertised_apis(endpoint) {
            Some(v) => v,
            None => continue,
        };

        for api in apis {
            if let Some(versions) = table.get_mut(&api) {
                versions.remove(&version);
                if versions.is_empty() {
                    table.remove(&api);
                }
            }
        }
    }
}

/// Extracts the list of API aliases and the version an endpoint advertises,
/// or `None` if either piece of metadata is missing (a malformed/unexposed
/// endpoint, silently skipped per the spec).
fn advertised_apis(endpoint: &crate::types::ServiceEndpoint) -> Option<(Vec<String>, String)> {
    let post_api = endpoint.metadata.get(API_METADATA_KEY)?;
    let version = endpoint.metadata.get(API_VER_METADATA_KEY)?.clone();
    let apis = post_api
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    if apis.is_empty() {
        return None;
    }
    Some((apis, version))
}
