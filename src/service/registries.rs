use std::sync::Arc;

use dashmap::DashMap;

use crate::hook::FileHook;
use crate::hook::HookRegistry;
use crate::metrics::HOOK_REGISTRIES;
use crate::store::covers;
use crate::store::normalize_path;

/// Hook registries of the containers currently holding valid hooks, keyed by
/// container id.
///
/// Written only by the dispatcher loop; readers get shared snapshots.
#[derive(Debug, Default)]
pub struct HookRegistries {
    registries: DashMap<String, Arc<HookRegistry>>,
}

impl HookRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `registry`, replacing any previous one of the same container
    pub fn insert(
        &self,
        registry: HookRegistry,
    ) -> Arc<HookRegistry> {
        let registry = Arc::new(registry);
        self.registries
            .insert(registry.container_id().to_string(), registry.clone());
        self.update_gauge();
        registry
    }

    pub fn remove(
        &self,
        container_id: &str,
    ) -> Option<Arc<HookRegistry>> {
        let removed = self.registries.remove(container_id).map(|(_, registry)| registry);
        self.update_gauge();
        removed
    }

    pub fn get(
        &self,
        container_id: &str,
    ) -> Option<Arc<HookRegistry>> {
        self.registries.get(container_id).map(|entry| entry.value().clone())
    }

    pub fn contains(
        &self,
        container_id: &str,
    ) -> bool {
        self.registries.contains_key(container_id)
    }

    pub fn len(&self) -> usize {
        self.registries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }

    pub fn container_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registries.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// File hooks whose destination key covers `path`, with their container id
    pub fn owners_of_path(
        &self,
        path: &str,
    ) -> Vec<(String, FileHook)> {
        self.collect_owners(|hook| covers(&normalize_path(&hook.key), path))
    }

    /// File hooks flagged with `service=<name>`, with their container id
    pub fn owners_of_service(
        &self,
        name: &str,
    ) -> Vec<(String, FileHook)> {
        self.collect_owners(|hook| hook.services().iter().any(|s| s == name))
    }

    fn collect_owners<F>(
        &self,
        wants: F,
    ) -> Vec<(String, FileHook)>
    where
        F: Fn(&FileHook) -> bool,
    {
        let mut owners: Vec<(String, FileHook)> = self
            .registries
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .files()
                    .filter(|hook| wants(hook))
                    .map(|hook| (entry.key().clone(), hook.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        owners.sort_by(|a, b| (&a.0, &a.1.id).cmp(&(&b.0, &b.1.id)));
        owners
    }

    fn update_gauge(&self) {
        HOOK_REGISTRIES.set(self.registries.len() as i64);
    }
}
