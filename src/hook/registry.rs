use std::collections::HashMap;
use std::fmt;

use tracing::debug;
use tracing::warn;

use super::FileHook;
use super::HookDeclaration;
use super::HookKind;
use super::HookParser;
use super::KeyHook;
use super::ParsedKey;
use crate::metrics::HOOKS_PRUNED;
use crate::metrics::HOOK_PARSE_ERRORS;

/// Hook declarations discovered in one container's environment.
///
/// File and key hooks live in separate maps, so `FILE_<id>` and `KEYS_<id>`
/// never collide.
#[derive(Debug, Clone)]
pub struct HookRegistry {
    container_id: String,
    parser: HookParser,
    files: HashMap<String, FileHook>,
    keys: HashMap<String, KeyHook>,
}

impl HookRegistry {
    pub fn new(
        container_id: impl Into<String>,
        parser: HookParser,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            parser,
            files: HashMap::new(),
            keys: HashMap::new(),
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Folds every hook shaped entry of the environment into the registry.
    ///
    /// Elements overwrite, so observing the same snapshot twice leaves the
    /// registry unchanged. Malformed hook names are logged and skipped.
    pub fn observe<'a, I>(
        &mut self,
        environment: I,
    ) where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (name, value) in environment {
            match self.parser.parse_key(name) {
                Ok(Some(parsed)) => self.fold(parsed, value),
                Ok(None) => {}
                Err(e) => {
                    HOOK_PARSE_ERRORS.inc();
                    warn!(container = %self.container_id, "skipping environment variable: {}", e);
                }
            }
        }
    }

    fn fold(
        &mut self,
        parsed: ParsedKey,
        value: &str,
    ) {
        debug!(
            container = %self.container_id,
            kind = %parsed.kind,
            id = %parsed.id,
            element = ?parsed.element,
            "folding hook element"
        );
        match parsed.kind {
            HookKind::File => self
                .files
                .entry(parsed.id.clone())
                .or_insert_with(|| FileHook::new(parsed.id))
                .set(parsed.element, value),
            HookKind::Keys => {
                self.keys
                    .entry(parsed.id.clone())
                    .or_insert_with(|| KeyHook::new(parsed.id))
                    .file = value.to_string();
            }
        }
    }

    /// Prunes incomplete declarations, one diagnostic per removal
    pub fn validate(&mut self) {
        let container_id = &self.container_id;
        self.files.retain(|_, hook| match hook.validate() {
            Ok(()) => true,
            Err(e) => {
                HOOKS_PRUNED.inc();
                warn!(container = %container_id, "invalid hook file config: {}", e);
                false
            }
        });
        self.keys.retain(|_, hook| match hook.validate() {
            Ok(()) => true,
            Err(e) => {
                HOOKS_PRUNED.inc();
                warn!(container = %container_id, "invalid hook keys config: {}", e);
                false
            }
        });
    }

    pub fn has_hooks(&self) -> bool {
        !self.files.is_empty() || !self.keys.is_empty()
    }

    pub fn file(
        &self,
        id: &str,
    ) -> Option<&FileHook> {
        self.files.get(id)
    }

    pub fn key(
        &self,
        id: &str,
    ) -> Option<&KeyHook> {
        self.keys.get(id)
    }

    pub fn files(&self) -> impl Iterator<Item = &FileHook> {
        self.files.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &KeyHook> {
        self.keys.values()
    }

    pub fn declarations(&self) -> Vec<HookDeclaration> {
        self.files
            .values()
            .cloned()
            .map(HookDeclaration::File)
            .chain(self.keys.values().cloned().map(HookDeclaration::Keys))
            .collect()
    }

    /// Store keys the registry needs watched, one entry per file hook
    pub fn watched_keys(&self) -> Vec<String> {
        self.files.values().map(|hook| hook.key.clone()).collect()
    }

    /// Services requested by the file hook flags, deduplicated
    pub fn watched_services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.files.values().flat_map(FileHook::services).collect();
        services.sort();
        services.dedup();
        services
    }
}

impl fmt::Display for HookRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "container: {}, files: {}, keys: {}",
            self.container_id,
            self.files.len(),
            self.keys.len()
        )
    }
}
