use std::fmt;

use super::HookElement;
use super::HookKind;
use crate::constants::HOOK_FLAG_SERVICE;
use crate::HookError;

/// Commands run when the content behind a file hook changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookExec {
    /// Command run after the content changed
    pub command: String,
    /// Command which must succeed before `command` runs
    pub check: String,
}

/// Keeps a file of the container in sync with a store key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHook {
    pub id: String,
    /// Path of the source file
    pub file: String,
    /// Destination key in the store
    pub key: String,
    pub exec: HookExec,
    /// Free-form, comma separated flags
    pub flags: String,
}

impl FileHook {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Folds one element of the declaration; `None` is the bare `FILE_<id>` entry
    pub fn set(
        &mut self,
        element: Option<HookElement>,
        value: &str,
    ) {
        let value = value.to_string();
        match element {
            None => self.file = value,
            Some(HookElement::Key) => self.key = value,
            Some(HookElement::Check) => self.exec.check = value,
            Some(HookElement::Exec) => self.exec.command = value,
            Some(HookElement::Flags) => self.flags = value,
        }
    }

    pub fn validate(&self) -> Result<(), HookError> {
        if self.id.is_empty() {
            return Err(self.incomplete("id"));
        }
        if self.file.is_empty() {
            return Err(self.incomplete("file"));
        }
        if self.key.is_empty() {
            return Err(self.incomplete("key"));
        }
        Ok(())
    }

    /// Service names requested through `service=<name>` flags
    pub fn services(&self) -> Vec<String> {
        self.flags
            .split(',')
            .filter_map(|flag| flag.split_once('='))
            .filter(|(name, _)| name.trim() == HOOK_FLAG_SERVICE)
            .map(|(_, value)| value.trim().to_string())
            .filter(|service| !service.is_empty())
            .collect()
    }

    fn incomplete(
        &self,
        missing: &'static str,
    ) -> HookError {
        HookError::Incomplete {
            id: self.id.clone(),
            missing,
        }
    }
}

impl fmt::Display for FileHook {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "id: {}, file: {}, key: {}, exec: (command: {}, check: {}), flags: {}",
            self.id, self.file, self.key, self.exec.command, self.exec.check, self.flags
        )
    }
}

/// Publishes the keys held in a file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyHook {
    pub id: String,
    /// Destination file
    pub file: String,
}

impl KeyHook {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), HookError> {
        if self.id.is_empty() {
            return Err(HookError::Incomplete {
                id: self.id.clone(),
                missing: "id",
            });
        }
        if self.file.is_empty() {
            return Err(HookError::Incomplete {
                id: self.id.clone(),
                missing: "file",
            });
        }
        Ok(())
    }
}

impl fmt::Display for KeyHook {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "id: {}, file: {}", self.id, self.file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDeclaration {
    File(FileHook),
    Keys(KeyHook),
}

impl HookDeclaration {
    pub fn kind(&self) -> HookKind {
        match self {
            HookDeclaration::File(_) => HookKind::File,
            HookDeclaration::Keys(_) => HookKind::Keys,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            HookDeclaration::File(hook) => &hook.id,
            HookDeclaration::Keys(hook) => &hook.id,
        }
    }
}

impl fmt::Display for HookDeclaration {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            HookDeclaration::File(hook) => write!(f, "file hook [{hook}]"),
            HookDeclaration::Keys(hook) => write!(f, "keys hook [{hook}]"),
        }
    }
}
