//! Hook grammar.
//!
//! ```text
//! <prefix>FILE_<id>[_KEY|_CHECK|_EXEC|_FLAGS]
//! <prefix>KEYS_<id>
//! ```
//!
//! `<id>` is one or more alphabetic characters. The token after the prefix
//! selects the sub-grammar and is exclusive.

use std::fmt;
use std::str::FromStr;

use crate::constants::HOOK_FILE_TOKEN;
use crate::constants::HOOK_KEYS_TOKEN;
use crate::HookError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    File,
    Keys,
}

impl fmt::Display for HookKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            HookKind::File => write!(f, "FILE"),
            HookKind::Keys => write!(f, "KEYS"),
        }
    }
}

/// Optional element suffix of a file hook variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookElement {
    Key,
    Check,
    Exec,
    Flags,
}

impl FromStr for HookElement {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "KEY" => Ok(HookElement::Key),
            "CHECK" => Ok(HookElement::Check),
            "EXEC" => Ok(HookElement::Exec),
            "FLAGS" => Ok(HookElement::Flags),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub kind: HookKind,
    pub id: String,
    pub element: Option<HookElement>,
}

#[derive(Debug, Clone)]
pub struct HookParser {
    prefix: String,
}

impl HookParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// True when the name carries the configured prefix
    pub fn is_hook(
        &self,
        name: &str,
    ) -> bool {
        name.starts_with(&self.prefix)
    }

    /// Maps an environment variable name onto a hook declaration.
    ///
    /// Returns `Ok(None)` when the name is not a hook at all (no prefix, or
    /// a prefix followed by neither discriminator) and `Err` when a hook
    /// name breaks the grammar.
    pub fn parse_key(
        &self,
        name: &str,
    ) -> Result<Option<ParsedKey>, HookError> {
        let Some(rest) = name.strip_prefix(self.prefix.as_str()) else {
            return Ok(None);
        };

        if let Some(body) = rest.strip_prefix(HOOK_FILE_TOKEN) {
            let (id, element) = match body.split_once('_') {
                Some((id, element)) => {
                    let element = element
                        .parse::<HookElement>()
                        .map_err(|_| HookError::InvalidKey(name.to_string()))?;
                    (id, Some(element))
                }
                None => (body, None),
            };
            return Ok(Some(ParsedKey {
                kind: HookKind::File,
                id: valid_id(name, id)?,
                element,
            }));
        }

        if let Some(id) = rest.strip_prefix(HOOK_KEYS_TOKEN) {
            return Ok(Some(ParsedKey {
                kind: HookKind::Keys,
                id: valid_id(name, id)?,
                element: None,
            }));
        }

        Ok(None)
    }
}

fn valid_id(
    name: &str,
    id: &str,
) -> Result<String, HookError> {
    if !id.is_empty() && id.chars().all(char::is_alphabetic) {
        Ok(id.to_string())
    } else {
        Err(HookError::InvalidKey(name.to_string()))
    }
}
