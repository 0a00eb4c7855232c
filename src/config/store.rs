use serde::Deserialize;
use serde::Serialize;

use super::Location;
use super::TlsConfig;
use crate::constants::DEFAULT_STORE_URL;
use crate::Error;
use crate::Result;

/// Store schemes with a backend implementation
pub const SUPPORTED_STORE_SCHEMES: &[&str] = &["etcd"];

/// Discovery schemes with a backend implementation
pub const SUPPORTED_DISCOVERY_SCHEMES: &[&str] = &["consul", "etcd"];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    /// Store location, the scheme selects the backend (e.g. `etcd://host:port,host2:port`)
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Client TLS material for the store connection
    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            tls: TlsConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn location(&self) -> Result<Location> {
        Location::parse(&self.url)
    }

    pub fn validate(&self) -> Result<()> {
        let location = self.location()?;
        if !SUPPORTED_STORE_SCHEMES.contains(&location.scheme.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "store scheme {} is not supported",
                location.scheme
            )));
        }
        self.tls.validate()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DiscoveryConfig {
    /// Discovery location (`consul://host:port` or `etcd://hosts`); disabled when unset
    #[serde(default)]
    pub url: Option<String>,

    /// Client TLS material for an etcd discovery backend
    #[serde(default)]
    pub tls: TlsConfig,
}

impl DiscoveryConfig {
    pub fn location(&self) -> Result<Option<Location>> {
        match self.url.as_deref() {
            None | Some("") => Ok(None),
            Some(url) => Location::parse(url).map(Some),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(location) = self.location()? {
            if !SUPPORTED_DISCOVERY_SCHEMES.contains(&location.scheme.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "discovery scheme {} is not supported",
                    location.scheme
                )));
            }
        }
        self.tls.validate()
    }
}

fn default_store_url() -> String {
    DEFAULT_STORE_URL.into()
}
