use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TlsConfig {
    /// Client certificate chain in PEM format
    /// Default: unset
    #[serde(default)]
    pub cert_file: Option<String>,

    /// Client private key in PEM format
    /// Default: unset
    #[serde(default)]
    pub key_file: Option<String>,

    /// Certificate Authority root certificate; switches the endpoints to https
    /// Default: unset
    #[serde(default)]
    pub cacert_file: Option<String>,
}

impl TlsConfig {
    /// True when the connection should use https
    pub fn enabled(&self) -> bool {
        is_set(&self.cacert_file)
    }

    pub fn validate(&self) -> Result<()> {
        match (is_set(&self.cert_file), is_set(&self.key_file)) {
            (true, false) => Err(Error::InvalidConfig(
                "tls client certificate configured without a private key".into(),
            )),
            (false, true) => Err(Error::InvalidConfig(
                "tls private key configured without a client certificate".into(),
            )),
            _ => Ok(()),
        }
    }
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}
