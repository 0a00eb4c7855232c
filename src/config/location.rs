use std::fmt;

use crate::Error;
use crate::Result;

/// A backend location of the form `scheme://host:port[,host2:port2]`.
///
/// The authority is kept as a host list rather than handed to a URL parser
/// because comma separated clusters are not valid URL hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub scheme: String,
    pub hosts: Vec<String>,
}

impl Location {
    pub fn parse(location: &str) -> Result<Self> {
        let (scheme, rest) = location
            .split_once("://")
            .ok_or_else(|| Error::InvalidConfig(format!("location {location} has no scheme")))?;

        if scheme.is_empty() {
            return Err(Error::InvalidConfig(format!("location {location} has no scheme")));
        }

        // anything after the authority (path, query) is not meaningful here
        let authority = rest.split(['/', '?']).next().unwrap_or_default();

        let hosts: Vec<String> = authority
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(String::from)
            .collect();

        if hosts.is_empty() {
            return Err(Error::InvalidConfig(format!("location {location} has no hosts")));
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            hosts,
        })
    }

    /// Host list rendered as endpoints for the given protocol
    pub fn endpoints(
        &self,
        protocol: &str,
    ) -> Vec<String> {
        self.hosts.iter().map(|host| format!("{protocol}://{host}")).collect()
    }
}

impl fmt::Display for Location {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.hosts.join(","))
    }
}
