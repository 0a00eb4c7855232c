//! etcd v2 keys API over HTTP.

use std::fs;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use tracing::trace;

use super::KvBackend;
use super::Node;
use super::Operation;
use super::WatchResponse;
use crate::Location;
use crate::StoreError;
use crate::TlsConfig;

const ETCD_SCHEME: &str = "etcd";
const KEYS_API: &str = "/v2/keys";
const ERROR_KEY_NOT_FOUND: u64 = 100;

#[derive(Debug, Deserialize)]
struct EtcdResponse {
    action: String,
    node: Option<Node>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdErrorBody {
    error_code: u64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: String,
}

/// Store backend talking to one etcd cluster.
///
/// Requests go to the first endpoint that accepts a connection.
#[derive(Debug, Clone)]
pub struct EtcdStore {
    client: Client,
    endpoints: Vec<String>,
    poll_timeout: Duration,
}

impl EtcdStore {
    pub fn connect(
        location: &Location,
        tls: &TlsConfig,
        poll_timeout: Duration,
    ) -> Result<Self, StoreError> {
        if location.scheme != ETCD_SCHEME {
            return Err(StoreError::UnsupportedScheme(location.scheme.clone()));
        }
        let protocol = if tls.enabled() { "https" } else { "http" };
        let endpoints = location.endpoints(protocol);
        debug!(?endpoints, "connecting to etcd");

        Ok(Self {
            client: http_client(tls)?,
            endpoints,
            poll_timeout,
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn send<F>(
        &self,
        build: F,
    ) -> Result<Response, StoreError>
    where
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let mut last_error = None;
        for endpoint in &self.endpoints {
            match build(&self.client, endpoint).send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() => {
                    debug!(%endpoint, "etcd endpoint unreachable: {}", e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        match last_error {
            Some(e) => Err(e.into()),
            None => Err(StoreError::InvalidLocation("no etcd endpoints".into())),
        }
    }
}

#[async_trait]
impl KvBackend for EtcdStore {
    async fn get(
        &self,
        path: &str,
        recursive: bool,
    ) -> Result<Node, StoreError> {
        let response = self
            .send(|client, endpoint| {
                client
                    .get(keys_url(endpoint, path))
                    .query(&[("recursive", recursive), ("sorted", true)])
            })
            .await?;
        let body = decode(response, path).await?;
        body.node.ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn set(
        &self,
        path: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let response = self
            .send(|client, endpoint| client.put(keys_url(endpoint, path)).form(&[("value", value)]))
            .await?;
        decode(response, path).await.map(|_| ())
    }

    async fn delete(
        &self,
        path: &str,
    ) -> Result<(), StoreError> {
        let response = self
            .send(|client, endpoint| client.delete(keys_url(endpoint, path)))
            .await?;
        decode(response, path).await.map(|_| ())
    }

    async fn remove_path(
        &self,
        path: &str,
    ) -> Result<(), StoreError> {
        let response = self
            .send(|client, endpoint| {
                client
                    .delete(keys_url(endpoint, path))
                    .query(&[("recursive", true), ("dir", true)])
            })
            .await?;
        decode(response, path).await.map(|_| ())
    }

    async fn watch(
        &self,
        path: &str,
        from_index: u64,
        recursive: bool,
    ) -> Result<Option<WatchResponse>, StoreError> {
        let result = self
            .send(|client, endpoint| {
                let mut request = client
                    .get(keys_url(endpoint, path))
                    .timeout(self.poll_timeout)
                    .query(&[("wait", true), ("recursive", recursive)]);
                if from_index > 0 {
                    request = request.query(&[("waitIndex", from_index)]);
                }
                request
            })
            .await;

        let response = match result {
            Ok(response) => response,
            Err(StoreError::Http(e)) if e.is_timeout() => {
                trace!(path, from_index, "etcd long-poll timed out");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        // the timeout also covers reading the body of a held-open request
        let body = match decode(response, path).await {
            Ok(body) => body,
            Err(StoreError::Http(e)) if e.is_timeout() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(body.node.map(|node| WatchResponse {
            operation: operation_of(&body.action),
            index: node.modified_index,
            node,
        }))
    }
}

/// Builds the HTTP client, loading CA and client identity when configured
pub(crate) fn http_client(tls: &TlsConfig) -> Result<Client, StoreError> {
    let mut builder = Client::builder();

    if let Some(cacert) = tls.cacert_file.as_deref().filter(|p| !p.is_empty()) {
        let pem = read_pem(cacert)?;
        let certificate = reqwest::Certificate::from_pem(&pem).map_err(|e| StoreError::Tls {
            path: cacert.to_string(),
            reason: e.to_string(),
        })?;
        builder = builder.add_root_certificate(certificate);
    }

    if let (Some(cert), Some(key)) = (tls.cert_file.as_deref(), tls.key_file.as_deref()) {
        if !cert.is_empty() && !key.is_empty() {
            let mut pem = read_pem(cert)?;
            pem.push(b'\n');
            pem.extend(read_pem(key)?);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| StoreError::Tls {
                path: cert.to_string(),
                reason: e.to_string(),
            })?;
            builder = builder.identity(identity);
        }
    }

    Ok(builder.build()?)
}

fn read_pem(path: &str) -> Result<Vec<u8>, StoreError> {
    fs::read(path).map_err(|e| StoreError::Tls {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn keys_url(
    endpoint: &str,
    path: &str,
) -> String {
    format!("{endpoint}{KEYS_API}{path}")
}

pub(crate) fn operation_of(action: &str) -> Operation {
    match action {
        "delete" | "expire" | "compareAndDelete" => Operation::Deleted,
        _ => Operation::Changed,
    }
}

async fn decode(
    response: Response,
    path: &str,
) -> Result<EtcdResponse, StoreError> {
    let status = response.status();
    let body = response.bytes().await?;
    if status.is_success() {
        return Ok(serde_json::from_slice(&body)?);
    }
    Err(error_from(status, &body, path))
}

pub(crate) fn error_from(
    status: StatusCode,
    body: &[u8],
    path: &str,
) -> StoreError {
    match serde_json::from_slice::<EtcdErrorBody>(body) {
        Ok(error) if error.error_code == ERROR_KEY_NOT_FOUND => {
            let missing = if error.cause.is_empty() { path.to_string() } else { error.cause };
            StoreError::NotFound(missing)
        }
        Ok(error) => StoreError::Backend {
            code: error.error_code,
            message: error.message,
        },
        Err(_) => StoreError::Backend {
            code: u64::from(status.as_u16()),
            message: String::from_utf8_lossy(body).into_owned(),
        },
    }
}
