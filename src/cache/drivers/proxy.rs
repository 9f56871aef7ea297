//! Reverse-proxy driver.
//!
//! The proxy fills itself from origin responses, so this driver only knows how
//! to invalidate: exact keys become `PURGE <path>` requests and wildcard keys
//! a single `BAN /` carrying the prefix in `X-Ban-Prefix`. Both are sent with
//! the key's `Host` so virtual hosts on the proxy resolve correctly.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HOST;
use reqwest::{Client, Method, Url};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::driver::{CacheDriver, DriverKind, Existence};
use crate::cache::keys::{CacheKey, KeySet};

const BAN_PREFIX_HEADER: &str = "x-ban-prefix";

#[derive(Debug, Error)]
pub enum DriverInitError {
    #[error("invalid proxy address: {0}")]
    Address(#[from] url::ParseError),
    #[error("invalid http method `{0}`")]
    Method(&'static str),
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

pub struct ProxyCacheDriver {
    client: Client,
    base: Url,
    default_host: Option<String>,
    purge: Method,
    ban: Method,
}

/// Where a key lands on the proxy.
#[derive(Debug, PartialEq, Eq)]
struct Target {
    path: String,
    host: Option<String>,
}

impl ProxyCacheDriver {
    /// `site_home` supplies the `Host` for keys given as bare paths.
    pub fn new(address: &str, timeout: Duration, site_home: &str) -> Result<Self, DriverInitError> {
        let base = Url::parse(address)?.join("/")?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cachegate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let default_host = Url::parse(site_home).ok().as_ref().and_then(host_header);

        Ok(Self {
            client,
            base,
            default_host,
            purge: Method::from_bytes(b"PURGE").map_err(|_| DriverInitError::Method("PURGE"))?,
            ban: Method::from_bytes(b"BAN").map_err(|_| DriverInitError::Method("BAN"))?,
        })
    }

    fn target(&self, key: &str) -> Target {
        match Url::parse(key) {
            Ok(url) if url.has_host() => {
                let mut path = url.path().to_string();
                if let Some(query) = url.query() {
                    path.push('?');
                    path.push_str(query);
                }
                Target {
                    path,
                    host: host_header(&url).or_else(|| self.default_host.clone()),
                }
            }
            _ => Target {
                path: if key.starts_with('/') {
                    key.to_string()
                } else {
                    format!("/{key}")
                },
                host: self.default_host.clone(),
            },
        }
    }

    /// The proxy address with the key's path and query swapped in. Paths are
    /// set rather than joined so a `//host/...` path never leaves the proxy.
    fn request_url(&self, path: &str) -> Url {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path, None),
        };
        let mut url = self.base.clone();
        url.set_path(path);
        url.set_query(query);
        url
    }

    async fn send(&self, method: Method, path: &str, host: Option<&str>, prefix: Option<&str>) -> bool {
        let url = self.request_url(path);
        let mut request = self.client.request(method.clone(), url);
        if let Some(host) = host {
            request = request.header(HOST, host);
        }
        if let Some(prefix) = prefix {
            request = request.header(BAN_PREFIX_HEADER, prefix);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(method = %method, path, status = %response.status(), "Proxy invalidation sent");
                true
            }
            Ok(response) => {
                warn!(method = %method, path, status = %response.status(), "Proxy rejected invalidation");
                false
            }
            Err(err) => {
                warn!(method = %method, path, error = %err, "Proxy invalidation failed");
                false
            }
        }
    }
}

fn host_header(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[async_trait]
impl CacheDriver for ProxyCacheDriver {
    fn id(&self) -> &'static str {
        "proxy"
    }

    fn label(&self) -> &str {
        "Reverse proxy"
    }

    fn kind(&self) -> DriverKind {
        DriverKind::ProxyCache
    }

    /// Any HTTP answer, whatever its status, means the proxy is there.
    async fn probe(&self) -> bool {
        match self.client.head(self.base.clone()).send().await {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, proxy = %self.base, "Proxy probe failed");
                false
            }
        }
    }

    async fn raw_exists(&self, _key: &CacheKey) -> Existence {
        Existence::Indeterminate
    }

    async fn raw_get(&self, _key: &CacheKey) -> Option<Bytes> {
        None
    }

    async fn raw_set(&self, _key: &CacheKey, _value: Bytes) -> bool {
        false
    }

    async fn raw_delete(&self, keys: &KeySet) -> bool {
        let mut success = true;
        for key in keys {
            success &= match key.prefix() {
                Some(prefix) => {
                    let target = self.target(prefix);
                    self.send(self.ban.clone(), "/", target.host.as_deref(), Some(&target.path))
                        .await
                }
                None => {
                    let target = self.target(key.as_str());
                    self.send(self.purge.clone(), &target.path, target.host.as_deref(), None)
                        .await
                }
            };
        }
        success
    }
}
