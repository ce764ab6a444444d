use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::OfflineError;

/// How the response relates to the requesting origin.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Basic,
    Cors,
    Opaque,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub url: String,
    pub status: u16,
    pub kind: ResponseKind,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(url: impl Into<String>, status: u16, kind: ResponseKind, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            status,
            kind,
            headers: Vec::new(),
            body,
        }
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Only plain same-origin 200 responses are written back to the cache.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && self.kind == ResponseKind::Basic
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, OfflineError>;
}

pub fn parse_origin(origin: &str) -> Result<Url, OfflineError> {
    Url::parse(origin).map_err(|err| OfflineError::Network {
        url: origin.to_string(),
        reason: format!("invalid origin: {err}"),
    })
}

fn resolve(origin: &Url, url: &str) -> Result<Url, OfflineError> {
    origin.join(url).map_err(|err| OfflineError::Network {
        url: url.to_string(),
        reason: err.to_string(),
    })
}

/// Fetches over HTTP. Relative URLs resolve against `origin`.
pub struct HttpNetwork {
    client: reqwest::Client,
    origin: Url,
}

impl HttpNetwork {
    pub fn new(origin: &str) -> Result<Self, OfflineError> {
        let origin = parse_origin(origin)?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("spaila/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| OfflineError::Network {
                url: origin.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self { client, origin })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, OfflineError> {
        let target = resolve(&self.origin, &request.url)?;
        let network_error = |err: reqwest::Error| OfflineError::Network {
            url: request.url.clone(),
            reason: err.to_string(),
        };

        tracing::debug!(url = %target, "network fetch");
        let response = self
            .client
            .get(target.clone())
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status().as_u16();
        let kind = if target.origin() == self.origin.origin() {
            ResponseKind::Basic
        } else {
            ResponseKind::Cors
        };
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(network_error)?.to_vec();

        Ok(Response {
            url: request.url.clone(),
            status,
            kind,
            headers,
            body,
        })
    }
}

/// Serves same-origin paths out of a local site directory. `/` maps to
/// `index.html`; missing files answer 404. Cross-origin requests fail as
/// they would with no connectivity.
pub struct DirectoryNetwork {
    root: PathBuf,
    origin: Url,
}

impl DirectoryNetwork {
    pub fn new(root: impl Into<PathBuf>, origin: &str) -> Result<Self, OfflineError> {
        let origin = parse_origin(origin)?;
        Ok(Self {
            root: root.into(),
            origin,
        })
    }

    fn local_path(&self, url: &Url) -> Option<PathBuf> {
        let path = url.path().trim_start_matches('/');
        let path = if path.is_empty() || path.ends_with('/') {
            format!("{path}index.html")
        } else {
            path.to_string()
        };
        let relative = Path::new(&path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl Network for DirectoryNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, OfflineError> {
        let target = resolve(&self.origin, &request.url)?;
        if target.origin() != self.origin.origin() {
            return Err(OfflineError::Network {
                url: request.url.clone(),
                reason: "no route to cross-origin host".to_string(),
            });
        }
        let Some(path) = self.local_path(&target) else {
            return Ok(Response::new(
                &request.url,
                404,
                ResponseKind::Basic,
                Vec::new(),
            ));
        };

        match tokio::fs::read(&path).await {
            Ok(body) => {
                let mut response = Response::new(&request.url, 200, ResponseKind::Basic, body);
                response
                    .headers
                    .push(("content-type".to_string(), content_type(&path).to_string()));
                Ok(response)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Response::new(
                &request.url,
                404,
                ResponseKind::Basic,
                Vec::new(),
            )),
            Err(err) => Err(OfflineError::Network {
                url: request.url.clone(),
                reason: err.to_string(),
            }),
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
