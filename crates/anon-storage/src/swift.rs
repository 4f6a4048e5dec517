//! OpenStack Swift client with Keystone v3 token authentication.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
const CONTAINER_READ_HEADER: &str = "X-Container-Read";
const PUBLIC_READ_ACL: &str = ".r:*";

/// Configuration for the Swift client.
#[derive(Clone)]
pub struct SwiftConfig {
    /// Keystone v3 endpoint (`OS_AUTH_URL`)
    pub auth_url: String,
    /// Pre-issued token to scope (`OS_AUTH_TOKEN`)
    pub auth_token: String,
    /// Project name (`OS_PROJECT_NAME`)
    pub project_name: String,
    /// Project domain id (`OS_PROJECT_DOMAIN_ID`)
    pub project_domain_id: String,
}

impl std::fmt::Debug for SwiftConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwiftConfig")
            .field("auth_url", &self.auth_url)
            .field("auth_token", &"<redacted>")
            .field("project_name", &self.project_name)
            .field("project_domain_id", &self.project_domain_id)
            .finish()
    }
}

/// Scoped token plus the object-store endpoint it unlocks.
#[derive(Debug, Clone)]
struct SwiftSession {
    token: String,
    storage_url: String,
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    auth: Auth<'a>,
}

#[derive(Serialize)]
struct Auth<'a> {
    identity: Identity<'a>,
    scope: Scope<'a>,
}

#[derive(Serialize)]
struct Identity<'a> {
    methods: [&'a str; 1],
    token: TokenId<'a>,
}

#[derive(Serialize)]
struct TokenId<'a> {
    id: &'a str,
}

#[derive(Serialize)]
struct Scope<'a> {
    project: Project<'a>,
}

#[derive(Serialize)]
struct Project<'a> {
    name: &'a str,
    domain: Domain<'a>,
}

#[derive(Serialize)]
struct Domain<'a> {
    id: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    endpoints: Vec<Endpoint>,
}

#[derive(Deserialize)]
struct Endpoint {
    interface: String,
    url: String,
}

/// Swift object store client.
pub struct SwiftClient {
    http: reqwest::Client,
    config: SwiftConfig,
    session: RwLock<Option<SwiftSession>>,
}

impl SwiftClient {
    /// Create a new client. Authentication happens on first use.
    pub fn new(config: SwiftConfig) -> StorageResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| StorageError::config_error(e.to_string()))?;

        Ok(Self {
            http,
            config,
            session: RwLock::new(None),
        })
    }

    async fn authenticate(&self) -> StorageResult<SwiftSession> {
        let url = format!("{}/auth/tokens", self.config.auth_url.trim_end_matches('/'));
        let body = AuthRequest {
            auth: Auth {
                identity: Identity {
                    methods: ["token"],
                    token: TokenId {
                        id: &self.config.auth_token,
                    },
                },
                scope: Scope {
                    project: Project {
                        name: &self.config.project_name,
                        domain: Domain {
                            id: &self.config.project_domain_id,
                        },
                    },
                },
            },
        };

        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(StorageError::auth_failed(format!(
                "keystone returned {}",
                response.status()
            )));
        }

        let token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| StorageError::auth_failed("missing X-Subject-Token header"))?;

        let parsed: AuthResponse = serde_json::from_slice(&response.bytes().await?)?;
        let storage_url = parsed
            .token
            .catalog
            .into_iter()
            .filter(|entry| entry.service_type == "object-store")
            .flat_map(|entry| entry.endpoints)
            .find(|endpoint| endpoint.interface == "public")
            .map(|endpoint| endpoint.url.trim_end_matches('/').to_string())
            .ok_or_else(|| StorageError::auth_failed("no public object-store endpoint in catalog"))?;

        info!(storage_url = %storage_url, "Authenticated against keystone");
        Ok(SwiftSession { token, storage_url })
    }

    async fn session(&self) -> StorageResult<SwiftSession> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(session.clone());
        }

        let mut guard = self.session.write().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = self.authenticate().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Send a request built against the storage URL, re-authenticating once
    /// if the token was rejected.
    async fn send<F>(&self, build: F) -> StorageResult<(Response, String)>
    where
        F: Fn(&reqwest::Client, &SwiftSession) -> RequestBuilder,
    {
        let session = self.session().await?;
        let response = build(&self.http, &session)
            .header(AUTH_TOKEN_HEADER, &session.token)
            .send()
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok((response, session.storage_url));
        }

        debug!("Swift token rejected, re-authenticating");
        *self.session.write().await = None;
        let session = self.session().await?;
        let response = build(&self.http, &session)
            .header(AUTH_TOKEN_HEADER, &session.token)
            .send()
            .await?;
        Ok((response, session.storage_url))
    }
}

#[async_trait]
impl ObjectStore for SwiftClient {
    async fn create_public_container(&self, name: &str) -> StorageResult<()> {
        let (head, _) = self
            .send(|http, s| http.request(Method::HEAD, format!("{}/{}", s.storage_url, name)))
            .await?;

        // Existing containers are switched to public with POST, missing ones created with PUT.
        let method = if head.status().is_success() {
            Method::POST
        } else if head.status() == StatusCode::NOT_FOUND {
            Method::PUT
        } else {
            return Err(StorageError::container_failed(format!(
                "HEAD {} returned {}",
                name,
                head.status()
            )));
        };

        let (response, _) = self
            .send(|http, s| {
                http.request(method.clone(), format!("{}/{}", s.storage_url, name))
                    .header(CONTAINER_READ_HEADER, PUBLIC_READ_ACL)
            })
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::container_failed(format!(
                "{} {} returned {}",
                method,
                name,
                response.status()
            )));
        }

        info!(container = %name, "Container is public");
        Ok(())
    }

    async fn put_object(&self, container: &str, key: &str, body: Vec<u8>) -> StorageResult<String> {
        let size = body.len();
        let (response, storage_url) = self
            .send(|http, s| {
                http.put(format!("{}/{}/{}", s.storage_url, container, key))
                    .body(body.clone())
            })
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::upload_failed(format!(
                "PUT {}/{} returned {}",
                container,
                key,
                response.status()
            )));
        }

        debug!(container = %container, key = %key, size, "Uploaded object");
        Ok(format!("{}/{}/{}", storage_url, container, key))
    }
}
