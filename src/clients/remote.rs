use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, info};

/// Answers whether an entity owned by a remote service exists.
///
/// `Ok(false)` means the service answered and said no; `Err` means it could not
/// answer (transport failure or server error) and counts against its circuit.
#[async_trait]
pub trait EntityChecker: Send + Sync {
    async fn exists(&self, id: &str) -> Result<bool, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteResource {
    Users,
    Templates,
}

impl RemoteResource {
    pub fn path(&self) -> &'static str {
        match self {
            RemoteResource::Users => "users",
            RemoteResource::Templates => "templates",
        }
    }
}

pub struct HttpEntityChecker {
    http_client: Client,
    base_url: Url,
    resource: RemoteResource,
}

impl HttpEntityChecker {
    pub fn new(base_url: &str, resource: RemoteResource, timeout: Duration) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow!("Invalid base URL {}: {}", base_url, e))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("Base URL {} cannot carry a path", base_url));
        }

        info!(base_url = %base_url, resource = resource.path(), "Remote entity checker initialized");

        Ok(Self {
            http_client,
            base_url,
            resource,
        })
    }

    /// `{base}/{resource}/{id}` with the id escaped as a single path segment.
    fn url_for(&self, id: &str) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Base URL {} cannot carry a path", self.base_url))?
            .pop_if_empty()
            .push(self.resource.path())
            .push(id);
        Ok(url)
    }
}

#[async_trait]
impl EntityChecker for HttpEntityChecker {
    async fn exists(&self, id: &str) -> Result<bool, Error> {
        // Empty and dot segments never name an entity and are dropped from the path.
        if matches!(id, "" | "." | "..") {
            debug!(resource = self.resource.path(), id, "Entity id is not addressable");
            return Ok(false);
        }

        let url = self.url_for(id)?;
        debug!(url = %url, "Checking entity with remote service");

        let response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| anyhow!("Request to {} service failed: {}", self.resource.path(), e))?;

        let status = response.status();

        if status == StatusCode::OK {
            Ok(true)
        } else if status.is_server_error() {
            Err(anyhow!(
                "{} service returned status {}",
                self.resource.path(),
                status
            ))
        } else {
            debug!(url = %url, status = %status, "Remote service rejected entity");
            Ok(false)
        }
    }
}
