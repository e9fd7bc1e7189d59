//! The billing backend collaborator.
//!
//! RULE: Only implementations of BillingApi perform network I/O.
//! The sync controller sees raw JSON arrays and success/failure, nothing else.
//!
//! Endpoints:
//!   GET    /api/anomalies               → JSON array
//!   GET    /api/autofixes               → JSON array
//!   DELETE /api/anomalies/{identity}    → any 2xx is success
//!   DELETE /api/autofixes/{identity}    → any 2xx is success

use crate::{
    config::DeskConfig,
    error::{DeskError, DeskResult},
    types::{BackendIdentity, CollectionKind},
};
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait BillingApi: Send + Sync {
    /// Read one full collection, in backend order.
    async fn fetch(&self, kind: CollectionKind) -> DeskResult<Vec<Value>>;

    /// Delete one record.
    async fn delete(&self, kind: CollectionKind, identity: &BackendIdentity) -> DeskResult<()>;
}

#[derive(Clone)]
pub struct HttpBillingApi {
    http:     reqwest::Client,
    base_url: String,
}

impl HttpBillingApi {
    pub fn new(config: &DeskConfig) -> DeskResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url().to_string(),
        })
    }

    pub fn collection_url(&self, kind: CollectionKind) -> String {
        format!("{}/api/{}", self.base_url, kind.path())
    }

    pub fn item_url(&self, kind: CollectionKind, identity: &BackendIdentity) -> String {
        format!("{}/api/{}/{}", self.base_url, kind.path(), identity)
    }
}

#[async_trait]
impl BillingApi for HttpBillingApi {
    async fn fetch(&self, kind: CollectionKind) -> DeskResult<Vec<Value>> {
        let url = self.collection_url(kind);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeskError::Status {
                url,
                status: status.as_u16(),
            });
        }
        // A null body is treated as an empty collection.
        let body: Option<Vec<Value>> = response.json().await?;
        Ok(body.unwrap_or_default())
    }

    async fn delete(&self, kind: CollectionKind, identity: &BackendIdentity) -> DeskResult<()> {
        let url = self.item_url(kind, identity);
        let response = self.http.delete(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeskError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
