//! HTTP client implementation of CoordStore.
//!
//! Talks to an external coordination service addressed by
//! `--coord-host`/`--coord-port`. The service must expose a versioned
//! KV API with TTLs and report compare-and-swap conflicts as
//! `412 Precondition Failed`:
//!
//! - `GET /kv/{key}` -> `{value, version}` or 404
//! - `PUT /kv/{key}` with `{value, ttl_ms?, expected_version?, if_absent?}`
//!   -> `{version}` or 412
//! - `DELETE /kv/{key}`
//! - `GET /kv?prefix=p` -> `{entries: [{key, value, version}]}`

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::traits::*;

#[derive(Debug, Serialize)]
struct PutRequest<'a> {
    value: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected_version: Option<u64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    if_absent: bool,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    version: u64,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    value: String,
    version: u64,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    entries: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    key: String,
    value: String,
    version: u64,
}

/// CoordStore backed by an external HTTP KV service.
pub struct HttpCoordStore {
    client: Client,
    base_url: String,
}

impl HttpCoordStore {
    pub fn new(host: &str, port: u16, request_timeout: Duration) -> CoordResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CoordError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: format!("http://{host}:{port}"),
        })
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/kv/{}", self.base_url, key)
    }

    async fn write(&self, key: &str, body: PutRequest<'_>) -> CoordResult<StatusCode> {
        let resp = self
            .client
            .put(self.key_url(key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoordError::Unavailable(e.to_string()))?;
        Ok(resp.status())
    }
}

#[async_trait]
impl CoordStore for HttpCoordStore {
    async fn get(&self, key: &str) -> CoordResult<Option<VersionedValue>> {
        let resp = self
            .client
            .get(self.key_url(key))
            .send()
            .await
            .map_err(|e| CoordError::Unavailable(e.to_string()))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let body: GetResponse = resp
                    .json()
                    .await
                    .map_err(|e| CoordError::Serialization(e.to_string()))?;
                Ok(Some(VersionedValue {
                    value: body.value,
                    version: body.version,
                }))
            }
            s => Err(CoordError::Internal(format!("get {key}: unexpected status {s}"))),
        }
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> CoordResult<u64> {
        let resp = self
            .client
            .put(self.key_url(key))
            .json(&PutRequest {
                value: &value,
                ttl_ms: ttl.map(|t| t.as_millis() as u64),
                expected_version: None,
                if_absent: false,
            })
            .send()
            .await
            .map_err(|e| CoordError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CoordError::Internal(format!(
                "put {key}: unexpected status {}",
                resp.status()
            )));
        }
        let body: PutResponse = resp
            .json()
            .await
            .map_err(|e| CoordError::Serialization(e.to_string()))?;
        Ok(body.version)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        value: String,
        ttl: Option<Duration>,
    ) -> CoordResult<CasOutcome> {
        let resp = self
            .client
            .put(self.key_url(key))
            .json(&PutRequest {
                value: &value,
                ttl_ms: ttl.map(|t| t.as_millis() as u64),
                expected_version: expected,
                if_absent: expected.is_none(),
            })
            .send()
            .await
            .map_err(|e| CoordError::Unavailable(e.to_string()))?;

        match resp.status() {
            StatusCode::PRECONDITION_FAILED => {
                debug!(key, "compare-and-swap lost");
                Ok(CasOutcome::Conflict)
            }
            s if s.is_success() => {
                let body: PutResponse = resp
                    .json()
                    .await
                    .map_err(|e| CoordError::Serialization(e.to_string()))?;
                Ok(CasOutcome::Committed(body.version))
            }
            s => Err(CoordError::Internal(format!("cas {key}: unexpected status {s}"))),
        }
    }

    async fn delete(&self, key: &str) -> CoordResult<()> {
        let resp = self
            .client
            .delete(self.key_url(key))
            .send()
            .await
            .map_err(|e| CoordError::Unavailable(e.to_string()))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => Ok(()),
            s => Err(CoordError::Internal(format!("delete {key}: unexpected status {s}"))),
        }
    }

    async fn list_prefix(&self, prefix: &str) -> CoordResult<Vec<(String, VersionedValue)>> {
        let resp = self
            .client
            .get(format!("{}/kv", self.base_url))
            .query(&[("prefix", prefix)])
            .send()
            .await
            .map_err(|e| CoordError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CoordError::Internal(format!(
                "list {prefix}: unexpected status {}",
                resp.status()
            )));
        }
        let body: ListResponse = resp
            .json()
            .await
            .map_err(|e| CoordError::Serialization(e.to_string()))?;
        Ok(body
            .entries
            .into_iter()
            .map(|e| {
                (
                    e.key,
                    VersionedValue {
                        value: e.value,
                        version: e.version,
                    },
                )
            })
            .collect())
    }
}
