//! Typed client for the action execution server.
//!
//! Used by runtimes (or tooling) sitting on the other side of the sandbox
//! boundary. The error split mirrors the server contract: a transport
//! failure (connection refused, non-200 status, undecodable body) is `Err`;
//! an action that failed cleanly comes back as `Ok` with an error
//! observation.

use anyhow::{bail, Context, Result};
use serde_json::json;
use std::time::Duration;

use crate::events::{Action, Observation};
use crate::server::API_KEY_HEADER;

#[derive(Debug, Clone)]
pub struct ExecutionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ExecutionClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder
    }

    /// Execute an action remotely.
    ///
    /// `Err` means the transport failed and nothing can be said about the
    /// action; an `Ok` observation with `success == false` means the action
    /// itself failed inside the sandbox.
    pub async fn execute_action(&self, action: &Action) -> Result<Observation> {
        let response = self
            .request(reqwest::Method::POST, "/execute_action")
            .json(&json!({ "action": action }))
            .send()
            .await
            .context("execution server unreachable")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("execution server rejected request ({status}): {body}");
        }
        response
            .json::<Observation>()
            .await
            .context("undecodable observation from execution server")
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        let response = self
            .request(reqwest::Method::GET, "/health")
            .send()
            .await
            .context("execution server unreachable")?;
        if !response.status().is_success() {
            bail!("health check failed: {}", response.status());
        }
        Ok(response.json().await?)
    }
}
