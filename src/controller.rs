//! Optional HTTP controller client: `POST /register`,
//! `GET /wait` (long-poll until start) and `POST /finished`, for
//! scenarios that run under an external orchestrator rather than
//! starting every node by hand.

use std::time::Duration;

use backoff::future::FutureOperation as _;
use backoff::ExponentialBackoff;
use serde::Serialize;
use thiserror::Error;

use crate::node_id::NodeId;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("controller request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("controller returned an unexpected status: {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Serialize)]
struct RegisterRequest {
    node: NodeId,
}

#[derive(Debug, Serialize)]
struct FinishedRequest {
    scenario: String,
    node: NodeId,
}

/// Talks to the optional scenario controller named in
/// `scenario.controller`. Every call retries transient request
/// failures with exponential backoff, treating connection and I/O
/// errors as transient rather than fatal.
pub struct ControllerClient {
    base_url: String,
    http: reqwest::Client,
}

impl ControllerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builder should not fail with default TLS config"),
        }
    }

    pub async fn register(&self, node: NodeId) -> Result<(), ControllerError> {
        let url = format!("{}/register", self.base_url);
        (|| async {
            let response = self
                .http
                .post(&url)
                .json(&RegisterRequest { node })
                .send()
                .await
                .map_err(|e| backoff::Error::Transient(ControllerError::Request(e)))?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(backoff::Error::Transient(ControllerError::Status(response.status())))
            }
        })
        .retry(ExponentialBackoff::default())
        .await
    }

    /// Long-polls `/wait` until the controller signals the scenario
    /// has started. The controller is expected to hold the request
    /// open; this client simply awaits the response rather than
    /// re-polling in a loop.
    pub async fn wait_for_start(&self) -> Result<(), ControllerError> {
        let url = format!("{}/wait", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(3600))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ControllerError::Status(response.status()))
        }
    }

    pub async fn finished(&self, scenario: &str, node: NodeId) -> Result<(), ControllerError> {
        let url = format!("{}/finished", self.base_url);
        (|| async {
            let response = self
                .http
                .post(&url)
                .json(&FinishedRequest {
                    scenario: scenario.to_string(),
                    node,
                })
                .send()
                .await
                .map_err(|e| backoff::Error::Transient(ControllerError::Request(e)))?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(backoff::Error::Transient(ControllerError::Status(response.status())))
            }
        })
        .retry(ExponentialBackoff::default())
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_urls_relative_to_the_base() {
        let client = ControllerClient::new("http://localhost:8080");
        assert_eq!(client.base_url, "http://localhost:8080");
    }
}
