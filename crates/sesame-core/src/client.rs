//! HTTP client for the Sesame cloud API (v1).
//!
//! Implements [`LockApi`] on top of `reqwest`. Commands are asynchronous on
//! the cloud side: `POST /sesame/{id}` returns a task id, and the outcome is
//! polled from `/action-result` until the task has terminated.
//!
//! # Example
//!
//! ```no_run
//! use sesame_core::client::{ClientConfig, SesameClient};
//! use sesame_core::LockApi;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SesameClient::new(ClientConfig::new("my-api-token"))?;
//!
//! for lock in client.list_locks().await? {
//!     let status = client.get_status(&lock.device_id).await?;
//!     println!("{}: {:?}", lock.nickname, status.locked);
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::debug;

use sesame_types::{CommandResult, LockDescriptor, RemoteStatus, SyncResult};

use crate::error::{Error, Result, parse_busy_seconds};
use crate::traits::LockApi;

/// Default base URL of the public Sesame API.
pub const DEFAULT_BASE_URL: &str = "https://api.candyhouse.co/public";

/// Settings of a [`SesameClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API base URL.
    pub base_url: String,
    /// API token sent in the `Authorization` header.
    pub token: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Delay between two `action-result` polls.
    pub poll_interval: Duration,
    /// Maximum number of `action-result` polls per command.
    pub max_polls: u32,
}

impl ClientConfig {
    /// Default settings with the given token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            max_polls: 30,
        }
    }
}

/// Sesame cloud API client.
#[derive(Debug, Clone)]
pub struct SesameClient {
    client: Client,
    config: ClientConfig,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    locked: Option<bool>,
    #[serde(default)]
    responsive: bool,
    #[serde(default)]
    battery: u8,
}

#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    command: &'a str,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct ActionResult {
    status: String,
    #[serde(default)]
    successful: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SesameClient {
    /// Create a new client.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Self::with_client(config, client)
    }

    /// Create a client with a custom reqwest Client.
    pub fn with_client(mut config: ClientConfig, client: Client) -> Result<Self> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(Error::invalid_config(format!(
                "API URL must start with http:// or https://, got: {}",
                config.base_url
            )));
        }
        if config.token.trim().is_empty() {
            return Err(Error::invalid_config("API token is empty"));
        }

        Ok(Self { client, config })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Issue a command and wait for its outcome.
    async fn command(&self, device_id: &str, command: &str) -> Result<ActionResult> {
        let url = format!("{}/sesame/{}", self.config.base_url, device_id);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, &self.config.token)
            .json(&CommandRequest { command })
            .send()
            .await?;
        let task: TaskResponse = Self::handle_response(response).await?;
        debug!("{} {}: task {}", command, device_id, task.task_id);

        let url = format!("{}/action-result", self.config.base_url);
        for _ in 0..self.config.max_polls {
            sleep(self.config.poll_interval).await;
            let response = self
                .client
                .get(&url)
                .header(reqwest::header::AUTHORIZATION, &self.config.token)
                .query(&[("task_id", task.task_id.as_str())])
                .send()
                .await?;
            let result: ActionResult = Self::handle_response(response).await?;
            if result.status == "terminated" {
                return Ok(result);
            }
        }

        Ok(ActionResult {
            status: "processing".to_string(),
            successful: false,
            error: Some(format!("task {} did not terminate", task.task_id)),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, &self.config.token)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or_else(|| status.to_string());

        Err(match parse_busy_seconds(&message) {
            Some(retry_after) => Error::RemoteBusy { retry_after },
            None => Error::Api {
                status: status.as_u16(),
                message,
            },
        })
    }
}

#[async_trait]
impl LockApi for SesameClient {
    async fn get_status(&self, device_id: &str) -> Result<RemoteStatus> {
        let url = format!("{}/sesame/{}", self.config.base_url, device_id);
        let status: StatusResponse = self.get(&url).await?;
        Ok(RemoteStatus::new(
            status.locked,
            status.responsive,
            status.battery,
        ))
    }

    async fn control(&self, device_id: &str, locked: bool) -> Result<CommandResult> {
        let result = self
            .command(device_id, if locked { "lock" } else { "unlock" })
            .await?;
        Ok(CommandResult {
            status: result.status,
            successful: result.successful,
            error: result.error,
        })
    }

    async fn sync(&self, device_id: &str) -> Result<SyncResult> {
        let result = self.command(device_id, "sync").await?;
        Ok(SyncResult {
            successful: result.successful,
            error: result.error,
        })
    }

    async fn list_locks(&self) -> Result<Vec<LockDescriptor>> {
        let url = format!("{}/sesames", self.config.base_url);
        self.get(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = SesameClient::new(ClientConfig::new("token")).unwrap();
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_client_normalizes_url() {
        let mut config = ClientConfig::new("token");
        config.base_url = "http://localhost:8080/".to_string();
        let client = SesameClient::new(config).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_invalid_url() {
        let mut config = ClientConfig::new("token");
        config.base_url = "localhost:8080".to_string();
        assert!(matches!(
            SesameClient::new(config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_client_requires_token() {
        assert!(matches!(
            SesameClient::new(ClientConfig::new("  ")),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_status_response_unknown_lock_state() {
        let status: StatusResponse =
            serde_json::from_str(r#"{"locked": null, "battery": 80, "responsive": false}"#)
                .unwrap();
        assert_eq!(status.locked, None);
        assert!(!status.responsive);
        assert_eq!(status.battery, 80);
    }

    #[test]
    fn test_action_result_defaults() {
        let result: ActionResult =
            serde_json::from_str(r#"{"task_id": "t", "status": "processing"}"#).unwrap();
        assert_eq!(result.status, "processing");
        assert!(!result.successful);
        assert_eq!(result.error, None);
    }

    #[test]
    fn test_lock_listing_deserialize() {
        let locks: Vec<LockDescriptor> = serde_json::from_str(
            r#"[{"device_id": "abc", "serial": "ABC123", "nickname": "Front Door"}]"#,
        )
        .unwrap();
        assert_eq!(locks[0].nickname, "Front Door");
        assert_eq!(locks[0].serial, "ABC123");
    }
}
