use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use run_protocol::{
    output_path, start_path, status_path, ErrorBody, ProcessStatusResponse, RunOutputResponse,
    StartRunRequest, StartRunResponse,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SupervisorCallError {
    #[error("supervisor at {url} is unreachable: {message}")]
    Unreachable { url: String, message: String },
    #[error("supervisor answered {url} with {status}: {body}")]
    Rejected {
        url: String,
        status: u16,
        body: String,
    },
    #[error("supervisor has no record of run '{run_id}'")]
    NotFound { run_id: String },
    #[error("unexpected supervisor response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

impl SupervisorCallError {
    /// Text the supervisor sent back, for recording against a failed run.
    pub fn response_body(&self) -> Option<&str> {
        match self {
            SupervisorCallError::Rejected { body, .. } => Some(body.as_str()),
            _ => None,
        }
    }
}

/// Client side of the supervisor protocol. `base_url` addresses one
/// container, e.g. `http://127.0.0.1:49153`.
#[async_trait]
pub trait SupervisorClient: Send + Sync {
    async fn start(
        &self,
        base_url: &str,
        run_id: &str,
        request: &StartRunRequest,
    ) -> Result<StartRunResponse, SupervisorCallError>;

    async fn status(
        &self,
        base_url: &str,
        run_id: &str,
    ) -> Result<ProcessStatusResponse, SupervisorCallError>;

    async fn output(
        &self,
        base_url: &str,
        run_id: &str,
    ) -> Result<RunOutputResponse, SupervisorCallError>;
}

#[derive(Debug, Clone)]
pub struct HttpSupervisorClient {
    client: reqwest::Client,
}

impl HttpSupervisorClient {
    pub fn new(request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build supervisor HTTP client")?;
        Ok(Self { client })
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        url: String,
        run_id: &str,
        result: reqwest::Result<reqwest::Response>,
    ) -> Result<T, SupervisorCallError> {
        let response = result.map_err(|err| SupervisorCallError::Unreachable {
            url: url.clone(),
            message: err.to_string(),
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SupervisorCallError::NotFound {
                run_id: run_id.to_string(),
            });
        }
        if !status.is_success() {
            let body = rejection_body(&url, response.text().await);
            debug!(%url, status = status.as_u16(), %body, "supervisor rejected request");
            return Err(SupervisorCallError::Rejected {
                url,
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|err| SupervisorCallError::InvalidResponse {
                url,
                message: err.to_string(),
            })
    }
}

/// Message from a non-success answer: the `ErrorBody` text when the body is
/// one, the raw body otherwise. An unreadable body yields an empty message.
fn rejection_body<E: std::fmt::Display>(url: &str, read: Result<String, E>) -> String {
    let raw = match read {
        Ok(raw) => raw,
        Err(err) => {
            debug!(%url, error = %err, "failed to read supervisor error body");
            return String::new();
        }
    };
    serde_json::from_str::<ErrorBody>(&raw)
        .map(|body| body.error)
        .unwrap_or(raw)
}

fn join(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

#[async_trait]
impl SupervisorClient for HttpSupervisorClient {
    async fn start(
        &self,
        base_url: &str,
        run_id: &str,
        request: &StartRunRequest,
    ) -> Result<StartRunResponse, SupervisorCallError> {
        let url = join(base_url, &start_path(run_id));
        let result = self.client.post(&url).json(request).send().await;
        self.decode(url, run_id, result).await
    }

    async fn status(
        &self,
        base_url: &str,
        run_id: &str,
    ) -> Result<ProcessStatusResponse, SupervisorCallError> {
        let url = join(base_url, &status_path(run_id));
        let result = self.client.get(&url).send().await;
        self.decode(url, run_id, result).await
    }

    async fn output(
        &self,
        base_url: &str,
        run_id: &str,
    ) -> Result<RunOutputResponse, SupervisorCallError> {
        let url = join(base_url, &output_path(run_id));
        let result = self.client.get(&url).send().await;
        self.decode(url, run_id, result).await
    }
}
