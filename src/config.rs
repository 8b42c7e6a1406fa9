//! Environment-provided runtime configuration.
//!
//! The runtime API hands a worker process its endpoint address and deployment
//! metadata through environment variables. They are read exactly once at
//! startup; the resulting snapshot is the only environment access this client
//! performs.

use anyhow::{Context, Result};

/// Runtime API protocol version segment used in every endpoint path.
pub const API_VERSION: &str = "2018-06-01";

/// Snapshot of the environment-provided configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Runtime API address as `host:port` (from `AWS_LAMBDA_RUNTIME_API`).
    pub api_base: String,
    /// Deployment metadata, consumed only to populate invocation contexts.
    pub function_name: String,
    pub function_version: String,
    pub memory_limit_mb: String,
    pub log_group: String,
    pub log_stream: String,
}

impl RuntimeConfig {
    /// Read the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Fails when `AWS_LAMBDA_RUNTIME_API` is unset; without the API address
    /// the process cannot poll for work. Metadata variables default to empty
    /// strings when absent, matching the scheduler's own behavior for
    /// non-standard deployments.
    pub fn from_env() -> Result<Self> {
        let api_base = std::env::var("AWS_LAMBDA_RUNTIME_API")
            .context("AWS_LAMBDA_RUNTIME_API environment variable not set")?;
        Ok(Self {
            api_base,
            function_name: env_or_empty("AWS_LAMBDA_FUNCTION_NAME"),
            function_version: env_or_empty("AWS_LAMBDA_FUNCTION_VERSION"),
            memory_limit_mb: env_or_empty("AWS_LAMBDA_FUNCTION_MEMORY_SIZE"),
            log_group: env_or_empty("AWS_LAMBDA_LOG_GROUP_NAME"),
            log_stream: env_or_empty("AWS_LAMBDA_LOG_STREAM_NAME"),
        })
    }

    /// Build a configuration pointing at `api_base` with empty metadata.
    pub fn for_api(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            function_name: String::new(),
            function_version: String::new(),
            memory_limit_mb: String::new(),
            log_group: String::new(),
            log_stream: String::new(),
        }
    }

    /// Full URL of the blocking next-invocation endpoint.
    pub fn next_url(&self) -> String {
        format!(
            "http://{}/{}/runtime/invocation/next",
            self.api_base, API_VERSION
        )
    }

    /// Request path of the streaming response endpoint for `request_id`.
    pub fn response_path(request_id: &crate::context::RequestId) -> String {
        format!("/{}/runtime/invocation/{}/response", API_VERSION, request_id)
    }

    /// Full URL of the error endpoint for `request_id`.
    pub fn error_url(&self, request_id: &crate::context::RequestId) -> String {
        format!(
            "http://{}/{}/runtime/invocation/{}/error",
            self.api_base, API_VERSION, request_id
        )
    }
}

fn env_or_empty(key: &str) -> String {
    std::env::var(key).unwrap_or_default()
}
