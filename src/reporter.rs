//! Best-effort error reporting to the runtime API.

use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::context::RequestId;
use crate::error::{ErrorPayload, RuntimeError};

/// Posts one [`ErrorPayload`] per failed invocation to the error endpoint.
///
/// Opens a fresh connection per report; a report is the only thing sent on
/// it. Reporting is best-effort: a transport failure here is returned for
/// the caller to log and must never crash the loop.
pub struct ErrorReporter {
    client: reqwest::Client,
    config: RuntimeConfig,
}

impl ErrorReporter {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Serialize `payload` as JSON, POST it to the error endpoint for
    /// `request_id`, and read and discard the acknowledgment.
    pub async fn report(
        &self,
        request_id: &RequestId,
        payload: &ErrorPayload,
    ) -> Result<(), RuntimeError> {
        let url = self.config.error_url(request_id);
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| RuntimeError::ReportTransport(e.to_string()))?;

        let status = response.status();
        // Drain the acknowledgment body.
        let _ = response
            .bytes()
            .await
            .map_err(|e| RuntimeError::ReportTransport(e.to_string()))?;

        if !status.is_success() {
            warn!(request_id = %request_id, %status, "error endpoint returned non-success");
        }
        info!(
            request_id = %request_id,
            error_type = %payload.error_type,
            "error reported to runtime API"
        );
        Ok(())
    }
}
