//! HTTP client for the video record service.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use super::ResultReporter;
use crate::config::model::ReporterConfig;
use crate::error::ReportError;
use crate::pipeline::result::ProcessingResult;

/// Reports job outcomes to the record service over HTTP.
pub struct HttpReporter {
    base_url: String,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl HttpReporter {
    /// Creates a reporter from config.
    pub fn new(config: &ReporterConfig) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            client,
        })
    }

    /// Endpoint for status updates.
    pub fn status_url(&self, video_id: &str) -> String {
        format!("{}/videos/{}/status", self.base_url, video_id)
    }

    /// Endpoint for terminal results.
    pub fn result_url(&self, video_id: &str) -> String {
        format!("{}/videos/{}/processing-result", self.base_url, video_id)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(), ReportError> {
        let request = match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                ReportError::Unreachable(e.to_string())
            } else {
                ReportError::HttpFailed(e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Record service rejected request");
            return Err(ReportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusUpdate<'a> {
    status: &'a str,
}

#[derive(Serialize)]
struct ResultPayload<'a> {
    status: &'a str,
    #[serde(flatten)]
    result: &'a ProcessingResult,
}

#[async_trait]
impl ResultReporter for HttpReporter {
    async fn mark_processing(&self, video_id: &str) -> Result<(), ReportError> {
        let request = self
            .client
            .put(self.status_url(video_id))
            .json(&StatusUpdate {
                status: "processing",
            });
        self.send(request).await
    }

    async fn report(&self, video_id: &str, result: &ProcessingResult) -> Result<(), ReportError> {
        let payload = ResultPayload {
            status: result.record_status(),
            result,
        };
        let request = self.client.post(self.result_url(video_id)).json(&payload);
        self.send(request).await?;

        info!(video_id, status = payload.status, "Result recorded");
        Ok(())
    }
}
