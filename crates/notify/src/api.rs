//! Control-plane API status reporter.
//!
//! Sends `PUT /api/v1/devices/{id}` with `{"backup_status": "..."}` and
//! treats only `200 OK` as delivered.

use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::Serialize;

use netbackup_core::log::sanitize;

use crate::traits::{NotifyError, StatusReporter};

#[derive(Debug, Serialize)]
struct StatusBody<'a> {
    backup_status: &'a str,
}

/// Reports backup status to the control API over HTTP.
#[derive(Debug)]
pub struct ApiStatusReporter {
    /// Base URL (scheme + host, optional path prefix).
    base: Url,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl ApiStatusReporter {
    /// Create a reporter for `host`.
    ///
    /// `host` may be a bare `host[:port]` (plain HTTP is assumed) or a full
    /// `http://` / `https://` base URL.
    pub fn new(host: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        let base = Url::parse(&base)
            .map_err(|e| NotifyError::Config(format!("invalid API host {host:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(NotifyError::Config(format!("invalid API host {host:?}")));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { base, client })
    }

    /// `{base}/api/v1/devices/{job_id}`, with the id as one encoded segment.
    pub fn endpoint(&self, job_id: &str) -> Result<Url, NotifyError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| NotifyError::Config(format!("API base {} cannot take a path", self.base)))?
            .pop_if_empty()
            .extend(["api", "v1", "devices", job_id]);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl StatusReporter for ApiStatusReporter {
    async fn report(&self, job_id: &str, status: &str) -> Result<(), NotifyError> {
        let url = self.endpoint(job_id)?;

        let response = self
            .client
            .put(url.clone())
            .json(&StatusBody { backup_status: status })
            .send()
            .await?;

        let code = response.status();
        if code != StatusCode::OK {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(NotifyError::Status {
                status: code.as_u16(),
                body: sanitize(&body_text).into_owned(),
            });
        }

        tracing::debug!(url = %url, job_id = %sanitize(job_id), "status delivered");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "control-api"
    }
}
