use std::time::Instant;

use adparse_core::{FailureKind, Platform};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::{transport_cause, ClientError, Extractor, HttpClientConfig};

/// Reason reported for every transport-level failure.
pub const CONNECTION_ERROR_REASON: &str = "connection error";
/// Reason reported when the service refuses without saying why.
pub const DEFAULT_FAILURE_REASON: &str = "phone number not found";

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRequest<'a> {
    pub url: &'a str,
}

/// Body returned by the extraction service. Every field is optional because error responses
/// carry only `error`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// `url` and `platform` are the service's echo, not re-derived locally. The service may
    /// omit the url echo.
    Success {
        url: Option<String>,
        platform: Platform,
        phone: String,
    },
    Failure { kind: FailureKind, reason: String },
}

impl ExtractionOutcome {
    pub fn transport() -> Self {
        ExtractionOutcome::Failure {
            kind: FailureKind::Transport,
            reason: CONNECTION_ERROR_REASON.to_string(),
        }
    }

    pub fn extraction(reason: impl Into<String>) -> Self {
        ExtractionOutcome::Failure {
            kind: FailureKind::Extraction,
            reason: reason.into(),
        }
    }
}

/// Interpret a response that did arrive from the extraction service.
///
/// A body that is not JSON, or a claimed success without a phone or a known platform, counts as
/// a transport failure. A missing or blank url echo is not an error. Anything else that is not a 2xx `success: true` is a logical failure.
pub fn classify_response(status: StatusCode, body: &[u8]) -> ExtractionOutcome {
    let response: ExtractionResponse = match serde_json::from_slice(body) {
        Ok(response) => response,
        Err(err) => {
            warn!(status = status.as_u16(), error = %err, "undecodable extraction response");
            return ExtractionOutcome::transport();
        }
    };

    if !(status.is_success() && response.success) {
        let reason = response
            .error
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string());
        return ExtractionOutcome::extraction(reason);
    }

    let platform = response
        .platform
        .as_deref()
        .and_then(|name| name.parse::<Platform>().ok());

    match (platform, response.phone) {
        (Some(platform), Some(phone)) if !phone.trim().is_empty() => ExtractionOutcome::Success {
            url: response.url.filter(|url| !url.trim().is_empty()),
            platform,
            phone,
        },
        _ => {
            warn!(
                status = status.as_u16(),
                "extraction service reported success without platform or phone"
            );
            ExtractionOutcome::transport()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionClient {
    client: reqwest::Client,
    endpoint: String,
}

impl ExtractionClient {
    pub fn new(endpoint: impl Into<String>, config: &HttpClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: config.build_client()?,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn extract(&self, url: &str) -> ExtractionOutcome {
        let span = info_span!("extract", endpoint = %self.endpoint, url);
        self.extract_inner(url).instrument(span).await
    }

    async fn extract_inner(&self, url: &str) -> ExtractionOutcome {
        let started = Instant::now();
        let sent = self
            .client
            .post(&self.endpoint)
            .json(&ExtractionRequest { url })
            .send()
            .await;

        let resp = match sent {
            Ok(resp) => resp,
            Err(err) => {
                warn!(error = %err, cause = transport_cause(&err), "extraction request failed");
                return ExtractionOutcome::transport();
            }
        };

        let status = resp.status();
        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, cause = transport_cause(&err), "reading extraction response failed");
                return ExtractionOutcome::transport();
            }
        };

        debug!(
            status = status.as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "extraction response received"
        );
        classify_response(status, &body)
    }
}

#[async_trait]
impl Extractor for ExtractionClient {
    async fn extract(&self, url: &str) -> ExtractionOutcome {
        ExtractionClient::extract(self, url).await
    }
}
