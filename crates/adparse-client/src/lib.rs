//! HTTP clients for the remote extraction and history services.

use std::time::Duration;

use adparse_core::ParseResult;
use async_trait::async_trait;
use thiserror::Error;

pub mod extraction;
pub mod history;

pub use extraction::{classify_response, ExtractionClient, ExtractionOutcome};
pub use history::{decode_history, parse_remote_timestamp, HistoryClient};

pub const CRATE_NAME: &str = "adparse-client";

/// Something that turns an ad URL into a phone number.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Issue exactly one extraction request. Never retries and never fails the caller: every
    /// problem is folded into [`ExtractionOutcome::Failure`].
    async fn extract(&self, url: &str) -> ExtractionOutcome;
}

/// Read side of the remote history of parse attempts.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Latest known history, most recent first as the service orders it.
    async fn fetch_history(&self) -> Vec<ParseResult>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpClientConfig {
    /// Whole-request timeout. `None` leaves the bound to the remote service.
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

impl HttpClientConfig {
    pub fn build_client(&self) -> Result<reqwest::Client, ClientError> {
        let mut builder = reqwest::Client::builder().gzip(true).brotli(true);

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        builder.build().map_err(ClientError::Build)
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("building reqwest client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// Coarse label for a transport failure, used as a log field.
pub fn transport_cause(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else if err.is_decode() || err.is_body() {
        "body"
    } else {
        "request"
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::Router;

    /// Serve `app` on an ephemeral localhost port and return its base URL.
    pub async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}")
    }

    /// A base URL nothing is listening on.
    pub async fn dead_endpoint() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);
        format!("http://{addr}")
    }
}
