//! Parse orchestration: validation, dispatch, billing, and history reconciliation.
//!
//! The current result and the history list are independent views. The optimistic entry built
//! after an extraction is shown as the current result only; history is whatever the history
//! service last returned, and the two are never merged by id.

use std::sync::Arc;

use adparse_client::{ExtractionClient, HistoryClient};
use anyhow::{Context, Result};
use tracing::info;

pub mod config;
pub mod session;

pub use config::{BalancePolicy, ConfigError, SessionConfig, TariffTable};
pub use session::{
    ParseFailure, ParseReport, ParseSession, SessionError, SessionSnapshot, SessionState,
};

pub const CRATE_NAME: &str = "adparse-session";

impl ParseSession {
    /// Wire real HTTP clients according to `config`.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let http = config.http_client_config();
        let extractor = ExtractionClient::new(config.extract_url.clone(), &http)
            .context("building extraction client")?;
        let history = HistoryClient::new(config.history_url.clone(), &http)
            .context("building history client")?
            .with_limit(config.history_limit);
        let tariffs = config.load_tariffs()?;

        info!(
            extract_url = extractor.endpoint(),
            history_url = history.endpoint(),
            history_limit = ?history.limit(),
            tier = %config.tariff_tier,
            balance = config.starting_balance,
            "parse session configured"
        );

        Ok(ParseSession::new(Arc::new(extractor), Arc::new(history))
            .with_tariffs(tariffs, config.tariff_tier)
            .with_balance(config.starting_balance)
            .with_balance_policy(config.balance_policy))
    }
}

/// Build a session from `ADPARSE_*` variables and load the initial history.
pub async fn session_from_env() -> Result<ParseSession> {
    let config = SessionConfig::from_env().context("reading ADPARSE_* configuration")?;
    let session = ParseSession::from_config(&config)?;
    session.refresh_history().await;
    Ok(session)
}
