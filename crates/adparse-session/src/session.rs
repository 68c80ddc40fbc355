//! The parse session: one in-flight extraction at a time, local billing, and history refreshes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use adparse_client::{ExtractionOutcome, Extractor, HistorySource};
use adparse_core::{
    classify_platform, FailureKind, HistoryStats, ParseResult, Platform, TariffPlan, TariffTier,
    UnsupportedPlatform, DEFAULT_STARTING_BALANCE,
};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{BalancePolicy, TariffTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Validating,
    Dispatching,
    Settling,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("enter an ad URL")]
    EmptyInput,
    #[error(transparent)]
    UnsupportedPlatform(#[from] UnsupportedPlatform),
    #[error("a parse is already in progress")]
    AlreadyInProgress,
    #[error("insufficient balance: {balance} available, {price} required")]
    InsufficientBalance { balance: i64, price: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseFailure {
    pub kind: FailureKind,
    pub reason: String,
}

/// The "current result" of the most recent settled parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    pub result: ParseResult,
    /// `None` exactly when `result` is a success.
    pub failure: Option<ParseFailure>,
    pub balance_after: i64,
}

/// Everything a presentation layer needs to draw the session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub input: String,
    pub balance: i64,
    pub tariff: TariffPlan,
    pub balance_policy: BalancePolicy,
    pub current: Option<ParseReport>,
    pub history: Vec<ParseResult>,
    pub stats: HistoryStats,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    input: String,
    balance: i64,
    tariff: TariffPlan,
    current: Option<ParseReport>,
}

#[derive(Debug, Default)]
struct HistoryView {
    records: Vec<ParseResult>,
    applied_seq: u64,
}

impl HistoryView {
    /// Replace the records unless a newer refresh already landed.
    fn apply(&mut self, seq: u64, records: Vec<ParseResult>) -> bool {
        if seq <= self.applied_seq {
            debug!(seq, applied_seq = self.applied_seq, "discarding stale history refresh");
            return false;
        }
        self.records = records;
        self.applied_seq = seq;
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Validated request handed from the validating phase to dispatch.
struct Dispatch {
    url: String,
    platform: Platform,
    price: u32,
}

/// Returns the session to `Idle` however the in-flight parse ends, including cancellation.
struct InFlight<'a> {
    inner: &'a Mutex<SessionInner>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.inner).state = SessionState::Idle;
    }
}

pub struct ParseSession {
    extractor: Arc<dyn Extractor>,
    history_source: Arc<dyn HistorySource>,
    tariffs: TariffTable,
    balance_policy: BalancePolicy,
    inner: Mutex<SessionInner>,
    history: Arc<Mutex<HistoryView>>,
    refresh_seq: AtomicU64,
    pending_refresh: Mutex<Option<JoinHandle<()>>>,
}

impl ParseSession {
    pub fn new(extractor: Arc<dyn Extractor>, history_source: Arc<dyn HistorySource>) -> Self {
        let tariffs = TariffTable::default();
        Self {
            extractor,
            history_source,
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                input: String::new(),
                balance: DEFAULT_STARTING_BALANCE,
                tariff: tariffs.plan(TariffTier::default()),
                current: None,
            }),
            tariffs,
            balance_policy: BalancePolicy::default(),
            history: Arc::new(Mutex::new(HistoryView::default())),
            refresh_seq: AtomicU64::new(0),
            pending_refresh: Mutex::new(None),
        }
    }

    pub fn with_balance(self, balance: i64) -> Self {
        lock(&self.inner).balance = balance;
        self
    }

    pub fn with_tariffs(mut self, tariffs: TariffTable, tier: TariffTier) -> Self {
        lock(&self.inner).tariff = tariffs.plan(tier);
        self.tariffs = tariffs;
        self
    }

    pub fn with_balance_policy(mut self, policy: BalancePolicy) -> Self {
        self.balance_policy = policy;
        self
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner).state
    }

    pub fn is_loading(&self) -> bool {
        self.state() != SessionState::Idle
    }

    pub fn balance(&self) -> i64 {
        lock(&self.inner).balance
    }

    pub fn balance_policy(&self) -> BalancePolicy {
        self.balance_policy
    }

    pub fn tariff(&self) -> TariffPlan {
        lock(&self.inner).tariff
    }

    pub fn tariffs(&self) -> &TariffTable {
        &self.tariffs
    }

    /// Switch tier. Takes effect for the next dispatched parse; one already in flight keeps the
    /// price it was dispatched with.
    pub fn set_tariff_tier(&self, tier: TariffTier) -> TariffPlan {
        let plan = self.tariffs.plan(tier);
        lock(&self.inner).tariff = plan;
        info!(tier = %plan.tier, price = plan.price, "tariff changed");
        plan
    }

    pub fn input(&self) -> String {
        lock(&self.inner).input.clone()
    }

    pub fn set_input(&self, text: impl Into<String>) {
        lock(&self.inner).input = text.into();
    }

    pub fn current(&self) -> Option<ParseReport> {
        lock(&self.inner).current.clone()
    }

    pub fn history(&self) -> Vec<ParseResult> {
        lock(&self.history).records.clone()
    }

    pub fn stats(&self) -> HistoryStats {
        HistoryStats::from_history(&lock(&self.history).records)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (history, stats) = {
            let view = lock(&self.history);
            (view.records.clone(), HistoryStats::from_history(&view.records))
        };
        let inner = lock(&self.inner);
        SessionSnapshot {
            state: inner.state,
            input: inner.input.clone(),
            balance: inner.balance,
            tariff: inner.tariff,
            balance_policy: self.balance_policy,
            current: inner.current.clone(),
            history,
            stats,
        }
    }

    /// Set the input and submit it. The input is only replaced when no parse is in flight.
    pub async fn submit_url(&self, url: &str) -> Result<ParseReport, SessionError> {
        let dispatch = self.begin(Some(url))?;
        self.dispatch(dispatch).await
    }

    /// Parse the buffered input.
    ///
    /// Validation failures return without any network call. Every dispatched parse settles
    /// into a [`ParseReport`], successful or not, and schedules a history refresh.
    pub async fn submit(&self) -> Result<ParseReport, SessionError> {
        let dispatch = self.begin(None)?;
        self.dispatch(dispatch).await
    }

    async fn dispatch(&self, dispatch: Dispatch) -> Result<ParseReport, SessionError> {
        let _in_flight = InFlight { inner: &self.inner };

        let span = info_span!("parse", url = %dispatch.url, platform = %dispatch.platform);
        let outcome = self
            .extractor
            .extract(&dispatch.url)
            .instrument(span.clone())
            .await;

        let report = span.in_scope(|| self.settle(&dispatch, outcome));
        self.spawn_refresh();
        Ok(report)
    }

    /// Idle -> Validating -> Dispatching, or back to Idle on a validation error. `input`, when
    /// given, replaces the buffer inside the same critical section as the state check.
    fn begin(&self, input: Option<&str>) -> Result<Dispatch, SessionError> {
        let mut inner = lock(&self.inner);
        if inner.state != SessionState::Idle {
            return Err(SessionError::AlreadyInProgress);
        }
        if let Some(input) = input {
            inner.input = input.to_string();
        }
        inner.state = SessionState::Validating;

        match self.validate(&inner) {
            Ok(dispatch) => {
                inner.state = SessionState::Dispatching;
                inner.current = None;
                Ok(dispatch)
            }
            Err(err) => {
                inner.state = SessionState::Idle;
                warn!(error = %err, "parse rejected before dispatch");
                Err(err)
            }
        }
    }

    fn validate(&self, inner: &SessionInner) -> Result<Dispatch, SessionError> {
        let url = inner.input.trim();
        if url.is_empty() {
            return Err(SessionError::EmptyInput);
        }
        let platform = classify_platform(url)?;

        let price = inner.tariff.price;
        if self.balance_policy == BalancePolicy::Enforced && inner.balance < i64::from(price) {
            return Err(SessionError::InsufficientBalance {
                balance: inner.balance,
                price,
            });
        }

        Ok(Dispatch {
            url: url.to_string(),
            platform,
            price,
        })
    }

    fn settle(&self, dispatch: &Dispatch, outcome: ExtractionOutcome) -> ParseReport {
        let mut inner = lock(&self.inner);
        inner.state = SessionState::Settling;
        let now = Utc::now();

        let (result, failure) = match outcome {
            ExtractionOutcome::Success {
                url,
                platform,
                phone,
            } => {
                let url = url.unwrap_or_else(|| dispatch.url.clone());
                let result = ParseResult::success(url, platform, phone, dispatch.price, now);
                inner.balance -= i64::from(result.cost);
                info!(
                    platform = %result.platform,
                    cost = result.cost,
                    balance = inner.balance,
                    "phone extracted"
                );
                (result, None)
            }
            ExtractionOutcome::Failure { kind, reason } => {
                warn!(kind = %kind, reason = %reason, balance = inner.balance, "extraction failed");
                (
                    ParseResult::failed(dispatch.url.clone(), dispatch.platform, now),
                    Some(ParseFailure { kind, reason }),
                )
            }
        };

        let report = ParseReport {
            result,
            failure,
            balance_after: inner.balance,
        };
        inner.current = Some(report.clone());
        inner.input.clear();
        report
    }

    fn next_refresh_seq(&self) -> u64 {
        self.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Start a history refresh without waiting for it.
    fn spawn_refresh(&self) {
        let seq = self.next_refresh_seq();
        let source = Arc::clone(&self.history_source);
        let view = Arc::clone(&self.history);
        let handle = tokio::spawn(async move {
            let records = source.fetch_history().await;
            lock(&view).apply(seq, records);
        });
        *lock(&self.pending_refresh) = Some(handle);
    }

    /// Fetch history now and wait for it, as done once at startup.
    pub async fn refresh_history(&self) -> Vec<ParseResult> {
        let seq = self.next_refresh_seq();
        let records = self.history_source.fetch_history().await;
        let mut view = lock(&self.history);
        view.apply(seq, records);
        view.records.clone()
    }

    /// Wait for the most recently spawned history refresh, if any.
    pub async fn wait_for_refresh(&self) {
        let handle = lock(&self.pending_refresh).take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "history refresh task ended abnormally");
            }
        }
    }
}
