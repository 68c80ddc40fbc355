use adparse_core::{ParseResult, ParseStatus, Platform};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{transport_cause, ClientError, HistorySource, HttpClientConfig};

#[derive(Debug, Deserialize)]
struct HistoryEnvelope {
    history: Vec<JsonValue>,
}

/// Identifiers arrive as strings or as raw database integers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RemoteId {
    Text(String),
    Number(i64),
}

impl RemoteId {
    fn into_string(self) -> String {
        match self {
            RemoteId::Text(id) => id,
            RemoteId::Number(id) => id.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryItem {
    id: RemoteId,
    url: String,
    platform: Platform,
    #[serde(default)]
    phone: Option<String>,
    status: ParseStatus,
    cost: u32,
    timestamp: Option<String>,
}

impl HistoryItem {
    fn into_record(self) -> Result<ParseResult, ClientError> {
        let raw = self
            .timestamp
            .ok_or_else(|| ClientError::InvalidTimestamp(String::new()))?;
        let record = ParseResult {
            id: self.id.into_string(),
            url: self.url,
            platform: self.platform,
            phone: self.phone.unwrap_or_default(),
            status: self.status,
            timestamp: parse_remote_timestamp(&raw)?,
            cost: self.cost,
        };
        if !record.is_consistent() {
            return Err(ClientError::Malformed(format!(
                "record {} has status {:?} with phone {:?} and cost {}",
                record.id, record.status, record.phone, record.cost
            )));
        }
        Ok(record)
    }
}

/// Accept RFC 3339 as well as the offset-less ISO-8601 form the history service emits; the
/// latter is taken as UTC.
pub fn parse_remote_timestamp(raw: &str) -> Result<DateTime<Utc>, ClientError> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| ClientError::InvalidTimestamp(raw.to_string()))
}

/// Decode a `{ "history": [...] }` body, preserving service order.
///
/// A broken envelope fails the whole decode. Individual items that do not decode are skipped.
pub fn decode_history(body: &[u8]) -> Result<Vec<ParseResult>, ClientError> {
    let envelope: HistoryEnvelope =
        serde_json::from_slice(body).map_err(|err| ClientError::Malformed(err.to_string()))?;

    let mut records = Vec::with_capacity(envelope.history.len());
    for (index, item) in envelope.history.into_iter().enumerate() {
        let decoded = serde_json::from_value::<HistoryItem>(item)
            .map_err(|err| ClientError::Malformed(err.to_string()))
            .and_then(HistoryItem::into_record);
        match decoded {
            Ok(record) => records.push(record),
            Err(err) => warn!(index, error = %err, "skipping undecodable history item"),
        }
    }
    Ok(records)
}

/// Client for the history service. Keeps the last good snapshot so a failed refresh degrades to
/// stale data instead of an error.
#[derive(Debug)]
pub struct HistoryClient {
    client: reqwest::Client,
    endpoint: String,
    limit: Option<u32>,
    snapshot: RwLock<Vec<ParseResult>>,
}

impl HistoryClient {
    pub fn new(endpoint: impl Into<String>, config: &HttpClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: config.build_client()?,
            endpoint: endpoint.into(),
            limit: None,
            snapshot: RwLock::new(Vec::new()),
        })
    }

    /// Ask the service for at most `limit` records.
    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub async fn snapshot(&self) -> Vec<ParseResult> {
        self.snapshot.read().await.clone()
    }

    pub async fn try_fetch_history(&self) -> Result<Vec<ParseResult>, ClientError> {
        let mut request = self.client.get(&self.endpoint);
        if let Some(limit) = self.limit {
            request = request.query(&[("limit", limit)]);
        }

        let resp = request.send().await.inspect_err(|err| {
            warn!(cause = transport_cause(err), "history request failed");
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }

        let body = resp.bytes().await?;
        decode_history(&body)
    }

    /// Fetch and store a fresh snapshot, or fall back to the previous one on any failure.
    pub async fn fetch_history(&self) -> Vec<ParseResult> {
        match self.try_fetch_history().await {
            Ok(records) => {
                info!(endpoint = %self.endpoint, records = records.len(), "history refreshed");
                let mut snapshot = self.snapshot.write().await;
                *snapshot = records.clone();
                records
            }
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "history fetch failed; keeping previous snapshot");
                self.snapshot().await
            }
        }
    }
}

#[async_trait]
impl HistorySource for HistoryClient {
    async fn fetch_history(&self) -> Vec<ParseResult> {
        HistoryClient::fetch_history(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_server;
    use axum::{extract::Query, extract::State, http::StatusCode, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn sample_body() -> JsonValue {
        json!({
            "history": [
                {
                    "id": "42",
                    "url": "https://www.avito.ru/item/123",
                    "platform": "avito",
                    "phone": "+7 (900) 123-45-67",
                    "status": "success",
                    "cost": 15,
                    "timestamp": "2026-02-24T12:30:00.123456"
                },
                {
                    "id": 41,
                    "url": "https://rabota.ru/vacancy/456",
                    "platform": "rabota",
                    "phone": "",
                    "status": "failed",
                    "cost": 0,
                    "timestamp": "2026-02-24T11:00:00Z"
                }
            ]
        })
    }

    #[test]
    fn timestamps_accept_rfc3339_and_naive_forms() {
        let with_offset = parse_remote_timestamp("2026-02-24T15:00:00+03:00").unwrap();
        let naive = parse_remote_timestamp("2026-02-24T12:00:00").unwrap();
        let fractional = parse_remote_timestamp("2026-02-24T12:00:00.500000").unwrap();
        assert_eq!(with_offset, naive);
        assert_eq!(fractional.timestamp_subsec_millis(), 500);
        assert!(parse_remote_timestamp("yesterday").is_err());
    }

    #[test]
    fn decode_preserves_order_and_normalizes_ids() {
        let body = serde_json::to_vec(&sample_body()).unwrap();
        let records = decode_history(&body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "42");
        assert_eq!(records[0].platform, Platform::Avito);
        assert_eq!(records[0].status, ParseStatus::Success);
        assert_eq!(records[1].id, "41");
        assert_eq!(records[1].cost, 0);
        assert!(records[0].timestamp > records[1].timestamp);
    }

    #[test]
    fn bad_items_are_skipped_but_bad_envelopes_fail() {
        let body = serde_json::to_vec(&json!({
            "history": [
                {"id": "1", "url": "https://avito.ru/1", "platform": "ozon", "phone": "", "status": "failed", "cost": 0, "timestamp": "2026-02-24T12:00:00"},
                {"id": "2", "url": "https://avito.ru/2", "platform": "avito", "phone": null, "status": "failed", "cost": 0, "timestamp": null},
                {"id": "3", "url": "https://avito.ru/3", "platform": "avito", "phone": null, "status": "failed", "cost": 0, "timestamp": "2026-02-24T12:00:00"},
                {"id": "4", "url": "https://avito.ru/4", "platform": "avito", "phone": "", "status": "success", "cost": 0, "timestamp": "2026-02-24T12:00:00"},
                {"id": "5", "url": "https://avito.ru/5", "platform": "avito", "phone": "+7", "status": "failed", "cost": 15, "timestamp": "2026-02-24T12:00:00"}
            ]
        }))
        .unwrap();
        let records = decode_history(&body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "3");
        assert_eq!(records[0].phone, "");
        assert!(records.iter().all(ParseResult::is_consistent));
        assert_eq!(adparse_core::HistoryStats::from_history(&records).successes, 0);

        assert!(matches!(
            decode_history(br#"{"error":"Database error"}"#),
            Err(ClientError::Malformed(_))
        ));
        assert!(decode_history(b"not json").is_err());
    }

    #[tokio::test]
    async fn fetch_sends_limit_and_stores_snapshot() {
        let app = Router::new().route(
            "/history",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("limit").map(String::as_str), Some("20"));
                Json(sample_body())
            }),
        );
        let base = spawn_server(app).await;
        let client = HistoryClient::new(format!("{base}/history"), &HttpClientConfig::default())
            .unwrap()
            .with_limit(Some(20));
        assert_eq!(client.endpoint(), format!("{base}/history"));
        assert_eq!(client.limit(), Some(20));

        let records = client.fetch_history().await;
        assert_eq!(records.len(), 2);
        assert_eq!(client.snapshot().await, records);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_snapshot() {
        let healthy = Arc::new(AtomicBool::new(true));
        let app = Router::new()
            .route(
                "/history",
                get(|State(healthy): State<Arc<AtomicBool>>| async move {
                    if healthy.load(Ordering::SeqCst) {
                        (StatusCode::OK, Json(sample_body()))
                    } else {
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            Json(json!({"error": "Database error"})),
                        )
                    }
                }),
            )
            .with_state(healthy.clone());
        let base = spawn_server(app).await;
        let client = HistoryClient::new(format!("{base}/history"), &HttpClientConfig::default())
            .unwrap();

        let first = client.fetch_history().await;
        assert_eq!(first.len(), 2);

        healthy.store(false, Ordering::SeqCst);
        assert!(matches!(
            client.try_fetch_history().await,
            Err(ClientError::HttpStatus { status: 500, .. })
        ));
        let second = client.fetch_history().await;
        assert_eq!(second, first);
    }
}
