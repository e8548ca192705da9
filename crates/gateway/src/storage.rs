//! The log/metrics sink interface.
//!
//! The persistent store lives outside this crate; the pipeline only talks to
//! this trait. Every call except [`LogStore::record_log`] is fire-and-forget:
//! sink failures are logged to stderr and never fail the request.

use std::collections::HashMap;
use std::sync::Mutex;

use jiff::Timestamp;
use serde_json::Value;
use thiserror::Error;

use crate::transform::Usage;

pub type LogId = String;

#[derive(Debug, Error)]
#[error("storage sink error: {0}")]
pub struct StorageError(pub String);

/// Fields recorded when a request log is opened, before upstream dispatch.
#[derive(Debug, Clone)]
pub struct LogOpen {
    pub ts: Timestamp,
    pub endpoint: String,
    pub provider: String,
    pub model: String,
    pub client_model: Option<String>,
    pub stream: bool,
    pub api_key_id: Option<String>,
    pub api_key_name: Option<String>,
    /// Fingerprint of the presented key; the key itself never reaches the sink.
    pub api_key_fingerprint: Option<String>,
}

/// Fields recorded when the log is closed.
#[derive(Debug, Clone, Default)]
pub struct LogFinalize {
    pub status_code: u16,
    pub latency_ms: u64,
    pub ttft_ms: Option<u64>,
    pub tpot_ms: Option<f64>,
    pub error: Option<String>,
}

/// Daily metric counter increments.
#[derive(Debug, Clone, Default)]
pub struct MetricsDelta {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub latency_ms: u64,
}

/// Optional request/response payload blobs attached to a log record.
#[derive(Debug, Clone, Default)]
pub struct LogPayload {
    pub prompt: Option<Value>,
    pub response: Option<Value>,
}

/// A structured observability event (validation rejections, auth denials).
#[derive(Debug, Clone)]
pub struct SinkEvent {
    pub event_type: String,
    pub level: EventLevel,
    pub detail: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Warn,
}

/// The external log/metrics store, seen from the pipeline.
pub trait LogStore: Send + Sync {
    /// Open a log record. Must return before upstream dispatch.
    fn record_log(&self, open: LogOpen) -> Result<LogId, StorageError>;

    fn update_log_tokens(&self, id: &LogId, usage: &Usage) -> Result<(), StorageError>;

    /// Close the record. Called exactly once per `record_log`.
    fn finalize_log(&self, id: &LogId, fin: LogFinalize) -> Result<(), StorageError>;

    /// Bump the daily counters for `day` (`YYYY-MM-DD`).
    fn update_metrics(&self, day: &str, delta: &MetricsDelta) -> Result<(), StorageError>;

    fn upsert_log_payload(&self, id: &LogId, payload: LogPayload) -> Result<(), StorageError>;

    fn record_event(&self, event: SinkEvent) -> Result<(), StorageError>;
}

/// One stored request log, as kept by [`MemoryLogStore`].
#[derive(Debug, Clone)]
pub struct MemoryLogRecord {
    pub open: LogOpen,
    pub usage: Option<Usage>,
    pub finalize: Option<LogFinalize>,
    pub payload: LogPayload,
}

/// In-memory sink: the default store and the test double.
#[derive(Default)]
pub struct MemoryLogStore {
    records: Mutex<Vec<MemoryLogRecord>>,
    metrics: Mutex<HashMap<String, MetricsDelta>>,
    events: Mutex<Vec<SinkEvent>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<MemoryLogRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn metrics_for(&self, day: &str) -> Option<MetricsDelta> {
        self.metrics.lock().ok()?.get(day).cloned()
    }

    fn with_record<T>(&self, id: &str, f: impl FnOnce(&mut MemoryLogRecord) -> T) -> Result<T, StorageError> {
        let mut records = self.records.lock().map_err(|_| StorageError("lock poisoned".into()))?;
        let index: usize = id.parse().map_err(|_| StorageError(format!("unknown log id {id}")))?;

        records
            .get_mut(index)
            .map(f)
            .ok_or_else(|| StorageError(format!("unknown log id {id}")))
    }
}

impl LogStore for MemoryLogStore {
    fn record_log(&self, open: LogOpen) -> Result<LogId, StorageError> {
        let mut records = self.records.lock().map_err(|_| StorageError("lock poisoned".into()))?;
        records.push(MemoryLogRecord {
            open,
            usage: None,
            finalize: None,
            payload: LogPayload::default(),
        });

        Ok((records.len() - 1).to_string())
    }

    fn update_log_tokens(&self, id: &LogId, usage: &Usage) -> Result<(), StorageError> {
        self.with_record(id, |record| record.usage = Some(*usage))
    }

    fn finalize_log(&self, id: &LogId, fin: LogFinalize) -> Result<(), StorageError> {
        self.with_record(id, |record| record.finalize = Some(fin))
    }

    fn update_metrics(&self, day: &str, delta: &MetricsDelta) -> Result<(), StorageError> {
        let mut metrics = self.metrics.lock().map_err(|_| StorageError("lock poisoned".into()))?;
        let entry = metrics.entry(day.to_string()).or_default();

        entry.requests += delta.requests;
        entry.input_tokens += delta.input_tokens;
        entry.output_tokens += delta.output_tokens;
        entry.cache_read_tokens += delta.cache_read_tokens;
        entry.cache_creation_tokens += delta.cache_creation_tokens;
        entry.latency_ms += delta.latency_ms;

        Ok(())
    }

    fn upsert_log_payload(&self, id: &LogId, payload: LogPayload) -> Result<(), StorageError> {
        self.with_record(id, |record| {
            if payload.prompt.is_some() {
                record.payload.prompt = payload.prompt;
            }
            if payload.response.is_some() {
                record.payload.response = payload.response;
            }
        })
    }

    fn record_event(&self, event: SinkEvent) -> Result<(), StorageError> {
        self.events
            .lock()
            .map_err(|_| StorageError("lock poisoned".into()))?
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Timestamp;

    fn open() -> LogOpen {
        LogOpen {
            ts: Timestamp::UNIX_EPOCH,
            endpoint: "anthropic".into(),
            provider: "p1".into(),
            model: "m1".into(),
            client_model: Some("claude".into()),
            stream: true,
            api_key_id: None,
            api_key_name: None,
            api_key_fingerprint: None,
        }
    }

    #[test]
    fn record_update_finalize_round_trip() {
        let store = MemoryLogStore::new();
        let id = store.record_log(open()).unwrap();

        store
            .update_log_tokens(
                &id,
                &Usage {
                    input: 10,
                    output: 4,
                    cache_read: 0,
                    cache_creation: 0,
                },
            )
            .unwrap();

        store
            .finalize_log(
                &id,
                LogFinalize {
                    status_code: 200,
                    latency_ms: 42,
                    ttft_ms: Some(7),
                    tpot_ms: Some(8.75),
                    error: None,
                },
            )
            .unwrap();

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].usage.unwrap().input, 10);
        assert_eq!(records[0].finalize.as_ref().unwrap().status_code, 200);
    }

    #[test]
    fn metrics_accumulate_per_day() {
        let store = MemoryLogStore::new();

        for _ in 0..2 {
            store
                .update_metrics(
                    "2025-03-01",
                    &MetricsDelta {
                        requests: 1,
                        input_tokens: 5,
                        output_tokens: 2,
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        let day = store.metrics_for("2025-03-01").unwrap();
        assert_eq!(day.requests, 2);
        assert_eq!(day.input_tokens, 10);
    }

    #[test]
    fn unknown_log_id_is_an_error() {
        let store = MemoryLogStore::new();
        assert!(store.finalize_log(&"99".to_string(), LogFinalize::default()).is_err());
    }
}
