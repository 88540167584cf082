use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::TankError;
use crate::query::OperatorCode;
use crate::service::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::List,
        Operation::Get,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Get => "get",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hook the service reports through instead of printing.
///
/// Every method has an empty default so observers pick what they need.
pub trait ServiceObserver: Send + Sync {
    fn filter_dropped(&self, _table: &'static str, _key: &str) {}

    fn operator_fallback(&self, _table: &'static str, _key: &str, _code: &OperatorCode) {}

    fn store_failed(&self, _table: &'static str, _op: Operation, _err: &TankError) {}

    fn stream_aborted(&self, _table: &'static str, _sent: usize, _reason: &str) {}

    fn completed(&self, _table: &'static str, _op: Operation, _error: Option<ErrorKind>) {}

    fn streamed(&self, _table: &'static str, _count: usize) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl ServiceObserver for NoopObserver {}

#[derive(Debug, Default)]
pub struct ServiceMetrics {
    ok: [AtomicU64; 5],
    failed: [AtomicU64; 5],
    filters_dropped: AtomicU64,
    operator_fallbacks: AtomicU64,
    store_errors: AtomicU64,
    streams_aborted: AtomicU64,
    records_streamed: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationCounts {
    pub operation: Operation,
    pub ok: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub operations: Vec<OperationCounts>,
    pub filters_dropped: u64,
    pub operator_fallbacks: u64,
    pub store_errors: u64,
    pub streams_aborted: u64,
    pub records_streamed: u64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            operations: Operation::ALL
                .iter()
                .map(|op| OperationCounts {
                    operation: *op,
                    ok: load(&self.ok[op.index()]),
                    failed: load(&self.failed[op.index()]),
                })
                .collect(),
            filters_dropped: load(&self.filters_dropped),
            operator_fallbacks: load(&self.operator_fallbacks),
            store_errors: load(&self.store_errors),
            streams_aborted: load(&self.streams_aborted),
            records_streamed: load(&self.records_streamed),
        }
    }
}

/// Default observer: structured `tracing` events plus counters.
#[derive(Clone, Default)]
pub struct TracingObserver {
    metrics: Arc<ServiceMetrics>,
}

impl TracingObserver {
    pub fn new(metrics: Arc<ServiceMetrics>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }
}

impl ServiceObserver for TracingObserver {
    fn filter_dropped(&self, table: &'static str, key: &str) {
        self.metrics.filters_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(table, key, "invalid filter key will be ignored");
    }

    fn operator_fallback(&self, table: &'static str, key: &str, code: &OperatorCode) {
        self.metrics
            .operator_fallbacks
            .fetch_add(1, Ordering::Relaxed);
        tracing::warn!(table, key, %code, "unknown filter operator, using EQ");
    }

    fn store_failed(&self, table: &'static str, op: Operation, err: &TankError) {
        self.metrics.store_errors.fetch_add(1, Ordering::Relaxed);
        tracing::error!(table, %op, error = %err, "store failure");
    }

    fn stream_aborted(&self, table: &'static str, sent: usize, reason: &str) {
        self.metrics.streams_aborted.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(table, sent, reason, "list stream aborted");
    }

    fn completed(&self, table: &'static str, op: Operation, error: Option<ErrorKind>) {
        match error {
            None => {
                self.metrics.ok[op.index()].fetch_add(1, Ordering::Relaxed);
                tracing::debug!(table, %op, "ok");
            }
            Some(kind) => {
                self.metrics.failed[op.index()].fetch_add(1, Ordering::Relaxed);
                tracing::info!(table, %op, ?kind, "failed");
            }
        }
    }

    fn streamed(&self, _table: &'static str, count: usize) {
        self.metrics
            .records_streamed
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}
