//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `invoice_ledger_transactions_committed_total{kind}` - Committed transactions
//! - `invoice_ledger_transactions_rejected_total{reason}` - Rejected transactions
//! - `invoice_ledger_submit_duration_seconds` - Histogram of submit latencies
//! - `invoice_ledger_blocks_total` - Total number of sealed blocks

use crate::error::Rejection;
use crate::types::InstructionKind;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed transactions by kind
    pub committed: IntCounterVec,

    /// Rejected transactions by reason code
    pub rejected: IntCounterVec,

    /// Submit duration histogram
    pub submit_duration: Histogram,

    /// Total blocks sealed
    pub blocks_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector on a private registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let committed = IntCounterVec::new(
            Opts::new(
                "invoice_ledger_transactions_committed_total",
                "Committed transactions",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(committed.clone()))?;

        let rejected = IntCounterVec::new(
            Opts::new(
                "invoice_ledger_transactions_rejected_total",
                "Rejected transactions",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(rejected.clone()))?;

        let submit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "invoice_ledger_submit_duration_seconds",
                "Histogram of submit latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(submit_duration.clone()))?;

        let blocks_total =
            IntCounter::new("invoice_ledger_blocks_total", "Total number of sealed blocks")?;
        registry.register(Box::new(blocks_total.clone()))?;

        Ok(Self {
            committed,
            rejected,
            submit_duration,
            blocks_total,
            registry,
        })
    }

    /// Record a commit
    pub fn record_commit(&self, kind: InstructionKind) {
        self.committed.with_label_values(&[kind.as_str()]).inc();
    }

    /// Record a rejection
    pub fn record_rejection(&self, rejection: Rejection) {
        self.rejected.with_label_values(&[rejection.code()]).inc();
    }

    /// Record submit duration
    pub fn record_submit_duration(&self, duration_seconds: f64) {
        self.submit_duration.observe(duration_seconds);
    }

    /// Record block finalization
    pub fn record_block_finalized(&self) {
        self.blocks_total.inc();
    }

    /// Prometheus text exposition of every metric
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
