//! Runtime metrics and instrumentation.
//!
//! Lightweight counters and a latency window that can be queried at runtime
//! or exported as Prometheus text.
//!
//! Lock-free `AtomicU64` counters on the hot path; the latency window sits
//! behind a `parking_lot::Mutex` and is only read on export.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::types::NodeKind;

/// Process-wide metrics shared by every agent.
pub static METRICS: MemstreamMetrics = MemstreamMetrics::new();

/// Process-wide metrics.
#[must_use]
pub fn global() -> &'static MemstreamMetrics {
    &METRICS
}

/// Counters plus the retrieval latency window.
pub struct MemstreamMetrics {
    /// Event counters.
    pub counters: MemstreamCounters,
    /// Per-focal-point retrieval timings.
    pub retrieval_latency: LatencyWindow,
}

impl MemstreamMetrics {
    /// Zeroed metrics with a 1 ms retrieval budget.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counters: MemstreamCounters::new(),
            retrieval_latency: LatencyWindow::new(1.0),
        }
    }
}

impl Default for MemstreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Counters (lock-free)
// ---------------------------------------------------------------------------

/// Atomic counters for high-frequency events.
pub struct MemstreamCounters {
    /// Event nodes inserted.
    pub events_inserted: AtomicU64,
    /// Thought nodes inserted.
    pub thoughts_inserted: AtomicU64,
    /// Chat nodes inserted.
    pub chats_inserted: AtomicU64,
    /// Focal points ranked.
    pub retrievals: AtomicU64,
    /// Importance-triggered reflections run.
    pub reflections: AtomicU64,
    /// Focal points whose insight synthesis was abandoned.
    pub insight_syntheses_skipped: AtomicU64,
    /// Conversation closeouts run.
    pub conversation_closeouts: AtomicU64,
    /// Store saves completed.
    pub saves_completed: AtomicU64,
    /// Store loads completed.
    pub loads_completed: AtomicU64,
}

impl MemstreamCounters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            events_inserted: AtomicU64::new(0),
            thoughts_inserted: AtomicU64::new(0),
            chats_inserted: AtomicU64::new(0),
            retrievals: AtomicU64::new(0),
            reflections: AtomicU64::new(0),
            insight_syntheses_skipped: AtomicU64::new(0),
            conversation_closeouts: AtomicU64::new(0),
            saves_completed: AtomicU64::new(0),
            loads_completed: AtomicU64::new(0),
        }
    }

    /// Count one inserted node of `kind`.
    pub fn record_insert(&self, kind: NodeKind) {
        let counter = match kind {
            NodeKind::Event => &self.events_inserted,
            NodeKind::Thought => &self.thoughts_inserted,
            NodeKind::Chat => &self.chats_inserted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            inserted: [
                self.events_inserted.load(Ordering::Relaxed),
                self.thoughts_inserted.load(Ordering::Relaxed),
                self.chats_inserted.load(Ordering::Relaxed),
            ],
            retrievals: self.retrievals.load(Ordering::Relaxed),
            reflections: self.reflections.load(Ordering::Relaxed),
            insight_syntheses_skipped: self.insight_syntheses_skipped.load(Ordering::Relaxed),
            conversation_closeouts: self.conversation_closeouts.load(Ordering::Relaxed),
            saves_completed: self.saves_completed.load(Ordering::Relaxed),
            loads_completed: self.loads_completed.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemstreamCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of counter values at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Nodes inserted by kind `[event, thought, chat]`.
    pub inserted: [u64; 3],
    /// Focal points ranked.
    pub retrievals: u64,
    /// Reflections run.
    pub reflections: u64,
    /// Abandoned insight syntheses.
    pub insight_syntheses_skipped: u64,
    /// Conversation closeouts.
    pub conversation_closeouts: u64,
    /// Completed saves.
    pub saves_completed: u64,
    /// Completed loads.
    pub loads_completed: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP memstream_nodes_inserted_total Memory nodes inserted by kind\n\
             # TYPE memstream_nodes_inserted_total counter\n\
             memstream_nodes_inserted_total{{kind=\"event\"}} {}\n\
             memstream_nodes_inserted_total{{kind=\"thought\"}} {}\n\
             memstream_nodes_inserted_total{{kind=\"chat\"}} {}\n\
             # HELP memstream_retrievals_total Focal points ranked\n\
             # TYPE memstream_retrievals_total counter\n\
             memstream_retrievals_total {}\n\
             # HELP memstream_reflections_total Importance-triggered reflections\n\
             # TYPE memstream_reflections_total counter\n\
             memstream_reflections_total {}\n\
             # HELP memstream_insight_syntheses_skipped_total Abandoned insight syntheses\n\
             # TYPE memstream_insight_syntheses_skipped_total counter\n\
             memstream_insight_syntheses_skipped_total {}\n\
             # HELP memstream_conversation_closeouts_total Conversation closeouts\n\
             # TYPE memstream_conversation_closeouts_total counter\n\
             memstream_conversation_closeouts_total {}\n\
             # HELP memstream_saves_completed_total Store saves completed\n\
             # TYPE memstream_saves_completed_total counter\n\
             memstream_saves_completed_total {}\n\
             # HELP memstream_loads_completed_total Store loads completed\n\
             # TYPE memstream_loads_completed_total counter\n\
             memstream_loads_completed_total {}\n",
            self.inserted[0],
            self.inserted[1],
            self.inserted[2],
            self.retrievals,
            self.reflections,
            self.insight_syntheses_skipped,
            self.conversation_closeouts,
            self.saves_completed,
            self.loads_completed,
        )
    }
}

// ---------------------------------------------------------------------------
// Latency window
// ---------------------------------------------------------------------------

const WINDOW: usize = 256;

/// Ring buffer of the most recent operation timings.
pub struct LatencyWindow {
    budget_ms: f64,
    history: Mutex<History>,
}

struct History {
    timings: Vec<f64>,
    write_idx: usize,
    count: u64,
}

impl LatencyWindow {
    /// Create an empty window with the given budget (milliseconds).
    #[must_use]
    pub const fn new(budget_ms: f64) -> Self {
        Self {
            budget_ms,
            history: parking_lot::const_mutex(History {
                timings: Vec::new(),
                write_idx: 0,
                count: 0,
            }),
        }
    }

    /// Start timing. The elapsed time is recorded when the guard drops.
    pub fn start(&self) -> LatencyGuard<'_> {
        LatencyGuard {
            window: self,
            start: Instant::now(),
        }
    }

    /// Record a timing manually (milliseconds).
    pub fn record(&self, ms: f64) {
        let mut h = self.history.lock();
        if h.timings.len() < WINDOW {
            h.timings.push(ms);
        } else {
            let idx = h.write_idx;
            h.timings[idx] = ms;
        }
        h.write_idx = (h.write_idx + 1) % WINDOW;
        h.count += 1;
    }

    /// Total timings recorded.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.history.lock().count
    }

    /// P50, P95, P99 and max over the window (milliseconds).
    #[must_use]
    pub fn percentiles(&self) -> LatencyPercentiles {
        let mut sorted = self.history.lock().timings.clone();
        let n = sorted.len();
        if n == 0 {
            return LatencyPercentiles::default();
        }
        sorted.sort_by(f64::total_cmp);

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let at = |q: f64| sorted[((n as f64 * q) as usize).min(n - 1)];
        #[allow(clippy::cast_precision_loss)]
        let over = sorted.iter().filter(|&&t| t > self.budget_ms).count() as f64 / n as f64;

        LatencyPercentiles {
            p50: at(0.5),
            p95: at(0.95),
            p99: at(0.99),
            max: sorted[n - 1],
            over_budget_ratio: over,
        }
    }
}

/// RAII guard that records elapsed time when dropped.
pub struct LatencyGuard<'a> {
    window: &'a LatencyWindow,
    start: Instant,
}

impl Drop for LatencyGuard<'_> {
    fn drop(&mut self) {
        self.window
            .record(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}

/// Percentile statistics for a latency window.
#[derive(Debug, Clone, Default)]
pub struct LatencyPercentiles {
    /// Median in milliseconds.
    pub p50: f64,
    /// 95th percentile in milliseconds.
    pub p95: f64,
    /// 99th percentile in milliseconds.
    pub p99: f64,
    /// Maximum observed timing.
    pub max: f64,
    /// Share of timings over budget (0.0–1.0).
    pub over_budget_ratio: f64,
}

// ---------------------------------------------------------------------------
// Tracing span names
// ---------------------------------------------------------------------------

/// Span names used with `tracing::span!`.
pub mod spans {
    /// Retrieval over all focal points.
    pub const RETRIEVE: &str = "memstream::retrieve";
    /// Reflection run.
    pub const REFLECT: &str = "memstream::reflect";
    /// Perception pass.
    pub const PERCEIVE: &str = "memstream::perceive";
    /// Store save.
    pub const PERSIST_SAVE: &str = "memstream::persist::save";
    /// Store load.
    pub const PERSIST_LOAD: &str = "memstream::persist::load";
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_and_snapshot() {
        let c = MemstreamCounters::new();
        c.record_insert(NodeKind::Event);
        c.record_insert(NodeKind::Event);
        c.record_insert(NodeKind::Chat);
        c.reflections.fetch_add(1, Ordering::Relaxed);

        let snap = c.snapshot();
        assert_eq!(snap.inserted, [2, 0, 1]);
        assert_eq!(snap.reflections, 1);
        assert_eq!(snap.retrievals, 0);
    }

    #[test]
    fn prometheus_format_valid() {
        let c = MemstreamCounters::new();
        c.retrievals.fetch_add(42, Ordering::Relaxed);
        let prom = c.snapshot().to_prometheus();
        assert!(prom.contains("memstream_retrievals_total 42"));
        assert!(prom.contains("memstream_nodes_inserted_total{kind=\"thought\"} 0"));
        assert!(prom.contains("# TYPE"));
    }

    #[test]
    fn window_wraps_after_capacity() {
        let w = LatencyWindow::new(2.0);
        for i in 0..(WINDOW + 10) {
            #[allow(clippy::cast_precision_loss)]
            w.record(i as f64);
        }
        assert_eq!(w.count(), (WINDOW + 10) as u64);
        let p = w.percentiles();
        assert!((p.max - (WINDOW + 9) as f64).abs() < f64::EPSILON);
        assert!(p.p50 >= 10.0);
        assert!(p.over_budget_ratio > 0.9);
    }

    #[test]
    fn guard_records_timing() {
        let w = LatencyWindow::new(100.0);
        {
            let _guard = w.start();
        }
        assert_eq!(w.count(), 1);
        assert!(w.percentiles().max < 100.0);
    }

    #[test]
    fn empty_window_is_zero() {
        let p = LatencyWindow::new(1.0).percentiles();
        assert_eq!(p.max, 0.0);
    }
}
