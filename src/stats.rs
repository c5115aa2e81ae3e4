/// Pipeline statistics
///
/// Counters are written by the hot-path thread and read by a reporting thread
/// without further synchronization; relaxed ordering is enough since only
/// the totals matter.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

const WINDOW_SIZE: usize = 10000;

/// Per-packet counters, on their own cache line
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct PipelineStats {
    packets_received: AtomicU64,
    packets_processed: AtomicU64,
    packets_dropped: AtomicU64, // sink rejected (backpressure)
    parse_errors: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn record_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_processed(&self) {
        self.packets_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn packets_processed(&self) -> u64 {
        self.packets_processed.load(Ordering::Relaxed)
    }

    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_received: self.packets_received(),
            packets_processed: self.packets_processed(),
            packets_dropped: self.packets_dropped(),
            parse_errors: self.parse_errors(),
        }
    }

    /// Zero all counters
    pub fn reset(&self) {
        self.packets_received.store(0, Ordering::Relaxed);
        self.packets_processed.store(0, Ordering::Relaxed);
        self.packets_dropped.store(0, Ordering::Relaxed);
        self.parse_errors.store(0, Ordering::Relaxed);
    }

    pub fn log_summary(&self) {
        let snap = self.snapshot();
        info!(
            received = snap.packets_received,
            processed = snap.packets_processed,
            dropped = snap.packets_dropped,
            parse_errors = snap.parse_errors,
            "pipeline stats"
        );
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub packets_received: u64,
    pub packets_processed: u64,
    pub packets_dropped: u64,
    pub parse_errors: u64,
}

impl StatsSnapshot {
    /// Counter growth since an earlier snapshot
    pub fn delta_since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            packets_received: self.packets_received.saturating_sub(earlier.packets_received),
            packets_processed: self.packets_processed.saturating_sub(earlier.packets_processed),
            packets_dropped: self.packets_dropped.saturating_sub(earlier.packets_dropped),
            parse_errors: self.parse_errors.saturating_sub(earlier.parse_errors),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Pipeline Statistics ===")?;
        writeln!(f, "  Packets received:  {}", self.packets_received)?;
        writeln!(f, "  Packets processed: {}", self.packets_processed)?;
        writeln!(f, "  Parse errors:      {}", self.parse_errors)?;
        write!(f, "  Sink full:         {}", self.packets_dropped)
    }
}

/// Counters plus the runtime facts needed to read them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSummary {
    pub stats: StatsSnapshot,
    pub tsc_ghz: f64,
    pub pool_head: usize,
    pub pool_capacity: usize,
    pub huge_pages: bool,
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.stats)?;
        writeln!(f, "  TSC frequency:     {:.3} GHz", self.tsc_ghz)?;
        writeln!(f, "  Pool head:         {} / {}", self.pool_head, self.pool_capacity)?;
        write!(
            f,
            "  Huge pages:        {}",
            if self.huge_pages { "yes" } else { "no" }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub p50_ns: u64,
    pub p99_ns: u64,
    pub p999_ns: u64,
}

impl LatencyStats {
    /// Summarize samples; sorts them in place
    pub fn from_samples(samples: &mut [u64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();

        let n = samples.len();
        let mean = samples.iter().map(|&ns| ns as u128).sum::<u128>() as f64 / n as f64;

        Some(LatencyStats {
            min_ns: samples[0],
            max_ns: samples[n - 1],
            mean_ns: mean,
            p50_ns: samples[n / 2],
            p99_ns: samples[(n * 99) / 100],
            p999_ns: samples[(n * 999) / 1000],
        })
    }

    /// Tail-to-median ratio; the jitter figure the pipeline is tuned for
    pub fn p99_p50_ratio(&self) -> f64 {
        if self.p50_ns == 0 {
            return 0.0;
        }
        self.p99_ns as f64 / self.p50_ns as f64
    }
}

impl fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min {} / mean {:.1} / p50 {} / p99 {} / p99.9 {} / max {} ns",
            self.min_ns, self.mean_ns, self.p50_ns, self.p99_ns, self.p999_ns, self.max_ns
        )
    }
}

/// Sliding window of latency samples. Allocates once; not for the hot path.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new() -> Self {
        Self::with_capacity(WINDOW_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        LatencyWindow {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, ns: u64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(ns);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn stats(&self) -> Option<LatencyStats> {
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        LatencyStats::from_samples(&mut sorted)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let stats = PipelineStats::new();
        stats.record_received();
        stats.record_received();
        stats.record_processed();
        stats.record_parse_error();

        let snap = stats.snapshot();
        assert_eq!(snap.packets_received, 2);
        assert_eq!(snap.packets_processed, 1);
        assert_eq!(snap.packets_dropped, 0);
        assert_eq!(snap.parse_errors, 1);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_snapshot_delta() {
        let stats = PipelineStats::new();
        stats.record_dropped();
        let before = stats.snapshot();
        stats.record_dropped();
        stats.record_dropped();
        let delta = stats.snapshot().delta_since(&before);
        assert_eq!(delta.packets_dropped, 2);
    }

    #[test]
    fn test_counters_visible_across_threads() {
        let stats = std::sync::Arc::new(PipelineStats::new());
        let writer = {
            let stats = stats.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    stats.record_processed();
                }
            })
        };
        writer.join().unwrap();
        assert_eq!(stats.packets_processed(), 1000);
    }

    #[test]
    fn test_summary_display() {
        let summary = PipelineSummary {
            stats: StatsSnapshot {
                packets_received: 3,
                ..StatsSnapshot::default()
            },
            tsc_ghz: 2.5,
            pool_head: 7,
            pool_capacity: 64,
            huge_pages: false,
        };
        let text = summary.to_string();
        assert!(text.contains("Packets received:  3"));
        assert!(text.contains("2.500 GHz"));
        assert!(text.contains("Pool head:         7 / 64"));
        assert!(text.contains("Huge pages:        no"));
    }

    #[test]
    fn test_latency_stats() {
        let mut samples: Vec<u64> = (1..=100).rev().collect();
        let stats = LatencyStats::from_samples(&mut samples).unwrap();
        assert_eq!(stats.min_ns, 1);
        assert_eq!(stats.max_ns, 100);
        assert_eq!(stats.p50_ns, 51);
        assert_eq!(stats.p99_ns, 100);
        assert!((stats.mean_ns - 50.5).abs() < 1e-9);
        assert!(LatencyStats::from_samples(&mut []).is_none());
    }

    #[test]
    fn test_latency_stats_huge_samples() {
        let big = u64::MAX / 2 + 1;
        let stats = LatencyStats::from_samples(&mut [big, big]).unwrap();
        assert_eq!(stats.max_ns, big);
        assert!((stats.mean_ns - big as f64).abs() < 1.0);
    }

    #[test]
    fn test_latency_window_evicts_oldest() {
        let mut window = LatencyWindow::with_capacity(3);
        for ns in [100, 1, 2, 3] {
            window.record(ns);
        }
        assert_eq!(window.len(), 3);
        let stats = window.stats().unwrap();
        assert_eq!(stats.max_ns, 3);
    }
}
