/// Ingest pipeline
///
/// One pipeline instance per receive queue, owned by the single hot-path
/// thread. Per packet: capture receive cycles, convert to ns, decode into
/// a pool slot, hand the slot to the publish sink, count the outcome.
/// Nothing on that path blocks, allocates, locks or logs.

use crate::decoder::WireDecoder;
use crate::pool::{self, PoolError, RecordPool, DEFAULT_POOL_CAPACITY};
use crate::protocol::{QuotePacket, FULL_PAYLOAD_SIZE};
use crate::record::{flags, QuoteRecord};
use crate::stats::{PipelineStats, PipelineSummary};
use crate::timing::{self, CalibrationError, TimeBase};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Largest burst a PacketSource hands over at once
pub const BURST_SIZE: usize = 32;

pub const DEFAULT_WARMUP_PACKETS: usize = 1000;
pub const DEFAULT_UDP_PORT: u16 = 12345;
pub const DEFAULT_CHANNEL: &str = "gateway";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("record pool unavailable: {0}")]
    Pool(#[from] PoolError),

    #[error("time base calibration failed: {0}")]
    Calibration(#[from] CalibrationError),
}

/// Process-level knobs, supplied by the bootstrap layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Pool slots; size against burst rate times consumption latency
    pub pool_capacity: usize,
    pub warmup_packets: usize,
    /// Destination port the NIC layer filters on
    pub udp_port: u16,
    /// Shared-memory channel the sink publishes to
    pub channel: String,
    pub enable_stats: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            warmup_packets: DEFAULT_WARMUP_PACKETS,
            udp_port: DEFAULT_UDP_PORT,
            channel: DEFAULT_CHANNEL.to_string(),
            enable_stats: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        pool::validate_capacity(self.pool_capacity)?;
        Ok(())
    }
}

/// Downstream publish target. Must never block; `false` means the record was not taken.
pub trait PublishSink {
    fn try_publish(&mut self, record: &QuoteRecord) -> bool;
}

/// Bounded lock-free queue, shared with the consumer side
impl PublishSink for Arc<ArrayQueue<QuoteRecord>> {
    #[inline(always)]
    fn try_publish(&mut self, record: &QuoteRecord) -> bool {
        self.push(*record).is_ok()
    }
}

/// Supplier of UDP payloads already filtered to the feed's destination port
pub trait PacketSource {
    /// Hand up to BURST_SIZE payloads to `handle`, in arrival order, without
    /// blocking. Returns how many were handed over.
    fn poll_burst<F>(&mut self, handle: F) -> usize
    where
        F: FnMut(&[&[u8]]);

    /// A finite source reports true once drained; live sources never do
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Replays a fixed set of payloads in bursts
#[derive(Debug, Clone)]
pub struct ReplaySource {
    payloads: Vec<Vec<u8>>,
    burst_size: usize,
    position: usize,
    looping: bool,
}

impl ReplaySource {
    pub fn new(payloads: Vec<Vec<u8>>) -> Self {
        ReplaySource {
            payloads,
            burst_size: BURST_SIZE,
            position: 0,
            looping: false,
        }
    }

    /// Restart from the first payload when the end is reached
    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    pub fn with_burst_size(mut self, burst_size: usize) -> Self {
        self.burst_size = burst_size.clamp(1, BURST_SIZE);
        self
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

impl PacketSource for ReplaySource {
    fn poll_burst<F>(&mut self, mut handle: F) -> usize
    where
        F: FnMut(&[&[u8]]),
    {
        if self.looping && self.position >= self.payloads.len() {
            self.position = 0;
        }

        let end = (self.position + self.burst_size).min(self.payloads.len());
        let count = end.saturating_sub(self.position);
        if count == 0 {
            return 0;
        }

        let mut burst: [&[u8]; BURST_SIZE] = [&[]; BURST_SIZE];
        for (slot, payload) in burst.iter_mut().zip(&self.payloads[self.position..end]) {
            *slot = payload.as_slice();
        }
        self.position = end;

        handle(&burst[..count]);
        count
    }

    fn is_exhausted(&self) -> bool {
        !self.looping && self.position >= self.payloads.len()
    }
}

/// Cooperative stop flag for the hot loop
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What happened to one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    Published,
    /// Decoded, but the sink was full
    Dropped,
    /// Malformed or truncated; no record produced
    Rejected,
}

pub struct IngestPipeline<S: PublishSink> {
    config: PipelineConfig,
    pool: RecordPool,
    time_base: TimeBase,
    sink: S,
    stats: Arc<PipelineStats>,
    stop: StopHandle,
    sequence: u32,
}

impl<S: PublishSink> IngestPipeline<S> {
    /// Allocate the pool and calibrate the time base (blocks ~10ms)
    pub fn new(config: PipelineConfig, sink: S) -> Result<Self, PipelineError> {
        config.validate()?;
        let time_base = TimeBase::calibrate()?;
        Self::with_time_base(config, time_base, sink)
    }

    /// Build with an already calibrated time base
    pub fn with_time_base(
        config: PipelineConfig,
        time_base: TimeBase,
        sink: S,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let pool = RecordPool::new(config.pool_capacity)?;

        info!(
            udp_port = config.udp_port,
            channel = %config.channel,
            pool_capacity = config.pool_capacity,
            "ingest pipeline created"
        );

        Ok(IngestPipeline {
            config,
            pool,
            time_base,
            sink,
            stats: Arc::new(PipelineStats::new()),
            stop: StopHandle::default(),
            sequence: 0,
        })
    }

    /// Pre-touch the pool and time base, then push synthetic packets through
    /// the decoder. Synthetic records are never published and leave both the
    /// counters and the sequence untouched. Returns packets decoded.
    pub fn warm_up(&mut self) -> usize {
        let count = self.config.warmup_packets;
        info!(packets = count, "warming up");

        self.pool.warm();
        std::hint::black_box(self.time_base.cycles_to_ns(timing::read_cycles()));

        let mut buf = [0u8; FULL_PAYLOAD_SIZE];
        let Some(len) = warmup_packet().encode_into(&mut buf) else {
            return 0;
        };

        let mut decoded = 0;
        for _ in 0..count {
            let ts = self.time_base.cycles_to_ns(timing::read_cycles());
            if let Some(record) = WireDecoder::decode(&buf[..len], &mut self.pool, ts, 0) {
                record.flags |= flags::SYNTHETIC;
                std::hint::black_box(&*record);
                decoded += 1;
            }
        }

        info!(packets = decoded, "warm-up complete");
        decoded
    }

    /// Timestamp a freshly received payload and run it through the pipeline
    #[inline(always)]
    pub fn process_packet(&mut self, payload: &[u8]) -> PacketOutcome {
        let rx_cycles = timing::read_cycles();
        let receive_time_ns = self.time_base.cycles_to_ns(rx_cycles);
        self.process_payload(payload, receive_time_ns)
    }

    /// Decode and publish a payload whose receive time is already known
    #[inline(always)]
    pub fn process_payload(&mut self, payload: &[u8], receive_time_ns: u64) -> PacketOutcome {
        let enable_stats = self.config.enable_stats;
        if enable_stats {
            self.stats.record_received();
        }

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        match WireDecoder::decode(payload, &mut self.pool, receive_time_ns, sequence) {
            Some(record) => {
                if self.sink.try_publish(record) {
                    if enable_stats {
                        self.stats.record_processed();
                    }
                    PacketOutcome::Published
                } else {
                    if enable_stats {
                        self.stats.record_dropped();
                    }
                    PacketOutcome::Dropped
                }
            }
            None => {
                if enable_stats {
                    self.stats.record_parse_error();
                }
                PacketOutcome::Rejected
            }
        }
    }

    /// Process a burst in arrival order, prefetching the next two payloads
    #[inline]
    pub fn process_burst(&mut self, burst: &[&[u8]]) {
        let count = burst.len();
        for i in 0..count {
            if i + 1 < count {
                prefetch_l1(burst[i + 1].as_ptr());
            }
            if i + 2 < count {
                prefetch_l2(burst[i + 2].as_ptr());
            }
            self.process_packet(burst[i]);
        }
    }

    /// Busy-poll `source` until stopped or the source is drained.
    /// Returns the number of packets handed to the pipeline.
    pub fn run<P: PacketSource>(&mut self, source: &mut P) -> u64 {
        info!(
            udp_port = self.config.udp_port,
            channel = %self.config.channel,
            "starting poll loop"
        );

        let mut packets = 0u64;
        while !self.stop.is_stopped() && !source.is_exhausted() {
            packets += source.poll_burst(|burst| self.process_burst(burst)) as u64;
        }

        info!(packets, "poll loop stopped");
        packets
    }

    /// Handle for stopping `run` from another thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Shared counters, for a reporting thread
    pub fn stats_handle(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Counters together with clock rate and pool state
    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            stats: self.stats.snapshot(),
            tsc_ghz: self.time_base.ghz(),
            pool_head: self.pool.cursor() & (self.pool.capacity() - 1),
            pool_capacity: self.pool.capacity(),
            huge_pages: self.pool.is_using_huge_pages(),
        }
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        info!(
            received = summary.stats.packets_received,
            processed = summary.stats.packets_processed,
            dropped = summary.stats.packets_dropped,
            parse_errors = summary.stats.parse_errors,
            tsc_ghz = summary.tsc_ghz,
            pool_head = summary.pool_head,
            huge_pages = summary.huge_pages,
            "pipeline summary"
        );
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn pool(&self) -> &RecordPool {
        &self.pool
    }

    pub fn time_base(&self) -> &TimeBase {
        &self.time_base
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Sequence number the next packet will get
    pub fn next_sequence(&self) -> u32 {
        self.sequence
    }
}

/// "WARMUP  " at 150.00 / 150.00, 100 shares each side, spread 0.10
fn warmup_packet() -> QuotePacket {
    QuotePacket {
        spread_raw: 1000,
        ..QuotePacket::new("WARMUP", 1_500_000, 100, 1_500_000, 100)
    }
    .with_timing([0; 4])
}

#[inline(always)]
fn prefetch_l1(ptr: *const u8) {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: prefetch is a hint and never faults
    unsafe {
        use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
        _mm_prefetch::<_MM_HINT_T0>(ptr as *const i8);
    }
    #[cfg(not(target_arch = "x86_64"))]
    let _ = ptr;
}

#[inline(always)]
fn prefetch_l2(ptr: *const u8) {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: prefetch is a hint and never faults
    unsafe {
        use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T1};
        _mm_prefetch::<_MM_HINT_T1>(ptr as *const i8);
    }
    #[cfg(not(target_arch = "x86_64"))]
    let _ = ptr;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatsSnapshot;

    #[derive(Default)]
    struct CountingSink {
        published: Vec<QuoteRecord>,
        accept: bool,
    }

    impl PublishSink for CountingSink {
        fn try_publish(&mut self, record: &QuoteRecord) -> bool {
            if self.accept {
                self.published.push(*record);
            }
            self.accept
        }
    }

    fn pipeline(accept: bool) -> IngestPipeline<CountingSink> {
        let config = PipelineConfig {
            pool_capacity: 64,
            warmup_packets: 100,
            ..PipelineConfig::default()
        };
        let sink = CountingSink {
            accept,
            ..CountingSink::default()
        };
        IngestPipeline::with_time_base(config, TimeBase::from_ratio(1.0).unwrap(), sink).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.pool_capacity, 1024);
        assert_eq!(config.warmup_packets, 1000);
        assert_eq!(config.udp_port, 12345);
        assert_eq!(config.channel, "gateway");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            pool_capacity: 1000,
            ..PipelineConfig::default()
        };
        let result = IngestPipeline::with_time_base(
            config,
            TimeBase::from_ratio(1.0).unwrap(),
            CountingSink::default(),
        );
        assert!(matches!(
            result,
            Err(PipelineError::Pool(PoolError::InvalidCapacity { capacity: 1000 }))
        ));
    }

    #[test]
    fn test_sequence_increments_per_packet() {
        let mut p = pipeline(true);
        let bytes = QuotePacket::new("IBM", 1, 1, 2, 1).to_bytes();

        p.process_payload(&bytes, 1);
        p.process_payload(&[0u8; 4], 2);
        p.process_payload(&bytes, 3);

        assert_eq!(p.next_sequence(), 3);
        let seqs: Vec<u32> = p.sink().published.iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![0, 2]);
    }

    #[test]
    fn test_warm_up_is_invisible() {
        let mut p = pipeline(true);
        assert_eq!(p.warm_up(), 100);

        assert_eq!(p.next_sequence(), 0);
        assert!(p.sink().published.is_empty());
        assert_eq!(p.stats().packets_received(), 0);
        assert_eq!(p.pool().cursor(), 100);

        let slot = p.pool().get(0).unwrap();
        assert!(slot.is_synthetic());
        assert!(slot.has_extended_timing());
        assert_eq!(slot.symbol(), "WARMUP");
        assert!((slot.spread - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_stats_disabled() {
        let config = PipelineConfig {
            pool_capacity: 64,
            enable_stats: false,
            ..PipelineConfig::default()
        };
        let mut p = IngestPipeline::with_time_base(
            config,
            TimeBase::from_ratio(1.0).unwrap(),
            CountingSink { accept: true, ..CountingSink::default() },
        )
        .unwrap();

        let bytes = QuotePacket::new("IBM", 1, 1, 2, 1).to_bytes();
        assert_eq!(p.process_payload(&bytes, 0), PacketOutcome::Published);
        assert_eq!(p.stats().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_summary_reports_pool_and_clock() {
        let mut p = pipeline(true);
        let bytes = QuotePacket::new("IBM", 1, 1, 2, 1).to_bytes();
        for _ in 0..70 {
            p.process_payload(&bytes, 0);
        }

        let summary = p.summary();
        assert_eq!(summary.stats.packets_processed, 70);
        assert_eq!(summary.pool_head, 6);
        assert_eq!(summary.pool_capacity, 64);
        assert!((summary.tsc_ghz - 1.0).abs() < 1e-12);
        assert_eq!(summary.huge_pages, p.pool().is_using_huge_pages());
        p.log_summary();
    }

    #[test]
    fn test_replay_source_bursts() {
        let payloads: Vec<Vec<u8>> = (0..70).map(|i| vec![i as u8]).collect();
        let mut source = ReplaySource::new(payloads);

        let mut sizes = Vec::new();
        while !source.is_exhausted() {
            source.poll_burst(|burst| sizes.push(burst.len()));
        }
        assert_eq!(sizes, vec![32, 32, 6]);
        assert_eq!(source.poll_burst(|_| panic!("drained source")), 0);
    }

    #[test]
    fn test_replay_source_looping() {
        let payloads: Vec<Vec<u8>> = (0..3).map(|i| vec![i as u8]).collect();
        let mut source = ReplaySource::new(payloads).looping().with_burst_size(2);

        let mut seen = Vec::new();
        for _ in 0..3 {
            source.poll_burst(|burst| seen.extend(burst.iter().map(|p| p[0])));
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1]);
        assert!(!source.is_exhausted());
    }

    #[test]
    fn test_array_queue_sink() {
        let mut queue = Arc::new(ArrayQueue::<QuoteRecord>::new(1));
        let rec = QuoteRecord::default();
        assert!(queue.try_publish(&rec));
        assert!(!queue.try_publish(&rec));
        assert_eq!(queue.len(), 1);
    }
}
