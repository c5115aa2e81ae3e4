/// BBO Ingest - Low-latency quote feed core
///
/// Turns raw UDP best-bid/offer payloads into cache-line sized records with
/// bounded latency and hands them to a downstream publisher. Features include:
/// - Fixed 64-byte quote record
/// - Lock-free circular record pool on huge pages (heap fallback)
/// - Zero-allocation big-endian wire decoder
/// - Cycle-counter time base, no syscalls per packet
/// - Single-threaded busy-poll pipeline with drop/error accounting

pub mod record;
pub mod protocol;
pub mod decoder;
pub mod pool;
pub mod timing;
pub mod stats;
pub mod pipeline;

pub use record::{flags, QuoteRecord, CACHE_LINE_SIZE};
pub use protocol::{ExtendedTiming, FieldReader, QuotePacket, PRICE_MULTIPLIER};
pub use decoder::{DecodeError, WireDecoder};
pub use pool::{Backing, PoolError, RecordPool};
pub use timing::{CalibrationError, CycleTimer, TimeBase};
pub use stats::{LatencyStats, LatencyWindow, PipelineStats, PipelineSummary, StatsSnapshot};
pub use pipeline::{
    IngestPipeline, PacketOutcome, PacketSource, PipelineConfig, PipelineError, PublishSink,
    ReplaySource, StopHandle,
};
