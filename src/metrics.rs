use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::OnceLock;

/// Whether per-stage timings and allocation counts should be recorded.
///
/// Controlled by the `TABSTREAM_PROFILE` environment variable, read once per
/// process. Byte and row counters are always maintained; only the nanosecond
/// timers and arena/allocation stats hide behind this flag.
pub fn profile_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();

    *ENABLED.get_or_init(|| {
        std::env::var("TABSTREAM_PROFILE")
            .map(|v| matches!(v.as_bytes().first(), Some(b'1' | b't' | b'T')))
            .unwrap_or(false)
    })
}

/// Counters for the producer-consumer pipeline.
///
/// Written by the producer thread, observed by consumers through
/// [`Self::snapshot`]. All counters are relaxed atomics; no ordering between
/// different counters is implied, and each is monotonic non-decreasing over
/// a single stream's lifetime.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub bytes_read: AtomicU64,
    pub rows_parsed: AtomicU64,
    pub batches_emitted: AtomicU64,
    pub queue_wait_ns: AtomicU64,
    pub parse_time_ns: AtomicU64,

    /// Profiling: time spent reading chunks.
    pub read_time_ns: AtomicU64,
    /// Profiling: time spent materializing batches.
    pub build_time_ns: AtomicU64,
    /// Profiling: time spent pushing to the queue.
    pub emit_time_ns: AtomicU64,
    /// Profiling: slice batches taken from the parser.
    pub batch_allocations: AtomicU64,

    /// Arena stats, mirrored by the parser's arena when profiling.
    pub arena_bytes_allocated: AtomicU64,
    pub arena_blocks: AtomicU64,
    pub arena_resets: AtomicU64,
    pub peak_arena_usage: AtomicU64,
}

impl PipelineMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_read: self.bytes_read.load(Relaxed),
            rows_parsed: self.rows_parsed.load(Relaxed),
            batches_emitted: self.batches_emitted.load(Relaxed),
            queue_wait_ns: self.queue_wait_ns.load(Relaxed),
            parse_time_ns: self.parse_time_ns.load(Relaxed),
            read_time_ns: self.read_time_ns.load(Relaxed),
            build_time_ns: self.build_time_ns.load(Relaxed),
            emit_time_ns: self.emit_time_ns.load(Relaxed),
            batch_allocations: self.batch_allocations.load(Relaxed),
            arena_bytes_allocated: self.arena_bytes_allocated.load(Relaxed),
            arena_blocks: self.arena_blocks.load(Relaxed),
            arena_resets: self.arena_resets.load(Relaxed),
            peak_arena_usage: self.peak_arena_usage.load(Relaxed),
        }
    }
}

/// Plain copy of every pipeline counter at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub bytes_read: u64,
    pub rows_parsed: u64,
    pub batches_emitted: u64,
    pub queue_wait_ns: u64,
    pub parse_time_ns: u64,
    pub read_time_ns: u64,
    pub build_time_ns: u64,
    pub emit_time_ns: u64,
    pub batch_allocations: u64,
    pub arena_bytes_allocated: u64,
    pub arena_blocks: u64,
    pub arena_resets: u64,
    pub peak_arena_usage: u64,
}
