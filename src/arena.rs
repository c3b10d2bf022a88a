use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use crate::metrics::PipelineMetrics;

const MIN_BLOCK_SIZE: usize = 1024 * 1024;
const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// Default block size used by the slice parser.
pub const DEFAULT_BLOCK_SIZE: usize = MIN_BLOCK_SIZE;

#[inline(always)]
fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

struct Block {
    data: Box<[u8]>,
    used: usize,
}

/// Bump allocator over large retained blocks, reset once per batch.
///
/// Stages the field bytes of a single batch; nothing allocated here survives
/// batch emission, callers copy the used bytes out with [`Self::copy_used_to`]
/// when taking a batch.
///
/// Offsets handed out by [`Self::allocate`] and [`Self::write`] are *logical*:
/// they index into the concatenation of every block's `[0..used]` range, which
/// is exactly what `copy_used_to` produces.
pub struct Arena {
    block_size: usize,
    blocks: Vec<Block>,
    logical_used: usize,
    bytes_allocated: u64,
    resets: u64,
    peak_usage: u64,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl Arena {
    /// `block_size` is clamped to [1 MiB, 16 MiB].
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE),
            blocks: Vec::new(),
            logical_used: 0,
            bytes_allocated: 0,
            resets: 0,
            peak_usage: 0,
            metrics: None,
        }
    }

    /// When set, block and peak counters are mirrored into the shared metrics.
    pub fn set_metrics(&mut self, metrics: Arc<PipelineMetrics>) {
        self.metrics = Some(metrics);
    }

    fn add_block(&mut self, capacity: usize) {
        self.blocks.push(Block {
            data: vec![0u8; capacity].into_boxed_slice(),
            used: 0,
        });
        self.bytes_allocated += capacity as u64;

        if let Some(metrics) = &self.metrics {
            metrics
                .arena_bytes_allocated
                .store(self.bytes_allocated, Relaxed);
            metrics.arena_blocks.store(self.blocks.len() as u64, Relaxed);
        }
    }

    fn update_peak_usage(&mut self) {
        if self.logical_used as u64 > self.peak_usage {
            self.peak_usage = self.logical_used as u64;

            if let Some(metrics) = &self.metrics {
                metrics.peak_arena_usage.store(self.peak_usage, Relaxed);
            }
        }
    }

    /// Allocates `size` bytes and returns the logical offset along with the
    /// slice to write into. `alignment` must be a power of two and applies to
    /// the physical placement only; illegal alignments are normalized to 1.
    /// The logical offset always advances by exactly `size`.
    ///
    /// Zero-size allocations return the current logical offset and an empty
    /// slice without advancing anything.
    pub fn allocate(&mut self, size: usize, mut alignment: usize) -> (usize, &mut [u8]) {
        if size == 0 {
            return (self.logical_used, &mut []);
        }

        if alignment == 0 || !alignment.is_power_of_two() {
            alignment = 1;
        }

        let fits = match self.blocks.last() {
            Some(block) => align_up(block.used, alignment) + size <= block.data.len(),
            None => false,
        };

        if !fits {
            // A single allocation may exceed the block size; give it a block
            // of its own so logical offsets keep matching the linearization.
            self.add_block(self.block_size.max(size));
        }

        let offset = self.logical_used;
        self.logical_used += size;
        self.update_peak_usage();

        let last = self.blocks.len() - 1;
        let block = &mut self.blocks[last];
        let start = align_up(block.used, alignment);
        block.used = start + size;

        (offset, &mut block.data[start..start + size])
    }

    /// Allocates and copies `bytes`; returns the logical offset of the copy.
    #[inline]
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let (offset, dst) = self.allocate(bytes.len(), 1);
        dst.copy_from_slice(bytes);
        offset
    }

    /// Total bytes currently used. Logical offsets are in `[0, used())`.
    #[inline(always)]
    pub fn used(&self) -> usize {
        self.logical_used
    }

    /// Linearizes every block's used range, in order, into `out`.
    /// Afterwards `out.len() == self.used()`.
    pub fn copy_used_to(&self, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(self.logical_used);

        for block in &self.blocks {
            out.extend_from_slice(&block.data[..block.used]);
        }
    }

    /// Zeroes every block's bump pointer; blocks themselves are retained.
    pub fn reset(&mut self) {
        for block in &mut self.blocks {
            block.used = 0;
        }

        self.logical_used = 0;
        self.resets += 1;

        if let Some(metrics) = &self.metrics {
            metrics.arena_resets.store(self.resets, Relaxed);
        }
    }

    pub fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn reset_count(&self) -> u64 {
        self.resets
    }

    pub fn peak_usage(&self) -> u64 {
        self.peak_usage
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("block_size", &self.block_size)
            .field("blocks", &self.blocks.len())
            .field("used", &self.logical_used)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_linearize() {
        let mut arena = Arena::new(0);

        assert_eq!(arena.used(), 0);
        assert_eq!(arena.write(b"hello"), 0);
        assert_eq!(arena.write(b", "), 5);
        assert_eq!(arena.write(b"world"), 7);
        assert_eq!(arena.used(), 12);

        let mut out = Vec::new();
        arena.copy_used_to(&mut out);
        assert_eq!(out, b"hello, world");
    }

    #[test]
    fn test_zero_size_allocation() {
        let mut arena = Arena::new(0);

        arena.write(b"abc");

        let (offset, slice) = arena.allocate(0, 8);
        assert_eq!(offset, 3);
        assert!(slice.is_empty());
        assert_eq!(arena.used(), 3);
    }

    #[test]
    fn test_illegal_alignment_normalized() {
        let mut arena = Arena::new(0);

        let (offset, slice) = arena.allocate(4, 3);
        assert_eq!(offset, 0);
        assert_eq!(slice.len(), 4);
        assert_eq!(arena.used(), 4);
    }

    #[test]
    fn test_block_spill_keeps_logical_offsets() {
        let mut arena = Arena::new(MIN_BLOCK_SIZE);

        let first = vec![b'a'; MIN_BLOCK_SIZE - 3];
        let second = b"0123456789";

        assert_eq!(arena.write(&first), 0);
        // Does not fit the tail of block 0; lands at the start of block 1.
        assert_eq!(arena.write(second), first.len());
        assert_eq!(arena.block_count(), 2);
        assert_eq!(arena.used(), first.len() + second.len());

        let mut out = Vec::new();
        arena.copy_used_to(&mut out);
        assert_eq!(out.len(), arena.used());
        assert_eq!(&out[first.len()..], second);
    }

    #[test]
    fn test_oversized_allocation_gets_own_block() {
        let mut arena = Arena::new(MIN_BLOCK_SIZE);

        let big = vec![b'b'; MIN_BLOCK_SIZE + 17];
        assert_eq!(arena.write(b"x"), 0);
        assert_eq!(arena.write(&big), 1);
        assert_eq!(arena.used(), big.len() + 1);

        let mut out = Vec::new();
        arena.copy_used_to(&mut out);
        assert_eq!(&out[..1], b"x");
        assert_eq!(&out[1..], &big[..]);
    }

    #[test]
    fn test_reset_retains_blocks() {
        let mut arena = Arena::new(MIN_BLOCK_SIZE);

        arena.write(&vec![b'a'; MIN_BLOCK_SIZE]);
        arena.write(b"tail");
        assert_eq!(arena.block_count(), 2);
        let allocated = arena.bytes_allocated();

        arena.reset();

        assert_eq!(arena.used(), 0);
        assert_eq!(arena.block_count(), 2);
        assert_eq!(arena.bytes_allocated(), allocated);
        assert_eq!(arena.reset_count(), 1);
        assert_eq!(arena.peak_usage(), (MIN_BLOCK_SIZE + 4) as u64);

        // Reuses block 0 from its start.
        assert_eq!(arena.write(b"again"), 0);
        let mut out = Vec::new();
        arena.copy_used_to(&mut out);
        assert_eq!(out, b"again");
    }
}
