use std::fmt;

use crate::debug;

/// One cell's bytes: an `(offset, len)` range into the owning batch's arena
/// buffer. `len` may be zero for empty fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldSlice {
    pub offset: usize,
    pub len: usize,
}

/// One row as an ordered sequence of field slices into the same arena.
pub type SliceRow = Vec<FieldSlice>;

/// A batch of rows backed by an owned, linearized arena buffer.
///
/// Self-contained: the parser copies its arena out when the batch is taken,
/// so every slice stays valid for exactly this batch's lifetime.
#[derive(Default)]
pub struct SliceBatch {
    pub arena: Vec<u8>,
    pub rows: Vec<SliceRow>,
}

impl SliceBatch {
    #[inline(always)]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The bytes of one slice. Out-of-range slices clamp to the arena end,
    /// so a malformed slice reads as empty rather than panicking.
    #[inline]
    pub fn field(&self, slice: FieldSlice) -> &[u8] {
        if slice.offset >= self.arena.len() || slice.len == 0 {
            return b"";
        }

        let end = (slice.offset + slice.len).min(self.arena.len());

        &self.arena[slice.offset..end]
    }

    /// The bytes of the cell at `(row, column)`, if both are in range.
    #[inline]
    pub fn cell(&self, row: usize, column: usize) -> Option<&[u8]> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(|&slice| self.field(slice))
    }
}

impl fmt::Debug for SliceBatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SliceBatch(")?;
        f.debug_list()
            .entries(self.rows.iter().map(|row| {
                row.iter()
                    .map(|&slice| debug::Bytes(self.field(slice).to_vec()))
                    .collect::<Vec<_>>()
            }))
            .finish()?;
        write!(f, ")")
    }
}
