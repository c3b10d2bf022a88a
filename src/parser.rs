use std::sync::Arc;

use memchr::memchr;

use crate::arena::{Arena, DEFAULT_BLOCK_SIZE};
use crate::metrics::PipelineMetrics;
use crate::searcher::Searcher;
use crate::slices::{FieldSlice, SliceBatch, SliceRow};

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Options for CSV parsing.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub quote: u8,
    pub has_header: bool,
    pub batch_size: usize,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            has_header: false,
            batch_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// At the first byte of a fresh field.
    FieldStart,
    /// Inside an unquoted field.
    Unquoted,
    /// Inside a quoted field, past the opening quote.
    Quoted,
    /// One byte past a quote seen inside a quoted field; classifies what
    /// follows (doubled quote, end of field, or trailing text).
    Quote,
}

/// The field currently being assembled in the arena, when its bytes had to
/// be written in more than one part (quoted content around doubled quotes,
/// or content carried over a feed boundary). All parts of one field land
/// contiguously, so `(offset, len)` describes the whole field.
#[derive(Debug, Default, Clone, Copy)]
struct OpenField {
    open: bool,
    offset: usize,
    len: usize,
}

#[inline(always)]
fn byte_at(seg1: &[u8], seg2: &[u8], pos: usize) -> u8 {
    if pos < seg1.len() {
        seg1[pos]
    } else {
        seg2[pos - seg1.len()]
    }
}

/// CSV state machine over byte chunks, emitting field slices into a
/// per-batch arena.
///
/// Feeds never block and never fail; the parser owns the tail of input that
/// did not complete a row (or that arrived after a batch filled up) and
/// prepends it to the next feed as a virtual first segment. Call
/// [`Self::flush`] once the stream ends, then keep draining batches.
pub struct SliceParser {
    delimiter: u8,
    quote: u8,
    batch_size: usize,
    searcher: Searcher,
    state: State,
    remainder: Vec<u8>,
    spare: Vec<u8>,
    arena: Arena,
    field: OpenField,
    current_row: SliceRow,
    current_batch: Vec<SliceRow>,
    batch_ready: bool,
    skip_next_row: bool,
    skip_lf: bool,
    selected: Option<Vec<usize>>,
    column_index: usize,
}

impl SliceParser {
    pub fn new(options: &CsvOptions) -> Self {
        Self {
            delimiter: options.delimiter,
            quote: options.quote,
            batch_size: options.batch_size.max(1),
            searcher: Searcher::new(options.delimiter),
            state: State::FieldStart,
            remainder: Vec::new(),
            spare: Vec::new(),
            arena: Arena::new(DEFAULT_BLOCK_SIZE),
            field: OpenField::default(),
            current_row: SliceRow::new(),
            current_batch: Vec::new(),
            batch_ready: false,
            skip_next_row: false,
            skip_lf: false,
            selected: None,
            column_index: 0,
        }
    }

    /// When set, the arena mirrors its allocation stats into the metrics.
    pub fn set_metrics(&mut self, metrics: Arc<PipelineMetrics>) {
        self.arena.set_metrics(metrics);
    }

    /// Restricts emission to these 0-based logical column indices;
    /// unselected columns write no arena bytes and produce no slice.
    pub fn set_selected_columns(&mut self, indices: Vec<usize>) {
        self.selected = if indices.is_empty() {
            None
        } else {
            Some(indices)
        };
    }

    /// Discards the next completed row without recording it.
    pub fn skip_one_row(&mut self) {
        self.skip_next_row = true;
    }

    /// True when a completed batch is waiting in [`Self::take_batch`].
    #[inline(always)]
    pub fn has_batch(&self) -> bool {
        self.batch_ready
    }

    /// Bytes carried from the last feed that still need processing. Feed an
    /// empty chunk to resume consuming them after taking a batch.
    #[inline(always)]
    pub fn has_remainder(&self) -> bool {
        !self.remainder.is_empty()
    }

    /// Rows accumulated towards the next batch.
    pub fn pending_rows(&self) -> usize {
        self.current_batch.len()
    }

    /// Takes the completed batch: linearizes the arena into the batch,
    /// moves the rows out and resets the arena for the next batch.
    pub fn take_batch(&mut self) -> SliceBatch {
        self.batch_ready = false;

        let mut batch = SliceBatch::default();
        self.arena.copy_used_to(&mut batch.arena);
        batch.rows = std::mem::take(&mut self.current_batch);
        self.arena.reset();

        batch
    }

    /// Feeds the next chunk. The carried remainder is processed first, as a
    /// virtual segment in front of `chunk`; `chunk` is not retained.
    pub fn feed(&mut self, chunk: &[u8]) {
        let carried = std::mem::replace(&mut self.remainder, std::mem::take(&mut self.spare));

        self.process(&carried, chunk);

        self.recycle(carried);
    }

    /// Call when no more data will be fed. Emits any pending field/row,
    /// except that a row whose terminating quote is missing is discarded
    /// whole. May need to be called again after taking a batch.
    pub fn flush(&mut self) {
        self.skip_lf = false;

        loop {
            let carried = std::mem::replace(&mut self.remainder, std::mem::take(&mut self.spare));

            match self.state {
                State::Quoted | State::Quote => {
                    // Unterminated quote: drop the trailing fragment.
                    self.current_row.clear();
                    self.field = OpenField::default();
                    self.column_index = 0;
                    self.state = State::FieldStart;
                    self.recycle(carried);
                    break;
                }
                State::Unquoted => {
                    self.append_span(&carried, &[], 0, carried.len());
                    self.close_field();
                    self.state = State::FieldStart;
                    self.emit_row();
                    self.recycle(carried);
                    break;
                }
                State::FieldStart => {
                    if carried.is_empty() {
                        if !self.current_row.is_empty() {
                            // A delimiter ended the input: one more empty field.
                            self.close_field();
                            self.emit_row();
                        }
                        self.recycle(carried);
                        break;
                    }

                    // Rows buffered behind a full batch; parse them now.
                    self.process(&carried, &[]);
                    self.recycle(carried);

                    if self.batch_ready {
                        break;
                    }
                }
            }
        }

        if !self.current_batch.is_empty() {
            self.batch_ready = true;
        }
    }

    fn recycle(&mut self, mut carried: Vec<u8>) {
        carried.clear();
        self.spare = carried;
    }

    #[inline(always)]
    fn emits(&self, column: usize) -> bool {
        match &self.selected {
            None => true,
            Some(indices) => indices.contains(&column),
        }
    }

    /// Copies the logical range `[from, to)` of the two segments into the
    /// arena, extending the open field (and opening it on first write).
    fn append_span(&mut self, seg1: &[u8], seg2: &[u8], from: usize, to: usize) {
        if from >= to || !self.emits(self.column_index) {
            return;
        }

        let len1 = seg1.len();
        let mut offset = 0;
        let mut wrote_first = false;

        if from < len1 {
            offset = self.arena.write(&seg1[from..to.min(len1)]);
            wrote_first = true;
        }

        if to > len1 {
            let start = from.max(len1) - len1;
            let part = self.arena.write(&seg2[start..to - len1]);

            if !wrote_first {
                offset = part;
            }
        }

        if !self.field.open {
            self.field.open = true;
            self.field.offset = offset;
        }

        self.field.len += to - from;
    }

    /// A doubled quote collapses to one literal quote byte.
    fn append_literal_quote(&mut self) {
        if !self.emits(self.column_index) {
            return;
        }

        let offset = self.arena.write(&[self.quote]);

        if !self.field.open {
            self.field.open = true;
            self.field.offset = offset;
        }

        self.field.len += 1;
    }

    fn close_field(&mut self) {
        let field = std::mem::take(&mut self.field);
        let column = self.column_index;

        self.column_index += 1;

        if !self.emits(column) {
            return;
        }

        let slice = if field.open {
            FieldSlice {
                offset: field.offset,
                len: field.len,
            }
        } else {
            FieldSlice {
                offset: self.arena.used(),
                len: 0,
            }
        };

        self.current_row.push(slice);
    }

    fn emit_row(&mut self) {
        self.column_index = 0;

        if self.skip_next_row {
            self.skip_next_row = false;
            self.current_row.clear();
            return;
        }

        self.current_batch.push(std::mem::take(&mut self.current_row));

        if self.current_batch.len() >= self.batch_size {
            self.batch_ready = true;
        }
    }

    /// Consumes the LF of a CRLF pair, arming a one-shot skip when the CR
    /// was the last byte available so the pair can straddle a feed boundary.
    fn consume_lf(&mut self, seg1: &[u8], seg2: &[u8], terminator: u8, pos: usize) -> usize {
        if terminator != CR {
            return pos;
        }

        if pos < seg1.len() + seg2.len() {
            if byte_at(seg1, seg2, pos) == LF {
                return pos + 1;
            }
        } else {
            self.skip_lf = true;
        }

        pos
    }

    fn find_separator_from(&self, seg1: &[u8], seg2: &[u8], pos: usize) -> Option<usize> {
        let len1 = seg1.len();

        if pos < len1 {
            if let Some(offset) = self.searcher.find_separator(&seg1[pos..]) {
                return Some(pos + offset);
            }

            return self
                .searcher
                .find_separator(seg2)
                .map(|offset| len1 + offset);
        }

        self.searcher
            .find_separator(&seg2[pos - len1..])
            .map(|offset| pos + offset)
    }

    fn find_quote_from(&self, seg1: &[u8], seg2: &[u8], pos: usize) -> Option<usize> {
        let len1 = seg1.len();

        if pos < len1 {
            if let Some(offset) = memchr(self.quote, &seg1[pos..]) {
                return Some(pos + offset);
            }

            return memchr(self.quote, seg2).map(|offset| len1 + offset);
        }

        memchr(self.quote, &seg2[pos - len1..]).map(|offset| pos + offset)
    }

    /// Carries the logical range `[from, ..)` into the remainder.
    fn stash(&mut self, seg1: &[u8], seg2: &[u8], from: usize) {
        self.remainder.clear();

        let len1 = seg1.len();

        if from < len1 {
            self.remainder.extend_from_slice(&seg1[from..]);
            self.remainder.extend_from_slice(seg2);
        } else if from - len1 < seg2.len() {
            self.remainder.extend_from_slice(&seg2[from - len1..]);
        }
    }

    fn process(&mut self, seg1: &[u8], seg2: &[u8]) {
        let total = seg1.len() + seg2.len();

        if total == 0 {
            return;
        }

        let mut pos = 0;
        let mut field_start = 0;

        if self.skip_lf {
            self.skip_lf = false;

            if byte_at(seg1, seg2, 0) == LF {
                pos = 1;
            }
        }

        loop {
            match self.state {
                State::FieldStart => {
                    if pos >= total {
                        return;
                    }

                    let byte = byte_at(seg1, seg2, pos);

                    if byte == self.quote {
                        pos += 1;
                        field_start = pos;
                        self.state = State::Quoted;
                    } else if byte == self.delimiter {
                        self.close_field();
                        pos += 1;
                    } else if byte == CR || byte == LF {
                        self.close_field();
                        pos += 1;
                        pos = self.consume_lf(seg1, seg2, byte, pos);
                        self.emit_row();

                        if self.batch_ready {
                            self.stash(seg1, seg2, pos);
                            return;
                        }
                    } else {
                        field_start = pos;
                        self.state = State::Unquoted;
                    }
                }

                State::Unquoted => {
                    let found = self.find_separator_from(seg1, seg2, pos);

                    let at = match found {
                        Some(at) => at,
                        None => {
                            self.stash(seg1, seg2, field_start);
                            return;
                        }
                    };

                    let byte = byte_at(seg1, seg2, at);

                    self.append_span(seg1, seg2, field_start, at);
                    self.close_field();
                    self.state = State::FieldStart;
                    pos = at + 1;

                    if byte != self.delimiter {
                        pos = self.consume_lf(seg1, seg2, byte, pos);
                        self.emit_row();

                        if self.batch_ready {
                            self.stash(seg1, seg2, pos);
                            return;
                        }
                    }
                }

                State::Quoted => {
                    let found = self.find_quote_from(seg1, seg2, pos);

                    let at = match found {
                        Some(at) => at,
                        None => {
                            self.stash(seg1, seg2, field_start);
                            return;
                        }
                    };

                    self.append_span(seg1, seg2, field_start, at);
                    pos = at + 1;
                    self.state = State::Quote;
                }

                State::Quote => {
                    if pos >= total {
                        // Everything up to the quote is already in the arena.
                        return;
                    }

                    let byte = byte_at(seg1, seg2, pos);

                    if byte == self.quote {
                        self.append_literal_quote();
                        pos += 1;
                        field_start = pos;
                        self.state = State::Quoted;
                    } else if byte == self.delimiter {
                        self.close_field();
                        pos += 1;
                        self.state = State::FieldStart;
                    } else if byte == CR || byte == LF {
                        self.close_field();
                        pos += 1;
                        pos = self.consume_lf(seg1, seg2, byte, pos);
                        self.state = State::FieldStart;
                        self.emit_row();

                        if self.batch_ready {
                            self.stash(seg1, seg2, pos);
                            return;
                        }
                    } else {
                        // Text after a closing quote joins the current field.
                        field_start = pos;
                        self.state = State::Unquoted;
                    }
                }
            }
        }
    }
}
