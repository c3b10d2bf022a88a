use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::builder::{build_columnar_batch, build_row_batch, slice_row_to_strings, Batch};
use crate::channel::BoundedChannel;
use crate::columnar::{ColumnType, ColumnarBatch, ColumnarOptions, TypedFallback};
use crate::error::{self, Error};
use crate::metrics::{profile_enabled, MetricsSnapshot, PipelineMetrics};
use crate::parser::{CsvOptions, SliceParser};
use crate::reader::{FileReader, ReaderOptions};

const DEFAULT_QUEUE_CAPACITY: usize = 2;
const MAX_BATCH_SIZE: usize = 10_000_000;

/// One message on the handoff queue. Cancellation is not a message; a
/// cancelled channel simply stops yielding.
pub enum StreamMessage<B> {
    Batch(B),
    Done,
    Error(String),
}

/// Producer-side handles shared by both worker loops.
struct Worker<B> {
    channel: Arc<BoundedChannel<StreamMessage<B>>>,
    stop: Arc<AtomicBool>,
    metrics: Arc<PipelineMetrics>,
    profiled: bool,
}

impl<B> Worker<B> {
    fn fail(&self, message: String) {
        self.channel.push(StreamMessage::Error(message));
    }

    fn read_chunk<'r>(&self, reader: &'r mut FileReader) -> error::Result<&'r [u8]> {
        if !self.profiled {
            return reader.next_chunk();
        }

        let started = Instant::now();
        let chunk = reader.next_chunk();

        self.metrics
            .read_time_ns
            .fetch_add(started.elapsed().as_nanos() as u64, Relaxed);

        chunk
    }

    fn feed(&self, parser: &mut SliceParser, chunk: &[u8]) {
        if !self.profiled {
            parser.feed(chunk);
            return;
        }

        let started = Instant::now();
        parser.feed(chunk);

        self.metrics
            .parse_time_ns
            .fetch_add(started.elapsed().as_nanos() as u64, Relaxed);
    }

    /// Pushes a finished batch; false means the consumer cancelled.
    fn push_batch(&self, batch: B) -> bool {
        let started = self.profiled.then(Instant::now);
        let pushed = self.channel.push(StreamMessage::Batch(batch));

        if let Some(started) = started {
            let waited = started.elapsed().as_nanos() as u64;
            self.metrics.queue_wait_ns.fetch_add(waited, Relaxed);
            self.metrics.emit_time_ns.fetch_add(waited, Relaxed);
        }

        if pushed {
            self.metrics.batches_emitted.fetch_add(1, Relaxed);
        }

        pushed
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", message)
    } else {
        "worker panicked".to_string()
    }
}

// --- Row mode ---

fn deliver_row_batch(parser: &mut SliceParser, worker: &Worker<Batch>) -> bool {
    let slice_batch = parser.take_batch();

    if worker.profiled {
        worker.metrics.batch_allocations.fetch_add(1, Relaxed);
    }

    let started = worker.profiled.then(Instant::now);
    let batch = build_row_batch(&slice_batch);

    if let Some(started) = started {
        worker
            .metrics
            .build_time_ns
            .fetch_add(started.elapsed().as_nanos() as u64, Relaxed);
    }

    worker
        .metrics
        .rows_parsed
        .fetch_add(batch.len() as u64, Relaxed);

    worker.push_batch(batch)
}

/// Emits every batch the fed input completed, re-feeding the carried
/// remainder so the parser never sits on more than a partial row. This is
/// what keeps producer memory bounded even for tiny batch sizes.
fn drain_row_batches(parser: &mut SliceParser, worker: &Worker<Batch>) -> bool {
    loop {
        while parser.has_batch() {
            if !deliver_row_batch(parser, worker) {
                return false;
            }
        }

        if !parser.has_remainder() {
            return true;
        }

        parser.feed(&[]);

        if !parser.has_batch() {
            return true;
        }
    }
}

fn run_row_worker(
    path: &Path,
    options: &CsvOptions,
    reader_options: &ReaderOptions,
    worker: &Worker<Batch>,
) {
    let mut reader = match FileReader::open(path, reader_options) {
        Ok(reader) => reader,
        Err(err) => return worker.fail(err.to_string()),
    };

    let mut parser = SliceParser::new(options);

    if worker.profiled {
        parser.set_metrics(Arc::clone(&worker.metrics));
    }

    if options.has_header {
        parser.skip_one_row();
    }

    loop {
        if worker.stop.load(Relaxed) {
            return;
        }

        let read = match worker.read_chunk(&mut reader) {
            Ok(chunk) => {
                let len = chunk.len();
                worker.feed(&mut parser, chunk);
                len
            }
            Err(err) => return worker.fail(err.to_string()),
        };

        if !drain_row_batches(&mut parser, worker) {
            return;
        }

        worker.metrics.bytes_read.fetch_add(read as u64, Relaxed);

        if read == 0 {
            break;
        }
    }

    parser.flush();

    while parser.has_batch() {
        if !deliver_row_batch(&mut parser, worker) {
            return;
        }

        parser.flush();
    }

    worker.channel.push(StreamMessage::Done);
}

// --- Columnar mode ---

struct ColumnarDriver<'a> {
    options: &'a ColumnarOptions,
    worker: &'a Worker<ColumnarBatch>,
    headers: Vec<String>,
    selected_headers: Vec<String>,
    headers_set: bool,
    projection_active: bool,
}

impl<'a> ColumnarDriver<'a> {
    fn new(options: &'a ColumnarOptions, worker: &'a Worker<ColumnarBatch>) -> Self {
        Self {
            options,
            worker,
            headers: Vec::new(),
            selected_headers: Vec::new(),
            headers_set: false,
            projection_active: false,
        }
    }

    /// Maps `select` names onto logical column indices (header order) and
    /// turns parser projection on for everything parsed afterwards.
    fn apply_selection(&mut self, parser: &mut SliceParser) {
        if self.options.select.is_empty() {
            return;
        }

        let mut indices = Vec::new();
        let mut names = Vec::new();

        for (index, header) in self.headers.iter().enumerate() {
            if self.options.select.contains(header) {
                indices.push(index);
                names.push(header.clone());
            }
        }

        if indices.is_empty() {
            return;
        }

        self.selected_headers = names;
        self.projection_active = true;
        parser.set_selected_columns(indices);
    }

    fn output_headers(&self) -> &[String] {
        if self.selected_headers.is_empty() {
            &self.headers
        } else {
            &self.selected_headers
        }
    }

    fn push(&self, batch: ColumnarBatch) -> bool {
        self.worker
            .metrics
            .rows_parsed
            .fetch_add(batch.rows as u64, Relaxed);

        self.worker.push_batch(batch)
    }

    fn handle_batch(&mut self, parser: &mut SliceParser) -> bool {
        let mut slice_batch = parser.take_batch();

        if self.worker.profiled {
            self.worker.metrics.batch_allocations.fetch_add(1, Relaxed);
        }

        // Whether this batch's rows were parsed under projection; selection
        // applied while handling it only affects later batches.
        let was_projected = self.projection_active;

        if !self.headers_set {
            if slice_batch.rows.is_empty() {
                return true;
            }

            if self.options.has_header {
                self.headers = slice_row_to_strings(&slice_batch.rows[0], &slice_batch);
                self.headers_set = true;
                slice_batch.rows.remove(0);
                self.apply_selection(parser);

                if slice_batch.rows.is_empty() {
                    // Nothing but the header row yet; consumers still get
                    // the headers before any data.
                    return self.push(ColumnarBatch {
                        headers: self.output_headers().to_vec(),
                        columns: HashMap::new(),
                        rows: 0,
                    });
                }
            } else {
                let width = slice_batch.rows[0].len();
                self.headers = (1..=width).map(|i| format!("Column{}", i)).collect();
                self.headers_set = true;
                self.apply_selection(parser);
            }
        }

        let started = self.worker.profiled.then(Instant::now);

        let layout = if was_projected {
            &self.selected_headers
        } else {
            &self.headers
        };

        let batch = build_columnar_batch(&slice_batch, layout, self.options);

        if let Some(started) = started {
            self.worker
                .metrics
                .build_time_ns
                .fetch_add(started.elapsed().as_nanos() as u64, Relaxed);
        }

        self.push(batch)
    }

    fn drain(&mut self, parser: &mut SliceParser) -> bool {
        loop {
            while parser.has_batch() {
                if !self.handle_batch(parser) {
                    return false;
                }
            }

            if !parser.has_remainder() {
                return true;
            }

            parser.feed(&[]);

            if !parser.has_batch() {
                return true;
            }
        }
    }
}

fn run_columnar_worker(
    path: &Path,
    options: &ColumnarOptions,
    reader_options: &ReaderOptions,
    worker: &Worker<ColumnarBatch>,
) {
    let mut reader = match FileReader::open(path, reader_options) {
        Ok(reader) => reader,
        Err(err) => return worker.fail(err.to_string()),
    };

    // The header row, when present, is consumed by this driver, not the
    // parser, so the parser always runs headerless.
    let csv = CsvOptions {
        delimiter: options.delimiter,
        quote: options.quote,
        has_header: false,
        batch_size: options.batch_size,
    };

    let mut parser = SliceParser::new(&csv);

    if worker.profiled {
        parser.set_metrics(Arc::clone(&worker.metrics));
    }

    let mut driver = ColumnarDriver::new(options, worker);

    if !options.has_header && !options.schema.is_empty() {
        driver.headers = options
            .schema
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        driver.headers_set = true;
        driver.apply_selection(&mut parser);
    }

    loop {
        if worker.stop.load(Relaxed) {
            return;
        }

        let read = match worker.read_chunk(&mut reader) {
            Ok(chunk) => {
                let len = chunk.len();
                worker.feed(&mut parser, chunk);
                len
            }
            Err(err) => return worker.fail(err.to_string()),
        };

        if !driver.drain(&mut parser) {
            return;
        }

        worker.metrics.bytes_read.fetch_add(read as u64, Relaxed);

        if read == 0 {
            break;
        }
    }

    parser.flush();

    while parser.has_batch() {
        if !driver.handle_batch(&mut parser) {
            return;
        }

        parser.flush();
    }

    if !driver.headers_set && options.has_header {
        return worker.fail(Error::invalid_headers().to_string());
    }

    worker.channel.push(StreamMessage::Done);
}

// --- Consumer surface ---

/// Lazy, single-shot sequence of batches produced by a worker thread.
///
/// Iteration yields batches until the stream completes or fails; at most
/// one error is ever yielded, and nothing follows it. Dropping the stream
/// cancels the worker and joins it.
pub struct BatchStream<B> {
    channel: Arc<BoundedChannel<StreamMessage<B>>>,
    stop: Arc<AtomicBool>,
    metrics: Arc<PipelineMetrics>,
    handle: Option<JoinHandle<()>>,
    finished: bool,
}

/// Stream of row-form batches.
pub type RowBatchStream = BatchStream<Batch>;

/// Stream of columnar batches.
pub type ColumnarBatchStream = BatchStream<ColumnarBatch>;

impl<B> BatchStream<B> {
    /// Cooperative cancellation: the producer observes it on its next push
    /// and abandons any in-flight batch.
    pub fn stop(&self) {
        self.stop.store(true, Relaxed);
        self.channel.cancel();
    }

    /// Snapshot of the pipeline counters at this instant.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl<B> Iterator for BatchStream<B> {
    type Item = error::Result<B>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.channel.pop() {
            Some(StreamMessage::Batch(batch)) => Some(Ok(batch)),
            Some(StreamMessage::Error(message)) => {
                self.finished = true;
                Some(Err(Error::stream(message)))
            }
            Some(StreamMessage::Done) | None => {
                self.finished = true;
                None
            }
        }
    }
}

impl<B> Drop for BatchStream<B> {
    fn drop(&mut self) {
        self.stop();

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn spawn_stream<B, F>(queue_capacity: usize, run: F) -> BatchStream<B>
where
    B: Send + 'static,
    F: FnOnce(&Worker<B>) + Send + 'static,
{
    let channel = Arc::new(BoundedChannel::new(queue_capacity));
    let stop = Arc::new(AtomicBool::new(false));
    let metrics = Arc::new(PipelineMetrics::default());

    let worker = Worker {
        channel: Arc::clone(&channel),
        stop: Arc::clone(&stop),
        metrics: Arc::clone(&metrics),
        profiled: profile_enabled(),
    };

    let handle = thread::spawn(move || {
        let channel = Arc::clone(&worker.channel);

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| run(&worker))) {
            channel.push(StreamMessage::Error(panic_message(payload)));
        }
    });

    BatchStream {
        channel,
        stop,
        metrics,
        handle: Some(handle),
        finished: false,
    }
}

/// Builds [`RowBatchStream`]s: batches of owned string rows.
#[derive(Debug, Clone)]
pub struct RowStreamBuilder {
    options: CsvOptions,
    reader: ReaderOptions,
    queue_capacity: usize,
}

impl Default for RowStreamBuilder {
    fn default() -> Self {
        Self {
            options: CsvOptions::default(),
            reader: ReaderOptions::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl RowStreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delimiter(&mut self, delimiter: u8) -> &mut Self {
        self.options.delimiter = delimiter;
        self
    }

    pub fn quote(&mut self, quote: u8) -> &mut Self {
        self.options.quote = quote;
        self
    }

    /// When set, the first row is dropped instead of delivered.
    pub fn has_header(&mut self, yes: bool) -> &mut Self {
        self.options.has_header = yes;
        self
    }

    pub fn batch_size(&mut self, batch_size: usize) -> &mut Self {
        self.options.batch_size = batch_size;
        self
    }

    /// Bounded queue capacity between producer and consumer (1..=256).
    pub fn queue_capacity(&mut self, capacity: usize) -> &mut Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn use_mmap(&mut self, yes: bool) -> &mut Self {
        self.reader.use_mmap = yes;
        self
    }

    pub fn read_buffer_size(&mut self, size: usize) -> &mut Self {
        self.reader.buffer_size = size;
        self
    }

    /// Starts the producer thread. Open failures arrive as the stream's
    /// single error item.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> RowBatchStream {
        let path: PathBuf = path.as_ref().to_path_buf();
        let mut options = self.options.clone();
        options.batch_size = options.batch_size.clamp(1, MAX_BATCH_SIZE);
        let reader_options = self.reader.clone();

        spawn_stream(self.queue_capacity, move |worker| {
            run_row_worker(&path, &options, &reader_options, worker)
        })
    }
}

/// Builds [`ColumnarBatchStream`]s: schema-typed column batches.
#[derive(Debug, Clone)]
pub struct ColumnarStreamBuilder {
    options: ColumnarOptions,
    reader: ReaderOptions,
    queue_capacity: usize,
}

impl Default for ColumnarStreamBuilder {
    fn default() -> Self {
        Self {
            options: ColumnarOptions::default(),
            reader: ReaderOptions::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ColumnarStreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delimiter(&mut self, delimiter: u8) -> &mut Self {
        self.options.delimiter = delimiter;
        self
    }

    pub fn quote(&mut self, quote: u8) -> &mut Self {
        self.options.quote = quote;
        self
    }

    /// When set (the default), the first row names the columns.
    pub fn has_header(&mut self, yes: bool) -> &mut Self {
        self.options.has_header = yes;
        self
    }

    pub fn batch_size(&mut self, batch_size: usize) -> &mut Self {
        self.options.batch_size = batch_size;
        self
    }

    /// Restricts output to these columns; the parser then skips everything
    /// else at the byte level.
    pub fn select<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.select = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Declares a column's type; order matters when `has_header` is false.
    pub fn column<S: Into<String>>(&mut self, name: S, column_type: ColumnType) -> &mut Self {
        self.options.schema.push((name.into(), column_type));
        self
    }

    pub fn null_values<I, S>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.null_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn trim(&mut self, yes: bool) -> &mut Self {
        self.options.trim = yes;
        self
    }

    pub fn typed_fallback(&mut self, fallback: TypedFallback) -> &mut Self {
        self.options.typed_fallback = fallback;
        self
    }

    pub fn queue_capacity(&mut self, capacity: usize) -> &mut Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn use_mmap(&mut self, yes: bool) -> &mut Self {
        self.reader.use_mmap = yes;
        self
    }

    pub fn read_buffer_size(&mut self, size: usize) -> &mut Self {
        self.reader.buffer_size = size;
        self
    }

    /// Starts the producer thread. Open failures arrive as the stream's
    /// single error item.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> ColumnarBatchStream {
        let path: PathBuf = path.as_ref().to_path_buf();
        let mut options = self.options.clone();
        options.batch_size = options.batch_size.clamp(1, MAX_BATCH_SIZE);
        let reader_options = self.reader.clone();

        spawn_stream(self.queue_capacity, move |worker| {
            run_columnar_worker(&path, &options, &reader_options, worker)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use tempfile::NamedTempFile;

    fn write_temp(contents: &[u8]) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(contents).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    #[test]
    fn test_row_stream() {
        let tmp = write_temp(b"a,b,c\n1,2,3\n4,5,6\n");

        let stream = RowStreamBuilder::new().open(tmp.path());
        let batches: Vec<_> = stream.map(|batch| batch.unwrap()).collect();

        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0],
            vec![
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                vec!["1".to_string(), "2".to_string(), "3".to_string()],
                vec!["4".to_string(), "5".to_string(), "6".to_string()],
            ]
        );
    }

    #[test]
    fn test_row_stream_header_skip() {
        let tmp = write_temp(b"x,y\n1,2\n3,4\n");

        let stream = RowStreamBuilder::new().has_header(true).open(tmp.path());
        let rows: Vec<_> = stream.flat_map(|batch| batch.unwrap()).collect();

        assert_eq!(rows, vec![vec!["1", "2"], vec!["3", "4"]]);
    }

    #[test]
    fn test_open_error_is_single_error_item() {
        let mut stream = RowStreamBuilder::new().open("/no/such/file.csv");

        let first = stream.next().unwrap();
        let message = first.err().unwrap().to_string();
        assert!(message.contains("/no/such/file.csv"));

        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_early_stop_joins_producer() {
        let mut body = String::from("a,b\n");
        for i in 0..50_000 {
            body.push_str(&format!("{},{}\n", i, i * 2));
        }

        let tmp = write_temp(body.as_bytes());

        let mut stream = RowStreamBuilder::new()
            .batch_size(100)
            .queue_capacity(1)
            .open(tmp.path());

        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.len(), 100);

        stream.stop();

        // At most one more batch can still come through.
        let mut extra = 0;
        for batch in stream.by_ref() {
            batch.unwrap();
            extra += 1;
        }

        assert!(extra <= 1);
    }

    #[test]
    fn test_worker_drop_cancels() {
        let tmp = write_temp(b"a\nb\nc\nd\ne\nf\n");

        let mut stream = RowStreamBuilder::new()
            .batch_size(1)
            .queue_capacity(1)
            .open(tmp.path());

        let _ = stream.next();
        // Dropping joins the worker without hanging.
        drop(stream);
    }

    #[test]
    fn test_metrics_counts() {
        let body = b"a,b\n1,2\n3,4\n5,6\n";
        let tmp = write_temp(body);

        let stream = RowStreamBuilder::new().batch_size(2).open(tmp.path());
        let metrics = stream.metrics.clone();
        let total_rows: usize = stream.map(|batch| batch.unwrap().len()).sum();

        assert_eq!(total_rows, 4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rows_parsed, 4);
        assert_eq!(snapshot.batches_emitted, 2);
        assert_eq!(snapshot.bytes_read, body.len() as u64);
    }
}
