//! Streaming ingestion of delimited text into bounded batches.
//!
//! A producer thread reads a file in chunks, runs a byte-level CSV state
//! machine that stages field bytes in a per-batch arena, materializes row
//! or typed columnar batches, and hands them to the consumer over a bounded
//! queue. Scan-heavy inner loops use SIMD kernels picked at runtime.

mod arena;
mod builder;
mod channel;
mod columnar;
mod debug;
mod error;
mod metrics;
mod parser;
mod pipeline;
mod reader;
mod searcher;
mod slices;
mod values;

pub use arena::Arena;
pub use builder::{build_columnar_batch, build_row_batch, slice_row_to_strings, Batch, Row};
pub use channel::BoundedChannel;
pub use columnar::{
    ColumnData, ColumnType, ColumnarBatch, ColumnarColumn, ColumnarOptions, TypedFallback,
};
pub use error::{Error, Result};
pub use metrics::{profile_enabled, MetricsSnapshot, PipelineMetrics};
pub use parser::{CsvOptions, SliceParser};
pub use pipeline::{
    BatchStream, ColumnarBatchStream, ColumnarStreamBuilder, RowBatchStream, RowStreamBuilder,
    StreamMessage,
};
pub use reader::{FileReader, ReaderOptions};
pub use searcher::Searcher;
pub use slices::{FieldSlice, SliceBatch, SliceRow};
