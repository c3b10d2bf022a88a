use std::collections::HashMap;

/// Cell type of a schema column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Int32,
    Int64,
    Float64,
    Bool,
}

/// What to do with a typed cell that fails to parse. Both policies mark the
/// null mask; `String` reserves the option of a parallel string overlay but
/// never changes a column's element type at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedFallback {
    String,
    Null,
}

/// Options for columnar CSV parsing.
///
/// The schema is an ordered sequence on purpose: when `has_header` is false
/// its order defines the output headers.
#[derive(Debug, Clone)]
pub struct ColumnarOptions {
    pub delimiter: u8,
    pub quote: u8,
    pub has_header: bool,
    pub batch_size: usize,
    /// Column names to keep; empty keeps all columns.
    pub select: Vec<String>,
    pub schema: Vec<(String, ColumnType)>,
    pub null_values: Vec<String>,
    pub trim: bool,
    pub typed_fallback: TypedFallback,
}

impl Default for ColumnarOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            has_header: true,
            batch_size: 10_000,
            select: Vec::new(),
            schema: Vec::new(),
            null_values: vec!["".to_string(), "null".to_string(), "NULL".to_string()],
            trim: false,
            typed_fallback: TypedFallback::Null,
        }
    }
}

impl ColumnarOptions {
    /// The declared type of a column, defaulting to `String`.
    pub fn column_type(&self, name: &str) -> ColumnType {
        self.schema
            .iter()
            .find(|(column, _)| column == name)
            .map(|&(_, column_type)| column_type)
            .unwrap_or(ColumnType::String)
    }
}

/// Column-major cell storage. `Bool` packs one byte per value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Strings(Vec<String>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Bool(Vec<u8>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Strings(values) => values.len(),
            ColumnData::Int32(values) => values.len(),
            ColumnData::Int64(values) => values.len(),
            ColumnData::Float64(values) => values.len(),
            ColumnData::Bool(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One output column: typed values plus, for non-string types, a null mask
/// parallel to the row count (1 = null). String columns represent nullness
/// as the empty string instead.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnarColumn {
    pub data: ColumnData,
    pub null_mask: Option<Vec<u8>>,
}

/// A batch in columnar layout. `headers` carries the column order; every
/// column holds exactly `rows` values.
#[derive(Debug, Clone, Default)]
pub struct ColumnarBatch {
    pub headers: Vec<String>,
    pub columns: HashMap<String, ColumnarColumn>,
    pub rows: usize,
}

impl ColumnarBatch {
    pub fn column(&self, name: &str) -> Option<&ColumnarColumn> {
        self.columns.get(name)
    }
}
