use std::collections::HashMap;

use crate::columnar::{ColumnData, ColumnarBatch, ColumnarColumn, ColumnarOptions, ColumnType};
use crate::slices::{SliceBatch, SliceRow};
use crate::values;

/// Single row: owned field strings.
pub type Row = Vec<String>;

/// Batch of rows for streaming.
pub type Batch = Vec<Row>;

/// Materializes one slice row as owned strings (used for data rows in row
/// mode and for the header row in columnar mode).
pub fn slice_row_to_strings(row: &SliceRow, batch: &SliceBatch) -> Row {
    row.iter()
        .map(|&slice| String::from_utf8_lossy(batch.field(slice)).into_owned())
        .collect()
}

/// Builds a row-form batch; row count and per-row field counts are
/// preserved exactly as the parser emitted them.
pub fn build_row_batch(slice_batch: &SliceBatch) -> Batch {
    slice_batch
        .rows
        .iter()
        .map(|row| slice_row_to_strings(row, slice_batch))
        .collect()
}

/// Builds a columnar batch from arena slices.
///
/// `headers` describes the logical layout of the rows (one name per emitted
/// column, in order); `options.select`, when non-empty, narrows the output
/// to those names, keeping header order. Cells of short rows read as empty.
pub fn build_columnar_batch(
    slice_batch: &SliceBatch,
    headers: &[String],
    options: &ColumnarOptions,
) -> ColumnarBatch {
    let rows = slice_batch.row_count();

    let mut out = ColumnarBatch {
        headers: Vec::new(),
        columns: HashMap::new(),
        rows,
    };

    for (column_index, header) in headers.iter().enumerate() {
        if !options.select.is_empty() && !options.select.contains(header) {
            continue;
        }

        let column = build_column(
            slice_batch,
            column_index,
            options.column_type(header),
            options,
        );

        out.headers.push(header.clone());
        out.columns.insert(header.clone(), column);
    }

    out
}

fn cell_bytes<'a>(
    slice_batch: &'a SliceBatch,
    row: usize,
    column: usize,
    trim: bool,
) -> &'a [u8] {
    let raw = slice_batch.cell(row, column).unwrap_or(b"");

    if trim {
        values::trim_ascii(raw)
    } else {
        raw
    }
}

fn build_column(
    slice_batch: &SliceBatch,
    column_index: usize,
    column_type: ColumnType,
    options: &ColumnarOptions,
) -> ColumnarColumn {
    let rows = slice_batch.row_count();

    if column_type == ColumnType::String {
        let mut data = Vec::with_capacity(rows);

        for row in 0..rows {
            let raw = cell_bytes(slice_batch, row, column_index, options.trim);

            if values::is_null(raw, &options.null_values) {
                data.push(String::new());
            } else {
                data.push(String::from_utf8_lossy(raw).into_owned());
            }
        }

        return ColumnarColumn {
            data: ColumnData::Strings(data),
            null_mask: None,
        };
    }

    let mut null_mask = vec![0u8; rows];

    macro_rules! typed_column {
        ($parse:path, $default:expr, $variant:ident) => {{
            let mut data = vec![$default; rows];

            for row in 0..rows {
                let raw = cell_bytes(slice_batch, row, column_index, options.trim);

                if values::is_null(raw, &options.null_values) {
                    null_mask[row] = 1;
                    continue;
                }

                match $parse(raw) {
                    Some(value) => data[row] = value,
                    // Both fallback policies record the miss in the mask;
                    // the element type never changes.
                    None => null_mask[row] = 1,
                }
            }

            ColumnData::$variant(data)
        }};
    }

    let data = match column_type {
        ColumnType::Int32 => typed_column!(values::parse_int32, 0i32, Int32),
        ColumnType::Int64 => typed_column!(values::parse_int64, 0i64, Int64),
        ColumnType::Float64 => typed_column!(values::parse_float64, 0f64, Float64),
        ColumnType::Bool => {
            let mut data = vec![0u8; rows];

            for row in 0..rows {
                let raw = cell_bytes(slice_batch, row, column_index, options.trim);

                if values::is_null(raw, &options.null_values) {
                    null_mask[row] = 1;
                    continue;
                }

                match values::parse_bool(raw) {
                    Some(value) => data[row] = value as u8,
                    None => null_mask[row] = 1,
                }
            }

            ColumnData::Bool(data)
        }
        ColumnType::String => unreachable!("handled above"),
    };

    ColumnarColumn {
        data,
        null_mask: Some(null_mask),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::parser::{CsvOptions, SliceParser};

    fn parse_one_batch(input: &[u8]) -> SliceBatch {
        let mut parser = SliceParser::new(&CsvOptions::default());

        parser.feed(input);
        parser.flush();

        parser.take_batch()
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_build_row_batch() {
        let slice_batch = parse_one_batch(b"a,b\n\"1,5\",2\n");
        let batch = build_row_batch(&slice_batch);

        assert_eq!(
            batch,
            vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["1,5".to_string(), "2".to_string()],
            ]
        );
    }

    #[test]
    fn test_typed_int32_column() {
        let slice_batch = parse_one_batch(b"0\n1\n-999\n2147483647\n-2147483647\n");

        let options = ColumnarOptions {
            schema: vec![("x".to_string(), ColumnType::Int32)],
            ..ColumnarOptions::default()
        };

        let batch = build_columnar_batch(&slice_batch, &headers(&["x"]), &options);

        assert_eq!(batch.rows, 5);
        assert_eq!(batch.headers, headers(&["x"]));

        let column = batch.column("x").unwrap();
        assert_eq!(
            column.data,
            ColumnData::Int32(vec![0, 1, -999, 2147483647, -2147483647])
        );
        assert_eq!(column.null_mask, Some(vec![0, 0, 0, 0, 0]));
    }

    #[test]
    fn test_null_mask() {
        let slice_batch = parse_one_batch(b"1\nnull\n3\n\n5\n");

        let options = ColumnarOptions {
            schema: vec![("x".to_string(), ColumnType::Int32)],
            ..ColumnarOptions::default()
        };

        let batch = build_columnar_batch(&slice_batch, &headers(&["x"]), &options);

        assert_eq!(batch.rows, 5);

        let column = batch.column("x").unwrap();
        assert_eq!(column.data, ColumnData::Int32(vec![1, 0, 3, 0, 5]));
        assert_eq!(column.null_mask, Some(vec![0, 1, 0, 1, 0]));
    }

    #[test]
    fn test_parse_failure_marks_null() {
        let slice_batch = parse_one_batch(b"1\noops\n3\n");

        let options = ColumnarOptions {
            schema: vec![("x".to_string(), ColumnType::Int64)],
            ..ColumnarOptions::default()
        };

        let batch = build_columnar_batch(&slice_batch, &headers(&["x"]), &options);

        let column = batch.column("x").unwrap();
        assert_eq!(column.data, ColumnData::Int64(vec![1, 0, 3]));
        assert_eq!(column.null_mask, Some(vec![0, 1, 0]));
    }

    #[test]
    fn test_string_column_nulls_become_empty() {
        let slice_batch = parse_one_batch(b"keep\nnull\n\nlast\n");

        let options = ColumnarOptions::default();
        let batch = build_columnar_batch(&slice_batch, &headers(&["name"]), &options);

        let column = batch.column("name").unwrap();
        assert_eq!(
            column.data,
            ColumnData::Strings(vec![
                "keep".to_string(),
                String::new(),
                String::new(),
                "last".to_string(),
            ])
        );
        assert!(column.null_mask.is_none());
    }

    #[test]
    fn test_trim_applies_before_null_and_parse() {
        let slice_batch = parse_one_batch(b" 7 \n  \ntrue \n");

        let options = ColumnarOptions {
            trim: true,
            schema: vec![("x".to_string(), ColumnType::Int32)],
            ..ColumnarOptions::default()
        };

        let batch = build_columnar_batch(&slice_batch, &headers(&["x"]), &options);
        let column = batch.column("x").unwrap();

        // " 7 " parses after trimming, "  " trims to a null, "true " fails.
        assert_eq!(column.data, ColumnData::Int32(vec![7, 0, 0]));
        assert_eq!(column.null_mask, Some(vec![0, 1, 1]));
    }

    #[test]
    fn test_bool_and_float_columns() {
        let slice_batch = parse_one_batch(b"true,1.5\n0,-2e2\nFALSE,oops\n");

        let options = ColumnarOptions {
            schema: vec![
                ("flag".to_string(), ColumnType::Bool),
                ("value".to_string(), ColumnType::Float64),
            ],
            ..ColumnarOptions::default()
        };

        let batch = build_columnar_batch(&slice_batch, &headers(&["flag", "value"]), &options);

        let flag = batch.column("flag").unwrap();
        assert_eq!(flag.data, ColumnData::Bool(vec![1, 0, 0]));
        assert_eq!(flag.null_mask, Some(vec![0, 0, 0]));

        let value = batch.column("value").unwrap();
        assert_eq!(value.data, ColumnData::Float64(vec![1.5, -200.0, 0.0]));
        assert_eq!(value.null_mask, Some(vec![0, 0, 1]));
    }

    #[test]
    fn test_select_keeps_header_order() {
        let slice_batch = parse_one_batch(b"1,2,3\n4,5,6\n");

        let options = ColumnarOptions {
            // Select order does not matter; header order wins.
            select: vec!["c".to_string(), "a".to_string()],
            ..ColumnarOptions::default()
        };

        let batch = build_columnar_batch(&slice_batch, &headers(&["a", "b", "c"]), &options);

        assert_eq!(batch.headers, headers(&["a", "c"]));
        assert!(batch.column("b").is_none());

        let a = batch.column("a").unwrap();
        assert_eq!(
            a.data,
            ColumnData::Strings(vec!["1".to_string(), "4".to_string()])
        );

        let c = batch.column("c").unwrap();
        assert_eq!(
            c.data,
            ColumnData::Strings(vec!["3".to_string(), "6".to_string()])
        );
    }

    #[test]
    fn test_short_rows_read_as_empty() {
        let slice_batch = parse_one_batch(b"1,2\n3\n");

        let options = ColumnarOptions {
            schema: vec![("b".to_string(), ColumnType::Int32)],
            ..ColumnarOptions::default()
        };

        let batch = build_columnar_batch(&slice_batch, &headers(&["a", "b"]), &options);

        let b = batch.column("b").unwrap();
        assert_eq!(b.data, ColumnData::Int32(vec![2, 0]));
        assert_eq!(b.null_mask, Some(vec![0, 1]));
    }
}
