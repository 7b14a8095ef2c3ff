// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Conversions between local artifact encodings
//!
//! - dense matrix: HDF5 file with `dim_0` (row labels), `dim_1` (column
//!   labels), and a 2-D numeric `data` array, as the registry serves it
//! - columnar table: Parquet
//! - Feather: Arrow IPC file; matrices keep their row labels as first column
//! - CSV: header row, comma delimited
//!
//! In memory a matrix is one record batch whose first column, `row`, holds
//! the row labels and whose other columns are `Float64`.
//!
//! Every conversion reads one artifact from disk and writes another; nothing
//! here talks to the registry.

use crate::error::Result;
use crate::format::LocalFormat;
use arrow::compute::cast;
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow_array::cast::AsArray;
use arrow_array::types::Float64Type;
use arrow_array::{Array, ArrayRef, Float64Array, RecordBatch, RecordBatchReader, StringArray};
use arrow_csv::reader::Format;
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};
use diagnostics::*;
use hdf5::types::{FixedAscii, FixedUnicode, TypeDescriptor, VarLenAscii, VarLenUnicode};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// HDF5 dataset holding the row labels
pub const ROW_LABELS: &str = "dim_0";
/// HDF5 dataset holding the column labels
pub const COLUMN_LABELS: &str = "dim_1";
/// HDF5 dataset holding the values, one row per row label
pub const VALUES: &str = "data";
/// Name of the label column of an in-memory matrix
pub const ROW_LABEL_COLUMN: &str = "row";

/// Longest fixed-length HDF5 label read
const MAX_LABEL_BYTES: usize = 1024;

/// Rows sampled when checking that a CSV artifact still parses
const CSV_CHECK_RECORDS: usize = 100;

fn csv_format() -> Format {
    Format::default().with_header(true)
}

fn not_a_matrix(reason: String) -> ArrowError {
    ArrowError::InvalidArgumentError(format!("not a dense matrix: {reason}"))
}

/// Infer column types from the whole file, then write it as Parquet
pub fn csv_to_parquet(src: &Path, dest: &Path) -> Result<()> {
    let (schema, _) = csv_format().infer_schema(BufReader::new(File::open(src)?), None)?;
    let schema = Arc::new(schema);

    let reader = arrow_csv::ReaderBuilder::new(schema.clone())
        .with_header(true)
        .build(File::open(src)?)?;

    let mut writer = ArrowWriter::try_new(File::create(dest)?, schema, None)?;
    let mut rows = 0;
    for batch in reader {
        let batch = batch?;
        rows += batch.num_rows();
        writer.write(&batch)?;
    }
    let _ = writer.close()?;

    let src = src.display().to_string();
    info!("converted {src} to parquet ({rows} rows)", src: src.as_str(), rows: rows);
    Ok(())
}

/// Write a Parquet artifact as a CSV table, without row labels
pub fn parquet_to_csv(src: &Path, dest: &Path) -> Result<()> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(src)?)?.build()?;
    let schema = reader.schema();
    let rows = write_csv(schema, reader, dest)?;

    let src = src.display().to_string();
    info!("converted {src} to csv ({rows} rows)", src: src.as_str(), rows: rows);
    Ok(())
}

pub fn parquet_to_feather(src: &Path, dest: &Path) -> Result<()> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(src)?)?.build()?;
    let schema = reader.schema();
    let rows = write_feather(schema, reader, dest)?;

    let src = src.display().to_string();
    info!("converted {src} to feather ({rows} rows)", src: src.as_str(), rows: rows);
    Ok(())
}

/// Write a dense matrix artifact as CSV, row labels first
pub fn matrix_to_csv(src: &Path, dest: &Path) -> Result<()> {
    let batch = read_matrix(src)?;
    let rows = write_csv(batch.schema(), std::iter::once(Ok(batch)), dest)?;

    let src = src.display().to_string();
    info!("converted matrix {src} to csv ({rows} rows)", src: src.as_str(), rows: rows);
    Ok(())
}

/// Write a dense matrix artifact as Feather, row labels first
pub fn matrix_to_feather(src: &Path, dest: &Path) -> Result<()> {
    let batch = read_matrix(src)?;
    let rows = write_feather(batch.schema(), std::iter::once(Ok(batch)), dest)?;

    let src = src.display().to_string();
    info!("converted matrix {src} to feather ({rows} rows)", src: src.as_str(), rows: rows);
    Ok(())
}

fn write_csv<I>(schema: SchemaRef, batches: I, dest: &Path) -> Result<usize>
where
    I: Iterator<Item = std::result::Result<RecordBatch, ArrowError>>,
{
    let mut writer = arrow_csv::WriterBuilder::new()
        .with_header(true)
        .build(File::create(dest)?);

    let mut rows = 0;
    let mut wrote_any = false;
    for batch in batches {
        let batch = batch?;
        rows += batch.num_rows();
        writer.write(&batch)?;
        wrote_any = true;
    }
    if !wrote_any {
        // the header alone still describes the columns
        writer.write(&RecordBatch::new_empty(schema))?;
    }
    Ok(rows)
}

fn write_feather<I>(schema: SchemaRef, batches: I, dest: &Path) -> Result<usize>
where
    I: Iterator<Item = std::result::Result<RecordBatch, ArrowError>>,
{
    let mut writer = FileWriter::try_new(File::create(dest)?, &schema)?;
    let mut rows = 0;
    for batch in batches {
        let batch = batch?;
        rows += batch.num_rows();
        writer.write(&batch)?;
    }
    writer.finish()?;
    Ok(rows)
}

/// Write `batch` as a dense matrix artifact.
///
/// The first column must hold UTF-8 row labels; every other column is cast
/// to `Float64`, with nulls stored as NaN.
pub fn write_matrix(dest: &Path, batch: &RecordBatch) -> Result<()> {
    let schema = batch.schema();
    if !is_matrix_schema(&schema) {
        return Err(not_a_matrix("the first column must hold UTF-8 row labels".to_string()).into());
    }

    let labels = cast(batch.column(0), &DataType::Utf8)?;
    let labels = labels.as_string::<i32>();
    let row_labels = (0..labels.len())
        .map(|i| h5_label(labels.value(i)))
        .collect::<Result<Vec<_>>>()?;
    let column_labels = schema.fields()[1..]
        .iter()
        .map(|f| h5_label(f.name()))
        .collect::<Result<Vec<_>>>()?;

    let columns = batch.columns()[1..]
        .iter()
        .map(|c| cast(c, &DataType::Float64))
        .collect::<std::result::Result<Vec<ArrayRef>, _>>()?;
    let mut values = Vec::with_capacity(batch.num_rows() * columns.len());
    for row in 0..batch.num_rows() {
        for column in &columns {
            let column = column.as_primitive::<Float64Type>();
            values.push(if column.is_null(row) {
                f64::NAN
            } else {
                column.value(row)
            });
        }
    }

    let file = hdf5::File::create(dest)?;
    let _ = file
        .new_dataset_builder()
        .with_data(row_labels.as_slice())
        .create(ROW_LABELS)?;
    let _ = file
        .new_dataset_builder()
        .with_data(column_labels.as_slice())
        .create(COLUMN_LABELS)?;
    let data = file
        .new_dataset::<f64>()
        .shape((row_labels.len(), column_labels.len()))
        .create(VALUES)?;
    data.write_raw(values.as_slice())?;
    Ok(())
}

fn h5_label(label: &str) -> Result<VarLenUnicode> {
    label
        .parse::<VarLenUnicode>()
        .map_err(|e| not_a_matrix(format!("label {label:?}: {e:?}")).into())
}

fn read_labels(file: &hdf5::File, name: &str) -> Result<Vec<String>> {
    let dataset = file.dataset(name)?;
    let labels = match dataset.dtype()?.to_descriptor()? {
        TypeDescriptor::VarLenUnicode => dataset
            .read_raw::<VarLenUnicode>()?
            .iter()
            .map(|l| l.as_str().to_string())
            .collect(),
        TypeDescriptor::VarLenAscii => dataset
            .read_raw::<VarLenAscii>()?
            .iter()
            .map(|l| String::from_utf8_lossy(l.as_bytes()).into_owned())
            .collect(),
        TypeDescriptor::FixedUnicode(size) if size <= MAX_LABEL_BYTES => dataset
            .read_raw::<FixedUnicode<MAX_LABEL_BYTES>>()?
            .iter()
            .map(|l| l.as_str().to_string())
            .collect(),
        // written by h5py from encoded bytes, so usually UTF-8 despite the name
        TypeDescriptor::FixedAscii(size) if size <= MAX_LABEL_BYTES => dataset
            .read_raw::<FixedAscii<MAX_LABEL_BYTES>>()?
            .iter()
            .map(|l| String::from_utf8_lossy(l.as_bytes()).into_owned())
            .collect(),
        other => return Err(not_a_matrix(format!("{name} holds {other:?}")).into()),
    };
    Ok(labels)
}

/// `(rows, columns)` of a dense matrix artifact, checking that the label
/// datasets agree with the shape of `data`
fn matrix_shape(path: &Path) -> Result<(usize, usize)> {
    let file = hdf5::File::open(path)?;
    let rows = file.dataset(ROW_LABELS)?.shape();
    let columns = file.dataset(COLUMN_LABELS)?.shape();
    let data = file.dataset(VALUES)?.shape();
    match (rows.as_slice(), columns.as_slice(), data.as_slice()) {
        ([r], [c], [dr, dc]) if r == dr && c == dc => Ok((*r, *c)),
        _ => Err(not_a_matrix(format!(
            "labels {rows:?} x {columns:?} do not match data {data:?}"
        ))
        .into()),
    }
}

/// Load a dense matrix artifact as one record batch, row labels first
pub fn read_matrix(path: &Path) -> Result<RecordBatch> {
    let (rows, columns) = matrix_shape(path)?;
    let file = hdf5::File::open(path)?;
    let row_labels = read_labels(&file, ROW_LABELS)?;
    let column_labels = read_labels(&file, COLUMN_LABELS)?;
    let values = file.dataset(VALUES)?.read_raw::<f64>()?;
    if values.len() != rows * columns {
        return Err(not_a_matrix(format!("{} values for {rows} x {columns}", values.len())).into());
    }

    let mut fields = vec![Field::new(ROW_LABEL_COLUMN, DataType::Utf8, false)];
    let mut arrays: Vec<ArrayRef> = vec![Arc::new(StringArray::from(row_labels))];
    for (j, name) in column_labels.iter().enumerate() {
        fields.push(Field::new(name, DataType::Float64, true));
        let column: Vec<f64> = values.iter().skip(j).step_by(columns).copied().collect();
        arrays.push(Arc::new(Float64Array::from(column)));
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

/// Read every batch of a Parquet artifact
pub fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
    Ok(reader.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Read every batch of a Feather artifact
pub fn read_feather(path: &Path) -> Result<Vec<RecordBatch>> {
    let reader = FileReader::try_new(File::open(path)?, None)?;
    Ok(reader.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn is_matrix_schema(schema: &Schema) -> bool {
    schema
        .fields()
        .first()
        .is_some_and(|f| matches!(f.data_type(), DataType::Utf8 | DataType::LargeUtf8))
}

/// Whether `path` holds a usable artifact in `format`
///
/// Raw artifacts only need to exist. Every other format must be non-empty
/// and open as its encoding. CSV checks parse the header and the first
/// records only.
pub fn artifact_is_readable(path: &Path, format: LocalFormat) -> bool {
    let meta = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta,
        _ => return false,
    };
    if format == LocalFormat::Raw {
        return true;
    }
    if meta.len() == 0 {
        return false;
    }
    if format == LocalFormat::DenseMatrix {
        return matrix_shape(path).is_ok();
    }
    let Ok(file) = File::open(path) else {
        return false;
    };

    match format {
        LocalFormat::ColumnarTable => ParquetRecordBatchReaderBuilder::try_new(file).is_ok(),
        LocalFormat::CsvTable | LocalFormat::CsvMatrix => csv_format()
            .infer_schema(BufReader::new(file), Some(CSV_CHECK_RECORDS))
            .is_ok(),
        LocalFormat::FeatherMatrix => {
            FileReader::try_new(file, None).is_ok_and(|r| is_matrix_schema(&r.schema()))
        }
        LocalFormat::FeatherTable => FileReader::try_new(file, None).is_ok(),
        LocalFormat::DenseMatrix | LocalFormat::Raw => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::Int64Array;
    use tempfile::tempdir;

    fn sample_matrix() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("row", DataType::Utf8, false),
            Field::new("a", DataType::Float64, true),
            Field::new("b", DataType::Float64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["r1", "r2"])),
                Arc::new(Float64Array::from(vec![1.5, 3.25])),
                Arc::new(Float64Array::from(vec![2.25, -4.5])),
            ],
        )
        .expect("valid batch")
    }

    #[test]
    fn test_csv_to_parquet_keeps_values() -> Result<()> {
        let dir = tempdir()?;
        let csv = dir.path().join("t.csv");
        let parquet = dir.path().join("t.parquet");
        std::fs::write(&csv, "name,count\nalpha,1\nbeta,22\n")?;

        csv_to_parquet(&csv, &parquet)?;
        assert!(artifact_is_readable(&parquet, LocalFormat::ColumnarTable));

        let batches = read_parquet(&parquet)?;
        assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 2);
        let batch = &batches[0];
        let names = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("strings");
        assert_eq!(names.value(1), "beta");
        let counts = batch
            .column(1)
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("inferred as integers");
        assert_eq!(counts.value(1), 22);
        Ok(())
    }

    #[test]
    fn test_parquet_to_csv_round_trips_text() -> Result<()> {
        let dir = tempdir()?;
        let csv = dir.path().join("t.csv");
        let parquet = dir.path().join("t.parquet");
        let back = dir.path().join("back.csv");
        std::fs::write(&csv, "name,count\nalpha,1\nbeta,22\n")?;

        csv_to_parquet(&csv, &parquet)?;
        parquet_to_csv(&parquet, &back)?;
        assert_eq!(std::fs::read_to_string(&back)?, "name,count\nalpha,1\nbeta,22\n");
        Ok(())
    }

    #[test]
    fn test_parquet_to_feather_keeps_schema() -> Result<()> {
        let dir = tempdir()?;
        let csv = dir.path().join("t.csv");
        let parquet = dir.path().join("t.parquet");
        let feather = dir.path().join("t.ftr");
        std::fs::write(&csv, "name,count\nalpha,1\nbeta,22\n")?;

        csv_to_parquet(&csv, &parquet)?;
        parquet_to_feather(&parquet, &feather)?;
        assert!(artifact_is_readable(&feather, LocalFormat::FeatherTable));

        let batches = read_feather(&feather)?;
        assert_eq!(batches[0].schema(), read_parquet(&parquet)?[0].schema());
        assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 2);
        Ok(())
    }

    #[test]
    fn test_matrix_round_trips_through_hdf5() -> Result<()> {
        let dir = tempdir()?;
        let matrix = dir.path().join("m.hdf5");

        write_matrix(&matrix, &sample_matrix())?;
        assert!(std::fs::read(&matrix)?.starts_with(b"\x89HDF\r\n\x1a\n"));
        assert!(artifact_is_readable(&matrix, LocalFormat::DenseMatrix));
        assert_eq!(matrix_shape(&matrix)?, (2, 2));

        assert_eq!(read_matrix(&matrix)?, sample_matrix());
        Ok(())
    }

    #[test]
    fn test_matrix_conversions_keep_row_labels() -> Result<()> {
        let dir = tempdir()?;
        let matrix = dir.path().join("m.hdf5");
        let csv = dir.path().join("m.csv");
        let feather = dir.path().join("m.ftr");
        write_matrix(&matrix, &sample_matrix())?;

        matrix_to_csv(&matrix, &csv)?;
        assert_eq!(
            std::fs::read_to_string(&csv)?,
            "row,a,b\nr1,1.5,2.25\nr2,3.25,-4.5\n"
        );

        matrix_to_feather(&matrix, &feather)?;
        assert!(artifact_is_readable(&feather, LocalFormat::FeatherMatrix));
        assert_eq!(read_feather(&feather)?, vec![sample_matrix()]);
        Ok(())
    }

    #[test]
    fn test_reads_fixed_length_labels_and_integer_data() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("m.hdf5");
        {
            let ascii = |s: &str| FixedAscii::<4>::from_ascii(s).expect("ascii label");
            let file = hdf5::File::create(&path)?;
            let _ = file
                .new_dataset_builder()
                .with_data([ascii("r1"), ascii("r2")].as_slice())
                .create(ROW_LABELS)?;
            let _ = file
                .new_dataset_builder()
                .with_data([ascii("a"), ascii("b")].as_slice())
                .create(COLUMN_LABELS)?;
            file.new_dataset::<i64>()
                .shape((2, 2))
                .create(VALUES)?
                .write_raw([1i64, 2, 3, 4].as_slice())?;
        }

        let batch = read_matrix(&path)?;
        let labels = batch.column(0).as_string::<i32>();
        assert_eq!(labels.value(1), "r2");
        assert_eq!(batch.schema().field(2).name(), "b");
        let b = batch.column(2).as_primitive::<Float64Type>();
        assert_eq!(b.values().to_vec(), vec![2.0, 4.0]);
        Ok(())
    }

    #[test]
    fn test_mismatched_labels_are_not_a_matrix() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("m.hdf5");
        {
            let label = |s: &str| s.parse::<VarLenUnicode>().expect("label");
            let file = hdf5::File::create(&path)?;
            let _ = file
                .new_dataset_builder()
                .with_data([label("r1")].as_slice())
                .create(ROW_LABELS)?;
            let _ = file
                .new_dataset_builder()
                .with_data([label("a")].as_slice())
                .create(COLUMN_LABELS)?;
            file.new_dataset::<f64>()
                .shape((2, 1))
                .create(VALUES)?
                .write_raw([1.0, 2.0].as_slice())?;
        }

        assert!(!artifact_is_readable(&path, LocalFormat::DenseMatrix));
        assert!(read_matrix(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_write_matrix_requires_labels() -> Result<()> {
        let dir = tempdir()?;
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![1]))])?;
        assert!(write_matrix(&dir.path().join("m.hdf5"), &batch).is_err());
        Ok(())
    }

    #[test]
    fn test_unreadable_artifacts() -> Result<()> {
        let dir = tempdir()?;
        let missing = dir.path().join("missing");
        for format in LocalFormat::ALL {
            assert!(!artifact_is_readable(&missing, format));
        }

        let empty = dir.path().join("empty");
        std::fs::write(&empty, b"")?;
        assert!(artifact_is_readable(&empty, LocalFormat::Raw));
        assert!(!artifact_is_readable(&empty, LocalFormat::CsvTable));
        assert!(!artifact_is_readable(&empty, LocalFormat::ColumnarTable));
        assert!(!artifact_is_readable(&empty, LocalFormat::DenseMatrix));

        let garbage = dir.path().join("garbage");
        std::fs::write(&garbage, b"this is not a binary artifact")?;
        for format in [
            LocalFormat::ColumnarTable,
            LocalFormat::DenseMatrix,
            LocalFormat::FeatherMatrix,
            LocalFormat::FeatherTable,
        ] {
            assert!(!artifact_is_readable(&garbage, format), "{format}");
        }

        // the HDF5 signature alone does not make a matrix
        let fake = dir.path().join("fake.hdf5");
        let mut bytes = b"\x89HDF\r\n\x1a\n".to_vec();
        bytes.resize(2048 + 8, 0);
        std::fs::write(&fake, bytes)?;
        assert!(!artifact_is_readable(&fake, LocalFormat::DenseMatrix));

        // a directory is never an artifact
        assert!(!artifact_is_readable(dir.path(), LocalFormat::Raw));
        Ok(())
    }
}
