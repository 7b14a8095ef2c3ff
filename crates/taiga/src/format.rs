// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Storage formats, local formats, and the conversion table between them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Custom-metadata key marking a raw upload as a recognized binary encoding
pub const CLIENT_STORAGE_FORMAT_KEY: &str = "client_storage_format";

/// How the registry stores a file. Tag strings are the registry's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageFormat {
    /// Matrix converted by the registry into its dense binary form
    #[serde(rename = "hdf5_matrix")]
    DenseMatrix,
    /// Dense binary matrix uploaded as-is
    #[serde(rename = "raw_hdf5_matrix")]
    RawDenseMatrix,
    /// Table stored as CSV
    #[serde(rename = "csv_table")]
    ColumnarTable,
    /// Parquet table uploaded as-is
    #[serde(rename = "raw_parquet_table")]
    RawColumnar,
    /// Opaque bytes
    #[serde(rename = "raw_bytes")]
    RawBytes,
}

impl StorageFormat {
    pub const ALL: [StorageFormat; 5] = [
        StorageFormat::DenseMatrix,
        StorageFormat::RawDenseMatrix,
        StorageFormat::ColumnarTable,
        StorageFormat::RawColumnar,
        StorageFormat::RawBytes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageFormat::DenseMatrix => "hdf5_matrix",
            StorageFormat::RawDenseMatrix => "raw_hdf5_matrix",
            StorageFormat::ColumnarTable => "csv_table",
            StorageFormat::RawColumnar => "raw_parquet_table",
            StorageFormat::RawBytes => "raw_bytes",
        }
    }

    pub fn is_matrix(&self) -> bool {
        matches!(
            self,
            StorageFormat::DenseMatrix | StorageFormat::RawDenseMatrix
        )
    }

    pub fn is_table(&self) -> bool {
        matches!(
            self,
            StorageFormat::ColumnarTable | StorageFormat::RawColumnar
        )
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        StorageFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// The representation a caller wants on local disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalFormat {
    /// HDF5 file with `dim_0` row labels, `dim_1` column labels, and a 2-D `data` array
    DenseMatrix,
    /// Parquet
    ColumnarTable,
    /// CSV with a header row
    CsvTable,
    /// CSV with a header row and the row labels as first column
    CsvMatrix,
    /// Feather (Arrow IPC file) with the row labels as first column
    FeatherMatrix,
    /// Feather (Arrow IPC file)
    FeatherTable,
    /// Bytes exactly as stored
    Raw,
}

impl LocalFormat {
    pub const ALL: [LocalFormat; 7] = [
        LocalFormat::DenseMatrix,
        LocalFormat::ColumnarTable,
        LocalFormat::CsvTable,
        LocalFormat::CsvMatrix,
        LocalFormat::FeatherMatrix,
        LocalFormat::FeatherTable,
        LocalFormat::Raw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LocalFormat::DenseMatrix => "dense_matrix",
            LocalFormat::ColumnarTable => "columnar_table",
            LocalFormat::CsvTable => "csv_table",
            LocalFormat::CsvMatrix => "csv_matrix",
            LocalFormat::FeatherMatrix => "feather_matrix",
            LocalFormat::FeatherTable => "feather_table",
            LocalFormat::Raw => "raw",
        }
    }

    /// File extension used for artifacts of this format
    pub fn extension(&self) -> &'static str {
        match self {
            LocalFormat::DenseMatrix => ".hdf5",
            LocalFormat::ColumnarTable => ".parquet",
            LocalFormat::CsvTable | LocalFormat::CsvMatrix => ".csv",
            LocalFormat::FeatherMatrix | LocalFormat::FeatherTable => ".ftr",
            LocalFormat::Raw => ".raw",
        }
    }
}

impl fmt::Display for LocalFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocalFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        LocalFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Encoding requested from the registry's download endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadFormat {
    /// The stored bytes, unconverted
    Raw,
    /// The registry's dense matrix encoding
    DenseMatrix,
}

impl DownloadFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadFormat::Raw => "raw_test",
            DownloadFormat::DenseMatrix => "hdf5",
        }
    }
}

/// Client-side conversions between local formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    CsvToParquet,
    ParquetToCsv,
    ParquetToFeather,
    MatrixToCsv,
    MatrixToFeather,
}

/// How to produce a local format from a storage format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Download straight into the artifact
    Download(DownloadFormat),
    /// Materialize `from` first, then convert it
    Convert { from: LocalFormat, conversion: Conversion },
}

/// The conversion table. `None` means the pair is not supported.
pub fn plan(wanted: LocalFormat, storage: StorageFormat) -> Option<Plan> {
    use LocalFormat as L;
    use StorageFormat as S;

    match (wanted, storage) {
        (L::DenseMatrix, S::DenseMatrix) => Some(Plan::Download(DownloadFormat::DenseMatrix)),
        (L::DenseMatrix, S::RawDenseMatrix) => Some(Plan::Download(DownloadFormat::Raw)),
        (L::ColumnarTable, S::ColumnarTable) => Some(Plan::Convert {
            from: L::CsvTable,
            conversion: Conversion::CsvToParquet,
        }),
        (L::ColumnarTable, S::RawColumnar) => Some(Plan::Download(DownloadFormat::Raw)),
        (L::CsvMatrix, S::DenseMatrix | S::RawDenseMatrix) => Some(Plan::Convert {
            from: L::DenseMatrix,
            conversion: Conversion::MatrixToCsv,
        }),
        (L::CsvTable, S::ColumnarTable) => Some(Plan::Download(DownloadFormat::Raw)),
        (L::CsvTable, S::RawColumnar) => Some(Plan::Convert {
            from: L::ColumnarTable,
            conversion: Conversion::ParquetToCsv,
        }),
        (L::FeatherMatrix, S::DenseMatrix | S::RawDenseMatrix) => Some(Plan::Convert {
            from: L::DenseMatrix,
            conversion: Conversion::MatrixToFeather,
        }),
        (L::FeatherTable, S::ColumnarTable | S::RawColumnar) => Some(Plan::Convert {
            from: L::ColumnarTable,
            conversion: Conversion::ParquetToFeather,
        }),
        (L::Raw, S::RawBytes) => Some(Plan::Download(DownloadFormat::Raw)),
        _ => None,
    }
}

/// Every local format the table allows for `storage`
pub fn allowed_local_formats(storage: StorageFormat) -> Vec<LocalFormat> {
    LocalFormat::ALL
        .into_iter()
        .filter(|wanted| plan(*wanted, storage).is_some())
        .collect()
}
