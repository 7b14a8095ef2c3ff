// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

// Error types for datafile resolution and the local format cache
use crate::format::{LocalFormat, StorageFormat};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Malformed datafile identifier: {0:?} (expected permaname.version/filename)")]
    MalformedIdentifier(String),

    #[error("Dataset version not found: {permaname}.{version}")]
    DatasetVersionNotFound { permaname: String, version: u64 },

    #[error("Dataset not found: {permaname}")]
    DatasetNotFound { permaname: String },

    #[error("No datafile {id} in its dataset version")]
    DatafileNotFound { id: String },

    #[error("{id} names a dataset version with {files} files; a file name is required")]
    AmbiguousDatafile { id: String, files: usize },

    #[error("Cannot materialize {id} as {wanted}: stored as {storage}")]
    UnsupportedConversion {
        id: String,
        wanted: LocalFormat,
        storage: StorageFormat,
    },

    #[error("Registry metadata for {dataset} is unusable: {reason}")]
    InvalidMetadata { dataset: String, reason: String },

    #[error("Unknown storage format for {id}: {tag:?}")]
    UnknownStorageFormat { id: String, tag: String },

    #[error("Corrupted cache record {key}: {reason}")]
    CacheCorrupted { key: String, reason: String },

    #[error("Refusing to cache a value that fails validation under key {key}")]
    InvalidValue { key: String },

    #[error("{id} is not in the local cache and the client is offline")]
    NotCached { id: String },

    #[error("Cache store {path} is locked by another process")]
    StoreBusy { path: PathBuf },

    #[error("Failed to materialize {id} as {format}: {source}")]
    Materialize {
        id: String,
        format: LocalFormat,
        #[source]
        source: Box<Error>,
    },

    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Registry server error from {url}; try again later")]
    ServerError { url: String },

    #[error("Server-side conversion task {task} failed: {message}")]
    TaskFailed { task: String, message: String },

    #[error("Upload file {name} is {format}, which the registry cannot store")]
    UnsupportedUpload { name: String, format: LocalFormat },

    #[error("Upload file {name} has not been staged to object storage")]
    NotStaged { name: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache store error: {0}")]
    Store(#[from] duckdb::Error),

    #[error("URL parse error: {0}")]
    ParseUrl(#[from] url::ParseError),
}

impl Error {
    /// Wrap a failure of the download/convert step with the key being materialized
    pub fn materialize(id: &str, format: LocalFormat, source: Error) -> Self {
        Error::Materialize {
            id: id.to_string(),
            format,
            source: Box::new(source),
        }
    }

    /// Whether the caller may reasonably retry the operation that produced this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Materialize { source, .. } => source.is_retryable(),
            Error::Http { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request() || source.is_body()
            }
            Error::ServerError { .. } | Error::StoreBusy { .. } | Error::Io(_) => true,
            Error::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_errors_are_not_retryable() {
        assert!(!Error::MalformedIdentifier("x".into()).is_retryable());
        assert!(
            !Error::DatasetVersionNotFound {
                permaname: "p".into(),
                version: 1
            }
            .is_retryable()
        );
        assert!(
            !Error::UnsupportedConversion {
                id: "p.1/f".into(),
                wanted: LocalFormat::CsvTable,
                storage: StorageFormat::RawBytes,
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_materialize_wrapper_keeps_retryability() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let wrapped = Error::materialize("p.1/f", LocalFormat::CsvTable, Error::Io(io));
        assert!(wrapped.is_retryable());
        let msg = wrapped.to_string();
        assert!(msg.contains("p.1/f"));
        assert!(msg.contains("csv_table"));

        let wrapped = Error::materialize(
            "p.1/f",
            LocalFormat::CsvTable,
            Error::ServerError {
                url: "https://x".into(),
            },
        );
        assert!(wrapped.is_retryable());
    }
}
