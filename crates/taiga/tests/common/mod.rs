// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory registry shared by the integration tests

#![allow(dead_code)]

use arrow_array::{Float64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use taiga::id::format_id;
use taiga::model::{
    DatasetSummary, DatasetVersionDetails, DatasetVersionSummary, TYPE_COLUMNAR, TYPE_HDF5, TYPE_RAW,
    VersionState,
};
use taiga::{
    DatasetMetadata, DatasetVersionFile, DatasetVersionMetadata, DownloadFormat, Error, RegistryApi,
    Result, StorageFormat,
};

/// Requests seen by a [`MockRegistry`], shared with the test after the
/// registry moves into a client
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn record(&self, call: String) {
        self.0.lock().expect("call log").push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().expect("call log").clone()
    }

    pub fn downloads(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("download ")).count()
    }

    pub fn metadata_fetches(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("metadata ")).count()
    }
}

#[derive(Default)]
pub struct MockRegistry {
    versions: HashMap<(String, u64), DatasetVersionMetadata>,
    datasets: HashMap<String, DatasetMetadata>,
    contents: HashMap<(String, &'static str), Vec<u8>>,
    log: CallLog,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Add a file entry to `permaname.version`, creating the version if needed
    pub fn add_entry(
        &mut self,
        permaname: &str,
        version: u64,
        name: &str,
        storage_type: &str,
        custom_metadata: &[(&str, &str)],
        underlying_file_id: Option<&str>,
    ) {
        let entry = self
            .versions
            .entry((permaname.to_string(), version))
            .or_insert_with(|| DatasetVersionMetadata {
                dataset: DatasetSummary {
                    id: Some(format!("{permaname}-id")),
                    name: Some(permaname.to_string()),
                    permanames: vec![permaname.to_string()],
                },
                dataset_version: DatasetVersionDetails {
                    id: None,
                    version,
                    description: None,
                    state: Some("approved".to_string()),
                    datafiles: Vec::new(),
                },
            });
        entry.dataset_version.datafiles.push(DatasetVersionFile {
            name: name.to_string(),
            storage_type: storage_type.to_string(),
            custom_metadata: custom_metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            underlying_file_id: underlying_file_id.map(str::to_string),
            original_file_sha256: None,
        });
    }

    /// Add a file stored as `storage`, downloadable as `bytes` in the format
    /// the conversion table downloads it with
    pub fn add_file(&mut self, permaname: &str, version: u64, name: &str, storage: StorageFormat, bytes: Vec<u8>) {
        let (storage_type, tag, download) = match storage {
            StorageFormat::DenseMatrix => (TYPE_HDF5, None, DownloadFormat::DenseMatrix),
            StorageFormat::ColumnarTable => (TYPE_COLUMNAR, None, DownloadFormat::Raw),
            StorageFormat::RawDenseMatrix => (TYPE_RAW, Some("raw_hdf5_matrix"), DownloadFormat::Raw),
            StorageFormat::RawColumnar => (TYPE_RAW, Some("raw_parquet_table"), DownloadFormat::Raw),
            StorageFormat::RawBytes => (TYPE_RAW, None, DownloadFormat::Raw),
        };
        let metadata: Vec<(&str, &str)> = tag
            .map(|t| vec![("client_storage_format", t)])
            .unwrap_or_default();
        self.add_entry(permaname, version, name, storage_type, &metadata, None);
        self.add_content(&format_id(permaname, version, Some(name)), download, bytes);
    }

    /// Add a virtual file referencing `target`
    pub fn add_virtual(&mut self, permaname: &str, version: u64, name: &str, target: &str) {
        self.add_entry(permaname, version, name, TYPE_RAW, &[], Some(target));
    }

    pub fn add_content(&mut self, id: &str, format: DownloadFormat, bytes: Vec<u8>) {
        let _ = self.contents.insert((id.to_string(), format.as_str()), bytes);
    }

    pub fn add_dataset(&mut self, permaname: &str, versions: &[(u64, VersionState)]) {
        let _ = self.datasets.insert(
            permaname.to_string(),
            DatasetMetadata {
                id: format!("{permaname}-id"),
                name: Some(permaname.to_string()),
                permanames: vec![permaname.to_string()],
                description: None,
                versions: versions
                    .iter()
                    .map(|(name, state)| DatasetVersionSummary {
                        id: None,
                        name: *name,
                        state: *state,
                    })
                    .collect(),
            },
        );
    }
}

impl RegistryApi for MockRegistry {
    fn dataset_version_metadata(
        &self,
        permaname: &str,
        version: u64,
    ) -> Result<Option<DatasetVersionMetadata>> {
        self.log.record(format!("metadata {permaname}.{version}"));
        Ok(self.versions.get(&(permaname.to_string(), version)).cloned())
    }

    fn dataset_metadata(&self, permaname: &str) -> Result<Option<DatasetMetadata>> {
        self.log.record(format!("dataset {permaname}"));
        Ok(self.datasets.get(permaname).cloned())
    }

    fn download_datafile(
        &self,
        permaname: &str,
        version: u64,
        file_name: &str,
        dest: &Path,
        format: DownloadFormat,
    ) -> Result<()> {
        let id = format_id(permaname, version, Some(file_name));
        self.log.record(format!("download {id} {}", format.as_str()));
        let bytes = self
            .contents
            .get(&(id.clone(), format.as_str()))
            .ok_or(Error::DatafileNotFound { id })?;
        std::fs::write(dest, bytes)?;
        Ok(())
    }
}

pub fn sample_matrix() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("row", DataType::Utf8, false),
        Field::new("c1", DataType::Float64, true),
        Field::new("c2", DataType::Float64, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(vec!["r1", "r2", "r3"])),
            Arc::new(Float64Array::from(vec![0.5, 1.5, 2.5])),
            Arc::new(Float64Array::from(vec![-1.25, 0.25, 8.75])),
        ],
    )
    .expect("valid matrix")
}

pub const SAMPLE_MATRIX_CSV: &str = "row,c1,c2\nr1,0.5,-1.25\nr2,1.5,0.25\nr3,2.5,8.75\n";

pub const SAMPLE_TABLE_CSV: &str = "name,count\nalpha,1\nbeta,22\ngamma,333\n";

/// HDF5 bytes of [`sample_matrix`], laid out as the registry serves matrices
pub fn matrix_bytes() -> Vec<u8> {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("m.hdf5");
    taiga::convert::write_matrix(&path, &sample_matrix()).expect("write matrix");
    std::fs::read(path).expect("read matrix")
}

/// Bytes of a Parquet encoding of [`SAMPLE_TABLE_CSV`]
pub fn parquet_bytes() -> Vec<u8> {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = dir.path().join("t.csv");
    let parquet = dir.path().join("t.parquet");
    std::fs::write(&csv, SAMPLE_TABLE_CSV).expect("write csv");
    taiga::convert::csv_to_parquet(&csv, &parquet).expect("convert");
    std::fs::read(parquet).expect("read parquet")
}
