// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Typed registry metadata records
//!
//! Only the fields the resolver, the format cache, and the command line need
//! are modelled. Unknown fields are ignored.

use crate::error::{Error, Result};
use crate::format::{CLIENT_STORAGE_FORMAT_KEY, StorageFormat};
use crate::id::format_id;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Registry `type` tag of a matrix converted server side
pub const TYPE_HDF5: &str = "HDF5";
/// Registry `type` tag of a CSV table
pub const TYPE_COLUMNAR: &str = "Columnar";
/// Registry `type` tag of a raw upload
pub const TYPE_RAW: &str = "Raw";

/// Metadata of one dataset version, as returned by `/api/dataset/{permaname}/{version}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatasetVersionMetadata {
    pub dataset: DatasetSummary,
    #[serde(rename = "datasetVersion")]
    pub dataset_version: DatasetVersionDetails,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub permanames: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatasetVersionDetails {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(deserialize_with = "version_number")]
    pub version: u64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    pub datafiles: Vec<DatasetVersionFile>,
}

/// One file in a dataset version
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatasetVersionFile {
    pub name: String,
    /// Registry storage tag: `HDF5`, `Columnar`, or `Raw`
    #[serde(rename = "type")]
    pub storage_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub custom_metadata: BTreeMap<String, String>,
    /// Set when the file is a virtual reference to another file's bytes
    #[serde(default)]
    pub underlying_file_id: Option<String>,
    #[serde(default)]
    pub original_file_sha256: Option<String>,
}

impl DatasetVersionMetadata {
    /// The primary permaname of the dataset
    pub fn permaname(&self) -> Option<&str> {
        self.dataset.permanames.first().map(String::as_str)
    }

    pub fn version(&self) -> u64 {
        self.dataset_version.version
    }

    pub fn files(&self) -> &[DatasetVersionFile] {
        &self.dataset_version.datafiles
    }
}

impl DatasetVersionFile {
    /// `permaname.version/name` of this entry
    pub fn self_id(&self, permaname: &str, version: u64) -> String {
        format_id(permaname, version, Some(&self.name))
    }

    /// The identifier that owns this file's bytes
    pub fn canonical_id(&self, permaname: &str, version: u64) -> String {
        match &self.underlying_file_id {
            Some(underlying) => underlying.clone(),
            None => self.self_id(permaname, version),
        }
    }

    pub fn minimal(&self) -> MinimalFileMetadata {
        MinimalFileMetadata {
            storage_type: self.storage_type.clone(),
            custom_metadata: self.custom_metadata.clone(),
            original_file_sha256: self.original_file_sha256.clone(),
        }
    }
}

/// Dataset-level metadata, as returned by `/api/dataset/{permaname}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatasetMetadata {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub permanames: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub versions: Vec<DatasetVersionSummary>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatasetVersionSummary {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(deserialize_with = "version_number")]
    pub name: u64,
    pub state: VersionState,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VersionState {
    #[serde(alias = "Approved")]
    Approved,
    #[serde(alias = "Deprecated")]
    Deprecated,
    #[serde(alias = "Deleted")]
    Deleted,
}

impl DatasetMetadata {
    /// Highest version number that is not deleted
    pub fn latest_valid_version(&self) -> Option<u64> {
        self.versions
            .iter()
            .filter(|v| v.state != VersionState::Deleted)
            .map(|v| v.name)
            .max()
    }
}

/// Subset of file metadata kept in the local cache
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MinimalFileMetadata {
    pub storage_type: String,
    pub custom_metadata: BTreeMap<String, String>,
    pub original_file_sha256: Option<String>,
}

impl MinimalFileMetadata {
    /// Map the registry tag (and, for raw uploads, the client tag) to a storage format
    pub fn storage_format(&self, id: &str) -> Result<StorageFormat> {
        let unknown = |tag: &str| Error::UnknownStorageFormat {
            id: id.to_string(),
            tag: tag.to_string(),
        };

        match self.storage_type.as_str() {
            TYPE_HDF5 => Ok(StorageFormat::DenseMatrix),
            TYPE_COLUMNAR => Ok(StorageFormat::ColumnarTable),
            TYPE_RAW => match self.custom_metadata.get(CLIENT_STORAGE_FORMAT_KEY) {
                None => Ok(StorageFormat::RawBytes),
                Some(tag) => tag.parse::<StorageFormat>().map_err(|t| unknown(&t)),
            },
            other => Err(unknown(other)),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

fn version_number<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid version number {s:?}"))),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}
