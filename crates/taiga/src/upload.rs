// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Files that can be added to a new dataset version
//!
//! Each variant carries only the fields that apply to it. The upload-session
//! payload is derived by exhaustive match, so a new variant cannot be
//! forgotten by the encoder.

use crate::error::{Error, Result};
use crate::format::{CLIENT_STORAGE_FORMAT_KEY, LocalFormat, StorageFormat};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum UploadFile {
    /// A local file, staged to object storage before the session references it
    Uploaded {
        name: String,
        local_path: PathBuf,
        format: LocalFormat,
        encoding: String,
        custom_metadata: BTreeMap<String, String>,
    },
    /// A virtual file pointing at an existing datafile
    TaigaReference {
        name: String,
        taiga_id: String,
        custom_metadata: BTreeMap<String, String>,
    },
    /// A file already in Google Cloud Storage
    GcsReference {
        name: String,
        gcs_path: String,
        custom_metadata: BTreeMap<String, String>,
    },
}

/// Where a staged local file landed
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StagedObject {
    pub bucket: String,
    pub key: String,
}

/// Upload format names understood by the registry's import
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    NumericMatrixCSV,
    TableCSV,
    Raw,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct S3Upload {
    pub format: UploadFormat,
    pub bucket: String,
    pub key: String,
    pub encoding: String,
}

/// One entry of an upload session, as posted to the registry
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "filetype")]
pub enum SessionFile {
    #[serde(rename = "s3")]
    S3 {
        filename: String,
        #[serde(rename = "s3Upload")]
        s3_upload: S3Upload,
        custom_metadata: BTreeMap<String, String>,
    },
    #[serde(rename = "virtual")]
    Virtual {
        filename: String,
        #[serde(rename = "existingTaigaId")]
        existing_taiga_id: String,
        custom_metadata: BTreeMap<String, String>,
    },
    #[serde(rename = "gcs")]
    Gcs {
        filename: String,
        gcs_path: String,
        custom_metadata: BTreeMap<String, String>,
    },
}

/// Registry upload format for a local format, and the client storage tag
/// recorded for binary encodings the registry keeps as raw bytes.
/// Feather files have no registry counterpart.
pub fn upload_format(format: LocalFormat) -> Option<(UploadFormat, Option<StorageFormat>)> {
    match format {
        LocalFormat::CsvMatrix => Some((UploadFormat::NumericMatrixCSV, None)),
        LocalFormat::CsvTable => Some((UploadFormat::TableCSV, None)),
        LocalFormat::DenseMatrix => Some((UploadFormat::Raw, Some(StorageFormat::RawDenseMatrix))),
        LocalFormat::ColumnarTable => Some((UploadFormat::Raw, Some(StorageFormat::RawColumnar))),
        LocalFormat::Raw => Some((UploadFormat::Raw, None)),
        LocalFormat::FeatherMatrix | LocalFormat::FeatherTable => None,
    }
}

impl UploadFile {
    pub fn name(&self) -> &str {
        match self {
            UploadFile::Uploaded { name, .. }
            | UploadFile::TaigaReference { name, .. }
            | UploadFile::GcsReference { name, .. } => name,
        }
    }

    /// The session payload for this file. Local files need `staged`.
    pub fn session_file(&self, staged: Option<&StagedObject>) -> Result<SessionFile> {
        match self {
            UploadFile::Uploaded {
                name,
                format,
                encoding,
                custom_metadata,
                ..
            } => {
                let staged = staged.ok_or_else(|| Error::NotStaged { name: name.clone() })?;
                let (upload_format, client_format) =
                    upload_format(*format).ok_or_else(|| Error::UnsupportedUpload {
                        name: name.clone(),
                        format: *format,
                    })?;
                let mut custom_metadata = custom_metadata.clone();
                if let Some(client_format) = client_format {
                    let _ = custom_metadata.insert(
                        CLIENT_STORAGE_FORMAT_KEY.to_string(),
                        client_format.as_str().to_string(),
                    );
                }
                Ok(SessionFile::S3 {
                    filename: name.clone(),
                    s3_upload: S3Upload {
                        format: upload_format,
                        bucket: staged.bucket.clone(),
                        key: staged.key.clone(),
                        encoding: encoding.clone(),
                    },
                    custom_metadata,
                })
            }
            UploadFile::TaigaReference {
                name,
                taiga_id,
                custom_metadata,
            } => Ok(SessionFile::Virtual {
                filename: name.clone(),
                existing_taiga_id: taiga_id.clone(),
                custom_metadata: custom_metadata.clone(),
            }),
            UploadFile::GcsReference {
                name,
                gcs_path,
                custom_metadata,
            } => Ok(SessionFile::Gcs {
                filename: name.clone(),
                gcs_path: gcs_path.clone(),
                custom_metadata: custom_metadata.clone(),
            }),
        }
    }
}
