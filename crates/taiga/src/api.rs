// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::Result;
use crate::format::DownloadFormat;
use crate::model::{DatasetMetadata, DatasetVersionMetadata};
use std::path::Path;

/// The remote registry, as seen by the resolver and the format cache
///
/// Implementations block until the request completes. `Ok(None)` means the
/// registry answered that the dataset or version does not exist.
pub trait RegistryApi {
    fn dataset_version_metadata(
        &self,
        permaname: &str,
        version: u64,
    ) -> Result<Option<DatasetVersionMetadata>>;

    fn dataset_metadata(&self, permaname: &str) -> Result<Option<DatasetMetadata>>;

    /// Download one file, converted server side to `format`, into `dest`
    fn download_datafile(
        &self,
        permaname: &str,
        version: u64,
        file_name: &str,
        dest: &Path,
        format: DownloadFormat,
    ) -> Result<()>;
}
