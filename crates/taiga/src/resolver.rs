// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Canonical identifier resolution
//!
//! A file in a dataset version may be a virtual reference to a file in
//! another version. Resolution maps any identifier to the identifier that
//! owns the bytes. Results are cached per file: fetching one version's
//! metadata records the mapping for every file it lists, together with the
//! minimal metadata the format cache needs.

use crate::api::RegistryApi;
use crate::error::{Error, Result};
use crate::format::StorageFormat;
use crate::id::{DatafileId, format_id};
use crate::model::MinimalFileMetadata;
use crate::store::Store;
use diagnostics::*;
use std::path::Path;

pub const CANONICAL_ID_STORE: &str = "canonical_id.cache.duckdb";
pub const METADATA_STORE: &str = "datafile_metadata.cache.duckdb";

pub struct Resolver {
    canonical_ids: Store<String>,
    metadata: Store<MinimalFileMetadata>,
}

impl Resolver {
    pub fn open(cache_dir: &Path) -> Self {
        Self {
            canonical_ids: Store::new(cache_dir.join(CANONICAL_ID_STORE)),
            metadata: Store::new(cache_dir.join(METADATA_STORE)),
        }
    }

    /// Resolve `id` to its canonical identifier.
    ///
    /// `registry` is `None` when the client is offline; a cache miss then
    /// fails with [`Error::NotCached`].
    pub fn resolve(&self, registry: Option<&dyn RegistryApi>, id: &str) -> Result<String> {
        let parsed = DatafileId::parse(id).ok_or_else(|| Error::MalformedIdentifier(id.to_string()))?;

        if let Some(canonical) = self.canonical_ids.get(id)? {
            debug!("resolved {id} to {canonical} from cache", id: id, canonical: canonical.as_str());
            return Ok(canonical);
        }

        let registry = registry.ok_or_else(|| Error::NotCached { id: id.to_string() })?;
        let files = self.load_version(registry, &parsed.permaname, parsed.version)?;

        match self.canonical_ids.get(id)? {
            Some(canonical) => {
                info!("resolved {id} to {canonical}", id: id, canonical: canonical.as_str());
                Ok(canonical)
            }
            None if parsed.file_name.is_none() && files > 1 => Err(Error::AmbiguousDatafile {
                id: id.to_string(),
                files,
            }),
            None => Err(Error::DatafileNotFound { id: id.to_string() }),
        }
    }

    /// Metadata of the file `id` names, as listed by `id`'s own version.
    /// A miss loads that version; `None` means the version has no such file.
    pub fn minimal_metadata(
        &self,
        registry: Option<&dyn RegistryApi>,
        id: &str,
    ) -> Result<Option<MinimalFileMetadata>> {
        let parsed = DatafileId::parse(id).ok_or_else(|| Error::MalformedIdentifier(id.to_string()))?;
        if let Some(metadata) = self.metadata.get(id)? {
            return Ok(Some(metadata));
        }

        let registry = registry.ok_or_else(|| Error::NotCached { id: id.to_string() })?;
        let _ = self.load_version(registry, &parsed.permaname, parsed.version)?;
        self.metadata.get(id)
    }

    /// Storage format of the file that owns `canonical`'s bytes
    pub fn storage_format(
        &self,
        registry: Option<&dyn RegistryApi>,
        canonical: &str,
    ) -> Result<StorageFormat> {
        let metadata = match self.metadata.get(canonical)? {
            Some(metadata) => metadata,
            None => {
                let parsed = DatafileId::parse(canonical)
                    .ok_or_else(|| Error::MalformedIdentifier(canonical.to_string()))?;
                let registry = registry.ok_or_else(|| Error::NotCached {
                    id: canonical.to_string(),
                })?;
                let _ = self.load_version(registry, &parsed.permaname, parsed.version)?;
                self.metadata
                    .get(canonical)?
                    .ok_or_else(|| Error::DatafileNotFound {
                        id: canonical.to_string(),
                    })?
            }
        };
        metadata.storage_format(canonical)
    }

    /// Fetch one version's metadata and record every file it lists.
    /// Returns the number of files in the version.
    fn load_version(&self, registry: &dyn RegistryApi, permaname: &str, version: u64) -> Result<usize> {
        info!("fetching metadata for {permaname}.{version}", permaname: permaname, version: version);

        let metadata = registry
            .dataset_version_metadata(permaname, version)?
            .ok_or_else(|| Error::DatasetVersionNotFound {
                permaname: permaname.to_string(),
                version,
            })?;

        let files = metadata.files();
        let dataset = format_id(permaname, version, None);
        let invalid = |reason: String| Error::InvalidMetadata {
            dataset: dataset.clone(),
            reason,
        };

        let mut canonical_ids = Vec::with_capacity(files.len() * 2 + 1);
        let mut minimal = Vec::with_capacity(files.len() + 1);
        for file in files {
            let self_id = file.self_id(permaname, version);
            if DatafileId::parse(&self_id).is_none_or(|id| id.file_name.is_none()) {
                return Err(invalid(format!("file name {:?} is not usable", file.name)));
            }
            let canonical = file.canonical_id(permaname, version);
            if DatafileId::parse(&canonical).is_none_or(|id| id.file_name.is_none()) {
                return Err(invalid(format!(
                    "{self_id} refers to {canonical:?}, which names no datafile"
                )));
            }
            canonical_ids.push((self_id.clone(), canonical.clone()));
            canonical_ids.push((canonical.clone(), canonical));
            minimal.push((self_id, file.minimal()));
        }

        // the version as a whole names its only file
        if let [only] = files {
            canonical_ids.push((dataset.clone(), only.canonical_id(permaname, version)));
            minimal.push((dataset.clone(), only.minimal()));
        }

        self.canonical_ids.put_many(canonical_ids)?;
        self.metadata.put_many(minimal)?;

        let count = files.len();
        debug!("recorded {count} files of {permaname}.{version}", count: count, permaname: permaname, version: version);
        Ok(count)
    }
}
