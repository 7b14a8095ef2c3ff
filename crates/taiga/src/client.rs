// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The client facade
//!
//! A [`Client`] owns the three cache namespaces under one cache directory and,
//! unless offline, a registry to fill them from.

use crate::api::RegistryApi;
use crate::config::Config;
use crate::convert;
use crate::error::{Error, Result};
use crate::format::{self, LocalFormat, StorageFormat};
use crate::format_cache::FormatCache;
use crate::http::HttpRegistry;
use crate::id::format_id;
use crate::model::{DatasetMetadata, DatasetVersionMetadata, MinimalFileMetadata};
use crate::resolver::Resolver;
use arrow_array::RecordBatch;
use diagnostics::*;
use std::path::{Path, PathBuf};

pub struct Client {
    cache_dir: PathBuf,
    registry: Option<Box<dyn RegistryApi>>,
    resolver: Resolver,
    formats: FormatCache,
}

impl Client {
    /// A client that fills its caches from `registry`
    pub fn new<P: AsRef<Path>>(cache_dir: P, registry: Box<dyn RegistryApi>) -> Self {
        Self::build(cache_dir.as_ref(), Some(registry))
    }

    /// A client that serves only what `cache_dir` already holds
    pub fn offline<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self::build(cache_dir.as_ref(), None)
    }

    /// Build the client described by `config`, reading the token unless offline
    pub fn from_config(config: &Config) -> Result<Self> {
        let cache_dir = config.cache_dir()?;
        if config.offline {
            let dir = cache_dir.display().to_string();
            info!("offline client over {dir}", dir: dir.as_str());
            return Ok(Self::offline(cache_dir));
        }
        let registry = HttpRegistry::new(&config.url, config.read_token()?, config.timeout())?;
        Ok(Self::new(cache_dir, Box::new(registry)))
    }

    fn build(cache_dir: &Path, registry: Option<Box<dyn RegistryApi>>) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            registry,
            resolver: Resolver::open(cache_dir),
            formats: FormatCache::open(cache_dir),
        }
    }

    fn registry(&self) -> Option<&dyn RegistryApi> {
        self.registry.as_deref()
    }

    fn online(&self, what: &str) -> Result<&dyn RegistryApi> {
        self.registry().ok_or_else(|| Error::NotCached {
            id: what.to_string(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn is_offline(&self) -> bool {
        self.registry.is_none()
    }

    pub fn resolve_canonical_id(&self, id: &str) -> Result<String> {
        self.resolver.resolve(self.registry(), id)
    }

    /// Path to a local artifact holding `id` in `format`
    pub fn materialize(&self, id: &str, format: LocalFormat) -> Result<PathBuf> {
        self.formats
            .materialize(&self.resolver, self.registry(), id, format)
    }

    /// The live cached artifact for `id` in `format`, if one exists
    pub fn cached_artifact(&self, id: &str, format: LocalFormat) -> Result<Option<PathBuf>> {
        let canonical = self.resolve_canonical_id(id)?;
        self.formats.lookup(&canonical, format)
    }

    /// Metadata of the file `id` names, as its own version lists it
    pub fn minimal_metadata(&self, id: &str) -> Result<Option<MinimalFileMetadata>> {
        self.resolver.minimal_metadata(self.registry(), id)
    }

    pub fn storage_format(&self, id: &str) -> Result<StorageFormat> {
        let canonical = self.resolve_canonical_id(id)?;
        self.resolver.storage_format(self.registry(), &canonical)
    }

    pub fn allowed_local_formats(&self, id: &str) -> Result<Vec<LocalFormat>> {
        Ok(format::allowed_local_formats(self.storage_format(id)?))
    }

    /// Load `id` into memory. Matrices keep their row-label column first.
    pub fn get(&self, id: &str) -> Result<Vec<RecordBatch>> {
        let storage = self.storage_format(id)?;
        if storage.is_matrix() {
            Ok(vec![convert::read_matrix(
                &self.materialize(id, LocalFormat::DenseMatrix)?,
            )?])
        } else if storage.is_table() {
            convert::read_parquet(&self.materialize(id, LocalFormat::ColumnarTable)?)
        } else {
            Err(Error::UnsupportedConversion {
                id: id.to_string(),
                wanted: LocalFormat::ColumnarTable,
                storage,
            })
        }
    }

    pub fn dataset_metadata(&self, permaname: &str) -> Result<Option<DatasetMetadata>> {
        self.online(permaname)?.dataset_metadata(permaname)
    }

    pub fn dataset_version_metadata(
        &self,
        permaname: &str,
        version: u64,
    ) -> Result<Option<DatasetVersionMetadata>> {
        self.online(&format_id(permaname, version, None))?
            .dataset_version_metadata(permaname, version)
    }

    /// `permaname.version` of the newest version that is not deleted
    pub fn latest_version_id(&self, permaname: &str) -> Result<String> {
        let not_found = || Error::DatasetNotFound {
            permaname: permaname.to_string(),
        };
        let version = self
            .dataset_metadata(permaname)?
            .ok_or_else(not_found)?
            .latest_valid_version()
            .ok_or_else(not_found)?;
        Ok(format_id(permaname, version, None))
    }
}
