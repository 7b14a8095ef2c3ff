// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Local format cache
//!
//! Maps `(canonical identifier, local format)` to an artifact under
//! `<cache_dir>/downloaded`. An entry is live only while its artifact still
//! has the recorded length and opens as the recorded format, so a deleted,
//! truncated, or damaged artifact is simply produced again. Conversions take their input from the cache as well, which
//! keeps every intermediate download to one.

use crate::api::RegistryApi;
use crate::convert::{self, artifact_is_readable};
use crate::error::{Error, Result};
use crate::format::{Conversion, LocalFormat, Plan, plan};
use crate::id::{DatafileId, slugify};
use crate::resolver::Resolver;
use crate::store::Store;
use diagnostics::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const FORMAT_STORE: &str = "internal_format.cache.duckdb";
pub const DOWNLOAD_DIR: &str = "downloaded";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CachedArtifact {
    pub path: PathBuf,
    pub format: LocalFormat,
    /// Length in bytes when the artifact was written
    pub size: u64,
}

impl CachedArtifact {
    pub fn is_live(&self) -> bool {
        std::fs::metadata(&self.path).is_ok_and(|m| m.len() == self.size)
            && artifact_is_readable(&self.path, self.format)
    }
}

pub struct FormatCache {
    artifacts: Store<CachedArtifact>,
    download_dir: PathBuf,
}

fn cache_key(canonical: &str, format: LocalFormat) -> String {
    format!("{canonical}#{format}")
}

impl FormatCache {
    pub fn open(cache_dir: &Path) -> Self {
        Self {
            artifacts: Store::new(cache_dir.join(FORMAT_STORE))
                .with_validator(CachedArtifact::is_live),
            download_dir: cache_dir.join(DOWNLOAD_DIR),
        }
    }

    /// The live artifact for `(canonical, format)`, without producing one
    pub fn lookup(&self, canonical: &str, format: LocalFormat) -> Result<Option<PathBuf>> {
        Ok(self
            .artifacts
            .get(&cache_key(canonical, format))?
            .map(|artifact| artifact.path))
    }

    /// Path to `id`'s content in `wanted`, downloading and converting on a miss
    pub fn materialize(
        &self,
        resolver: &Resolver,
        registry: Option<&dyn RegistryApi>,
        id: &str,
        wanted: LocalFormat,
    ) -> Result<PathBuf> {
        let canonical = resolver.resolve(registry, id)?;
        self.materialize_canonical(resolver, registry, &canonical, wanted)
    }

    fn materialize_canonical(
        &self,
        resolver: &Resolver,
        registry: Option<&dyn RegistryApi>,
        canonical: &str,
        wanted: LocalFormat,
    ) -> Result<PathBuf> {
        if let Some(path) = self.lookup(canonical, wanted)? {
            debug!("artifact for {canonical} as {wanted} is cached", canonical: canonical, wanted: wanted.as_str());
            return Ok(path);
        }

        let storage = resolver.storage_format(registry, canonical)?;
        let plan = plan(wanted, storage).ok_or_else(|| Error::UnsupportedConversion {
            id: canonical.to_string(),
            wanted,
            storage,
        })?;

        info!(
            "materializing {canonical} as {wanted} from {storage}",
            canonical: canonical,
            wanted: wanted.as_str(),
            storage: storage.as_str()
        );

        let path = match plan {
            Plan::Download(format) => {
                let registry = registry.ok_or_else(|| Error::NotCached {
                    id: canonical.to_string(),
                })?;
                let parsed = DatafileId::parse(canonical)
                    .ok_or_else(|| Error::MalformedIdentifier(canonical.to_string()))?;
                let file_name = parsed.file_name.as_deref().ok_or_else(|| Error::DatafileNotFound {
                    id: canonical.to_string(),
                })?;
                self.produce(canonical, wanted, |dest| {
                    registry.download_datafile(&parsed.permaname, parsed.version, file_name, dest, format)
                })?
            }
            Plan::Convert { from, conversion } => {
                let src = self.materialize_canonical(resolver, registry, canonical, from)?;
                self.produce(canonical, wanted, |dest| match conversion {
                    Conversion::CsvToParquet => convert::csv_to_parquet(&src, dest),
                    Conversion::ParquetToCsv => convert::parquet_to_csv(&src, dest),
                    Conversion::MatrixToCsv => convert::matrix_to_csv(&src, dest),
                    Conversion::ParquetToFeather => convert::parquet_to_feather(&src, dest),
                    Conversion::MatrixToFeather => convert::matrix_to_feather(&src, dest),
                })?
            }
        };

        Ok(path)
    }

    /// Run `write` against a fresh artifact path and record the result.
    /// On failure the partial artifact is removed.
    fn produce<F>(&self, canonical: &str, wanted: LocalFormat, write: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let dest = self
            .new_artifact_path(canonical, wanted)
            .map_err(|e| Error::materialize(canonical, wanted, e))?;

        let outcome = write(&dest).and_then(|()| {
            let artifact = CachedArtifact {
                path: dest.clone(),
                format: wanted,
                size: std::fs::metadata(&dest)?.len(),
            };
            self.artifacts.put(&cache_key(canonical, wanted), artifact)
        });

        match outcome {
            Ok(()) => Ok(dest),
            Err(err) => {
                let _ = std::fs::remove_file(&dest);
                Err(Error::materialize(canonical, wanted, err))
            }
        }
    }

    fn new_artifact_path(&self, canonical: &str, wanted: LocalFormat) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.download_dir)?;
        let prefix = format!("{}-", slugify(canonical));
        let (_, path) = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(wanted.extension())
            .tempfile_in(&self.download_dir)?
            .keep()
            .map_err(|e| e.error)?;
        Ok(path)
    }
}
