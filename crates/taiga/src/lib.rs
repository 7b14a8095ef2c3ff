// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Client for the Taiga dataset registry
//!
//! Resolves datafile identifiers to the file that owns their bytes and keeps
//! local artifacts of those files, converted to the representation a caller
//! asks for, in a persistent cache.

pub mod api;
pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod format;
pub mod format_cache;
pub mod http;
pub mod id;
pub mod model;
pub mod resolver;
pub mod store;
pub mod upload;

pub use api::RegistryApi;
pub use client::Client;
pub use config::Config;
pub use error::{Error, Result};
pub use format::{DownloadFormat, LocalFormat, StorageFormat};
pub use format_cache::CachedArtifact;
pub use http::HttpRegistry;
pub use id::DatafileId;
pub use model::{DatasetMetadata, DatasetVersionFile, DatasetVersionMetadata, MinimalFileMetadata};
pub use upload::{SessionFile, UploadFile};
