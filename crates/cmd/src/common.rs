// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use taiga::{Client, Config, LocalFormat};

/// Local representation to materialize
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FormatChoice {
    /// HDF5 dense matrix with row and column labels
    DenseMatrix,
    /// Parquet
    ColumnarTable,
    /// CSV table
    CsvTable,
    /// CSV matrix with row labels
    CsvMatrix,
    /// Feather matrix with row labels
    FeatherMatrix,
    /// Feather table
    FeatherTable,
    /// Bytes as stored
    Raw,
}

impl From<FormatChoice> for LocalFormat {
    fn from(choice: FormatChoice) -> Self {
        match choice {
            FormatChoice::DenseMatrix => LocalFormat::DenseMatrix,
            FormatChoice::ColumnarTable => LocalFormat::ColumnarTable,
            FormatChoice::CsvTable => LocalFormat::CsvTable,
            FormatChoice::CsvMatrix => LocalFormat::CsvMatrix,
            FormatChoice::FeatherMatrix => LocalFormat::FeatherMatrix,
            FormatChoice::FeatherTable => LocalFormat::FeatherTable,
            FormatChoice::Raw => LocalFormat::Raw,
        }
    }
}

/// Everything needed to build a client, gathered from the command line
#[derive(Clone, Debug, Default)]
pub struct ClientContext {
    pub config_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub offline: bool,
}

impl ClientContext {
    /// Configuration with command-line flags applied over file and environment
    pub fn config(&self) -> Result<Config> {
        let mut config = Config::load(self.config_path.as_deref())
            .with_context(|| "Failed to load Taiga configuration")?;
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
        config.offline |= self.offline;
        config.validate()?;
        Ok(config)
    }

    pub fn open_client(&self) -> Result<Client> {
        let config = self.config()?;
        let client = Client::from_config(&config).with_context(|| {
            format!("Failed to open Taiga client for {}", config.url)
        })?;
        diagnostics::debug!(
            "opened client with cache {cache_dir}",
            cache_dir: client.cache_dir().display().to_string().as_str()
        );
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_choice_maps_every_local_format() {
        for choice in FormatChoice::value_variants() {
            let format: LocalFormat = (*choice).into();
            let name = choice
                .to_possible_value()
                .map(|v| v.get_name().to_string())
                .unwrap_or_default();
            assert_eq!(name.replace('-', "_"), format.as_str());
        }
        assert_eq!(FormatChoice::value_variants().len(), LocalFormat::ALL.len());
    }
}
