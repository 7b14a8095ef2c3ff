// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Result, anyhow};
use taiga::{Client, DatafileId};

/// Print registry metadata as JSON
///
/// - `permaname` prints the dataset with its versions
/// - `permaname.version` prints the dataset version with its files
/// - `permaname.version/file` prints the cached file metadata
pub fn metadata_command<F>(client: &Client, target: &str, mut handler: F) -> Result<()>
where
    F: FnMut(&str),
{
    let json = match DatafileId::parse(target) {
        Some(id) if id.file_name.is_some() => {
            let metadata = client
                .minimal_metadata(target)?
                .ok_or_else(|| anyhow!("No metadata for datafile {target}"))?;
            serde_json::to_string_pretty(&metadata)?
        }
        Some(id) => {
            let metadata = client
                .dataset_version_metadata(&id.permaname, id.version)?
                .ok_or_else(|| anyhow!("Dataset version {target} not found"))?;
            serde_json::to_string_pretty(&metadata)?
        }
        None => {
            let metadata = client
                .dataset_metadata(target)?
                .ok_or_else(|| anyhow!("Dataset {target} not found"))?;
            serde_json::to_string_pretty(&metadata)?
        }
    };
    handler(&json);
    Ok(())
}
