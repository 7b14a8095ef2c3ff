// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use taiga::Client;

/// Report the storage format of a datafile and every local format it can become
///
/// Formats that are already materialized are marked with their artifact path.
pub fn formats_command<F>(client: &Client, id: &str, mut handler: F) -> Result<()>
where
    F: FnMut(&str),
{
    let canonical = client.resolve_canonical_id(id)?;
    let storage = client.storage_format(&canonical)?;
    handler(&format!("{canonical}: {}", storage.as_str()));

    for format in client.allowed_local_formats(&canonical)? {
        match client.cached_artifact(&canonical, format)? {
            Some(path) => handler(&format!("  {} (cached at {})", format.as_str(), path.display())),
            None => handler(&format!("  {}", format.as_str())),
        }
    }
    Ok(())
}
