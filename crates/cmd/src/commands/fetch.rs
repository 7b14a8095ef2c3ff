// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Result, anyhow};
use taiga::{Client, LocalFormat};

/// Materialize a datafile locally and report the artifact path
///
/// Without an explicit format the first format the file's storage allows is used.
pub fn fetch_command<F>(
    client: &Client,
    id: &str,
    format: Option<LocalFormat>,
    mut handler: F,
) -> Result<()>
where
    F: FnMut(&str),
{
    let format = match format {
        Some(format) => format,
        None => client
            .allowed_local_formats(id)?
            .first()
            .copied()
            .ok_or_else(|| anyhow!("No local format is available for {id}"))?,
    };

    let path = client.materialize(id, format)?;
    diagnostics::info!(
        "fetched {id} as {format}",
        id: id,
        format: format.as_str()
    );
    handler(&path.display().to_string());
    Ok(())
}
