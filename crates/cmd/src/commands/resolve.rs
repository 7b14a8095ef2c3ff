// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use taiga::Client;

/// Resolve each identifier to the canonical identifier of the file it names
pub fn resolve_command<F>(client: &Client, ids: &[String], mut handler: F) -> Result<()>
where
    F: FnMut(&str),
{
    for id in ids {
        let canonical = client.resolve_canonical_id(id)?;
        diagnostics::debug!("resolved {id} to {canonical}", id: id.as_str(), canonical: canonical.as_str());
        if ids.len() == 1 {
            handler(&canonical);
        } else {
            handler(&format!("{id}\t{canonical}"));
        }
    }
    Ok(())
}
