// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use taiga::Client;

pub fn latest_command<F>(client: &Client, permaname: &str, mut handler: F) -> Result<()>
where
    F: FnMut(&str),
{
    handler(&client.latest_version_id(permaname)?);
    Ok(())
}
