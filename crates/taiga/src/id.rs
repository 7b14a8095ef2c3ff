// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Datafile identifiers
//!
//! The textual grammar is `permaname.version[/filename]`:
//!
//! - `permaname` is `[a-z0-9-]+`
//! - `version` is a decimal number without leading zeros
//! - `filename` is any non-empty string; without it the identifier names the
//!   dataset version as a whole
//!
//! Parsing returns `None` rather than an error so callers can tell a
//! malformed identifier apart from one that does not exist.

use crate::error::{Error, Result};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static DATAFILE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9-]+)\.(0|[1-9][0-9]*)(?:/(.+))?$").expect("identifier pattern is valid")
});

static NOT_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-z0-9]+").expect("slug pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatafileId {
    pub permaname: String,
    pub version: u64,
    pub file_name: Option<String>,
}

impl DatafileId {
    pub fn new<S: Into<String>>(permaname: S, version: u64, file_name: Option<String>) -> Self {
        Self {
            permaname: permaname.into(),
            version,
            file_name,
        }
    }

    /// Parse the textual form; `None` when `text` does not match the grammar
    pub fn parse(text: &str) -> Option<Self> {
        let caps = DATAFILE_ID.captures(text)?;
        let version = caps.get(2)?.as_str().parse::<u64>().ok()?;
        Some(Self {
            permaname: caps.get(1)?.as_str().to_string(),
            version,
            file_name: caps.get(3).map(|m| m.as_str().to_string()),
        })
    }

    /// `permaname.version`, without the file name
    pub fn dataset_version_id(&self) -> String {
        format_id(&self.permaname, self.version, None)
    }

    /// Identifier of the file `name` in the same dataset version
    pub fn with_file_name(&self, name: &str) -> Self {
        Self::new(self.permaname.clone(), self.version, Some(name.to_string()))
    }
}

/// Format an identifier; the `/filename` suffix is omitted when absent
pub fn format_id(permaname: &str, version: u64, file_name: Option<&str>) -> String {
    match file_name {
        Some(name) => format!("{permaname}.{version}/{name}"),
        None => format!("{permaname}.{version}"),
    }
}

/// Lower-case `id` and collapse every run of characters outside `[a-z0-9]` to `-`
pub fn slugify(id: &str) -> String {
    NOT_SLUG.replace_all(&id.to_lowercase(), "-").into_owned()
}

impl fmt::Display for DatafileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_id(
            &self.permaname,
            self.version,
            self.file_name.as_deref(),
        ))
    }
}

impl FromStr for DatafileId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| Error::MalformedIdentifier(s.to_string()))
    }
}
