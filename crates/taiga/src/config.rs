// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_URL: &str = "https://cds.team/taiga";
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Directory under the home directory holding the default cache and token
const HOME_DIR_NAME: &str = ".taiga";
/// Token file looked up in the working directory before the cache directory
const LOCAL_TOKEN_FILE: &str = ".taiga-token";

pub const URL_ENV: &str = "TAIGA_URL";
pub const CACHE_DIR_ENV: &str = "TAIGA_CACHE_DIR";
pub const TOKEN_PATH_ENV: &str = "TAIGA_TOKEN_PATH";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_url")]
    pub url: String,

    /// Bearer token file; defaults to `./.taiga-token`, then `<cache_dir>/token`
    #[serde(default)]
    pub token_path: Option<PathBuf>,

    /// Defaults to `~/.taiga`
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Serve only what is already cached
    #[serde(default)]
    pub offline: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: default_url(),
            token_path: None,
            cache_dir: None,
            offline: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn home_taiga_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(HOME_DIR_NAME))
        .ok_or_else(|| Error::Config("HOME is not set and no cache_dir was configured".to_string()))
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!(
                "failed to read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml_ng::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse YAML configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else `~/.taiga/config.yaml` when it exists, else
    /// the defaults; then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match home_taiga_dir().map(|dir| dir.join("config.yaml")) {
                Ok(default) if default.exists() => Self::from_file(default)?,
                _ => Self::default(),
            },
        };
        config.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `TAIGA_URL`, `TAIGA_CACHE_DIR`, and `TAIGA_TOKEN_PATH` as found by `lookup`
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(URL_ENV) {
            self.url = url;
        }
        if let Some(dir) = lookup(CACHE_DIR_ENV) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = lookup(TOKEN_PATH_ENV) {
            self.token_path = Some(PathBuf::from(path));
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| Error::Config(format!("invalid registry url {:?}: {e}", self.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "registry url must be http or https, got {}",
                url.scheme()
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be greater than 0".to_string()));
        }
        if self.cache_dir.as_ref().is_some_and(|d| d.as_os_str().is_empty()) {
            return Err(Error::Config("cache_dir cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => home_taiga_dir(),
        }
    }

    /// First existing token file among the candidates
    pub fn token_file(&self) -> Result<PathBuf> {
        let candidates = match &self.token_path {
            Some(path) => vec![path.clone()],
            None => vec![PathBuf::from(LOCAL_TOKEN_FILE), self.cache_dir()?.join("token")],
        };
        candidates
            .iter()
            .find(|path| path.is_file())
            .cloned()
            .ok_or_else(|| {
                let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
                Error::Config(format!("no token file found (tried {})", tried.join(", ")))
            })
    }

    /// The first line of the token file, trimmed
    pub fn read_token(&self) -> Result<String> {
        let path = self.token_file()?;
        let content = std::fs::read_to_string(&path)?;
        let token = content.lines().next().unwrap_or_default().trim().to_string();
        if token.is_empty() {
            return Err(Error::Config(format!("token file {} is empty", path.display())));
        }
        Ok(token)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}
