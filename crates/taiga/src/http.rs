// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Blocking HTTP implementation of [`RegistryApi`]
//!
//! Every request carries the bearer token and the `taigapy_version` query
//! parameter the registry uses to gate client compatibility. Connection
//! failures and 5xx answers are retried with exponential backoff. A datafile
//! request the registry must first convert answers 202 with a task id; the
//! task is polled until it settles and the request is repeated.

use crate::api::RegistryApi;
use crate::error::{Error, Result};
use crate::format::DownloadFormat;
use crate::id::format_id;
use crate::model::{DatasetMetadata, DatasetVersionMetadata};
use backon::{BlockingRetryable, ExponentialBuilder};
use diagnostics::*;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Client protocol version reported to the registry
pub const PROTOCOL_VERSION: &str = "3.0.3";

const DEFAULT_RETRIES: usize = 3;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Conversion rounds tolerated before a datafile request gives up
const MAX_CONVERSION_ROUNDS: usize = 8;

#[derive(Deserialize, Debug)]
struct DatafileUrls {
    #[serde(default)]
    urls: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct TaskStatus {
    state: String,
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpRegistry {
    base: Url,
    token: String,
    client: Client,
    retries: usize,
    poll_interval: Duration,
}

impl HttpRegistry {
    pub fn new(url: &str, token: String, timeout: Duration) -> Result<Self> {
        let base = Url::parse(url)?;
        if base.cannot_be_a_base() {
            return Err(Error::Config(format!("registry url {url} cannot be a base")));
        }
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|source| Error::Http {
                url: url.to_string(),
                source,
            })?;

        Ok(Self {
            base,
            token,
            client,
            retries: DEFAULT_RETRIES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    // URL construction helpers
    fn endpoint(&self, segments: &[&str], params: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| Error::Config(format!("registry url {} cannot be a base", self.base)))?;
            let _ = path.pop_if_empty().extend(segments);
        }
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                let _ = query.append_pair(key, value);
            }
            let _ = query.append_pair("taigapy_version", PROTOCOL_VERSION);
        }
        Ok(url)
    }

    fn dataset_url(&self, permaname: &str, version: Option<u64>) -> Result<Url> {
        match version {
            Some(version) => self.endpoint(&["api", "dataset", permaname, &version.to_string()], &[]),
            None => self.endpoint(&["api", "dataset", permaname], &[]),
        }
    }

    fn datafile_url(
        &self,
        permaname: &str,
        version: u64,
        file_name: &str,
        format: DownloadFormat,
    ) -> Result<Url> {
        self.endpoint(
            &["api", "datafile"],
            &[
                ("dataset_permaname", permaname),
                ("version", &version.to_string()),
                ("datafile_name", file_name),
                ("format", format.as_str()),
            ],
        )
    }

    fn task_status_url(&self, task_id: &str) -> Result<Url> {
        self.endpoint(&["api", "task_status", task_id], &[])
    }

    /// Authenticated GET, retrying transport failures and server errors
    fn send(&self, url: &Url) -> Result<Response> {
        let attempt = || {
            debug!("GET {url}", url: url.as_str());
            let response = self
                .client
                .get(url.clone())
                .bearer_auth(&self.token)
                .send()
                .map_err(|source| Error::Http {
                    url: url.to_string(),
                    source,
                })?;
            if response.status().is_server_error() {
                return Err(Error::ServerError {
                    url: url.to_string(),
                });
            }
            Ok(response)
        };

        attempt
            .retry(ExponentialBuilder::default().with_max_times(self.retries))
            .sleep(std::thread::sleep)
            .when(Error::is_retryable)
            .notify(|err, _| {
                let reason = err.to_string();
                warn!("retrying request: {reason}", reason: reason.as_str());
            })
            .call()
    }

    fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<Option<T>> {
        let response = self.send(url)?;
        match response.status() {
            StatusCode::OK => Ok(Some(parse_json(url, response)?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(status_error(url, response)),
        }
    }

    /// Poll a server-side conversion until it settles
    fn wait_for_task(&self, task_id: &str) -> Result<()> {
        let url = self.task_status_url(task_id)?;
        loop {
            let status: TaskStatus = self.get_json(&url)?.ok_or_else(|| Error::TaskFailed {
                task: task_id.to_string(),
                message: "unknown task".to_string(),
            })?;
            match status.state.as_str() {
                "SUCCESS" => return Ok(()),
                "FAILURE" => {
                    return Err(Error::TaskFailed {
                        task: task_id.to_string(),
                        message: status.message.unwrap_or_default(),
                    });
                }
                state => {
                    debug!("task {task_id} is {state}", task_id: task_id, state: state);
                    std::thread::sleep(self.poll_interval);
                }
            }
        }
    }

    /// Stream a signed download URL into `dest`. The token is not sent.
    fn fetch_to(&self, download_url: &str, dest: &Path) -> Result<u64> {
        let attempt = || {
            let mut response = self
                .client
                .get(download_url)
                .send()
                .map_err(|source| Error::Http {
                    url: download_url.to_string(),
                    source,
                })?;
            let status = response.status();
            if status.is_server_error() {
                return Err(Error::ServerError {
                    url: download_url.to_string(),
                });
            }
            if !status.is_success() {
                return Err(Error::HttpStatus {
                    url: download_url.to_string(),
                    status: status.as_u16(),
                    body: response.text().unwrap_or_default(),
                });
            }
            let mut file = File::create(dest)?;
            response.copy_to(&mut file).map_err(|source| Error::Http {
                url: download_url.to_string(),
                source,
            })
        };

        attempt
            .retry(ExponentialBuilder::default().with_max_times(self.retries))
            .sleep(std::thread::sleep)
            .when(Error::is_retryable)
            .call()
    }
}

fn parse_json<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T> {
    let text = response.text().map_err(|source| Error::Http {
        url: url.to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

fn status_error(url: &Url, response: Response) -> Error {
    Error::HttpStatus {
        url: url.to_string(),
        status: response.status().as_u16(),
        body: response.text().unwrap_or_default(),
    }
}

impl RegistryApi for HttpRegistry {
    fn dataset_version_metadata(
        &self,
        permaname: &str,
        version: u64,
    ) -> Result<Option<DatasetVersionMetadata>> {
        self.get_json(&self.dataset_url(permaname, Some(version))?)
    }

    fn dataset_metadata(&self, permaname: &str) -> Result<Option<DatasetMetadata>> {
        self.get_json(&self.dataset_url(permaname, None)?)
    }

    fn download_datafile(
        &self,
        permaname: &str,
        version: u64,
        file_name: &str,
        dest: &Path,
        format: DownloadFormat,
    ) -> Result<()> {
        let url = self.datafile_url(permaname, version, file_name, format)?;

        for _ in 0..MAX_CONVERSION_ROUNDS {
            let response = self.send(&url)?;
            match response.status() {
                StatusCode::OK => {
                    let DatafileUrls { urls } = parse_json(&url, response)?;
                    let download_url = urls.first().ok_or_else(|| Error::HttpStatus {
                        url: url.to_string(),
                        status: StatusCode::OK.as_u16(),
                        body: "no download url in response".to_string(),
                    })?;
                    let bytes = self.fetch_to(download_url, dest)?;
                    info!(
                        "downloaded {bytes} bytes of {permaname}.{version}/{file_name}",
                        bytes: bytes,
                        permaname: permaname,
                        version: version,
                        file_name: file_name
                    );
                    return Ok(());
                }
                StatusCode::ACCEPTED => {
                    let task_id: String = parse_json(&url, response)?;
                    info!("waiting for registry conversion task {task_id}", task_id: task_id.as_str());
                    self.wait_for_task(&task_id)?;
                }
                StatusCode::NOT_FOUND => {
                    return Err(Error::DatafileNotFound {
                        id: format_id(permaname, version, Some(file_name)),
                    });
                }
                _ => return Err(status_error(&url, response)),
            }
        }

        Err(Error::TaskFailed {
            task: format_id(permaname, version, Some(file_name)),
            message: format!("still converting after {MAX_CONVERSION_ROUNDS} rounds"),
        })
    }
}
