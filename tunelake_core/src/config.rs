/*
* Copyright 2022-2025 Crown Copyright
*
* Licensed under the Apache License, Version 2.0 (the "License");
* you may not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
*     http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific language governing permissions and
* limitations under the License.
*/
use crate::s3::config_for_s3_module;
use aws_config::Region;
use aws_credential_types::Credentials;
use color_eyre::eyre::{Result, bail, eyre};
use object_store::aws::AmazonS3Builder;
use std::fmt::{Display, Formatter};
use url::Url;

/// Directory under the input root containing song metadata files.
pub const SONG_DATA: &str = "song_data";
/// Directory under the input root containing play event log files.
pub const LOG_DATA: &str = "log_data";

/// Path depth of song metadata files below `song_data/`: three nested
/// directories plus the file itself.
pub const DEFAULT_SONG_PATH_DEPTH: usize = 4;
/// Path depth of event log files below `log_data/`: two nested
/// directories plus the file itself.
pub const DEFAULT_LOG_PATH_DEPTH: usize = 3;

/// Common items necessary to perform a `DataFusion` based ETL run.
#[derive(Debug)]
pub struct EtlConfig {
    /// Aws credentials configuration
    aws_config: Option<AwsConfig>,
    /// Root URL the raw song and log datasets are read from
    input_root: Url,
    /// Root URL the star schema tables are written under
    output_root: Url,
    /// Path depth of song metadata files below the `song_data` root
    song_path_depth: usize,
    /// Path depth of event log files below the `log_data` root
    log_path_depth: usize,
}

impl EtlConfig {
    pub fn aws_config(&self) -> Option<&AwsConfig> {
        self.aws_config.as_ref()
    }

    pub fn input_root(&self) -> &Url {
        &self.input_root
    }

    pub fn output_root(&self) -> &Url {
        &self.output_root
    }

    pub fn song_path_depth(&self) -> usize {
        self.song_path_depth
    }

    pub fn log_path_depth(&self) -> usize {
        self.log_path_depth
    }

    /// URL of a raw dataset directory, e.g. `song_data`, under the input root.
    ///
    /// # Errors
    /// If the joined URL is not valid.
    pub fn dataset_url(&self, dataset: &str) -> Result<Url> {
        join_dir(&self.input_root, dataset)
    }

    /// URL of an output table directory, e.g. `songs`, under the output root.
    ///
    /// # Errors
    /// If the joined URL is not valid.
    pub fn table_url(&self, table: &str) -> Result<Url> {
        join_dir(&self.output_root, table)
    }
}

impl Display for EtlConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "input root {:?} (song depth {}, log depth {}), output root {:?}",
            self.input_root.as_str(),
            self.song_path_depth,
            self.log_path_depth,
            self.output_root.as_str()
        )
    }
}

/// Join a directory name onto a root URL, keeping the trailing slash so
/// further joins treat it as a directory.
fn join_dir(root: &Url, name: &str) -> Result<Url> {
    root.join(&format!("{name}/"))
        .map_err(|e| eyre!("invalid URL segment {name:?}: {e}"))
}

/// Builder for `EtlConfig`.
#[derive(Debug, Default)]
pub struct EtlConfigBuilder {
    aws_config: Option<AwsConfig>,
    input_root: Option<Url>,
    output_root: Option<Url>,
    song_path_depth: Option<usize>,
    log_path_depth: Option<usize>,
}

impl EtlConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn aws_config(mut self, aws_config: Option<AwsConfig>) -> Self {
        self.aws_config = aws_config;
        self
    }

    #[must_use]
    pub fn input_root(mut self, input_root: Url) -> Self {
        self.input_root = Some(input_root);
        self
    }

    #[must_use]
    pub fn output_root(mut self, output_root: Url) -> Self {
        self.output_root = Some(output_root);
        self
    }

    #[must_use]
    pub fn song_path_depth(mut self, depth: usize) -> Self {
        self.song_path_depth = Some(depth);
        self
    }

    #[must_use]
    pub fn log_path_depth(mut self, depth: usize) -> Self {
        self.log_path_depth = Some(depth);
        self
    }

    /// Build the `EtlConfig`, consuming the builder and validating required fields.
    ///
    /// # Errors
    /// Input and output roots must be set and path depths must be non-zero.
    pub fn build(self) -> Result<EtlConfig> {
        let Some(input_root) = self.input_root else {
            bail!("No input root supplied");
        };
        let Some(output_root) = self.output_root else {
            bail!("No output root supplied");
        };
        let song_path_depth = self.song_path_depth.unwrap_or(DEFAULT_SONG_PATH_DEPTH);
        let log_path_depth = self.log_path_depth.unwrap_or(DEFAULT_LOG_PATH_DEPTH);
        if song_path_depth == 0 || log_path_depth == 0 {
            bail!("Dataset path depths must be at least 1");
        }
        Ok(EtlConfig {
            aws_config: self.aws_config,
            input_root: normalise_root(input_root),
            output_root: normalise_root(output_root),
            song_path_depth,
            log_path_depth,
        })
    }
}

/// Change an `s3a` scheme to `s3` and ensure the path ends with a slash
/// so the URL joins as a directory.
fn normalise_root(mut url: Url) -> Url {
    if url.scheme() == "s3a" {
        let _ = url.set_scheme("s3");
    }
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    url
}

#[derive(Debug)]
pub struct AwsConfig {
    pub region: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
    pub allow_http: bool,
}

impl AwsConfig {
    /// Create an [`AmazonS3Builder`] from the given configuration object.
    ///
    /// Credentials are extracted from the given configuration object.
    #[must_use]
    pub(crate) fn to_s3_config(&self) -> AmazonS3Builder {
        let creds = Credentials::from_keys(
            &self.access_key,
            &self.secret_key,
            self.session_token.clone(),
        );
        let region = Region::new(String::from(&self.region));
        let mut builder = config_for_s3_module(&creds, &region);
        if !self.endpoint.is_empty() {
            builder = builder.with_endpoint(&self.endpoint);
        }
        builder.with_allow_http(self.allow_http)
    }
}
