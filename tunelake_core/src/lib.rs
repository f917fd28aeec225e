//! The `tunelake_core` crate implements the batch ETL that reshapes a music
//! streaming service's raw play event logs and song metadata into a star
//! schema of Hive-partitioned Parquet tables on object storage. All heavy
//! data processing is delegated to Apache `DataFusion`.
//!
//! The public API is the [`run_pipeline`] function plus the configuration
//! builder; the internal `datafusion` module encapsulates the workings.
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
use crate::s3::{ObjectStoreFactory, default_creds_store};
use color_eyre::eyre::Result;

mod config;
mod datafusion;
pub mod s3;

pub use config::{
    AwsConfig, DEFAULT_LOG_PATH_DEPTH, DEFAULT_SONG_PATH_DEPTH, EtlConfig, EtlConfigBuilder,
    LOG_DATA, SONG_DATA,
};
pub use datafusion::{
    ARTISTS_TABLE, EventLogResult, PipelineResult, SONGPLAYS_TABLE, SONGS_TABLE, SongCatalogResult,
    SourceStats, TIME_TABLE, USERS_TABLE,
};

/// Runs the full ETL pipeline: the song catalog transform followed by the
/// event log transform.
///
/// The `aws_config` in the configuration is optional if you are not reading
/// or writing S3 URLs; without it, credentials come from the standard AWS
/// provider chain.
///
/// # Examples
/// ```no_run
/// # use url::Url;
/// # use tunelake_core::{run_pipeline, EtlConfigBuilder};
/// # fn main() -> Result<(), color_eyre::eyre::Report> {
/// let config = EtlConfigBuilder::new()
///     .input_root(Url::parse("s3://raw-events/").unwrap())
///     .output_root(Url::parse("s3://lake-tables/").unwrap())
///     .build()?;
/// # tokio_test::block_on(async {
/// let result = run_pipeline(&config).await;
/// # });
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// Fails if either raw dataset can't be read or any output table can't be
/// written. Tables written before the failure are left in place.
pub async fn run_pipeline(config: &EtlConfig) -> Result<PipelineResult> {
    let store_factory = create_object_store_factory(config.aws_config()).await;
    let song_catalog = crate::datafusion::song_catalog_transform(&store_factory, config).await?;
    let event_log = crate::datafusion::event_log_transform(&store_factory, config).await?;
    let result = PipelineResult {
        song_catalog,
        event_log,
    };
    result.log_summary();
    Ok(result)
}

/// Runs only the song catalog transform, producing the songs and artists
/// tables.
///
/// # Errors
/// Fails if the raw song dataset can't be read or either table can't be
/// written.
pub async fn run_song_catalog(config: &EtlConfig) -> Result<SongCatalogResult> {
    let store_factory = create_object_store_factory(config.aws_config()).await;
    crate::datafusion::song_catalog_transform(&store_factory, config)
        .await
        .map_err(Into::into)
}

/// Runs only the event log transform, producing the users, time and
/// songplays tables.
///
/// # Errors
/// Fails if either raw dataset can't be read or any table can't be written.
pub async fn run_event_log(config: &EtlConfig) -> Result<EventLogResult> {
    let store_factory = create_object_store_factory(config.aws_config()).await;
    crate::datafusion::event_log_transform(&store_factory, config)
        .await
        .map_err(Into::into)
}

async fn create_object_store_factory(
    aws_config_override: Option<&AwsConfig>,
) -> ObjectStoreFactory {
    let s3_config = match aws_config_override {
        Some(aws_config) => Some(aws_config.to_s3_config()),
        None => default_creds_store().await.ok(),
    };
    ObjectStoreFactory::new(s3_config)
}
