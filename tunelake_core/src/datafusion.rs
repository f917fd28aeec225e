//! `DataFusion` contains the implementation for performing the ETL
//! transformations using Apache `DataFusion`.
//!
//! This allows for multi-threaded data processing and optimised partitioned
//! Parquet writing.
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
use crate::{EtlConfig, s3::ObjectStoreFactory};
use datafusion::{
    error::DataFusionError,
    prelude::{SessionConfig, SessionContext},
};

mod event_log;
mod metrics;
mod output;
mod schema;
mod song_catalog;
mod source;

pub use event_log::event_log_transform;
pub use metrics::{EventLogResult, PipelineResult, SongCatalogResult};
pub use song_catalog::song_catalog_transform;
pub use source::SourceStats;

/// Output table name for the song dimension.
pub const SONGS_TABLE: &str = "songs";
/// Output table name for the artist dimension.
pub const ARTISTS_TABLE: &str = "artists";
/// Output table name for the user dimension.
pub const USERS_TABLE: &str = "users";
/// Output table name for the calendar dimension.
pub const TIME_TABLE: &str = "time";
/// Output table name for the songplay fact table.
pub const SONGPLAYS_TABLE: &str = "songplays";

/// Registered name of the in-memory raw song metadata table.
pub(crate) const SONG_DATA_TABLE: &str = "song_data";
/// Registered name of the in-memory raw event log table.
pub(crate) const LOG_DATA_TABLE: &str = "log_data";

/// Create a [`SessionContext`] for a transform stage with the object store
/// for the output root registered.
///
/// Input data doesn't need a registered store as raw datasets are read
/// through the [`source`] module and registered as in-memory tables.
///
/// # Errors
/// If an object store can't be created for the output root URL.
pub(crate) fn create_session_context(
    store_factory: &ObjectStoreFactory,
    config: &EtlConfig,
) -> Result<SessionContext, DataFusionError> {
    let ctx = SessionContext::new_with_config(SessionConfig::new());
    let out_store = store_factory
        .get_object_store(config.output_root())
        .map_err(|e| DataFusionError::External(e.into()))?;
    ctx.runtime_env()
        .register_object_store(config.output_root(), out_store);
    Ok(ctx)
}
