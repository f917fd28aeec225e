//! Contains the implementation of the song catalog transform: raw song
//! metadata becomes the deduplicated songs and artists dimension tables.
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
use crate::{
    EtlConfig,
    config::SONG_DATA,
    datafusion::{
        ARTISTS_TABLE, SONG_DATA_TABLE, SONGS_TABLE, create_session_context,
        metrics::SongCatalogResult, output::overwrite_table, schema::song_data_schema,
        source::register_ndjson_dataset,
    },
    s3::ObjectStoreFactory,
};
use datafusion::{error::DataFusionError, prelude::*};
use log::info;
use url::Url;

/// Partition columns of the songs table.
const SONGS_PARTITIONS: [&str; 2] = ["year", "artist_id"];

/// Runs the song catalog transform.
///
/// Reads the raw song metadata dataset and writes the songs table
/// (partitioned by year then artist) and the unpartitioned artists table,
/// replacing both destinations.
///
/// # Errors
/// Fails if the raw dataset can't be read or either table can't be written.
pub async fn song_catalog_transform(
    store_factory: &ObjectStoreFactory,
    config: &EtlConfig,
) -> Result<SongCatalogResult, DataFusionError> {
    info!("Song catalog transform: {config}");
    let ctx = create_session_context(store_factory, config)?;
    let stats = register_ndjson_dataset(
        &ctx,
        store_factory,
        SONG_DATA_TABLE,
        &dataset_url(config)?,
        config.song_path_depth(),
        song_data_schema(),
    )
    .await?;
    let raw = ctx.table(SONG_DATA_TABLE).await?;

    let songs_written = overwrite_table(
        store_factory,
        songs_frame(raw.clone())?,
        &table_url(config, SONGS_TABLE)?,
        &SONGS_PARTITIONS,
    )
    .await?;
    let artists_written = overwrite_table(
        store_factory,
        artists_frame(raw)?,
        &table_url(config, ARTISTS_TABLE)?,
        &[],
    )
    .await?;

    Ok(SongCatalogResult {
        records_read: stats.rows_read,
        lines_skipped: stats.lines_skipped,
        songs_written,
        artists_written,
    })
}

/// The songs dimension: one row per distinct song projection.
pub(crate) fn songs_frame(raw: DataFrame) -> Result<DataFrame, DataFusionError> {
    raw.select(vec![
        col("song_id"),
        col("title"),
        col("artist_id"),
        col("year"),
        col("duration"),
    ])?
    .distinct()
}

/// The artists dimension: one row per distinct artist projection.
pub(crate) fn artists_frame(raw: DataFrame) -> Result<DataFrame, DataFusionError> {
    raw.select(vec![
        col("artist_id"),
        col("artist_name"),
        col("artist_location"),
        col("artist_latitude"),
        col("artist_longitude"),
    ])?
    .distinct()
}

fn dataset_url(config: &EtlConfig) -> Result<Url, DataFusionError> {
    config
        .dataset_url(SONG_DATA)
        .map_err(|e| DataFusionError::External(e.into()))
}

pub(crate) fn table_url(config: &EtlConfig, table: &str) -> Result<Url, DataFusionError> {
    config
        .table_url(table)
        .map_err(|e| DataFusionError::External(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::Result;
    use datafusion::dataframe;

    #[tokio::test]
    async fn should_deduplicate_songs() -> Result<()> {
        // Given
        let raw = dataframe![
            "song_id" => ["S1", "S1", "S2"],
            "title" => ["Test", "Test", "Other"],
            "artist_id" => ["A1", "A1", "A2"],
            "artist_name" => ["Band", "Band", "Solo"],
            "artist_location" => ["NYC", "NYC", "LA"],
            "artist_latitude" => [40.7, 40.7, 34.0],
            "artist_longitude" => [-74.0, -74.0, -118.2],
            "year" => [2000, 2000, 1999],
            "duration" => [200.5, 200.5, 100.0],
        ]?;

        // When
        let songs = songs_frame(raw)?.sort(vec![col("song_id").sort(true, false)])?;
        let batches = songs.collect().await?;

        // Then
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 2);
        Ok(())
    }

    #[tokio::test]
    async fn should_deduplicate_artists_across_songs() -> Result<()> {
        // Given two songs by the same artist
        let raw = dataframe![
            "song_id" => ["S1", "S2"],
            "title" => ["Test", "Other"],
            "artist_id" => ["A1", "A1"],
            "artist_name" => ["Band", "Band"],
            "artist_location" => ["NYC", "NYC"],
            "artist_latitude" => [40.7, 40.7],
            "artist_longitude" => [-74.0, -74.0],
            "year" => [2000, 2001],
            "duration" => [200.5, 100.0],
        ]?;

        // When
        let artists = artists_frame(raw)?;
        let batches = artists.collect().await?;

        // Then
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 1);
        Ok(())
    }

    #[tokio::test]
    async fn should_project_song_columns_only() -> Result<()> {
        // Given
        let raw = dataframe![
            "song_id" => ["S1"],
            "title" => ["Test"],
            "artist_id" => ["A1"],
            "artist_name" => ["Band"],
            "artist_location" => ["NYC"],
            "artist_latitude" => [40.7],
            "artist_longitude" => [-74.0],
            "year" => [2000],
            "duration" => [200.5],
        ]?;

        // When
        let songs = songs_frame(raw)?;

        // Then
        let names: Vec<_> = songs
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(names, ["song_id", "title", "artist_id", "year", "duration"]);
        Ok(())
    }
}
