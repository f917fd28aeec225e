//! Contains the implementation of the event log transform: raw play events
//! become the users and time dimension tables and the songplays fact table.
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
    config::{LOG_DATA, SONG_DATA},
    datafusion::{
        LOG_DATA_TABLE, SONG_DATA_TABLE, SONGPLAYS_TABLE, TIME_TABLE, USERS_TABLE,
        create_session_context,
        metrics::EventLogResult,
        output::overwrite_table,
        schema::{log_data_schema, song_data_schema, start_time_type},
        song_catalog::table_url,
        source::register_ndjson_dataset,
    },
    s3::ObjectStoreFactory,
};
use datafusion::{
    common::JoinType,
    error::DataFusionError,
    functions::expr_fn::date_part,
    functions_window::expr_fn::row_number,
    logical_expr::ExprFunctionExt,
    prelude::*,
};
use log::info;

/// Page value identifying an actual play event. All other pages
/// (navigation, auth, etc.) are excluded from every output table.
const NEXT_SONG_PAGE: &str = "NextSong";

/// Partition columns shared by the time and songplays tables.
const CALENDAR_PARTITIONS: [&str; 2] = ["year", "month"];

/// Runs the event log transform.
///
/// Reads the raw event log dataset, filters it to play events and writes
/// the users table, the time table and the songplays fact table, replacing
/// all three destinations. The song catalog is re-read from its raw source
/// for the songplays join rather than from the songs table written by the
/// song catalog transform.
///
/// # Errors
/// Fails if either raw dataset can't be read or any table can't be written.
pub async fn event_log_transform(
    store_factory: &ObjectStoreFactory,
    config: &EtlConfig,
) -> Result<EventLogResult, DataFusionError> {
    info!("Event log transform: {config}");
    let ctx = create_session_context(store_factory, config)?;
    let log_stats = register_ndjson_dataset(
        &ctx,
        store_factory,
        LOG_DATA_TABLE,
        &config
            .dataset_url(LOG_DATA)
            .map_err(|e| DataFusionError::External(e.into()))?,
        config.log_path_depth(),
        log_data_schema(),
    )
    .await?;
    register_ndjson_dataset(
        &ctx,
        store_factory,
        SONG_DATA_TABLE,
        &config
            .dataset_url(SONG_DATA)
            .map_err(|e| DataFusionError::External(e.into()))?,
        config.song_path_depth(),
        song_data_schema(),
    )
    .await?;

    let plays = ctx
        .table(LOG_DATA_TABLE)
        .await?
        .filter(col("page").eq(lit(NEXT_SONG_PAGE)))?;

    let users_written = overwrite_table(
        store_factory,
        users_frame(plays.clone())?,
        &table_url(config, USERS_TABLE)?,
        &[],
    )
    .await?;
    let time_slots_written = overwrite_table(
        store_factory,
        time_frame(plays.clone())?,
        &table_url(config, TIME_TABLE)?,
        &CALENDAR_PARTITIONS,
    )
    .await?;
    let songs = ctx.table(SONG_DATA_TABLE).await?;
    let songplays_written = overwrite_table(
        store_factory,
        songplays_frame(plays, songs)?,
        &table_url(config, SONGPLAYS_TABLE)?,
        &CALENDAR_PARTITIONS,
    )
    .await?;

    Ok(EventLogResult {
        records_read: log_stats.rows_read,
        lines_skipped: log_stats.lines_skipped,
        users_written,
        time_slots_written,
        songplays_written,
    })
}

/// Decode the epoch-millisecond `ts` column to a second-resolution
/// timestamp named `start_time`. Integer division truncates the
/// sub-second part.
fn decoded_timestamp() -> Expr {
    cast(col("ts") / lit(1_000_i64), start_time_type()).alias("start_time")
}

/// One calendar component of `start_time`.
///
/// Uses `date_part`, so the numbering follows the PostgreSQL conventions:
/// `week` is the ISO week of year and `dow` runs 0 = Sunday to
/// 6 = Saturday.
fn calendar_part(part: &str) -> Expr {
    cast(
        date_part(lit(part), col("start_time")),
        arrow::datatypes::DataType::Int32,
    )
}

/// The users dimension: one row per distinct user projection.
pub(crate) fn users_frame(plays: DataFrame) -> Result<DataFrame, DataFusionError> {
    plays
        .select(vec![
            ident("userId"),
            ident("firstName"),
            ident("lastName"),
            col("gender"),
            col("level"),
        ])?
        .distinct()
}

/// The time dimension: one row per distinct decoded timestamp, decomposed
/// into calendar columns.
pub(crate) fn time_frame(plays: DataFrame) -> Result<DataFrame, DataFusionError> {
    plays
        .select(vec![decoded_timestamp()])?
        .distinct()?
        .select(vec![
            col("start_time"),
            calendar_part("hour").alias("hour"),
            calendar_part("day").alias("day"),
            calendar_part("week").alias("week"),
            calendar_part("month").alias("month"),
            calendar_part("year").alias("year"),
            calendar_part("dow").alias("weekday"),
        ])
}

/// The songplays fact table.
///
/// Play events are left joined to the song catalog on exact equality of the
/// event's song title with the catalog title, so events with no catalog
/// match keep null song and artist columns. The join key is knowingly
/// fragile (case, whitespace and homonym mismatches); changing it would
/// change output semantics, so it is kept as-is.
///
/// Each row is given a `songplay_id` by numbering the deduplicated rows in
/// (`start_time`, `userId`, `sessionId`) order, which makes the assignment
/// repeatable across runs over the same input.
pub(crate) fn songplays_frame(
    plays: DataFrame,
    songs: DataFrame,
) -> Result<DataFrame, DataFusionError> {
    let plays = plays.select(vec![
        decoded_timestamp(),
        ident("userId"),
        col("level"),
        ident("sessionId"),
        ident("userAgent"),
        col("song"),
    ])?;
    let catalog = songs.select(vec![
        col("song_id"),
        col("artist_id"),
        col("title"),
        col("artist_location"),
    ])?;
    let joined = plays.join(catalog, JoinType::Left, &["song"], &["title"], None)?;
    let deduplicated = joined
        .select(vec![
            col("start_time"),
            ident("userId"),
            col("level"),
            col("song_id"),
            col("artist_id"),
            ident("sessionId"),
            col("artist_location").alias("location"),
            ident("userAgent"),
            calendar_part("year").alias("year"),
            calendar_part("month").alias("month"),
        ])?
        .distinct()?;
    let songplay_id = row_number()
        .order_by(vec![
            col("start_time").sort(true, false),
            ident("userId").sort(true, false),
            ident("sessionId").sort(true, false),
        ])
        .build()?
        .alias("songplay_id");
    deduplicated.window(vec![songplay_id])
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::{
            Array, Int32Array, Int64Array, RecordBatch, StringArray, TimestampSecondArray,
            UInt64Array,
        },
        datatypes::{DataType, Field, Schema},
    };
    use color_eyre::eyre::{OptionExt, Result};
    use datafusion::dataframe;
    use std::sync::Arc;

    /// 2018-11-15T00:41:21 UTC, a Thursday in ISO week 46.
    const EXAMPLE_TS_MILLIS: i64 = 1_542_242_481_796;
    const EXAMPLE_TS_SECONDS: i64 = 1_542_242_481;

    fn int32_value(batch: &RecordBatch, name: &str) -> Result<i32> {
        Ok(batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
            .ok_or_eyre("missing int32 column")?
            .value(0))
    }

    fn string_column<'b>(batch: &'b RecordBatch, name: &str) -> Result<&'b StringArray> {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_eyre("missing string column")
    }

    fn plays_batch(rows: &[(i64, &str, i64, &str)]) -> Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("ts", DataType::Int64, true),
            Field::new("userId", DataType::Utf8, true),
            Field::new("level", DataType::Utf8, true),
            Field::new("sessionId", DataType::Int64, true),
            Field::new("userAgent", DataType::Utf8, true),
            Field::new("song", DataType::Utf8, true),
        ]));
        Ok(RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.0))),
                Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.1))),
                Arc::new(StringArray::from_iter_values(
                    rows.iter().map(|_| "free"),
                )),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.2))),
                Arc::new(StringArray::from_iter_values(rows.iter().map(|_| "UA"))),
                Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.3))),
            ],
        )?)
    }

    fn catalog_batch() -> Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("song_id", DataType::Utf8, true),
            Field::new("artist_id", DataType::Utf8, true),
            Field::new("title", DataType::Utf8, true),
            Field::new("artist_location", DataType::Utf8, true),
        ]));
        Ok(RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["S1"])),
                Arc::new(StringArray::from(vec!["A1"])),
                Arc::new(StringArray::from(vec!["Test"])),
                Arc::new(StringArray::from(vec!["NYC"])),
            ],
        )?)
    }

    #[tokio::test]
    async fn should_decompose_example_timestamp() -> Result<()> {
        // Given
        let plays = dataframe![
            "ts" => [EXAMPLE_TS_MILLIS],
        ]?;

        // When
        let batches = time_frame(plays)?.collect().await?;

        // Then
        assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 1);
        let batch = &batches[0];
        let start_times = batch
            .column_by_name("start_time")
            .and_then(|c| c.as_any().downcast_ref::<TimestampSecondArray>())
            .ok_or_eyre("missing start_time column")?;
        assert_eq!(start_times.value(0), EXAMPLE_TS_SECONDS);
        assert_eq!(int32_value(batch, "hour")?, 0);
        assert_eq!(int32_value(batch, "day")?, 15);
        assert_eq!(int32_value(batch, "week")?, 46);
        assert_eq!(int32_value(batch, "month")?, 11);
        assert_eq!(int32_value(batch, "year")?, 2018);
        assert_eq!(int32_value(batch, "weekday")?, 4);
        Ok(())
    }

    #[tokio::test]
    async fn should_deduplicate_distinct_timestamps() -> Result<()> {
        // Given the same instant twice, with a sub-second difference that
        // truncation collapses
        let plays = dataframe![
            "ts" => [EXAMPLE_TS_MILLIS, EXAMPLE_TS_MILLIS, EXAMPLE_TS_MILLIS + 100],
        ]?;

        // When
        let batches = time_frame(plays)?.collect().await?;

        // Then
        assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn should_deduplicate_users() -> Result<()> {
        // Given the same user on two plays
        let plays = dataframe![
            "userId" => ["10", "10"],
            "firstName" => ["A", "A"],
            "lastName" => ["B", "B"],
            "gender" => ["F", "F"],
            "level" => ["free", "free"],
        ]?;

        // When
        let batches = users_frame(plays)?.collect().await?;

        // Then
        assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn should_join_play_to_catalog_entry() -> Result<()> {
        // Given
        let ctx = SessionContext::new();
        let plays = ctx.read_batch(plays_batch(&[(EXAMPLE_TS_MILLIS, "10", 1, "Test")])?)?;
        let songs = ctx.read_batch(catalog_batch()?)?;

        // When
        let batches = songplays_frame(plays, songs)?.collect().await?;

        // Then
        assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 1);
        let batch = &batches[0];
        assert_eq!(string_column(batch, "song_id")?.value(0), "S1");
        assert_eq!(string_column(batch, "artist_id")?.value(0), "A1");
        assert_eq!(string_column(batch, "location")?.value(0), "NYC");
        assert_eq!(int32_value(batch, "year")?, 2018);
        assert_eq!(int32_value(batch, "month")?, 11);
        Ok(())
    }

    #[tokio::test]
    async fn should_keep_play_with_no_catalog_match() -> Result<()> {
        // Given a play whose title isn't in the catalog
        let ctx = SessionContext::new();
        let plays = ctx.read_batch(plays_batch(&[(EXAMPLE_TS_MILLIS, "10", 1, "Unknown")])?)?;
        let songs = ctx.read_batch(catalog_batch()?)?;

        // When
        let batches = songplays_frame(plays, songs)?.collect().await?;

        // Then
        assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 1);
        let batch = &batches[0];
        assert!(string_column(batch, "song_id")?.is_null(0));
        assert!(string_column(batch, "artist_id")?.is_null(0));
        assert!(string_column(batch, "location")?.is_null(0));
        Ok(())
    }

    #[tokio::test]
    async fn should_number_songplays_in_start_time_order() -> Result<()> {
        // Given three plays supplied out of time order
        let ctx = SessionContext::new();
        let plays = ctx.read_batch(plays_batch(&[
            (EXAMPLE_TS_MILLIS + 120_000, "10", 1, "Test"),
            (EXAMPLE_TS_MILLIS, "10", 1, "Test"),
            (EXAMPLE_TS_MILLIS + 60_000, "10", 1, "Unknown"),
        ])?)?;
        let songs = ctx.read_batch(catalog_batch()?)?;

        // When
        let frame = songplays_frame(plays, songs)?
            .sort(vec![col("songplay_id").sort(true, false)])?;
        let batches = frame.collect().await?;

        // Then
        let mut rows: Vec<(u64, i64)> = Vec::new();
        for batch in &batches {
            let ids = batch
                .column_by_name("songplay_id")
                .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
                .ok_or_eyre("missing songplay_id column")?;
            let times = batch
                .column_by_name("start_time")
                .and_then(|c| c.as_any().downcast_ref::<TimestampSecondArray>())
                .ok_or_eyre("missing start_time column")?;
            for i in 0..batch.num_rows() {
                rows.push((ids.value(i), times.value(i)));
            }
        }
        assert_eq!(
            rows,
            vec![
                (1, EXAMPLE_TS_SECONDS),
                (2, EXAMPLE_TS_SECONDS + 60),
                (3, EXAMPLE_TS_SECONDS + 120),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn should_deduplicate_identical_plays_before_numbering() -> Result<()> {
        // Given the same play event recorded twice
        let ctx = SessionContext::new();
        let plays = ctx.read_batch(plays_batch(&[
            (EXAMPLE_TS_MILLIS, "10", 1, "Test"),
            (EXAMPLE_TS_MILLIS, "10", 1, "Test"),
        ])?)?;
        let songs = ctx.read_batch(catalog_batch()?)?;

        // When
        let batches = songplays_frame(plays, songs)?.collect().await?;

        // Then
        assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 1);
        Ok(())
    }
}
