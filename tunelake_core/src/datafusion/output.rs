//! Partitioned, overwriting Parquet output of `DataFusion` frames.
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
use crate::s3::ObjectStoreFactory;
use arrow::array::{RecordBatch, UInt64Array};
use datafusion::{
    dataframe::DataFrameWriteOptions, error::DataFusionError, prelude::DataFrame,
};
use futures::{StreamExt, TryStreamExt};
use log::{debug, info};
use num_format::{Locale, ToFormattedString};
use object_store::path::Path;
use url::Url;

/// Write a frame to `dest` as Parquet, replacing whatever the destination
/// currently holds.
///
/// With a non-empty `partition_cols` the output is laid out in Hive style
/// (`col=value/` sub-paths) and the partition columns are removed from the
/// data files themselves. Overwriting is implemented by deleting every
/// object under the destination prefix before the write, matching the
/// fully-recomputed-per-run table lifecycle.
///
/// Returns the number of rows written.
///
/// # Errors
/// Fails if the destination can't be cleared or the write fails.
pub(crate) async fn overwrite_table(
    store_factory: &ObjectStoreFactory,
    frame: DataFrame,
    dest: &Url,
    partition_cols: &[&str],
) -> Result<usize, DataFusionError> {
    clear_destination(store_factory, dest).await?;
    let mut write_options = DataFrameWriteOptions::new();
    if !partition_cols.is_empty() {
        write_options = write_options
            .with_partition_by(partition_cols.iter().map(ToString::to_string).collect());
    }
    let count_batches = frame.write_parquet(dest.as_str(), write_options, None).await?;
    let rows_written = count_written_rows(&count_batches)?;
    info!(
        "Wrote {} rows to {} (partitioned by {partition_cols:?})",
        rows_written.to_formatted_string(&Locale::en),
        dest.as_str()
    );
    Ok(rows_written)
}

/// Delete every object below the destination prefix.
///
/// A destination that doesn't exist yet lists as empty, so a first run is
/// a no-op here.
async fn clear_destination(
    store_factory: &ObjectStoreFactory,
    dest: &Url,
) -> Result<(), DataFusionError> {
    let store = store_factory
        .get_object_store(dest)
        .map_err(|e| DataFusionError::External(e.into()))?;
    let prefix = Path::from(dest.path());
    let locations = store
        .list(Some(&prefix))
        .map_ok(|meta| meta.location)
        .boxed();
    let deleted: Vec<Path> = store.delete_stream(locations).try_collect().await?;
    if !deleted.is_empty() {
        debug!(
            "Cleared {} objects under {}",
            deleted.len().to_formatted_string(&Locale::en),
            dest.as_str()
        );
    }
    Ok(())
}

/// Sum the row counts `DataFusion` reports back from a write.
fn count_written_rows(batches: &[RecordBatch]) -> Result<usize, DataFusionError> {
    let mut total = 0u64;
    for batch in batches {
        if let Some(counts) = batch
            .column_by_name("count")
            .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
        {
            total += counts.iter().flatten().sum::<u64>();
        }
    }
    usize::try_from(total).map_err(|e| DataFusionError::External(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::UInt64Array,
        datatypes::{DataType, Field, Schema},
    };
    use color_eyre::eyre::Result;
    use std::sync::Arc;

    fn count_batch(counts: Vec<u64>) -> Result<RecordBatch> {
        let schema = Schema::new(vec![Field::new("count", DataType::UInt64, false)]);
        Ok(RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(UInt64Array::from(counts))],
        )?)
    }

    #[test]
    fn should_sum_count_batches() -> Result<()> {
        // Given
        let batches = vec![count_batch(vec![3])?, count_batch(vec![4, 5])?];

        // When
        let total = count_written_rows(&batches)?;

        // Then
        assert_eq!(total, 12);
        Ok(())
    }

    #[test]
    fn should_report_zero_rows_for_no_batches() -> Result<()> {
        // Given
        let batches: Vec<RecordBatch> = vec![];

        // When
        let total = count_written_rows(&batches)?;

        // Then
        assert_eq!(total, 0);
        Ok(())
    }
}
