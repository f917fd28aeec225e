//! Permissive NDJSON source reading.
//!
//! Raw datasets are discovered by listing the object store below a dataset
//! root, decoded line by line and registered with the `DataFusion` session
//! as in-memory tables. Unparsable lines are skipped and counted rather than
//! failing the run.
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
use arrow::{
    array::{ArrayRef, Float64Builder, Int32Builder, Int64Builder, RecordBatch, StringBuilder},
    datatypes::{DataType, SchemaRef},
};
use datafusion::{
    catalog::MemTable, common::exec_err, common::plan_err, error::DataFusionError,
    prelude::SessionContext,
};
use futures::TryStreamExt;
use log::{info, warn};
use num_format::{Locale, ToFormattedString};
use object_store::{ObjectMeta, ObjectStore, path::Path};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// Statistics from reading one raw dataset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SourceStats {
    /// Number of data files read.
    pub files_read: usize,
    /// Number of rows decoded across all files.
    pub rows_read: usize,
    /// Number of unparsable lines skipped.
    pub lines_skipped: usize,
}

/// Read a raw NDJSON dataset and register it with the session as an
/// in-memory table under `table_name`.
///
/// Only objects with a `.json` suffix at exactly `depth` path segments below
/// `dataset_root` are read. Files are read in lexicographic path order so a
/// rerun over unchanged input decodes rows in the same order.
///
/// # Errors
/// Fails if the dataset root can't be listed, if no data files are found
/// beneath it, or if an object can't be fetched.
pub async fn register_ndjson_dataset(
    ctx: &SessionContext,
    store_factory: &ObjectStoreFactory,
    table_name: &str,
    dataset_root: &Url,
    depth: usize,
    schema: SchemaRef,
) -> Result<SourceStats, DataFusionError> {
    let store = store_factory
        .get_object_store(dataset_root)
        .map_err(|e| DataFusionError::External(e.into()))?;
    let files = discover_files(&store, dataset_root, depth).await?;
    if files.is_empty() {
        return exec_err!(
            "no .json files found at depth {depth} under {}",
            dataset_root.as_str()
        );
    }

    let mut stats = SourceStats {
        files_read: files.len(),
        ..Default::default()
    };
    let mut batches = Vec::with_capacity(files.len());
    for meta in &files {
        let bytes = store.get(&meta.location).await?.bytes().await?;
        let text = String::from_utf8_lossy(&bytes);
        let (batch, skipped) = decode_lines(&schema, &text)?;
        if skipped > 0 {
            warn!(
                "Skipped {} unparsable lines in {}",
                skipped.to_formatted_string(&Locale::en),
                meta.location
            );
        }
        stats.rows_read += batch.num_rows();
        stats.lines_skipped += skipped;
        batches.push(batch);
    }
    info!(
        "Read {} rows from {} files under {} ({} lines skipped)",
        stats.rows_read.to_formatted_string(&Locale::en),
        stats.files_read.to_formatted_string(&Locale::en),
        dataset_root.as_str(),
        stats.lines_skipped.to_formatted_string(&Locale::en)
    );

    let table = MemTable::try_new(schema, vec![batches])?;
    ctx.register_table(table_name, Arc::new(table))?;
    Ok(stats)
}

/// List all data files below a dataset root at the expected depth.
///
/// The returned list is sorted by object path.
async fn discover_files(
    store: &Arc<dyn ObjectStore>,
    dataset_root: &Url,
    depth: usize,
) -> Result<Vec<ObjectMeta>, DataFusionError> {
    let prefix = Path::from(dataset_root.path());
    let base_segments = prefix.parts().count();
    let mut files: Vec<ObjectMeta> = store
        .list(Some(&prefix))
        .try_filter(|meta| futures::future::ready(is_data_file(meta, base_segments, depth)))
        .try_collect()
        .await?;
    files.sort_by(|a, b| a.location.cmp(&b.location));
    Ok(files)
}

/// Does this object look like a dataset file at the expected nesting depth?
fn is_data_file(meta: &ObjectMeta, base_segments: usize, depth: usize) -> bool {
    meta.location.extension() == Some("json")
        && meta.location.parts().count() - base_segments == depth
}

/// Decode the lines of one NDJSON file into a [`RecordBatch`] against the
/// given schema.
///
/// Lines that are not a JSON object are skipped and counted. Fields of a
/// decoded object that are missing, null, or of an unexpected JSON type
/// become nulls in the batch.
///
/// # Errors
/// Only fails for schema field types the decoder does not support.
fn decode_lines(schema: &SchemaRef, text: &str) -> Result<(RecordBatch, usize), DataFusionError> {
    let mut builders = schema
        .fields()
        .iter()
        .map(|f| ColumnBuilder::for_type(f.data_type()))
        .collect::<Result<Vec<_>, _>>()?;
    let mut skipped = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(record)) => {
                for (field, builder) in schema.fields().iter().zip(builders.iter_mut()) {
                    builder.append(record.get(field.name().as_str()));
                }
            }
            _ => skipped += 1,
        }
    }
    let columns: Vec<ArrayRef> = builders.into_iter().map(ColumnBuilder::finish).collect();
    Ok((RecordBatch::try_new(schema.clone(), columns)?, skipped))
}

/// Typed array builder for one source column.
enum ColumnBuilder {
    Utf8(StringBuilder),
    Int32(Int32Builder),
    Int64(Int64Builder),
    Float64(Float64Builder),
}

impl ColumnBuilder {
    fn for_type(data_type: &DataType) -> Result<Self, DataFusionError> {
        match data_type {
            DataType::Utf8 => Ok(Self::Utf8(StringBuilder::new())),
            DataType::Int32 => Ok(Self::Int32(Int32Builder::new())),
            DataType::Int64 => Ok(Self::Int64(Int64Builder::new())),
            DataType::Float64 => Ok(Self::Float64(Float64Builder::new())),
            other => plan_err!("unsupported source column type {other}"),
        }
    }

    /// Append a JSON value, or null if it doesn't fit the column type.
    fn append(&mut self, value: Option<&Value>) {
        match self {
            Self::Utf8(builder) => match value {
                Some(Value::String(s)) => builder.append_value(s),
                // Numeric identifiers are sometimes emitted unquoted
                Some(Value::Number(n)) => builder.append_value(n.to_string()),
                _ => builder.append_null(),
            },
            Self::Int32(builder) => builder.append_option(
                value
                    .and_then(Value::as_i64)
                    .and_then(|v| i32::try_from(v).ok()),
            ),
            Self::Int64(builder) => builder.append_option(value.and_then(Value::as_i64)),
            Self::Float64(builder) => builder.append_option(value.and_then(Value::as_f64)),
        }
    }

    fn finish(self) -> ArrayRef {
        match self {
            Self::Utf8(mut builder) => Arc::new(builder.finish()),
            Self::Int32(mut builder) => Arc::new(builder.finish()),
            Self::Int64(mut builder) => Arc::new(builder.finish()),
            Self::Float64(mut builder) => Arc::new(builder.finish()),
        }
    }
}
