//! Arrow schemas for the raw NDJSON datasets.
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
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use std::sync::Arc;

/// The schema of raw song metadata records.
///
/// Every field is nullable. The permissive line decoder fills in nulls for
/// fields that are missing or of the wrong JSON type.
#[must_use]
pub fn song_data_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("song_id", DataType::Utf8, true),
        Field::new("title", DataType::Utf8, true),
        Field::new("artist_id", DataType::Utf8, true),
        Field::new("artist_name", DataType::Utf8, true),
        Field::new("artist_location", DataType::Utf8, true),
        Field::new("artist_latitude", DataType::Float64, true),
        Field::new("artist_longitude", DataType::Float64, true),
        Field::new("year", DataType::Int32, true),
        Field::new("duration", DataType::Float64, true),
    ]))
}

/// The schema of raw play event records.
///
/// `ts` is an epoch-millisecond integer. `userId` is kept as a string as the
/// source emits it quoted (and sometimes empty for anonymous sessions).
#[must_use]
pub fn log_data_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("artist", DataType::Utf8, true),
        Field::new("auth", DataType::Utf8, true),
        Field::new("firstName", DataType::Utf8, true),
        Field::new("gender", DataType::Utf8, true),
        Field::new("itemInSession", DataType::Int64, true),
        Field::new("lastName", DataType::Utf8, true),
        Field::new("length", DataType::Float64, true),
        Field::new("level", DataType::Utf8, true),
        Field::new("location", DataType::Utf8, true),
        Field::new("method", DataType::Utf8, true),
        Field::new("page", DataType::Utf8, true),
        Field::new("registration", DataType::Float64, true),
        Field::new("sessionId", DataType::Int64, true),
        Field::new("song", DataType::Utf8, true),
        Field::new("status", DataType::Int64, true),
        Field::new("ts", DataType::Int64, true),
        Field::new("userAgent", DataType::Utf8, true),
        Field::new("userId", DataType::Utf8, true),
    ]))
}

/// The Arrow type the decoded `ts` column is cast to. The integer division
/// by 1,000 has already truncated sub-second precision, so second resolution
/// is exact.
#[must_use]
pub fn start_time_type() -> DataType {
    DataType::Timestamp(TimeUnit::Second, None)
}
