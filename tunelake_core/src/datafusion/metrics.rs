//! Row count results collected from the transform stages.
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
use log::info;
use num_format::{Locale, ToFormattedString};

/// Output counts from the song catalog transform.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SongCatalogResult {
    /// Raw song metadata rows decoded.
    pub records_read: usize,
    /// Unparsable song metadata lines skipped.
    pub lines_skipped: usize,
    /// Rows written to the songs table.
    pub songs_written: usize,
    /// Rows written to the artists table.
    pub artists_written: usize,
}

/// Output counts from the event log transform.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EventLogResult {
    /// Raw event rows decoded.
    pub records_read: usize,
    /// Unparsable event lines skipped.
    pub lines_skipped: usize,
    /// Rows written to the users table.
    pub users_written: usize,
    /// Rows written to the time table.
    pub time_slots_written: usize,
    /// Rows written to the songplays table.
    pub songplays_written: usize,
}

/// Combined counts from a full pipeline run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineResult {
    pub song_catalog: SongCatalogResult,
    pub event_log: EventLogResult,
}

impl PipelineResult {
    /// Log a summary of a completed run.
    pub fn log_summary(&self) {
        let fmt = |v: usize| v.to_formatted_string(&Locale::en);
        info!(
            "Song catalog: {} rows read ({} lines skipped), {} songs, {} artists",
            fmt(self.song_catalog.records_read),
            fmt(self.song_catalog.lines_skipped),
            fmt(self.song_catalog.songs_written),
            fmt(self.song_catalog.artists_written)
        );
        info!(
            "Event log: {} rows read ({} lines skipped), {} users, {} time slots, {} songplays",
            fmt(self.event_log.records_read),
            fmt(self.event_log.lines_skipped),
            fmt(self.event_log.users_written),
            fmt(self.event_log.time_slots_written),
            fmt(self.event_log.songplays_written)
        );
    }
}
