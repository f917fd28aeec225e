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

use chrono::Local;
use clap::Parser;
use human_panic::setup_panic;
use num_format::{Locale, ToFormattedString};
use owo_colors::OwoColorize;
use std::io::Write;
use tunelake_core::{EtlConfigBuilder, run_pipeline};
use url::Url;

/// Runs the star schema ETL over raw streaming data.
///
/// Raw song metadata and play event logs are read as newline-delimited JSON
/// from the input root, reshaped into one fact table (songplays) and four
/// dimension tables (songs, artists, users, time) and written back as
/// Hive-partitioned Parquet under the output root. Every output table is
/// fully recomputed and its destination overwritten on each run.
///
/// AWS credentials for S3 URLs are taken from the standard places.
#[derive(Parser, Debug)]
#[command(author, version)]
struct CmdLineArgs {
    /// Root URL the raw `song_data` and `log_data` datasets are read from
    input: String,
    /// Root URL the output tables are written under
    output: String,
    /// Path depth of song metadata files below the song_data root
    #[arg(long, default_value = "4")]
    song_depth: usize,
    /// Path depth of event log files below the log_data root
    #[arg(long, default_value = "3")]
    log_depth: usize,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Install coloured errors
    color_eyre::install().unwrap();

    // Install human readable panics
    setup_panic!();

    // Install and configure environment logger
    env_logger::builder()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}:{} - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.file().unwrap_or("??"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = CmdLineArgs::parse();

    // Check URL conversion
    let input_root = Url::parse(&args.input)
        .or_else(|_e| Url::parse(&("file://".to_owned() + &args.input)))?;
    let output_root = Url::parse(&args.output)
        .or_else(|_e| Url::parse(&("file://".to_owned() + &args.output)))?;

    let config = EtlConfigBuilder::new()
        .input_root(input_root)
        .output_root(output_root)
        .song_path_depth(args.song_depth)
        .log_path_depth(args.log_depth)
        .build()?;

    let result = run_pipeline(&config).await?;

    let fmt = |v: usize| v.to_formatted_string(&Locale::en);
    println!(
        "{} songs {}, artists {}, users {}, time slots {}, songplays {}",
        "Pipeline complete:".green().bold(),
        fmt(result.song_catalog.songs_written),
        fmt(result.song_catalog.artists_written),
        fmt(result.event_log.users_written),
        fmt(result.event_log.time_slots_written),
        fmt(result.event_log.songplays_written)
    );
    Ok(())
}
