// CLI module - command-line argument parsing
//
// Flags override their environment counterparts so a scheduler can pin a
// run's database, output, or date window without touching the environment.

use crate::config::VERSION;
use crate::journey::DateWindow;
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

/// Multi-touch attribution reporting pipeline
#[derive(Parser, Debug)]
#[command(name = "ihc-pipeline")]
#[command(version = VERSION)]
#[command(about = "Scores customer journeys and exports channel metrics", long_about = None)]
pub struct Cli {
    /// SQLite database path (overrides DB_PATH)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Report destination file (overrides CSV_FILE)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Conversions per scoring request (overrides BATCH_SIZE)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Only process conversions on or after this date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub start_date: Option<NaiveDate>,

    /// Only process conversions on or before this date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub end_date: Option<NaiveDate>,
}

impl Cli {
    /// Combine the date flags into a window, rejecting an inverted range.
    pub fn date_window(&self) -> Result<Option<DateWindow>, String> {
        match (self.start_date, self.end_date) {
            (None, None) => Ok(None),
            (Some(start), Some(end)) if end < start => Err(format!(
                "end date {end} must not be before start date {start}"
            )),
            (start, end) => Ok(Some(DateWindow { start, end })),
        }
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("invalid date {raw:?}, expected YYYY-MM-DD"))
}
