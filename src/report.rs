//! Channel metrics report: derived ratios and CSV export.
//!
//! Per channel/day row the exporter derives
//! - CPO  (cost per order)     = cost / ihc
//! - ROAS (return on ad spend) = ihc_revenue / cost
//!
//! All arithmetic runs on `rust_decimal::Decimal`, not binary floats, so
//! rounding stays exact across large sums. A zero denominator is not an
//! error: the cell renders as the literal `N/A` and the row is excluded
//! from the summary averages rather than counted as zero.

use crate::store::{ChannelDayRow, Store};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Report header, one column per aggregate field plus the two ratios.
pub const REPORT_HEADER: &str = "channel_name,date,cost,ihc,ihc_revenue,CPO,ROAS";

/// Sentinel for ratios whose denominator is exactly zero.
const NOT_APPLICABLE: &str = "N/A";

/// Summary statistics across the exported rows.
#[derive(Debug, PartialEq, Eq)]
pub struct ReportSummary {
    pub rows: usize,
    /// Mean CPO over rows where both ratios were computable.
    pub avg_cpo: Option<Decimal>,
    /// Mean ROAS over rows where both ratios were computable.
    pub avg_roas: Option<Decimal>,
}

/// Render the channel/day aggregate to a CSV file at `destination`,
/// ordered by (date, channel name).
pub fn export(store: &Store, destination: &Path) -> Result<ReportSummary> {
    let rows = store.channel_reporting_rows()?;

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let file = File::create(destination)
        .with_context(|| format!("failed to create report file {}", destination.display()))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "{REPORT_HEADER}")?;

    let mut cpo_total = Decimal::ZERO;
    let mut roas_total = Decimal::ZERO;
    let mut computable = 0u64;

    for row in &rows {
        let line = render_row(row);
        writeln!(out, "{}", line.text)?;
        if let (Some(cpo), Some(roas)) = (line.cpo, line.roas) {
            cpo_total += cpo;
            roas_total += roas;
            computable += 1;
        }
    }
    out.flush().context("failed to flush report file")?;

    let avg_cpo = mean(cpo_total, computable);
    let avg_roas = mean(roas_total, computable);
    match (&avg_cpo, &avg_roas) {
        (Some(cpo), Some(roas)) => tracing::info!(
            rows = rows.len(),
            avg_cpo = %cpo,
            avg_roas = %roas,
            "channel metrics written to {}",
            destination.display()
        ),
        _ => tracing::info!(
            rows = rows.len(),
            "channel metrics written to {} (no computable ratios)",
            destination.display()
        ),
    }

    Ok(ReportSummary {
        rows: rows.len(),
        avg_cpo,
        avg_roas,
    })
}

struct RenderedRow {
    text: String,
    cpo: Option<Decimal>,
    roas: Option<Decimal>,
}

fn render_row(row: &ChannelDayRow) -> RenderedRow {
    let cost = decimal(row.cost);
    let ihc = decimal(row.ihc);
    let ihc_revenue = decimal(row.ihc_revenue);

    let cpo = (!ihc.is_zero()).then(|| (cost / ihc).round_dp(2));
    let roas = (!cost.is_zero()).then(|| (ihc_revenue / cost).round_dp(2));

    let text = format!(
        "{},{},{},{},{},{},{}",
        row.channel_name,
        row.date,
        money(cost),
        money(ihc),
        money(ihc_revenue),
        ratio_cell(cpo),
        ratio_cell(roas),
    );
    RenderedRow { text, cpo, roas }
}

fn mean(total: Decimal, count: u64) -> Option<Decimal> {
    (count > 0).then(|| (total / Decimal::from(count)).round_dp(2))
}

/// SQLite stores the aggregate sums as REAL; NaN/infinite values have no
/// decimal representation and collapse to zero.
fn decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or(Decimal::ZERO)
}

/// Render with exactly two decimal places (`3.5` -> `"3.50"`).
fn money(value: Decimal) -> String {
    let mut rounded = value.round_dp(2);
    rounded.rescale(2);
    rounded.to_string()
}

fn ratio_cell(value: Option<Decimal>) -> String {
    value.map(money).unwrap_or_else(|| NOT_APPLICABLE.to_string())
}
