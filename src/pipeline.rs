//! Batch orchestration: journey builder -> formatter -> scoring client.
//!
//! ```text
//! JourneyBatches (store)          one batch at a time, ascending conv id
//!         │
//!         └──→ format_batch       flat wire-shape records
//!                 │
//!                 └──→ Scorer     one request per batch, bounded retry
//!                         │
//!                         └──→ Vec<ScoreRecord>   accumulated in order
//! ```
//!
//! Fail-fast: any batch error aborts the whole run. Nothing has been
//! persisted at this stage, so partial in-memory results are simply
//! dropped by the caller. Results only touch the store in the
//! reconciliation step that follows.

use crate::journey::{format_batch, DateWindow, JourneyBatches};
use crate::scoring::{RedistributionParameter, ScoreRecord, Scorer};
use crate::store::Store;
use anyhow::{Context, Result};

/// Drive every journey batch through the formatter and scorer, collecting
/// the scored pairs across batches in submission order.
///
/// Batches whose journeys have no qualifying touch events are skipped
/// without a service call. Errors carry the 1-based batch index as
/// context; the underlying error is propagated unchanged.
pub fn collect_scores<S: Scorer>(
    store: &Store,
    scorer: &S,
    conv_type_id: &str,
    batch_size: usize,
    window: Option<&DateWindow>,
    redistribution: Option<&RedistributionParameter>,
) -> Result<Vec<ScoreRecord>> {
    let batches = JourneyBatches::new(store, batch_size, window)?;
    tracing::info!(
        conversions = batches.total_conversions(),
        batch_size,
        "starting journey scoring"
    );

    let mut scores = Vec::new();
    let mut processed = 0usize;
    for (index, batch) in batches.enumerate() {
        let batch_num = index + 1;
        let batch =
            batch.with_context(|| format!("failed to build journey batch {batch_num}"))?;
        processed += batch.len();

        let touches = format_batch(&batch);
        if touches.is_empty() {
            tracing::debug!(batch = batch_num, "batch has no touch events, skipping");
            continue;
        }

        let response = scorer
            .compute(&touches, conv_type_id, redistribution)
            .with_context(|| format!("scoring failed for batch {batch_num}"))?;
        tracing::info!(
            batch = batch_num,
            conversions = batch.len(),
            scored_pairs = response.value.len(),
            running_total = processed,
            "batch scored"
        );
        scores.extend(response.value);
    }
    Ok(scores)
}
