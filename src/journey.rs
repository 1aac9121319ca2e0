//! Journey construction and wire-shape formatting.
//!
//! A journey is the ordered touch-event history leading to one conversion:
//! every touch from the same user at or before the conversion instant,
//! ascending by (date, time) with a stable storage-order tie-break. The
//! builder walks the distinct conversion ids in ascending order and yields
//! them in fixed-size batches, one join query per batch, so an arbitrarily
//! large table never has to fit in memory at once.

use crate::store::Store;
use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// One joined journey row: a touch event annotated with its conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchRow {
    pub conv_id: String,
    pub session_id: String,
    pub event_date: String,
    pub event_time: String,
    pub channel_name: String,
    pub holder_engagement: bool,
    pub closer_engagement: bool,
    pub impression_interaction: bool,
    /// Set when this touch's (date, time) exactly equals the conversion's.
    /// Zero or several touches per journey may carry it.
    pub conversion: bool,
}

/// Ordered touch events for one conversion. Empty when no touch qualifies.
pub type Journey = Vec<TouchRow>;

/// One batch: conversion id -> journey, in ascending id order.
///
/// A `BTreeMap` keeps iteration in ascending id order, which is also the
/// order the batch query returns rows in.
pub type JourneyBatch = BTreeMap<String, Journey>;

/// Inclusive date window restricting which conversions are processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

/// Lazy iterator over journey batches.
///
/// Conversion ids are fetched once, sorted ascending, and sliced into
/// `batch_size` chunks (the last chunk may be smaller). Each `next()` call
/// issues one join query for its chunk. A conversion with zero qualifying
/// touch events still appears in its batch, with an empty journey, so
/// downstream stages can skip it explicitly rather than lose track of it.
pub struct JourneyBatches<'a> {
    store: &'a Store,
    conv_ids: Vec<String>,
    batch_size: usize,
    cursor: usize,
}

impl<'a> JourneyBatches<'a> {
    pub fn new(store: &'a Store, batch_size: usize, window: Option<&DateWindow>) -> Result<Self> {
        let conv_ids = store.conversion_ids(window)?;
        Ok(Self {
            store,
            conv_ids,
            batch_size: batch_size.max(1),
            cursor: 0,
        })
    }

    /// Total number of conversions the iterator will cover.
    pub fn total_conversions(&self) -> usize {
        self.conv_ids.len()
    }

    fn build_batch(&self, chunk: &[String]) -> Result<JourneyBatch> {
        // Seed every id in the chunk so conversions without touches
        // surface as empty journeys instead of vanishing.
        let mut batch: JourneyBatch = chunk
            .iter()
            .map(|id| (id.clone(), Vec::new()))
            .collect();
        for row in self.store.journey_rows(chunk)? {
            if let Some(journey) = batch.get_mut(&row.conv_id) {
                journey.push(row);
            }
        }
        Ok(batch)
    }
}

impl Iterator for JourneyBatches<'_> {
    type Item = Result<JourneyBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.conv_ids.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.conv_ids.len());
        let chunk = &self.conv_ids[self.cursor..end];
        self.cursor = end;
        Some(self.build_batch(chunk))
    }
}

/// One touch event in the scoring service's wire shape.
///
/// Engagement flags go out as 0/1 integers; the service does not accept
/// JSON booleans for them.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ApiTouch {
    pub conversion_id: String,
    pub session_id: String,
    /// `"YYYY-MM-DD HH:MM:SS"`, the event's date and time joined.
    pub timestamp: String,
    pub channel_label: String,
    pub holder_engagement: u8,
    pub closer_engagement: u8,
    pub conversion: u8,
    pub impression_interaction: u8,
}

/// Flatten a batch into the request shape, one record per touch event.
///
/// Pure and order-preserving: no filtering, no re-sorting. Journeys appear
/// in batch (ascending conversion id) order, touches in journey order.
pub fn format_batch(batch: &JourneyBatch) -> Vec<ApiTouch> {
    batch
        .iter()
        .flat_map(|(conv_id, journey)| {
            journey.iter().map(move |touch| ApiTouch {
                conversion_id: conv_id.clone(),
                session_id: touch.session_id.clone(),
                timestamp: format!("{} {}", touch.event_date, touch.event_time),
                channel_label: touch.channel_name.clone(),
                holder_engagement: touch.holder_engagement as u8,
                closer_engagement: touch.closer_engagement as u8,
                conversion: touch.conversion as u8,
                impression_interaction: touch.impression_interaction as u8,
            })
        })
        .collect()
}
