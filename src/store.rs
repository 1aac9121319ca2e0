//! SQLite store contracts for the attribution pipeline.
//!
//! One struct, `Store`, owns the database path and opens a fresh connection
//! per logical step (fetch a batch, persist scores, rebuild the aggregate).
//! No connection spans multiple batches, so each insert or rebuild is its
//! own atomic unit and a mid-run crash never corrupts prior committed work.
//!
//! Tables:
//! - `conversions`                   raw conversion records (immutable)
//! - `session_sources`               raw touch events (immutable)
//! - `session_costs`                 optional per-session cost
//! - `attribution_customer_journey`  per-(conversion, session) credit, upserted
//! - `channel_reporting`             derived channel/day aggregate, rebuilt in full

use crate::journey::{DateWindow, TouchRow};
use crate::scoring::ScoreRecord;
use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection};
use std::path::PathBuf;

/// Handle to the pipeline's SQLite database.
pub struct Store {
    db_path: PathBuf,
}

/// Result of a `persist_scores` pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    /// Records written (inserted or updated in place).
    pub written: usize,
    /// Records skipped due to a constraint or referential violation.
    pub skipped: usize,
}

/// One row of the channel/day aggregate, in report order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDayRow {
    pub channel_name: String,
    pub date: String,
    pub cost: f64,
    pub ihc: f64,
    pub ihc_revenue: f64,
}

impl Store {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// Open a connection for one logical step. Dropped by the caller when
    /// the step completes.
    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("failed to open database at {}", self.db_path.display()))?;
        conn.execute_batch("PRAGMA busy_timeout=5000;")?;
        Ok(conn)
    }

    /// Create all tables if they do not exist. Idempotent.
    pub fn init_schema(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversions (
                conv_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                conv_date TEXT NOT NULL,
                conv_time TEXT NOT NULL,
                revenue REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversions_user ON conversions(user_id);

            CREATE TABLE IF NOT EXISTS session_sources (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                event_date TEXT NOT NULL,
                event_time TEXT NOT NULL,
                channel_name TEXT NOT NULL,
                holder_engagement INTEGER NOT NULL DEFAULT 0,
                closer_engagement INTEGER NOT NULL DEFAULT 0,
                impression_interaction INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON session_sources(user_id);

            CREATE TABLE IF NOT EXISTS session_costs (
                session_id TEXT PRIMARY KEY,
                cost REAL
            );

            CREATE TABLE IF NOT EXISTS attribution_customer_journey (
                conv_id TEXT NOT NULL REFERENCES conversions(conv_id),
                session_id TEXT NOT NULL REFERENCES session_sources(session_id),
                ihc REAL NOT NULL,
                PRIMARY KEY (conv_id, session_id)
            );

            CREATE TABLE IF NOT EXISTS channel_reporting (
                channel_name TEXT NOT NULL,
                date TEXT NOT NULL,
                cost REAL NOT NULL DEFAULT 0,
                ihc REAL NOT NULL DEFAULT 0,
                ihc_revenue REAL NOT NULL DEFAULT 0,
                PRIMARY KEY (channel_name, date)
            );
            "#,
        )
        .context("failed to initialize database schema")?;
        Ok(())
    }

    /// All distinct conversion ids, ascending, optionally restricted to a
    /// date window on `conv_date`.
    pub fn conversion_ids(&self, window: Option<&DateWindow>) -> Result<Vec<String>> {
        let conn = self.open()?;
        let mut sql = String::from("SELECT DISTINCT conv_id FROM conversions");
        let mut bound: Vec<String> = Vec::new();
        if let Some(window) = window {
            let mut clauses = Vec::new();
            if let Some(start) = window.start {
                clauses.push("conv_date >= ?");
                bound.push(start.format("%Y-%m-%d").to_string());
            }
            if let Some(end) = window.end {
                clauses.push("conv_date <= ?");
                bound.push(end.format("%Y-%m-%d").to_string());
            }
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
        }
        sql.push_str(" ORDER BY conv_id");

        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(bound.iter()), |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()
            .context("failed to read conversion ids")?;
        Ok(ids)
    }

    /// Joined journey rows for one batch of conversion ids.
    ///
    /// Only touch events from the same user at or before the conversion
    /// instant qualify. Rows come back ordered by
    /// (conv_id, event_date, event_time, rowid); the trailing rowid makes
    /// the tie-break for identical timestamps stable across runs.
    pub fn journey_rows(&self, conv_ids: &[String]) -> Result<Vec<TouchRow>> {
        if conv_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.open()?;
        // Placeholders only; the ids themselves are bound parameters.
        let placeholders = vec!["?"; conv_ids.len()].join(",");
        let sql = format!(
            r#"
            SELECT
                c.conv_id,
                s.session_id,
                s.event_date,
                s.event_time,
                s.channel_name,
                s.holder_engagement,
                s.closer_engagement,
                s.impression_interaction,
                CASE
                    WHEN c.conv_date = s.event_date AND c.conv_time = s.event_time
                    THEN 1 ELSE 0
                END AS conversion
            FROM conversions c
            JOIN session_sources s
              ON c.user_id = s.user_id
             AND (s.event_date < c.conv_date
                  OR (s.event_date = c.conv_date AND s.event_time <= c.conv_time))
            WHERE c.conv_id IN ({placeholders})
            ORDER BY c.conv_id, s.event_date, s.event_time, s.rowid
            "#
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(conv_ids.iter()), |row| {
                Ok(TouchRow {
                    conv_id: row.get(0)?,
                    session_id: row.get(1)?,
                    event_date: row.get(2)?,
                    event_time: row.get(3)?,
                    channel_name: row.get(4)?,
                    holder_engagement: row.get::<_, i64>(5)? != 0,
                    closer_engagement: row.get::<_, i64>(6)? != 0,
                    impression_interaction: row.get::<_, i64>(7)? != 0,
                    conversion: row.get::<_, i64>(8)? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to read journey rows")?;
        Ok(rows)
    }

    /// Upsert attribution records, one per (conversion, session) pair.
    ///
    /// Idempotent on the (conv_id, session_id) key: a re-delivered triple
    /// updates the stored credit in place. A constraint or referential
    /// violation on a single record is logged and skipped; only a
    /// connection-level failure aborts the pass. Foreign keys are enforced
    /// here so the writer, not the scoring service, guards referential
    /// integrity.
    pub fn persist_scores(&self, scores: &[ScoreRecord]) -> Result<PersistOutcome> {
        let conn = self.open()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let mut stmt = conn.prepare(
            r#"
            INSERT INTO attribution_customer_journey (conv_id, session_id, ihc)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(conv_id, session_id) DO UPDATE SET ihc = excluded.ihc
            "#,
        )?;

        let mut outcome = PersistOutcome::default();
        for score in scores {
            match stmt.execute(params![score.conversion_id, score.session_id, score.ihc]) {
                Ok(_) => outcome.written += 1,
                Err(rusqlite::Error::SqliteFailure(err, msg))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    outcome.skipped += 1;
                    tracing::warn!(
                        conv_id = %score.conversion_id,
                        session_id = %score.session_id,
                        "skipping attribution record: {}",
                        msg.unwrap_or_else(|| "constraint violation".to_string())
                    );
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "attribution write failed for ({}, {})",
                            score.conversion_id, score.session_id
                        )
                    });
                }
            }
        }
        Ok(outcome)
    }

    /// Rebuild the channel/day aggregate from scratch.
    ///
    /// Delete-then-reinsert inside one transaction: the table is fully
    /// derived and never incrementally maintained. Missing cost or
    /// attribution values on the outer-join side contribute zero.
    /// Returns the number of aggregate rows written.
    pub fn rebuild_channel_reporting(&self) -> Result<usize> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM channel_reporting", [])?;
        let rows = tx.execute(
            r#"
            INSERT INTO channel_reporting (channel_name, date, cost, ihc, ihc_revenue)
            SELECT
                ss.channel_name,
                ss.event_date AS date,
                SUM(COALESCE(sc.cost, 0)) AS cost,
                SUM(COALESCE(acj.ihc, 0)) AS ihc,
                SUM(COALESCE(acj.ihc * c.revenue, 0)) AS ihc_revenue
            FROM session_sources ss
            LEFT JOIN session_costs sc
                ON ss.session_id = sc.session_id
            LEFT JOIN attribution_customer_journey acj
                ON ss.session_id = acj.session_id
            LEFT JOIN conversions c
                ON acj.conv_id = c.conv_id
            GROUP BY ss.channel_name, ss.event_date
            "#,
            [],
        )?;
        tx.commit().context("failed to commit channel reporting rebuild")?;
        Ok(rows)
    }

    /// Aggregate rows in report order: (date, channel_name) ascending.
    pub fn channel_reporting_rows(&self) -> Result<Vec<ChannelDayRow>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT channel_name, date, cost, ihc, ihc_revenue
            FROM channel_reporting
            ORDER BY date, channel_name
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ChannelDayRow {
                    channel_name: row.get(0)?,
                    date: row.get(1)?,
                    cost: row.get(2)?,
                    ihc: row.get(3)?,
                    ihc_revenue: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to read channel reporting rows")?;
        Ok(rows)
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use crate::scoring::ScoreRecord;

    fn score(conv: &str, session: &str, ihc: f64) -> ScoreRecord {
        ScoreRecord {
            conversion_id: conv.to_string(),
            session_id: session.to_string(),
            ihc,
        }
    }

    #[test]
    fn init_schema_is_idempotent() {
        let db = test_store();
        db.store.init_schema().expect("second init");
        assert!(db.store.conversion_ids(None).expect("ids").is_empty());
    }

    #[test]
    fn persist_upsert_keeps_latest_value() {
        let db = test_store();
        insert_conversion(&db.store, "C1", "U1", "2021-01-10", "17:09:33", 50.0);
        insert_session(
            &db.store, "S1", "U1", "2021-01-05", "13:10:00", "Affiliate", false, false, false,
        );

        let first = db.store.persist_scores(&[score("C1", "S1", 0.5)]).expect("persist");
        assert_eq!(first, PersistOutcome { written: 1, skipped: 0 });

        // Re-delivery with a newer value updates in place, no duplicate row.
        let second = db.store.persist_scores(&[score("C1", "S1", 0.7)]).expect("persist");
        assert_eq!(second.written, 1);

        let conn = db.store.open().expect("open");
        let (count, ihc): (i64, f64) = conn
            .query_row(
                "SELECT COUNT(*), MAX(ihc) FROM attribution_customer_journey",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("query");
        assert_eq!(count, 1);
        assert!((ihc - 0.7).abs() < 1e-9);
    }

    #[test]
    fn persist_skips_referential_violations_and_continues() {
        let db = test_store();
        insert_conversion(&db.store, "C1", "U1", "2021-01-10", "17:09:33", 50.0);
        insert_session(
            &db.store, "S1", "U1", "2021-01-05", "13:10:00", "Affiliate", false, false, false,
        );

        let outcome = db
            .store
            .persist_scores(&[
                score("C1", "UNKNOWN", 0.3),
                score("C1", "S1", 0.7),
            ])
            .expect("persist");
        assert_eq!(outcome, PersistOutcome { written: 1, skipped: 1 });
    }

    #[test]
    fn rebuild_treats_missing_joins_as_zero() {
        let db = test_store();
        // A session with no cost and no attribution still produces an
        // aggregate row with zeros, not NULLs.
        insert_session(
            &db.store, "S1", "U1", "2021-01-05", "13:10:00", "Affiliate", false, false, false,
        );
        let rows_written = db.store.rebuild_channel_reporting().expect("rebuild");
        assert_eq!(rows_written, 1);

        let rows = db.store.channel_reporting_rows().expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel_name, "Affiliate");
        assert_eq!(rows[0].cost, 0.0);
        assert_eq!(rows[0].ihc, 0.0);
        assert_eq!(rows[0].ihc_revenue, 0.0);
    }

    #[test]
    fn rebuild_is_deterministic() {
        let db = test_store();
        insert_conversion(&db.store, "C1", "U1", "2021-01-10", "17:09:33", 50.0);
        insert_session(
            &db.store, "S1", "U1", "2021-01-05", "13:10:00", "Affiliate", false, false, false,
        );
        insert_session(
            &db.store, "S2", "U1", "2021-01-10", "17:09:33", "Email", false, true, false,
        );
        insert_cost(&db.store, "S2", 10.0);
        db.store
            .persist_scores(&[score("C1", "S1", 0.3), score("C1", "S2", 0.7)])
            .expect("persist");

        db.store.rebuild_channel_reporting().expect("first rebuild");
        let first = db.store.channel_reporting_rows().expect("rows");
        db.store.rebuild_channel_reporting().expect("second rebuild");
        let second = db.store.channel_reporting_rows().expect("rows");
        assert_eq!(first, second);
    }

    #[test]
    fn aggregate_matches_worked_example() {
        let db = test_store();
        insert_conversion(&db.store, "C1", "U1", "2021-01-10", "17:09:33", 50.0);
        insert_session(
            &db.store, "S1", "U1", "2021-01-05", "13:10:00", "Affiliate", false, false, false,
        );
        insert_session(
            &db.store, "S2", "U1", "2021-01-10", "17:09:33", "Email", false, true, false,
        );
        insert_cost(&db.store, "S2", 10.0);
        db.store
            .persist_scores(&[score("C1", "S1", 0.3), score("C1", "S2", 0.7)])
            .expect("persist");
        db.store.rebuild_channel_reporting().expect("rebuild");

        let rows = db.store.channel_reporting_rows().expect("rows");
        assert_eq!(rows.len(), 2);
        // Ordered by (date, channel_name).
        assert_eq!(rows[0].channel_name, "Affiliate");
        assert_eq!(rows[0].date, "2021-01-05");
        assert!((rows[0].ihc - 0.3).abs() < 1e-9);
        assert!((rows[0].ihc_revenue - 15.0).abs() < 1e-9);

        assert_eq!(rows[1].channel_name, "Email");
        assert_eq!(rows[1].date, "2021-01-10");
        assert!((rows[1].cost - 10.0).abs() < 1e-9);
        assert!((rows[1].ihc - 0.7).abs() < 1e-9);
        assert!((rows[1].ihc_revenue - 35.0).abs() < 1e-9);
    }
}
