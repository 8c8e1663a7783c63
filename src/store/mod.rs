//! Durable record of fingerprints that have already been alerted on.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sqlx::migrate::MigrateDatabase;
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::error::Result;

/// Per-site set of already-alerted fingerprints.
///
/// Loaded once at startup. Fingerprints recorded during a cycle stay
/// pending in memory until `commit` — called only after the cycle's alert
/// dispatch is confirmed — or `discard` after a failed dispatch, which
/// keeps the same items "new" for the next cycle.
pub struct FingerprintStore {
    pool: SqlitePool,
    committed: HashMap<String, HashSet<String>>,
    pending: Vec<(String, String)>,
}

impl FingerprintStore {
    /// Open (creating if absent) the backing database and load the known
    /// fingerprints. A missing database file is an empty store.
    pub async fn open(db_url: &str) -> Result<Self> {
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating fingerprint database");
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePool::connect(db_url).await?;
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS fingerprints (
                site_key TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                first_seen TIMESTAMP NOT NULL,
                PRIMARY KEY (site_key, fingerprint)
            )
            ",
        )
        .execute(&pool)
        .await?;

        let rows = sqlx::query("SELECT site_key, fingerprint FROM fingerprints")
            .fetch_all(&pool)
            .await?;

        let mut committed: HashMap<String, HashSet<String>> = HashMap::new();
        for row in &rows {
            committed
                .entry(row.get("site_key"))
                .or_default()
                .insert(row.get("fingerprint"));
        }
        info!("Loaded {} known fingerprint(s)", rows.len());

        Ok(Self {
            pool,
            committed,
            pending: Vec::new(),
        })
    }

    pub fn contains(&self, site_key: &str, fingerprint: &str) -> bool {
        if self
            .committed
            .get(site_key)
            .is_some_and(|set| set.contains(fingerprint))
        {
            return true;
        }
        self.pending
            .iter()
            .any(|(key, fp)| key == site_key && fp == fingerprint)
    }

    /// Stage a fingerprint for the current cycle. No-op when it is
    /// already known or already staged.
    pub fn record(&mut self, site_key: &str, fingerprint: &str) {
        if !self.contains(site_key, fingerprint) {
            self.pending
                .push((site_key.to_string(), fingerprint.to_string()));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Persist everything staged this cycle.
    pub async fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        for (site_key, fingerprint) in &self.pending {
            sqlx::query(
                "INSERT OR IGNORE INTO fingerprints (site_key, fingerprint, first_seen) VALUES (?, ?, ?)",
            )
            .bind(site_key)
            .bind(fingerprint)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }
        debug!("Committed {} fingerprint(s)", self.pending.len());
        for (site_key, fingerprint) in self.pending.drain(..) {
            self.committed.entry(site_key).or_default().insert(fingerprint);
        }
        Ok(())
    }

    /// Forget the staged fingerprints of a cycle whose dispatch failed.
    pub fn discard(&mut self) {
        if !self.pending.is_empty() {
            debug!("Discarding {} uncommitted fingerprint(s)", self.pending.len());
            self.pending.clear();
        }
    }
}
