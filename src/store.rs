//! Snapshot store for learned state
//!
//! Learned scores live in memory; nothing persists unless a caller saves a
//! snapshot here. SQLite, single file, no network. Each snapshot is kept as
//! JSON plus a flattened score table that can be queried directly.

use crate::learning::LearningSnapshot;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    name TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    snapshot_json TEXT NOT NULL,
    scores_tracked INTEGER NOT NULL,
    outcomes_recorded INTEGER NOT NULL,
    saved_at TEXT NOT NULL
);

-- One row per (plugin, domain, bucket) score in a snapshot
CREATE TABLE IF NOT EXISTS snapshot_scores (
    snapshot_name TEXT NOT NULL REFERENCES snapshots(name),
    plugin_id TEXT NOT NULL,
    domain TEXT NOT NULL,
    bucket INTEGER NOT NULL,
    score REAL NOT NULL,
    observations INTEGER NOT NULL,
    PRIMARY KEY (snapshot_name, plugin_id, domain, bucket)
);

CREATE INDEX IF NOT EXISTS idx_scores_domain ON snapshot_scores(snapshot_name, domain, bucket);
"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotInfo {
    pub name: String,
    pub version: u32,
    pub scores_tracked: usize,
    pub outcomes_recorded: u64,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredScore {
    pub plugin_id: String,
    pub score: f64,
    pub observations: u64,
}

pub struct SnapshotStore {
    conn: Connection,
}

impl SnapshotStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open snapshot store at {:?}", path))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory snapshot store")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize snapshot schema")?;
        Ok(Self { conn })
    }

    /// Save under `name`, replacing any snapshot already stored there
    pub fn save(&mut self, name: &str, snapshot: &LearningSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot).context("Failed to serialize snapshot")?;
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM snapshot_scores WHERE snapshot_name = ?1", params![name])?;
        tx.execute(
            r#"
            INSERT INTO snapshots (name, version, snapshot_json, scores_tracked, outcomes_recorded, saved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(name) DO UPDATE SET
                version = excluded.version,
                snapshot_json = excluded.snapshot_json,
                scores_tracked = excluded.scores_tracked,
                outcomes_recorded = excluded.outcomes_recorded,
                saved_at = excluded.saved_at
            "#,
            params![
                name,
                snapshot.version,
                json,
                snapshot.scores.len() as i64,
                snapshot.outcomes_recorded as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO snapshot_scores (snapshot_name, plugin_id, domain, bucket, score, observations)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for score in &snapshot.scores {
                stmt.execute(params![
                    name,
                    score.key.plugin_id,
                    score.key.domain,
                    score.key.bucket,
                    score.score,
                    score.observations as i64,
                ])?;
            }
        }

        tx.commit()?;
        tracing::debug!(name = %name, scores = snapshot.scores.len(), "snapshot saved");
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<Option<LearningSnapshot>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT snapshot_json FROM snapshots WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| {
            serde_json::from_str(&j).with_context(|| format!("Snapshot '{}' is corrupt", name))
        })
        .transpose()
    }

    /// All stored snapshots, most recently saved first
    pub fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, version, scores_tracked, outcomes_recorded, saved_at FROM snapshots ORDER BY saved_at DESC, name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut infos = Vec::new();
        for row in rows {
            let (name, version, scores, outcomes, saved_at) = row?;
            let saved_at = DateTime::parse_from_rfc3339(&saved_at)
                .with_context(|| format!("Bad saved_at for snapshot '{}'", name))?
                .with_timezone(&Utc);
            infos.push(SnapshotInfo {
                name,
                version,
                scores_tracked: scores as usize,
                outcomes_recorded: outcomes as u64,
                saved_at,
            });
        }
        Ok(infos)
    }

    /// Returns false if nothing was stored under `name`
    pub fn delete(&mut self, name: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM snapshot_scores WHERE snapshot_name = ?1", params![name])?;
        let removed = tx.execute("DELETE FROM snapshots WHERE name = ?1", params![name])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Best-scoring plugins for one (domain, bucket) in a stored snapshot
    pub fn top_scores(&self, name: &str, domain: &str, bucket: i64, limit: usize) -> Result<Vec<StoredScore>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT plugin_id, score, observations FROM snapshot_scores
            WHERE snapshot_name = ?1 AND domain = ?2 AND bucket = ?3
            ORDER BY score DESC, plugin_id
            LIMIT ?4
            "#,
        )?;
        let scores = stmt
            .query_map(params![name, domain, bucket, limit as i64], |row| {
                Ok(StoredScore {
                    plugin_id: row.get(0)?,
                    score: row.get(1)?,
                    observations: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HistoryCaps, LearningConfig};
    use crate::learning::LearningEngine;
    use crate::types::{Context, Intervention, OutcomeLabel};
    use tempfile::tempdir;

    fn trained_engine() -> LearningEngine {
        let engine = LearningEngine::new(LearningConfig::default(), HistoryCaps::default()).unwrap();
        let ctx = Context::new(4.0).with_domain("ops");
        let good = Intervention::new("good", "prompt", serde_json::Value::Null);
        let bad = Intervention::new("bad", "prompt", serde_json::Value::Null);
        engine
            .record_outcome(&ctx, &[good], OutcomeLabel::Success, 1.0)
            .unwrap();
        engine
            .record_outcome(&ctx, &[bad], OutcomeLabel::Failure, 0.0)
            .unwrap();
        engine
    }

    #[test]
    fn test_init_creates_tables() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let tables: Vec<String> = store
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"snapshots".to_string()));
        assert!(tables.contains(&"snapshot_scores".to_string()));
    }

    #[test]
    fn test_save_load_round_trip_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("learning.db");
        let snapshot = trained_engine().export();

        {
            let mut store = SnapshotStore::open(&path).unwrap();
            store.save("nightly", &snapshot).unwrap();
        }

        let store = SnapshotStore::open(&path).unwrap();
        let loaded = store.load("nightly").unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert!(store.load("missing").unwrap().is_none());

        let restored = LearningEngine::new(LearningConfig::default(), HistoryCaps::default()).unwrap();
        restored.import(loaded).unwrap();
        assert!((restored.effectiveness_score("good", "ops", 4) - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_save_replaces_existing() {
        let mut store = SnapshotStore::open_in_memory().unwrap();
        let empty = LearningEngine::new(LearningConfig::default(), HistoryCaps::default())
            .unwrap()
            .export();
        store.save("s", &trained_engine().export()).unwrap();
        store.save("s", &empty).unwrap();

        let infos = store.list().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].scores_tracked, 0);
        assert!(store.top_scores("s", "ops", 4, 10).unwrap().is_empty());
    }

    #[test]
    fn test_top_scores_ordering() {
        let mut store = SnapshotStore::open_in_memory().unwrap();
        store.save("s", &trained_engine().export()).unwrap();

        let top = store.top_scores("s", "ops", 4, 10).unwrap();
        let ids: Vec<&str> = top.iter().map(|s| s.plugin_id.as_str()).collect();
        assert_eq!(ids, vec!["good", "bad"]);
        assert_eq!(top[0].observations, 1);
    }

    #[test]
    fn test_delete() {
        let mut store = SnapshotStore::open_in_memory().unwrap();
        store.save("s", &trained_engine().export()).unwrap();

        assert!(store.delete("s").unwrap());
        assert!(!store.delete("s").unwrap());
        assert!(store.list().unwrap().is_empty());
        assert!(store.top_scores("s", "ops", 4, 10).unwrap().is_empty());
    }
}
