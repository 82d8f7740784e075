//! SQLite-backed persistence, pooled with `r2d2` the way the teacher's
//! `SqliteDepositStore` is: one struct wrapping a
//! `Pool<SqliteConnectionManager>`, a `run_migrations` step on open,
//! and synchronous helper methods underneath.

use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::commitment::{Commitment, CommitmentType, Payload, QueryFilter};
use crate::crypto::hash::{from_hex, to_hex};
use crate::store::StoreError;
use crate::tree::{MerkleTree, TreeNode, TreeState};

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AnchorRecord {
    #[serde(rename = "anchorIndex")]
    pub anchor_index: u64,
    pub txid: String,
    #[serde(rename = "rootHash")]
    pub root_hash: String,
    #[serde(rename = "commitmentCount")]
    pub commitment_count: u64,
    #[serde(rename = "previousAnchor", skip_serializing_if = "Option::is_none")]
    pub previous_anchor: Option<String>,
    pub timestamp: u64,
    #[serde(rename = "blockHeight", skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    /// For tests: an in-memory database, one connection, migrated the
    /// same way as a file-backed store.
    pub fn in_memory() -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        self.pool.get().map_err(|e| StoreError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS commitments (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                subject TEXT NOT NULL,
                content TEXT NOT NULL,
                counterparty TEXT,
                metadata_json TEXT,
                timestamp INTEGER NOT NULL,
                signature TEXT NOT NULL,
                leaf_hash TEXT NOT NULL,
                tree_index INTEGER NOT NULL UNIQUE
            );
            CREATE INDEX IF NOT EXISTS idx_commitments_kind ON commitments(kind);
            CREATE INDEX IF NOT EXISTS idx_commitments_timestamp ON commitments(timestamp);

            CREATE TABLE IF NOT EXISTS tree_nodes (
                level INTEGER NOT NULL,
                idx INTEGER NOT NULL,
                hash TEXT NOT NULL,
                PRIMARY KEY (level, idx)
            );

            CREATE TABLE IF NOT EXISTS tree_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS anchors (
                anchor_index INTEGER PRIMARY KEY,
                txid TEXT NOT NULL UNIQUE,
                root_hash TEXT NOT NULL,
                block_height INTEGER,
                timestamp INTEGER NOT NULL,
                commitment_count INTEGER NOT NULL,
                previous_anchor TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_anchors_root_hash ON anchors(root_hash);

            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }

    /// Rebuild the in-memory tree from `tree_nodes`/`tree_state` and
    /// confirm the persisted root matches. Returns `None` for a fresh,
    /// empty store. Any mismatch is an integrity failure — the caller
    /// must refuse to open read-write.
    pub fn rebuild_tree(&self) -> Result<Option<MerkleTree>, StoreError> {
        let leaf_count = match self.tree_state_value("leafCount")? {
            Some(v) => v.parse::<u64>().map_err(|e| StoreError::Malformed(e.to_string()))?,
            None => return Ok(None),
        };
        if leaf_count == 0 {
            return Ok(None);
        }
        let persisted_root = self
            .tree_state_value("rootHash")?
            .ok_or_else(|| StoreError::Malformed("tree_state missing rootHash".to_string()))?;

        let nodes = self.load_tree_nodes()?;
        let tree = MerkleTree::from_nodes(nodes, leaf_count);
        let rebuilt_root = to_hex(&tree.root_hash());

        if rebuilt_root != persisted_root {
            return Err(StoreError::Integrity {
                persisted: persisted_root,
                rebuilt: rebuilt_root,
                leaf_count,
            });
        }

        Ok(Some(tree))
    }

    fn load_tree_nodes(&self) -> Result<Vec<TreeNode>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT level, idx, hash FROM tree_nodes")
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let level: i64 = row.get(0)?;
                let index: i64 = row.get(1)?;
                let hash: String = row.get(2)?;
                Ok((level as u32, index as u64, hash))
            })
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut nodes = Vec::new();
        for row in rows {
            let (level, index, hash) = row.map_err(|e| StoreError::Database(e.to_string()))?;
            let hash = from_hex(&hash).map_err(|e| StoreError::Malformed(e.to_string()))?;
            nodes.push(TreeNode::new(level, index, hash));
        }
        Ok(nodes)
    }

    fn tree_state_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        conn.query_row("SELECT value FROM tree_state WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn set_tree_state_value(conn: &rusqlite::Connection, key: &str, value: &str) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO tree_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Insert a freshly signed, tree-appended commitment together with
    /// the tree nodes it touched and the tree's new summary state, all
    /// within a single transaction (`spec.md` §4.3 atomicity).
    pub fn insert_commitment(
        &self,
        commitment: &Commitment,
        nodes: &[TreeNode],
        state: TreeState,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| StoreError::Database(e.to_string()))?;

        let metadata_json = commitment
            .payload
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(&m.to_json()))
            .transpose()
            .map_err(|e| StoreError::Malformed(e.to_string()))?;

        tx.execute(
            r#"
            INSERT INTO commitments (
                id, kind, subject, content, counterparty, metadata_json,
                timestamp, signature, leaf_hash, tree_index
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                commitment.id,
                commitment.kind.as_str(),
                commitment.payload.subject,
                commitment.payload.content,
                commitment.payload.counterparty,
                metadata_json,
                commitment.timestamp as i64,
                commitment.signature,
                commitment.leaf_hash,
                commitment.tree_index.map(|v| v as i64),
            ],
        )
        .map_err(|e| map_insert_error(e, &commitment.id))?;

        for node in nodes {
            tx.execute(
                "INSERT INTO tree_nodes (level, idx, hash) VALUES (?1, ?2, ?3)
                 ON CONFLICT(level, idx) DO UPDATE SET hash = excluded.hash",
                params![node.level as i64, node.index as i64, to_hex(&node.hash)],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        Self::set_tree_state_value(&tx, "rootHash", &to_hex(&state.root_hash))
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Self::set_tree_state_value(&tx, "leafCount", &state.leaf_count.to_string())
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tx.commit().map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    pub fn get_commitment(&self, id: &str) -> Result<Option<Commitment>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, kind, subject, content, counterparty, metadata_json,
                    timestamp, signature, leaf_hash, tree_index
             FROM commitments WHERE id = ?1",
            params![id],
            row_to_commitment,
        )
        .optional()
        .map_err(|e| StoreError::Database(e.to_string()))?
        .transpose()
    }

    pub fn count_commitments(&self) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM commitments", [], |row| row.get(0))
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(count as u64)
    }

    /// Count commitments whose `tree_index >= min_index`, used to
    /// derive `getUnanchoredCount` against the latest anchor's
    /// `commitmentCount`.
    pub fn count_commitments_with_tree_index_at_least(&self, min_index: u64) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM commitments WHERE tree_index >= ?1",
                params![min_index as i64],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(count as u64)
    }

    pub fn query_commitments(&self, filter: &QueryFilter) -> Result<Vec<Commitment>, StoreError> {
        let conn = self.conn()?;

        let mut clauses = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(kind) = filter.kind {
            clauses.push("kind = ?".to_string());
            values.push(Box::new(kind.as_str().to_string()));
        }
        if let Some(subject) = &filter.subject_contains {
            clauses.push("subject LIKE ? ESCAPE '\\'".to_string());
            values.push(Box::new(format!("%{}%", escape_like(subject))));
        }
        if let Some(counterparty) = &filter.counterparty {
            clauses.push("counterparty = ?".to_string());
            values.push(Box::new(counterparty.clone()));
        }
        if let Some(since) = filter.since {
            clauses.push("timestamp >= ?".to_string());
            values.push(Box::new(since as i64));
        }
        if let Some(until) = filter.until {
            clauses.push("timestamp <= ?".to_string());
            values.push(Box::new(until as i64));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let limit = filter.limit.min(QueryFilter::MAX_LIMIT);
        values.push(Box::new(limit as i64));
        values.push(Box::new(filter.offset as i64));

        let sql = format!(
            "SELECT id, kind, subject, content, counterparty, metadata_json,
                    timestamp, signature, leaf_hash, tree_index
             FROM commitments {where_clause}
             ORDER BY timestamp DESC
             LIMIT ? OFFSET ?"
        );

        let mut stmt = conn.prepare(&sql).map_err(|e| StoreError::Database(e.to_string()))?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();

        let rows = stmt
            .query_map(params_ref.as_slice(), row_to_commitment)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut commitments = Vec::new();
        for row in rows {
            commitments.push(row.map_err(|e| StoreError::Database(e.to_string()))??);
        }
        Ok(commitments)
    }

    /// Record a new anchor and advance `tree_state.lastAnchorIndex` in
    /// the same transaction (`spec.md` §4.4).
    pub fn insert_anchor(&self, anchor: &AnchorRecord) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| StoreError::Database(e.to_string()))?;

        tx.execute(
            r#"
            INSERT INTO anchors (
                anchor_index, txid, root_hash, block_height, timestamp,
                commitment_count, previous_anchor
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                anchor.anchor_index as i64,
                anchor.txid,
                anchor.root_hash,
                anchor.block_height.map(|v| v as i64),
                anchor.timestamp as i64,
                anchor.commitment_count as i64,
                anchor.previous_anchor,
            ],
        )
        .map_err(|e| map_insert_error(e, &anchor.txid))?;

        Self::set_tree_state_value(&tx, "lastAnchorIndex", &anchor.anchor_index.to_string())
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tx.commit().map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    pub fn last_anchor_index(&self) -> Result<Option<u64>, StoreError> {
        match self.tree_state_value("lastAnchorIndex")? {
            Some(v) => Ok(Some(v.parse().map_err(|e: std::num::ParseIntError| StoreError::Malformed(e.to_string()))?)),
            None => Ok(None),
        }
    }

    pub fn get_anchor_by_txid(&self, txid: &str) -> Result<Option<AnchorRecord>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT anchor_index, txid, root_hash, block_height, timestamp,
                    commitment_count, previous_anchor
             FROM anchors WHERE txid = ?1",
            params![txid],
            row_to_anchor,
        )
        .optional()
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    pub fn get_latest_anchor(&self) -> Result<Option<AnchorRecord>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT anchor_index, txid, root_hash, block_height, timestamp,
                    commitment_count, previous_anchor
             FROM anchors ORDER BY anchor_index DESC LIMIT 1",
            [],
            row_to_anchor,
        )
        .optional()
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Anchors in ascending `anchorIndex` order, used both for listing
    /// and for the proof-binding search (first anchor whose
    /// `commitmentCount` covers a given tree index).
    pub fn list_anchors(&self) -> Result<Vec<AnchorRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT anchor_index, txid, root_hash, block_height, timestamp,
                        commitment_count, previous_anchor
                 FROM anchors ORDER BY anchor_index ASC",
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_anchor)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut anchors = Vec::new();
        for row in rows {
            anchors.push(row.map_err(|e| StoreError::Database(e.to_string()))?);
        }
        Ok(anchors)
    }

    /// Set `blockHeight` on the anchor matching `txid`. A no-op if the
    /// height is already set — the lifecycle never reverts a
    /// confirmation once recorded.
    pub fn set_anchor_block_height(
        &self,
        txid: &str,
        block_height: u64,
    ) -> Result<Option<AnchorRecord>, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE anchors SET block_height = ?2 WHERE txid = ?1 AND block_height IS NULL",
            params![txid, block_height as i64],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        self.get_anchor_by_txid(txid)
    }

    pub fn get_config(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        conn.query_row("SELECT value FROM config WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}

fn map_insert_error(e: rusqlite::Error, key: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(ref err, _) = e {
        if err.extended_code == 1555 || err.extended_code == 2067 || err.extended_code == 1062 {
            return StoreError::Duplicate(key.to_string());
        }
    }
    StoreError::Database(e.to_string())
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn row_to_commitment(row: &rusqlite::Row) -> rusqlite::Result<Result<Commitment, StoreError>> {
    let id: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let subject: String = row.get(2)?;
    let content: String = row.get(3)?;
    let counterparty: Option<String> = row.get(4)?;
    let metadata_json: Option<String> = row.get(5)?;
    let timestamp: i64 = row.get(6)?;
    let signature: String = row.get(7)?;
    let leaf_hash: String = row.get(8)?;
    let tree_index: i64 = row.get(9)?;

    Ok((|| {
        let kind: CommitmentType = kind_str
            .parse()
            .map_err(StoreError::Malformed)?;

        let mut payload = Payload::new(subject, content);
        if let Some(counterparty) = counterparty {
            payload = payload.with_counterparty(counterparty);
        }
        if let Some(json) = metadata_json {
            let value: serde_json::Value =
                serde_json::from_str(&json).map_err(|e| StoreError::Malformed(e.to_string()))?;
            let metadata = crate::canon::CanonValue::from_json(&value)
                .map_err(|e| StoreError::Malformed(e.to_string()))?;
            payload = payload.with_metadata(metadata);
        }

        Ok(Commitment {
            id,
            kind,
            payload,
            timestamp: timestamp as u64,
            signature,
            leaf_hash: Some(leaf_hash),
            tree_index: Some(tree_index as u64),
        })
    })())
}

fn row_to_anchor(row: &rusqlite::Row) -> rusqlite::Result<AnchorRecord> {
    let block_height: Option<i64> = row.get(3)?;
    Ok(AnchorRecord {
        anchor_index: row.get::<_, i64>(0)? as u64,
        txid: row.get(1)?,
        root_hash: row.get(2)?,
        block_height: block_height.map(|v| v as u64),
        timestamp: row.get::<_, i64>(4)? as u64,
        commitment_count: row.get::<_, i64>(5)? as u64,
        previous_anchor: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;

    fn signed_commitment(index: u64) -> (Commitment, Vec<TreeNode>, TreeState) {
        let leaf = sha256(format!("leaf-{index}").as_bytes());
        let mut tree = MerkleTree::new();
        let nodes = tree.append(leaf);
        let state = tree.state();
        let commitment = Commitment {
            id: format!("commit_{index:024x}"),
            kind: CommitmentType::Agreement,
            payload: Payload::new("subject", "content"),
            timestamp: 1_700_000_000_000 + index,
            signature: "ab".repeat(32),
            leaf_hash: Some(to_hex(&leaf)),
            tree_index: Some(index),
        };
        (commitment, nodes, state)
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let store = SqliteStore::in_memory().unwrap();
        let (commitment, nodes, state) = signed_commitment(0);
        store.insert_commitment(&commitment, &nodes, state).unwrap();

        let fetched = store.get_commitment(&commitment.id).unwrap().unwrap();
        assert_eq!(fetched.id, commitment.id);
        assert_eq!(fetched.tree_index, Some(0));
    }

    #[test]
    fn get_unknown_id_returns_none() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get_commitment("commit_missing").unwrap().is_none());
    }

    #[test]
    fn rebuild_tree_matches_persisted_root_after_several_appends() {
        let store = SqliteStore::in_memory().unwrap();
        for i in 0..5 {
            let (commitment, nodes, state) = signed_commitment(i);
            store.insert_commitment(&commitment, &nodes, state).unwrap();
        }

        let rebuilt = store.rebuild_tree().unwrap().unwrap();
        let persisted_root = store.tree_state_value("rootHash").unwrap().unwrap();
        assert_eq!(to_hex(&rebuilt.root_hash()), persisted_root);
        assert_eq!(rebuilt.leaf_count(), 5);
    }

    #[test]
    fn duplicate_tree_index_is_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let (c1, n1, s1) = signed_commitment(0);
        store.insert_commitment(&c1, &n1, s1).unwrap();

        let mut c2 = signed_commitment(0).0;
        c2.id = "commit_other".to_string();
        let result = store.insert_commitment(&c2, &[], s1);
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
    }

    #[test]
    fn anchor_lifecycle_never_reverts_block_height() {
        let store = SqliteStore::in_memory().unwrap();
        let anchor = AnchorRecord {
            anchor_index: 0,
            txid: "txid1".to_string(),
            root_hash: "aa".repeat(32),
            commitment_count: 3,
            previous_anchor: None,
            timestamp: 1_700_000_000_000,
            block_height: None,
        };
        store.insert_anchor(&anchor).unwrap();

        let confirmed = store.set_anchor_block_height("txid1", 100).unwrap().unwrap();
        assert_eq!(confirmed.block_height, Some(100));

        let unchanged = store.set_anchor_block_height("txid1", 200).unwrap().unwrap();
        assert_eq!(unchanged.block_height, Some(100));
    }

    #[test]
    fn query_filters_compose_with_and() {
        let store = SqliteStore::in_memory().unwrap();
        let mut tree = MerkleTree::new();

        for (i, (kind, subject)) in [
            (CommitmentType::Agreement, "code-review"),
            (CommitmentType::Attestation, "uptime"),
            (CommitmentType::Agreement, "uptime"),
        ]
        .into_iter()
        .enumerate()
        {
            let leaf = sha256(format!("leaf-{i}").as_bytes());
            let nodes = tree.append(leaf);
            let state = tree.state();
            let commitment = Commitment {
                id: format!("commit_{i:024x}"),
                kind,
                payload: Payload::new(subject, "content"),
                timestamp: 1_700_000_000_000 + i as u64,
                signature: "cd".repeat(32),
                leaf_hash: Some(to_hex(&leaf)),
                tree_index: Some(i as u64),
            };
            store.insert_commitment(&commitment, &nodes, state).unwrap();
        }

        let mut filter = QueryFilter::new();
        filter.kind = Some(CommitmentType::Agreement);
        filter.subject_contains = Some("uptime".to_string());
        let results = store.query_commitments(&filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].payload.subject, "uptime");
        assert_eq!(results[0].kind, CommitmentType::Agreement);
    }
}
