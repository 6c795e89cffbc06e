//! Sled-backed persistence for seen nodes and auxiliary action state.
//!
//! The primary tree records every node the bot has heard ([`NodeRecord`],
//! keyed by node id). Actions needing their own state open additional named
//! trees through [`NodeStore::open_tree`] rather than growing this schema.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::IVec;
use thiserror::Error;

const TREE_NODES: &str = "nodes";
/// Tree names actions may open are namespaced to avoid colliding with ours.
const ACTION_TREE_PREFIX: &str = "action_";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One row per node heard on the mesh. Only invariant: node id uniqueness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub node_id: u32,
    pub last_seen: DateTime<Utc>,
    /// Raw packet mapping captured when the node was first heard.
    pub raw_json: Option<String>,
}

/// Handle onto the node database. Cloning shares the underlying sled handle;
/// access in this process is sequential (one dispatch thread), sled itself
/// is safe should that change.
#[derive(Clone)]
pub struct NodeStore {
    db: sled::Db,
    nodes: sled::Tree,
}

impl NodeStore {
    /// Open (or create) the store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let nodes = db.open_tree(TREE_NODES)?;
        Ok(Self { db, nodes })
    }

    fn node_key(node_id: u32) -> [u8; 4] {
        node_id.to_be_bytes()
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(bytes: IVec) -> Result<T, StoreError> {
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Insert or refresh a node row. The raw packet capture is kept from the
    /// first sighting; later upserts only move the timestamp.
    pub fn upsert_node(
        &self,
        node_id: u32,
        seen_at: DateTime<Utc>,
        raw_json: Option<&str>,
    ) -> Result<(), StoreError> {
        let record = match self.get_node(node_id)? {
            Some(mut existing) => {
                existing.last_seen = seen_at;
                if existing.raw_json.is_none() {
                    existing.raw_json = raw_json.map(str::to_string);
                }
                existing
            }
            None => NodeRecord {
                node_id,
                last_seen: seen_at,
                raw_json: raw_json.map(str::to_string),
            },
        };
        self.nodes
            .insert(Self::node_key(node_id), Self::serialize(&record)?)?;
        Ok(())
    }

    pub fn get_node(&self, node_id: u32) -> Result<Option<NodeRecord>, StoreError> {
        match self.nodes.get(Self::node_key(node_id))? {
            Some(bytes) => Ok(Some(Self::deserialize(bytes)?)),
            None => Ok(None),
        }
    }

    pub fn has_seen_node(&self, node_id: u32) -> Result<bool, StoreError> {
        Ok(self.nodes.contains_key(Self::node_key(node_id))?)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Every recorded node, in key order. The table stays small (hundreds of
    /// rows at most), so a full materialized scan is fine.
    pub fn all_nodes(&self) -> Result<Vec<NodeRecord>, StoreError> {
        let mut records = Vec::with_capacity(self.nodes.len());
        for entry in self.nodes.iter() {
            let (_, bytes) = entry?;
            records.push(Self::deserialize(bytes)?);
        }
        Ok(records)
    }

    /// Delete rows last seen before `cutoff`. Returns how many were removed.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut stale = Vec::new();
        for entry in self.nodes.iter() {
            let (key, bytes) = entry?;
            let record: NodeRecord = Self::deserialize(bytes)?;
            if record.last_seen < cutoff {
                stale.push(key);
            }
        }
        let removed = stale.len();
        for key in stale {
            self.nodes.remove(key)?;
        }
        Ok(removed)
    }

    /// Passthrough for action-specific state: a private named tree inside
    /// the same database.
    pub fn open_tree(&self, name: &str) -> Result<sled::Tree, StoreError> {
        Ok(self.db.open_tree(format!("{ACTION_TREE_PREFIX}{name}"))?)
    }

    /// Force pending writes to disk. Called on shutdown.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
