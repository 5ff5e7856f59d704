//! Graph storage backed by RocksDB.
//!
//! Nodes and edges live in separate column families, JSON-encoded, keyed so
//! that a label (nodes) or a source node (edges) is a contiguous key range.
//! The `metadata` column family keeps small run records such as the last
//! build summary.

use std::path::Path;

use anyhow::{Context, Result, bail};
use pga_common::PgaError;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::model::{GraphEdge, GraphNode, MergeOutcome, NodeLabel, NodeRef};
use crate::store::{GraphStore, merge_into};

const DEFAULT_CF: &str = "default";
const NODES_CF: &str = "nodes";
const EDGES_CF: &str = "edges";
const METADATA_CF: &str = "metadata";

type KvBytes = (Box<[u8]>, Box<[u8]>);

/// Embedded graph store backed by RocksDB.
pub struct RocksGraph {
    db: DB,
}

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    [DEFAULT_CF, NODES_CF, EDGES_CF, METADATA_CF]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
        .collect()
}

/// Byte prefix for iterating all nodes of a label.
fn label_prefix(label: NodeLabel) -> Vec<u8> {
    format!("{}:", label.as_str()).into_bytes()
}

/// Byte prefix for iterating all edges leaving a node.
fn source_prefix(node: &NodeRef) -> Vec<u8> {
    format!("{}|", node.key()).into_bytes()
}

fn decode_node(bytes: &[u8]) -> Result<GraphNode> {
    serde_json::from_slice(bytes).context("failed to decode graph node")
}

fn decode_edge(bytes: &[u8]) -> Result<GraphEdge> {
    serde_json::from_slice(bytes).context("failed to decode graph edge")
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl RocksGraph {
    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .with_context(|| format!("missing RocksDB column family `{name}`"))
    }

    fn scan_cf(&self, cf_name: &'static str, prefix: &[u8]) -> Result<Vec<KvBytes>> {
        let cf = self.cf(cf_name)?;
        let mut items = Vec::new();

        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            items.push((key, value));
        }

        Ok(items)
    }

    /// Open (or create) a RocksDB database at `path`.
    ///
    /// Failure here (missing permissions, lock held by another process) is
    /// the store-connection error that aborts an audit run.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut db_options = Options::default();
        db_options.create_if_missing(true);
        db_options.create_missing_column_families(true);

        let db = DB::open_cf_descriptors(&db_options, path, cf_descriptors()).map_err(|e| {
            PgaError::Store(format!("failed to open graph store at '{}': {e}", path.display()))
        })?;

        tracing::debug!(path = %path.display(), "opened graph store");
        Ok(Self { db })
    }

    // -- Metadata ----------------------------------------------------------

    pub fn put_metadata<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_vec(value).context("failed to encode metadata")?;
        self.db
            .put_cf(self.cf(METADATA_CF)?, key.as_bytes(), encoded)
            .with_context(|| format!("failed to persist metadata `{key}`"))
    }

    pub fn get_metadata<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(METADATA_CF)?, key.as_bytes())? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("failed to decode metadata `{key}`"))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn node_exists(&self, node: &NodeRef) -> Result<bool> {
        Ok(self
            .db
            .get_cf(self.cf(NODES_CF)?, node.key().as_bytes())?
            .is_some())
    }
}

impl GraphStore for RocksGraph {
    // -- Node operations ---------------------------------------------------

    fn merge_node(&mut self, node: GraphNode) -> Result<MergeOutcome> {
        let key = node.node_ref().key();
        let existing = self.node(&node.node_ref())?;
        let (merged, outcome) = merge_into(existing, node)?;
        if outcome != MergeOutcome::Unchanged {
            let encoded = serde_json::to_vec(&merged).context("failed to encode graph node")?;
            self.db
                .put_cf(self.cf(NODES_CF)?, key.as_bytes(), encoded)
                .with_context(|| format!("failed to write node `{key}`"))?;
        }
        Ok(outcome)
    }

    fn node(&self, node: &NodeRef) -> Result<Option<GraphNode>> {
        match self.db.get_cf(self.cf(NODES_CF)?, node.key().as_bytes())? {
            Some(bytes) => Ok(Some(decode_node(&bytes)?)),
            None => Ok(None),
        }
    }

    fn nodes(&self, label: NodeLabel) -> Result<Vec<GraphNode>> {
        self.scan_cf(NODES_CF, &label_prefix(label))?
            .into_iter()
            .map(|(_k, v)| decode_node(&v))
            .collect()
    }

    // -- Edge operations ---------------------------------------------------

    fn merge_edge(&mut self, edge: GraphEdge) -> Result<MergeOutcome> {
        if !self.node_exists(&edge.src)? {
            bail!("source node {} does not exist", edge.src);
        }
        if !self.node_exists(&edge.dst)? {
            bail!("destination node {} does not exist", edge.dst);
        }

        let key = edge.key();
        let edges_cf = self.cf(EDGES_CF)?;
        if self.db.get_cf(edges_cf, key.as_bytes())?.is_some() {
            return Ok(MergeOutcome::Unchanged);
        }
        let encoded = serde_json::to_vec(&edge).context("failed to encode graph edge")?;
        self.db
            .put_cf(edges_cf, key.as_bytes(), encoded)
            .with_context(|| format!("failed to write edge `{key}`"))?;
        Ok(MergeOutcome::Created)
    }

    fn outgoing(&self, node: &NodeRef) -> Result<Vec<GraphEdge>> {
        self.scan_cf(EDGES_CF, &source_prefix(node))?
            .into_iter()
            .map(|(_k, v)| decode_edge(&v))
            .collect()
    }

    fn edges(&self) -> Result<Vec<GraphEdge>> {
        self.scan_cf(EDGES_CF, &[])?
            .into_iter()
            .map(|(_k, v)| decode_edge(&v))
            .collect()
    }

    // -- Cleanup -----------------------------------------------------------

    fn clear_labels(&mut self, labels: &[NodeLabel]) -> Result<usize> {
        let nodes_cf = self.cf(NODES_CF)?;
        let edges_cf = self.cf(EDGES_CF)?;
        let mut batch = WriteBatch::default();
        let mut removed = 0;

        for label in labels {
            for (key, _value) in self.scan_cf(NODES_CF, &label_prefix(*label))? {
                batch.delete_cf(nodes_cf, key);
                removed += 1;
            }
        }
        for (key, value) in self.scan_cf(EDGES_CF, &[])? {
            let edge = decode_edge(&value)?;
            if labels.contains(&edge.src.label) || labels.contains(&edge.dst.label) {
                batch.delete_cf(edges_cf, key);
            }
        }

        self.db
            .write(batch)
            .context("failed to clear graph labels")?;
        tracing::debug!(removed, ?labels, "cleared graph labels");
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
