//! Inode allocation and the inode table used by the FUSE adapter.
//!
//! [`IndexAllocator`] hands out process-unique inode numbers to nodes as they
//! are constructed. [`InodeTable`] remembers which node the kernel knows under
//! which inode so later requests can be dispatched to it.
//!
//! # Error Handling
//!
//! Lock poisoning returns errors rather than panicking:
//! - FUSE should return `EIO` to applications rather than crash the daemon
//! - Individual file operations failing is better than daemon death

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::constants::FIRST_ALLOCATED_INODE;
use crate::constants::ROOT_INODE;
use crate::error::FsError;
use crate::error::Result;
use crate::node::NodeRef;

/// Monotonic inode number generator.
///
/// Shared by reference with every node constructor so numbers stay unique
/// across the whole namespace. Inode 1 is reserved for the root directory.
#[derive(Debug)]
pub struct IndexAllocator {
    counter: AtomicU64,
}

impl IndexAllocator {
    /// Create an allocator whose first value is [`FIRST_ALLOCATED_INODE`].
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(FIRST_ALLOCATED_INODE),
        }
    }

    /// Return the next unused inode number.
    pub fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IndexAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Map from inode number to the node the kernel was told about.
///
/// Nodes are registered when returned from lookup, create or readdir and
/// dropped again when unlinked.
pub struct InodeTable {
    nodes: RwLock<HashMap<u64, NodeRef>>,
}

impl InodeTable {
    /// Create a table containing only the root node.
    pub fn new(root: NodeRef) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_INODE, root);
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Remember `node` under its own inode number.
    ///
    /// # Errors
    ///
    /// Returns `LockPoisoned` if the internal lock is poisoned.
    pub fn register(&self, node: &NodeRef) -> Result<()> {
        let mut nodes = self.nodes.write().map_err(|_| FsError::LockPoisoned { node: "inode table" })?;
        nodes.entry(node.index()).or_insert_with(|| node.clone());
        Ok(())
    }

    /// Look up a node by inode number.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown inodes and `LockPoisoned` if the internal
    /// lock is poisoned.
    pub fn get(&self, inode: u64) -> Result<NodeRef> {
        let nodes = self.nodes.read().map_err(|_| FsError::LockPoisoned { node: "inode table" })?;
        nodes.get(&inode).cloned().ok_or_else(|| FsError::NotFound {
            name: format!("inode {inode}"),
        })
    }

    /// Forget an inode. The root is never removed.
    ///
    /// # Errors
    ///
    /// Returns `LockPoisoned` if the internal lock is poisoned.
    pub fn remove(&self, inode: u64) -> Result<()> {
        if inode == ROOT_INODE {
            return Ok(());
        }
        let mut nodes = self.nodes.write().map_err(|_| FsError::LockPoisoned { node: "inode table" })?;
        nodes.remove(&inode);
        Ok(())
    }

    /// Number of registered inodes, root included.
    ///
    /// # Errors
    ///
    /// Returns `LockPoisoned` if the internal lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        let nodes = self.nodes.read().map_err(|_| FsError::LockPoisoned { node: "inode table" })?;
        Ok(nodes.len())
    }
}
