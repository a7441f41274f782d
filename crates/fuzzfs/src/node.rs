//! Node capability contract driven by the FUSE adapter.
//!
//! Every entry in the namespace (the root directory, Worms, mutant views and
//! control files) implements [`FsNode`]. Capabilities a node does not have
//! keep the default implementation, which fails with `NotSupported`.

use std::sync::Arc;
use std::time::SystemTime;

use crate::error::FsError;
use crate::error::Result;

/// Shared handle to any node in the namespace.
pub type NodeRef = Arc<dyn FsNode>;

/// Shape of a node as reported to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

/// Attributes reported by [`FsNode::attr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttr {
    /// Inode number.
    pub index: u64,
    /// File or directory.
    pub kind: NodeKind,
    /// Permission bits (without file type bits).
    pub perm: u32,
    /// Size in bytes.
    pub size: u64,
}

impl NodeAttr {
    /// Attributes of a regular file.
    pub fn file(index: u64, perm: u32, size: u64) -> Self {
        Self {
            index,
            kind: NodeKind::File,
            perm,
            size,
        }
    }

    /// Attributes of a directory.
    pub fn directory(index: u64, perm: u32) -> Self {
        Self {
            index,
            kind: NodeKind::Directory,
            perm,
            size: 0,
        }
    }
}

/// One entry returned by [`FsNode::read_directory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Inode number of the entry.
    pub index: u64,
    /// File or directory.
    pub kind: NodeKind,
    /// Entry name.
    pub name: String,
}

/// A timestamp change requested by setattr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUpdate {
    /// Set to the current time.
    Now,
    /// Set to an explicit time.
    At(SystemTime),
}

/// Attribute changes requested by setattr.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrUpdate {
    /// New size (truncate or extend).
    pub size: Option<u64>,
    /// New permission bits.
    pub mode: Option<u32>,
    /// Whether uid or gid changes.
    pub owner: bool,
    /// New access time.
    pub atime: Option<TimeUpdate>,
    /// New modification time.
    pub mtime: Option<TimeUpdate>,
}

impl AttrUpdate {
    /// The update issued by `touch`.
    pub fn touch() -> Self {
        Self {
            atime: Some(TimeUpdate::Now),
            mtime: Some(TimeUpdate::Now),
            ..Self::default()
        }
    }

    /// A size-only update.
    pub fn truncate(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Self::default()
        }
    }

    /// Whether this update means "touch now": the modification time moves to
    /// the current time and nothing but timestamps changes.
    pub fn is_touch_now(&self) -> bool {
        matches!(self.mtime, Some(TimeUpdate::Now)) && self.size.is_none() && self.mode.is_none() && !self.owner
    }
}

/// Capabilities a namespace node can offer to the host dispatcher.
pub trait FsNode: Send + Sync {
    /// Inode number attached to this node.
    fn index(&self) -> u64;

    /// Current attributes.
    fn attr(&self) -> Result<NodeAttr>;

    /// Resolve a child by name.
    fn lookup(&self, _name: &str) -> Result<NodeRef> {
        Err(FsError::NotSupported { operation: "lookup" })
    }

    /// Create a named child.
    fn create(&self, _name: &str) -> Result<NodeRef> {
        Err(FsError::NotSupported { operation: "create" })
    }

    /// List children.
    fn read_directory(&self) -> Result<Vec<DirectoryEntry>> {
        Err(FsError::NotSupported {
            operation: "read_directory",
        })
    }

    /// Full contents of the node. Always a fresh buffer.
    fn read(&self) -> Result<Vec<u8>> {
        Err(FsError::NotSupported { operation: "read" })
    }

    /// Write `data` at `offset`, returning the number of bytes accepted.
    fn write(&self, _offset: u64, _data: &[u8]) -> Result<usize> {
        Err(FsError::NotSupported { operation: "write" })
    }

    /// Apply an attribute update.
    fn set_attributes(&self, _update: &AttrUpdate) -> Result<()> {
        Err(FsError::NotSupported {
            operation: "set_attributes",
        })
    }

    /// Called when a file handle is closed.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Remove a named child.
    fn remove(&self, _name: &str) -> Result<()> {
        Err(FsError::NotSupported { operation: "remove" })
    }
}
