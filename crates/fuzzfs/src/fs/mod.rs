//! FUSE adapter for the fuzz filesystem.
//!
//! Translates inode-addressed kernel requests into calls on [`FsNode`](crate::node::FsNode)s:
//! - the kernel learns an inode from lookup or create; the node is kept in an
//!   [`InodeTable`] so later requests can be dispatched to it
//! - node attributes become `stat64` with the mounting user as owner
//! - [`FsError`](crate::error::FsError) becomes an errno at this boundary

mod operations;


use std::ffi::CStr;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use fuse_backend_rs::abi::fuse_abi::stat64;
use fuse_backend_rs::api::filesystem::Context;
use fuse_backend_rs::api::filesystem::Entry;
use tracing::debug;

use crate::config::FsConfig;
use crate::constants::ATTR_TTL;
use crate::constants::BLOCK_SIZE;
use crate::constants::ENTRY_TTL;
use crate::constants::MAX_NAME_SIZE;
use crate::directory::Directory;
use crate::inode::InodeTable;
use crate::mutator::MutatorRegistry;
use crate::node::NodeAttr;
use crate::node::NodeKind;
use crate::node::NodeRef;

// POSIX access mode bits
const R_OK: u32 = 4;
const W_OK: u32 = 2;
const X_OK: u32 = 1;
const F_OK: u32 = 0;

/// Fuzz filesystem served over FUSE.
pub struct FuzzFs {
    /// Namespace root.
    root: Arc<Directory>,
    /// Nodes the kernel holds an inode for.
    inodes: InodeTable,
    /// UID for file ownership.
    uid: u32,
    /// GID for file ownership.
    gid: u32,
}

impl FuzzFs {
    /// Create a filesystem with the built-in mutation strategies.
    pub fn new(uid: u32, gid: u32, config: FsConfig) -> Self {
        Self::with_registry(uid, gid, config, MutatorRegistry::new())
    }

    /// Create a filesystem whose Worms draw strategies from `registry`.
    pub fn with_registry(uid: u32, gid: u32, config: FsConfig, registry: MutatorRegistry) -> Self {
        let root = Arc::new(Directory::with_registry(config, registry));
        let inodes = InodeTable::new(root.clone());
        Self { root, inodes, uid, gid }
    }

    /// The top-level directory.
    pub fn root(&self) -> &Arc<Directory> {
        &self.root
    }

    /// Node registered under `inode`.
    fn node(&self, inode: u64) -> std::io::Result<NodeRef> {
        Ok(self.inodes.get(inode)?)
    }

    /// Read up to `size` bytes at `offset` from the node behind `inode`.
    ///
    /// The node's contents are produced in full and then sliced, so every call
    /// observes one consistent snapshot.
    pub fn read_at(&self, ctx: &Context, inode: u64, offset: u64, size: u32) -> std::io::Result<Vec<u8>> {
        let node = self.node(inode)?;
        self.check_access(ctx, node.attr()?.perm, R_OK)?;

        let contents = node.read()?;
        let start = offset as usize;
        if start >= contents.len() {
            return Ok(Vec::new());
        }
        let end = std::cmp::min(start.saturating_add(size as usize), contents.len());
        Ok(contents[start..end].to_vec())
    }

    /// Write `data` at `offset` to the node behind `inode`.
    pub fn write_at(&self, ctx: &Context, inode: u64, offset: u64, data: &[u8]) -> std::io::Result<usize> {
        let node = self.node(inode)?;
        self.check_access(ctx, node.attr()?.perm, W_OK)?;

        debug!(inode, offset, len = data.len(), "write");
        Ok(node.write(offset, data)?)
    }

    /// Validate a name received from the kernel.
    fn name_str(name: &CStr) -> std::io::Result<&str> {
        let bytes = name.to_bytes();
        if bytes.len() > MAX_NAME_SIZE {
            return Err(std::io::Error::from_raw_os_error(libc::ENAMETOOLONG));
        }
        name.to_str().map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid name"))
    }

    /// Full POSIX mode (type and permission bits) for a node.
    fn mode_of(attr: &NodeAttr) -> u32 {
        let file_type = match attr.kind {
            NodeKind::File => libc::S_IFREG,
            NodeKind::Directory => libc::S_IFDIR,
        };
        file_type | attr.perm
    }

    /// Build a stat64 structure from node attributes.
    fn make_attr(&self, node_attr: &NodeAttr) -> stat64 {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let sec = now.as_secs() as i64;
        let nsec = now.subsec_nanos() as i64;

        let nlink = match node_attr.kind {
            NodeKind::File => 1,
            NodeKind::Directory => 2,
        };

        let blocks = node_attr.size.div_ceil(u64::from(BLOCK_SIZE));

        // SAFETY: stat64 is a C struct that can be safely zero-initialized.
        // All fields are primitive types (integers) with no invariants.
        let mut attr: stat64 = unsafe { std::mem::zeroed() };
        attr.st_ino = node_attr.index;
        attr.st_mode = Self::mode_of(node_attr);
        attr.st_nlink = nlink;
        attr.st_uid = self.uid;
        attr.st_gid = self.gid;
        attr.st_size = node_attr.size as i64;
        attr.st_blocks = blocks as i64;
        attr.st_blksize = i64::from(BLOCK_SIZE);
        attr.st_atime = sec;
        attr.st_atime_nsec = nsec;
        attr.st_mtime = sec;
        attr.st_mtime_nsec = nsec;
        attr.st_ctime = sec;
        attr.st_ctime_nsec = nsec;
        attr
    }

    /// Register `node` with the inode table and build its lookup reply.
    fn make_entry(&self, node: &NodeRef) -> std::io::Result<Entry> {
        self.inodes.register(node)?;
        let attr = node.attr()?;
        Ok(Entry {
            inode: attr.index,
            generation: 0,
            attr: self.make_attr(&attr),
            attr_flags: 0,
            attr_timeout: ATTR_TTL,
            entry_timeout: ENTRY_TTL,
        })
    }

    /// Check access permissions following POSIX semantics.
    ///
    /// Every node is owned by the mounting user (self.uid, self.gid):
    ///
    /// - Root (uid=0): Can read/write anything, can execute only if any exec bit is set
    /// - Owner (ctx.uid == self.uid): Uses owner permission bits (mode >> 6) & 7
    /// - Group (ctx.gid == self.gid): Uses group permission bits (mode >> 3) & 7
    /// - Other: Uses other permission bits (mode & 7)
    fn check_access(&self, ctx: &Context, file_mode: u32, mask: u32) -> std::io::Result<()> {
        if mask == F_OK {
            return Ok(());
        }

        if ctx.uid == 0 {
            if mask & X_OK != 0 && file_mode & 0o111 == 0 {
                return Err(std::io::Error::from_raw_os_error(libc::EACCES));
            }
            return Ok(());
        }

        let perm_bits = if ctx.uid == self.uid {
            (file_mode >> 6) & 7
        } else if ctx.gid == self.gid {
            (file_mode >> 3) & 7
        } else {
            file_mode & 7
        };

        if (mask & perm_bits) != mask {
            return Err(std::io::Error::from_raw_os_error(libc::EACCES));
        }

        Ok(())
    }

    /// Check `mask` against the current mode of the node behind `inode`.
    fn check_inode_access(&self, ctx: &Context, inode: u64, mask: u32) -> std::io::Result<()> {
        let attr = self.node(inode)?.attr()?;
        self.check_access(ctx, attr.perm, mask)
    }

    /// Convert open flags to permission mask.
    fn flags_to_permission_mask(flags: u32) -> u32 {
        let accmode = flags & libc::O_ACCMODE as u32;
        match accmode {
            x if x == libc::O_RDONLY as u32 => R_OK,
            x if x == libc::O_WRONLY as u32 => W_OK,
            x if x == libc::O_RDWR as u32 => R_OK | W_OK,
            _ => R_OK,
        }
    }
}
