//! FUSE `FileSystem` trait implementation for `FuzzFs`.

use std::ffi::CStr;
use std::time::Duration;
use std::time::UNIX_EPOCH;

use fuse_backend_rs::abi::fuse_abi::CreateIn;
use fuse_backend_rs::abi::fuse_abi::stat64;
use fuse_backend_rs::api::filesystem::Context;
use fuse_backend_rs::api::filesystem::DirEntry;
use fuse_backend_rs::api::filesystem::Entry;
use fuse_backend_rs::api::filesystem::FileSystem;
use fuse_backend_rs::api::filesystem::FsOptions;
use fuse_backend_rs::api::filesystem::OpenOptions;
use fuse_backend_rs::api::filesystem::SetattrValid;
use fuse_backend_rs::api::filesystem::ZeroCopyReader;
use fuse_backend_rs::api::filesystem::ZeroCopyWriter;
use tracing::debug;
use tracing::info;

use super::FuzzFs;
use super::R_OK;
use super::W_OK;
use super::X_OK;
use crate::constants::ATTR_TTL;
use crate::constants::BLOCK_SIZE;
use crate::constants::MAX_NAME_SIZE;
use crate::constants::MAX_READDIR_ENTRIES;
use crate::constants::ROOT_INODE;
use crate::node::AttrUpdate;
use crate::node::NodeKind;
use crate::node::TimeUpdate;

/// Translate a kernel setattr request into an [`AttrUpdate`].
pub(crate) fn attr_update(attr: &stat64, valid: SetattrValid) -> AttrUpdate {
    let time = |now: SetattrValid, explicit: SetattrValid, sec: i64, nsec: i64| {
        if valid.contains(now) {
            Some(TimeUpdate::Now)
        } else if valid.contains(explicit) {
            let secs = u64::try_from(sec).unwrap_or(0);
            let nanos = u32::try_from(nsec).unwrap_or(0);
            Some(TimeUpdate::At(UNIX_EPOCH + Duration::new(secs, nanos)))
        } else {
            None
        }
    };

    AttrUpdate {
        size: valid.contains(SetattrValid::SIZE).then(|| u64::try_from(attr.st_size).unwrap_or(0)),
        mode: valid.contains(SetattrValid::MODE).then_some(attr.st_mode & 0o7777),
        owner: valid.intersects(SetattrValid::UID | SetattrValid::GID),
        atime: time(SetattrValid::ATIME_NOW, SetattrValid::ATIME, attr.st_atime, attr.st_atime_nsec),
        mtime: time(SetattrValid::MTIME_NOW, SetattrValid::MTIME, attr.st_mtime, attr.st_mtime_nsec),
    }
}

impl FileSystem for FuzzFs {
    type Inode = u64;
    type Handle = u64;

    fn init(&self, _capable: FsOptions) -> std::io::Result<FsOptions> {
        info!(config = ?self.root.config(), "fuzz filesystem initialized");
        Ok(FsOptions::empty())
    }

    fn destroy(&self) {
        info!("fuzz filesystem destroyed");
    }

    fn lookup(&self, ctx: &Context, parent: u64, name: &CStr) -> std::io::Result<Entry> {
        // Check execute permission on parent directory (required for traversal)
        self.check_inode_access(ctx, parent, X_OK)?;

        let name_str = Self::name_str(name)?;
        let child = self.node(parent)?.lookup(name_str)?;
        self.make_entry(&child)
    }

    fn getattr(&self, _ctx: &Context, inode: u64, _handle: Option<u64>) -> std::io::Result<(stat64, Duration)> {
        let attr = self.node(inode)?.attr()?;
        Ok((self.make_attr(&attr), ATTR_TTL))
    }

    fn setattr(
        &self,
        ctx: &Context,
        inode: u64,
        attr: stat64,
        _handle: Option<u64>,
        valid: SetattrValid,
    ) -> std::io::Result<(stat64, Duration)> {
        let update = attr_update(&attr, valid);
        debug!(inode, ?update, "setattr");

        self.node(inode)?.set_attributes(&update)?;
        self.getattr(ctx, inode, None)
    }

    fn opendir(&self, ctx: &Context, inode: u64, _flags: u32) -> std::io::Result<(Option<u64>, OpenOptions)> {
        let attr = self.node(inode)?.attr()?;
        if attr.kind != NodeKind::Directory {
            return Err(std::io::Error::from_raw_os_error(libc::ENOTDIR));
        }

        // Check read and execute permissions (needed to list and traverse directory)
        self.check_access(ctx, attr.perm, R_OK | X_OK)?;
        Ok((None, OpenOptions::empty()))
    }

    fn readdir(
        &self,
        _ctx: &Context,
        inode: u64,
        _handle: u64,
        size: u32,
        offset: u64,
        add_entry: &mut dyn FnMut(DirEntry) -> std::io::Result<usize>,
    ) -> std::io::Result<()> {
        let children = self.node(inode)?.read_directory()?;

        let dots = [(inode, &b"."[..]), (ROOT_INODE, &b".."[..])];
        let dot_entries = dots.iter().map(|&(ino, name)| (ino, libc::DT_DIR, name));
        let child_entries = children.iter().map(|child| {
            let dtype = match child.kind {
                NodeKind::File => libc::DT_REG,
                NodeKind::Directory => libc::DT_DIR,
            };
            (child.index, dtype, child.name.as_bytes())
        });

        let mut bytes_written = 0u32;
        let mut entry_count = 0u32;
        for (position, (ino, dtype, name)) in dot_entries.chain(child_entries).enumerate() {
            let next_offset = position as u64 + 1;
            if next_offset <= offset {
                continue;
            }
            if bytes_written >= size || entry_count >= MAX_READDIR_ENTRIES {
                break;
            }

            let written = add_entry(DirEntry {
                ino,
                offset: next_offset,
                type_: u32::from(dtype),
                name,
            })?;
            // Zero means the reply buffer is full
            if written == 0 {
                break;
            }
            bytes_written = bytes_written.saturating_add(written as u32);
            entry_count += 1;
        }

        Ok(())
    }

    fn open(
        &self,
        ctx: &Context,
        inode: u64,
        flags: u32,
        _fuse_flags: u32,
    ) -> std::io::Result<(Option<u64>, OpenOptions, Option<u32>)> {
        let attr = self.node(inode)?.attr()?;
        if attr.kind == NodeKind::Directory {
            return Err(std::io::Error::from_raw_os_error(libc::EISDIR));
        }

        self.check_access(ctx, attr.perm, Self::flags_to_permission_mask(flags))?;

        // No handle needed: contents are rebuilt on every read
        Ok((None, OpenOptions::empty(), None))
    }

    fn read(
        &self,
        ctx: &Context,
        inode: u64,
        _handle: u64,
        w: &mut dyn ZeroCopyWriter,
        size: u32,
        offset: u64,
        _lock_owner: Option<u64>,
        _flags: u32,
    ) -> std::io::Result<usize> {
        let data = self.read_at(ctx, inode, offset, size)?;
        w.write_all(&data)?;
        Ok(data.len())
    }

    fn write(
        &self,
        ctx: &Context,
        inode: u64,
        _handle: u64,
        r: &mut dyn ZeroCopyReader,
        size: u32,
        offset: u64,
        _lock_owner: Option<u64>,
        _delayed_write: bool,
        _flags: u32,
        _fuse_flags: u32,
    ) -> std::io::Result<usize> {
        let mut buf = vec![0u8; size as usize];
        r.read_exact(&mut buf)?;
        self.write_at(ctx, inode, offset, &buf)
    }

    fn release(
        &self,
        _ctx: &Context,
        _inode: u64,
        _flags: u32,
        _handle: u64,
        _flush: bool,
        _flock_release: bool,
        _lock_owner: Option<u64>,
    ) -> std::io::Result<()> {
        Ok(())
    }

    fn create(
        &self,
        ctx: &Context,
        parent: u64,
        name: &CStr,
        _args: CreateIn,
    ) -> std::io::Result<(Entry, Option<u64>, OpenOptions, Option<u32>)> {
        self.check_inode_access(ctx, parent, W_OK)?;

        let name_str = Self::name_str(name)?;
        let child = self.node(parent)?.create(name_str)?;
        debug!(parent, name = name_str, inode = child.index(), "create");

        let entry = self.make_entry(&child)?;
        Ok((entry, None, OpenOptions::empty(), None))
    }

    fn unlink(&self, ctx: &Context, parent: u64, name: &CStr) -> std::io::Result<()> {
        self.check_inode_access(ctx, parent, W_OK)?;

        let name_str = Self::name_str(name)?;
        let parent_node = self.node(parent)?;
        let child = parent_node.lookup(name_str).ok();
        parent_node.remove(name_str)?;
        debug!(parent, name = name_str, "unlink");

        if let Some(child) = child {
            self.inodes.remove(child.index())?;
        }
        Ok(())
    }

    fn flush(&self, _ctx: &Context, inode: u64, _handle: u64, _lock_owner: u64) -> std::io::Result<()> {
        // Closing a written Worm seals it
        Ok(self.node(inode)?.flush()?)
    }

    fn fsync(&self, _ctx: &Context, _inode: u64, _datasync: bool, _handle: u64) -> std::io::Result<()> {
        // Everything lives in memory
        Ok(())
    }

    fn statfs(&self, _ctx: &Context, _inode: u64) -> std::io::Result<libc::statvfs64> {
        // SAFETY: statvfs64 is a C struct that can be safely zero-initialized.
        // All fields are primitive types (integers) with no invariants.
        let mut st: libc::statvfs64 = unsafe { std::mem::zeroed() };

        st.f_bsize = u64::from(BLOCK_SIZE);
        st.f_frsize = u64::from(BLOCK_SIZE);
        st.f_files = self.inodes.len()? as u64;
        st.f_namemax = MAX_NAME_SIZE as u64;

        Ok(st)
    }

    fn access(&self, ctx: &Context, inode: u64, mask: u32) -> std::io::Result<()> {
        self.check_inode_access(ctx, inode, mask)
    }

    fn releasedir(&self, _ctx: &Context, _inode: u64, _flags: u32, _handle: u64) -> std::io::Result<()> {
        Ok(())
    }
}
