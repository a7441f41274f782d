//! Tiger Style resource bounds for the fuzzing filesystem.
//!
//! All limits are explicitly defined to prevent unbounded resource use.

use std::time::Duration;

/// Root inode number (always 1 per FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// First inode handed out by the index allocator.
pub const FIRST_ALLOCATED_INODE: u64 = 2;

/// TTL for cached file attributes.
///
/// Zero: a Worm changes shape from file to directory when sealed and mutant
/// sizes follow the seed, so the kernel must always ask again.
pub const ATTR_TTL: Duration = Duration::ZERO;

/// TTL for cached directory entries.
pub const ENTRY_TTL: Duration = Duration::ZERO;

/// Maximum entries returned in a single readdir call.
pub const MAX_READDIR_ENTRIES: u32 = 1000;

/// Maximum file name length in bytes.
pub const MAX_NAME_SIZE: usize = 255;

/// Maximum seed size in bytes (64 MB).
pub const MAX_SEED_SIZE: usize = 64 * 1024 * 1024;

/// Maximum number of mutants generated by a single `mutate` trigger.
pub const MAX_BATCH_SIZE: u32 = 100_000;

/// Default number of mutants generated by a single `mutate` trigger.
pub const DEFAULT_BATCH_SIZE: u32 = 10;

/// Maximum size of a JSON document written to a `mask` control (1 MB).
pub const MAX_MASK_DOCUMENT_SIZE: usize = 1024 * 1024;

/// Block size reported for file operations.
pub const BLOCK_SIZE: u32 = 4096;

// ============================================================================
// Node names
// ============================================================================

/// Name of the identity child every Worm carries.
pub const IDENTITY_CHILD: &str = "0";

/// Name of the root control file reporting process configuration.
pub const INFO_CONTROL: &str = "info";

/// Name of the Worm control file that triggers a mutation batch.
pub const MUTATE_CONTROL: &str = "mutate";

/// Name of the Worm control file that accepts byte-range masks.
pub const MASK_CONTROL: &str = "mask";

// ============================================================================
// Permission bits
// ============================================================================

/// Directory permissions (root and sealed Worms).
pub const DIR_PERM: u32 = 0o755;

/// Unsealed Worm permissions.
pub const WORM_FILE_PERM: u32 = 0o644;

/// Mutant views are read-only.
pub const MUTANT_PERM: u32 = 0o444;

/// `info` and `mutate` controls.
pub const READ_ONLY_CONTROL_PERM: u32 = 0o444;

/// `mask` control.
pub const WRITABLE_CONTROL_PERM: u32 = 0o644;

// ============================================================================
// Compile-Time Constant Assertions
// ============================================================================

// Root inode must be 1 per FUSE convention and never handed out again
const _: () = assert!(ROOT_INODE == 1);
const _: () = assert!(FIRST_ALLOCATED_INODE > ROOT_INODE);

const _: () = assert!(MAX_READDIR_ENTRIES > 0);
const _: () = assert!(MAX_NAME_SIZE > 0);

// Batch limits must be positive and ordered
const _: () = assert!(DEFAULT_BATCH_SIZE > 0);
const _: () = assert!(DEFAULT_BATCH_SIZE <= MAX_BATCH_SIZE);

// Bit offsets into the seed must fit in u64
const _: () = assert!(MAX_SEED_SIZE > 0);
const _: () = assert!((MAX_SEED_SIZE as u64) < u64::MAX / 8);
const _: () = assert!(MAX_MASK_DOCUMENT_SIZE > 0);

// Block size must be positive and power of 2
const _: () = assert!(BLOCK_SIZE > 0);
const _: () = assert!(BLOCK_SIZE.count_ones() == 1); // power of 2
