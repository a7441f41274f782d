//! Error types for the fuzzing filesystem.
//!
//! Every node operation returns [`FsError`]. The FUSE adapter converts it to
//! an errno through the `From<FsError> for std::io::Error` impl below; that is
//! the only place protocol error codes appear.

use snafu::Snafu;

/// Result type for node operations.
pub type Result<T, E = FsError> = std::result::Result<T, E>;

/// Errors raised by nodes, controls and mutation strategies.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FsError {
    /// The operation is not allowed on this node in its current state.
    #[snafu(display("permission denied: {reason}"))]
    PermissionDenied {
        /// Why the operation was refused.
        reason: String,
    },

    /// No child, control or strategy with the given name.
    #[snafu(display("not found: {name}"))]
    NotFound {
        /// The name that was looked up.
        name: String,
    },

    /// The node does not implement the requested capability.
    #[snafu(display("operation not supported: {operation}"))]
    NotSupported {
        /// The capability that was requested.
        operation: &'static str,
    },

    /// Malformed input, e.g. an unparsable mask document.
    #[snafu(display("invalid argument: {reason}"))]
    InvalidArgument {
        /// Description of what was wrong with the input.
        reason: String,
    },

    /// A strategy was asked to generate a mutation over zero eligible bits.
    #[snafu(display("mutation domain is empty"))]
    DomainEmpty,

    /// An entry with this name already exists.
    #[snafu(display("already exists: {name}"))]
    AlreadyExists {
        /// The conflicting name.
        name: String,
    },

    /// A write would grow the seed past the configured bound.
    #[snafu(display("seed size {size} exceeds maximum {max}"))]
    SeedTooLarge {
        /// Size the seed would have after the write.
        size: u64,
        /// Maximum allowed seed size.
        max: usize,
    },

    /// A node lock was poisoned by a panicking thread.
    #[snafu(display("{node} lock poisoned"))]
    LockPoisoned {
        /// Which lock was poisoned.
        node: &'static str,
    },
}

impl FsError {
    /// The errno reported to the kernel for this error.
    ///
    /// Writes have no distinct "bad argument" errno in the host model, so
    /// `InvalidArgument` surfaces as `EPERM` like the other refusals.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::PermissionDenied { .. } | FsError::InvalidArgument { .. } => libc::EPERM,
            FsError::NotFound { .. } | FsError::DomainEmpty => libc::ENOENT,
            FsError::NotSupported { .. } => libc::ENOSYS,
            FsError::AlreadyExists { .. } => libc::EEXIST,
            FsError::SeedTooLarge { .. } => libc::EFBIG,
            FsError::LockPoisoned { .. } => libc::EIO,
        }
    }
}

impl From<FsError> for std::io::Error {
    fn from(err: FsError) -> Self {
        std::io::Error::from_raw_os_error(err.errno())
    }
}
