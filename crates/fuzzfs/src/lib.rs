//! FUSE filesystem that turns seed files into directories of mutants.
//!
//! Write a seed into a new top-level file and close it. The file becomes a
//! directory containing the seed (`0`), a `mutate` control that generates a
//! batch of single-bit-flip variants when touched, and a `mask` control that
//! restricts which bytes those variants may touch. Variants are never stored:
//! each read rebuilds one from the seed and its recorded mutation.
//!
//! # Layout
//!
//! ```text
//! /
//!   info            {"seed":<i64>,"batch_size":<u32>}
//!   <name>/         sealed seed
//!     0             the seed itself
//!     1, 2, ...     mutants
//!     mutate        touch to generate the next batch
//!     mask          write {"include":bool,"ranges":[{"offset":..,"size":..}]}
//! ```
//!
//! # Usage
//!
//! ```bash
//! fuzzfs --mount-point /mnt/fuzz --seed 42 --batch-size 100
//! cp corpus/input.bin /mnt/fuzz/input
//! touch /mnt/fuzz/input/mutate
//! ./parser /mnt/fuzz/input/17
//! ```
//!
//! # Tiger Style
//!
//! - Explicit resource bounds (see [`constants`])
//! - Lock poisoning surfaces as `EIO` instead of a daemon crash
//! - Deterministic mutants for a given seed

pub mod config;
pub mod constants;
pub mod control;
pub mod directory;
pub mod error;
pub mod fs;
pub mod inode;
pub mod mask;
pub mod mutant;
pub mod mutator;
pub mod node;
pub mod worm;

pub use config::FsConfig;
pub use directory::Directory;
pub use error::FsError;
pub use fs::FuzzFs;
pub use mask::ByteRange;
pub use mask::MaskDocument;
pub use mutator::Mutator;
pub use mutator::MutatorRegistry;
pub use node::FsNode;
pub use worm::Worm;
