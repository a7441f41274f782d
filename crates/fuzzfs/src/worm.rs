//! Write-once container holding a fuzzing seed.
//!
//! A Worm starts life as an ordinary file. Once something has been written
//! and the handle is flushed it is sealed: further writes are refused and it
//! presents itself as a directory of mutant views:
//!
//! ```text
//! <worm>/
//!   0        identity view (the seed itself)
//!   1, 2 ... mutants, created a batch at a time
//!   mutate   touch to generate the next batch
//!   mask     write JSON to restrict which bytes get mutated
//! ```
//!
//! # Locking
//!
//! All mutable state sits behind one mutex. Control handlers take it after
//! their own control lock; Worm code never takes a control lock, so the two
//! can't deadlock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::Weak;

use tracing::debug;
use tracing::info;

use crate::config::FsConfig;
use crate::constants::DIR_PERM;
use crate::constants::IDENTITY_CHILD;
use crate::constants::MAX_BATCH_SIZE;
use crate::constants::MAX_SEED_SIZE;
use crate::constants::WORM_FILE_PERM;
use crate::control::ControlInterface;
use crate::control::mask_control;
use crate::control::mutate_control;
use crate::error::FsError;
use crate::error::Result;
use crate::inode::IndexAllocator;
use crate::mask::ByteRange;
use crate::mask::Mapping;
use crate::mask::MaskDocument;
use crate::mutant::MutantFile;
use crate::mutator::Mutator;
use crate::mutator::MutatorRegistry;
use crate::mutator::derive_seed;
use crate::node::AttrUpdate;
use crate::node::DirectoryEntry;
use crate::node::FsNode;
use crate::node::NodeAttr;
use crate::node::NodeKind;
use crate::node::NodeRef;

/// Mutable part of a Worm.
struct WormState {
    sealed: bool,
    data: Vec<u8>,
    /// Bumped on every change to `data`.
    revision: u64,
    mapping: Option<Mapping>,
    /// Children keyed by sequence number; the name is the decimal sequence.
    children: BTreeMap<u64, Arc<MutantFile>>,
    next_child: u64,
    mutator: Box<dyn Mutator>,
}

impl WormState {
    /// Number of bytes mutations may target.
    fn domain_bytes(&self) -> usize {
        self.mapping.as_ref().map_or(self.data.len(), Mapping::len)
    }

    /// Install a mapping built from `ranges`; no ranges clears the mask.
    fn set_mask(
        &mut self,
        ranges: &[ByteRange],
        build: fn(&[ByteRange], usize) -> Result<Mapping>,
    ) -> Result<()> {
        self.mapping = if ranges.is_empty() {
            None
        } else {
            Some(build(ranges, self.data.len())?)
        };
        Ok(())
    }

    fn child(&self, name: &str) -> Option<&Arc<MutantFile>> {
        let seq: u64 = name.parse().ok()?;
        self.children.get(&seq).filter(|child| child.name() == name)
    }
}

/// Write-once, read-many seed container.
pub struct Worm {
    name: String,
    index: u64,
    batch_size: u32,
    allocator: Arc<IndexAllocator>,
    weak_self: Weak<Worm>,
    state: Mutex<WormState>,
    controls: BTreeMap<String, Arc<ControlInterface>>,
}

impl Worm {
    /// Create an empty, unsealed Worm with its identity child and controls.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `config.strategy` is not registered.
    pub fn new(
        name: &str,
        allocator: Arc<IndexAllocator>,
        config: &FsConfig,
        registry: &MutatorRegistry,
    ) -> Result<Arc<Self>> {
        let mutator = registry.instantiate(&config.strategy, derive_seed(config.seed, name))?;
        let index = allocator.next();

        Ok(Arc::new_cyclic(|weak: &Weak<Worm>| {
            let identity = MutantFile::new(IDENTITY_CHILD.to_string(), weak.clone(), &allocator);
            let mut children = BTreeMap::new();
            children.insert(0, identity);

            let mut controls = BTreeMap::new();
            for control in [mutate_control(&allocator, weak.clone()), mask_control(&allocator, weak.clone())] {
                controls.insert(control.name().to_string(), control);
            }

            Worm {
                name: name.to_string(),
                index,
                batch_size: config.batch_size,
                allocator: allocator.clone(),
                weak_self: weak.clone(),
                state: Mutex::new(WormState {
                    sealed: false,
                    data: Vec::new(),
                    revision: 0,
                    mapping: None,
                    children,
                    next_child: 1,
                    mutator,
                }),
                controls,
            }
        }))
    }

    /// Entry name in the root directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> Result<MutexGuard<'_, WormState>> {
        self.state.lock().map_err(|_| FsError::LockPoisoned { node: "worm" })
    }

    /// Whether the seed has been sealed.
    pub fn is_sealed(&self) -> Result<bool> {
        Ok(self.lock()?.sealed)
    }

    /// Current seed length in bytes.
    pub fn seed_len(&self) -> Result<usize> {
        Ok(self.lock()?.data.len())
    }

    /// Current seed revision.
    pub fn revision(&self) -> Result<u64> {
        Ok(self.lock()?.revision)
    }

    /// Names of all mutant children in creation order.
    pub fn child_names(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.children.values().map(|child| child.name().to_string()).collect())
    }

    /// Bytes of the child named `name`, rebuilt from the seed.
    pub fn synthesize(&self, name: &str) -> Result<Vec<u8>> {
        let state = self.lock()?;
        if name == IDENTITY_CHILD {
            return Ok(state.data.clone());
        }
        Ok(state.mutator.synthesize(&state.data, name))
    }

    /// Write `data` at `offset`, zero-filling any gap.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` once sealed and `SeedTooLarge` if the seed
    /// would exceed [`MAX_SEED_SIZE`].
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let mut state = self.lock()?;
        if state.sealed {
            return Err(FsError::PermissionDenied {
                reason: format!("{} is sealed", self.name),
            });
        }

        let end = offset.saturating_add(data.len() as u64);
        if end > MAX_SEED_SIZE as u64 {
            return Err(FsError::SeedTooLarge {
                size: end,
                max: MAX_SEED_SIZE,
            });
        }

        let (start, end) = (offset as usize, end as usize);
        if state.data.len() < end {
            state.data.resize(end, 0);
        }
        state.data[start..end].copy_from_slice(data);
        state.revision += 1;

        debug!(worm = %self.name, offset, len = data.len(), revision = state.revision, "seed write");
        Ok(data.len())
    }

    /// Seal the seed if anything has been written. Idempotent.
    pub fn seal(&self) -> Result<()> {
        let mut state = self.lock()?;
        if !state.sealed && !state.data.is_empty() {
            state.sealed = true;
            info!(worm = %self.name, size = state.data.len(), "seed sealed");
        }
        Ok(())
    }

    fn resize(&self, size: u64) -> Result<()> {
        let mut state = self.lock()?;
        if state.sealed {
            return Err(FsError::PermissionDenied {
                reason: format!("{} is sealed", self.name),
            });
        }
        if size > MAX_SEED_SIZE as u64 {
            return Err(FsError::SeedTooLarge {
                size,
                max: MAX_SEED_SIZE,
            });
        }
        state.data.resize(size as usize, 0);
        state.revision += 1;
        Ok(())
    }

    /// Generate a batch of the configured size.
    pub fn mutate_batch(&self) -> Result<()> {
        self.mutate(self.batch_size)
    }

    /// Generate `batch_size` new mutants.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there are no bytes to mutate.
    pub fn mutate(&self, batch_size: u32) -> Result<()> {
        let mut state = self.lock()?;
        self.mutate_locked(&mut state, batch_size)
    }

    /// Generate mutants on state the caller has already locked.
    fn mutate_locked(&self, state: &mut WormState, batch_size: u32) -> Result<()> {
        if batch_size > MAX_BATCH_SIZE {
            return Err(FsError::InvalidArgument {
                reason: format!("batch size {batch_size} exceeds {MAX_BATCH_SIZE}"),
            });
        }
        if state.domain_bytes() == 0 {
            return Err(FsError::NotFound {
                name: format!("mutation domain of {}", self.name),
            });
        }

        let first = state.next_child;
        let end = first + u64::from(batch_size);

        // Children become visible only once the whole batch has records
        let WormState {
            data, mapping, mutator, ..
        } = &mut *state;
        let mut generated: Vec<(u64, String)> = Vec::with_capacity(batch_size as usize);
        for seq in first..end {
            let name = seq.to_string();
            if let Err(e) = mutator.generate(data, mapping.as_ref(), &name) {
                for (_, name) in &generated {
                    mutator.remove(name);
                }
                debug!(worm = %self.name, first, failed_at = seq, error = %e, "mutation batch rolled back");
                return Err(e);
            }
            generated.push((seq, name));
        }

        for (seq, name) in generated {
            let child = MutantFile::new(name, self.weak_self.clone(), &self.allocator);
            state.children.insert(seq, child);
        }
        state.next_child = end;

        info!(worm = %self.name, first, count = batch_size, "generated mutation batch");
        Ok(())
    }

    /// Restrict mutations to the bytes inside `ranges`. No ranges clears the
    /// mask.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` and keeps the previous mask if two ranges
    /// overlap.
    pub fn include(&self, ranges: &[ByteRange]) -> Result<()> {
        self.lock()?.set_mask(ranges, Mapping::include)
    }

    /// Restrict mutations to the bytes outside `ranges`. No ranges clears the
    /// mask.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` and keeps the previous mask if the gaps
    /// would cover a byte twice.
    pub fn exclude(&self, ranges: &[ByteRange]) -> Result<()> {
        self.lock()?.set_mask(ranges, Mapping::exclude)
    }

    /// Remove any mask; mutations target the whole seed again.
    pub fn clear_mask(&self) -> Result<()> {
        self.lock()?.mapping = None;
        Ok(())
    }

    /// Apply a parsed `mask` document.
    pub fn apply_mask(&self, document: &MaskDocument) -> Result<()> {
        let mut state = self.lock()?;
        let build: fn(&[ByteRange], usize) -> Result<Mapping> =
            if document.include { Mapping::include } else { Mapping::exclude };
        let result = state.set_mask(&document.ranges, build);

        match &result {
            Ok(()) => debug!(
                worm = %self.name,
                include = document.include,
                ranges = document.ranges.len(),
                eligible = state.domain_bytes(),
                "mask applied"
            ),
            Err(e) => debug!(worm = %self.name, error = %e, "mask rejected"),
        }
        result
    }
}

impl FsNode for Worm {
    fn index(&self) -> u64 {
        self.index
    }

    fn attr(&self) -> Result<NodeAttr> {
        let state = self.lock()?;
        if state.sealed {
            Ok(NodeAttr::directory(self.index, DIR_PERM))
        } else {
            Ok(NodeAttr::file(self.index, WORM_FILE_PERM, state.data.len() as u64))
        }
    }

    fn lookup(&self, name: &str) -> Result<NodeRef> {
        if let Some(control) = self.controls.get(name) {
            return Ok(control.clone());
        }
        let state = self.lock()?;
        match state.child(name) {
            Some(child) => Ok(child.clone()),
            None => Err(FsError::NotFound { name: name.to_string() }),
        }
    }

    fn create(&self, name: &str) -> Result<NodeRef> {
        Err(FsError::PermissionDenied {
            reason: format!("cannot create {name} inside {}", self.name),
        })
    }

    fn read_directory(&self) -> Result<Vec<DirectoryEntry>> {
        let mut entries: Vec<DirectoryEntry> = self
            .controls
            .values()
            .map(|control| DirectoryEntry {
                index: control.index(),
                kind: NodeKind::File,
                name: control.name().to_string(),
            })
            .collect();

        let state = self.lock()?;
        entries.extend(state.children.values().map(|child| DirectoryEntry {
            index: child.index(),
            kind: NodeKind::File,
            name: child.name().to_string(),
        }));
        Ok(entries)
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<usize> {
        self.write_at(offset, data)
    }

    fn set_attributes(&self, update: &AttrUpdate) -> Result<()> {
        match update.size {
            Some(size) => self.resize(size),
            None => Ok(()),
        }
    }

    fn flush(&self) -> Result<()> {
        self.seal()
    }

    fn remove(&self, name: &str) -> Result<()> {
        if name == IDENTITY_CHILD || self.controls.contains_key(name) {
            return Err(FsError::PermissionDenied {
                reason: format!("{name} cannot be removed"),
            });
        }

        let mut state = self.lock()?;
        let seq = match state.child(name) {
            Some(_) => name.parse::<u64>().map_err(|_| FsError::NotFound { name: name.to_string() })?,
            None => return Err(FsError::NotFound { name: name.to_string() }),
        };
        state.children.remove(&seq);
        state.mutator.remove(name);

        debug!(worm = %self.name, child = name, "mutant removed");
        Ok(())
    }
}
