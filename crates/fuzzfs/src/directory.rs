//! Root namespace node.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use tracing::info;

use crate::config::FsConfig;
use crate::constants::DIR_PERM;
use crate::constants::INFO_CONTROL;
use crate::constants::ROOT_INODE;
use crate::control::ControlInterface;
use crate::control::info_control;
use crate::error::FsError;
use crate::error::Result;
use crate::inode::IndexAllocator;
use crate::mutator::MutatorRegistry;
use crate::node::DirectoryEntry;
use crate::node::FsNode;
use crate::node::NodeAttr;
use crate::node::NodeKind;
use crate::node::NodeRef;
use crate::worm::Worm;

/// The mount root: one Worm per created name plus the `info` control.
///
/// Worms live for the lifetime of the process; the root never forgets one.
pub struct Directory {
    config: Arc<FsConfig>,
    allocator: Arc<IndexAllocator>,
    registry: MutatorRegistry,
    worms: Mutex<BTreeMap<String, Arc<Worm>>>,
    info: Arc<ControlInterface>,
}

impl Directory {
    /// Create an empty root with the built-in strategies.
    pub fn new(config: FsConfig) -> Self {
        Self::with_registry(config, MutatorRegistry::new())
    }

    /// Create an empty root that instantiates Worm strategies from `registry`.
    pub fn with_registry(config: FsConfig, registry: MutatorRegistry) -> Self {
        let config = Arc::new(config);
        let allocator = Arc::new(IndexAllocator::new());
        let info = info_control(&allocator, config.clone());
        Self {
            config,
            allocator,
            registry,
            worms: Mutex::new(BTreeMap::new()),
            info,
        }
    }

    /// Configuration shared with every Worm.
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Arc<Worm>>>> {
        self.worms.lock().map_err(|_| FsError::LockPoisoned { node: "directory" })
    }

    /// Create a new Worm named `name`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the name is taken (including `info`) and
    /// `NotFound` if the configured strategy is unknown.
    pub fn create_worm(&self, name: &str) -> Result<Arc<Worm>> {
        if name == INFO_CONTROL {
            return Err(FsError::AlreadyExists { name: name.to_string() });
        }

        let mut worms = self.lock()?;
        if worms.contains_key(name) {
            return Err(FsError::AlreadyExists { name: name.to_string() });
        }

        let worm = Worm::new(name, self.allocator.clone(), &self.config, &self.registry)?;
        worms.insert(name.to_string(), worm.clone());

        info!(worm = name, inode = worm.index(), strategy = %self.config.strategy, "worm created");
        Ok(worm)
    }

    /// Worm registered under `name`.
    pub fn worm(&self, name: &str) -> Result<Arc<Worm>> {
        self.lock()?
            .get(name)
            .cloned()
            .ok_or_else(|| FsError::NotFound { name: name.to_string() })
    }
}

impl FsNode for Directory {
    fn index(&self) -> u64 {
        ROOT_INODE
    }

    fn attr(&self) -> Result<NodeAttr> {
        Ok(NodeAttr::directory(ROOT_INODE, DIR_PERM))
    }

    fn lookup(&self, name: &str) -> Result<NodeRef> {
        if name == INFO_CONTROL {
            return Ok(self.info.clone());
        }
        Ok(self.worm(name)?)
    }

    fn create(&self, name: &str) -> Result<NodeRef> {
        Ok(self.create_worm(name)?)
    }

    fn read_directory(&self) -> Result<Vec<DirectoryEntry>> {
        let mut entries = vec![DirectoryEntry {
            index: self.info.index(),
            kind: NodeKind::File,
            name: INFO_CONTROL.to_string(),
        }];

        // Snapshot first: attr() takes each Worm's own lock.
        let worms: Vec<Arc<Worm>> = self.lock()?.values().cloned().collect();
        for worm in worms {
            entries.push(DirectoryEntry {
                index: worm.index(),
                kind: worm.attr()?.kind,
                name: worm.name().to_string(),
            });
        }
        Ok(entries)
    }

    fn remove(&self, name: &str) -> Result<()> {
        if name == INFO_CONTROL {
            return Err(FsError::PermissionDenied {
                reason: format!("{name} cannot be removed"),
            });
        }
        Err(FsError::NotSupported { operation: "remove" })
    }
}
