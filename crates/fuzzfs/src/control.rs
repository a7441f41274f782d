//! Virtual control files.
//!
//! A [`ControlInterface`] is a pseudo-file whose behaviour is wired per
//! instance from up to four optional handlers. The named factories below build
//! the three controls the filesystem exposes:
//!
//! - [`info_control`]: read-only JSON describing the process configuration
//! - [`mutate_control`]: `touch` generates one batch of mutants
//! - [`mask_control`]: JSON writes restrict which bytes mutations target
//!
//! Worm controls hold a `Weak` reference to their Worm, so a control never
//! keeps its owner alive.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use tracing::debug;

use crate::config::FsConfig;
use crate::constants::INFO_CONTROL;
use crate::constants::MASK_CONTROL;
use crate::constants::MUTATE_CONTROL;
use crate::constants::READ_ONLY_CONTROL_PERM;
use crate::constants::WRITABLE_CONTROL_PERM;
use crate::error::FsError;
use crate::error::Result;
use crate::inode::IndexAllocator;
use crate::mask::MaskDocument;
use crate::node::AttrUpdate;
use crate::node::FsNode;
use crate::node::NodeAttr;
use crate::worm::Worm;

type ReadHandler = Box<dyn Fn() -> Result<Vec<u8>> + Send + Sync>;
type AttrHandler = Box<dyn Fn(u64) -> Result<NodeAttr> + Send + Sync>;
type WriteHandler = Box<dyn Fn(&[u8]) -> Result<usize> + Send + Sync>;
type SetAttrHandler = Box<dyn Fn(&AttrUpdate) -> Result<()> + Send + Sync>;

/// A pseudo-file with per-instance behaviour.
pub struct ControlInterface {
    name: String,
    index: u64,
    read: Option<ReadHandler>,
    attr: Option<AttrHandler>,
    write: Option<WriteHandler>,
    set_attr: Option<SetAttrHandler>,
    /// Serializes writes to this control.
    write_lock: Mutex<()>,
}

impl ControlInterface {
    /// Start building a control named `name`.
    pub fn builder(name: &str, allocator: &IndexAllocator) -> ControlBuilder {
        ControlBuilder {
            control: ControlInterface {
                name: name.to_string(),
                index: allocator.next(),
                read: None,
                attr: None,
                write: None,
                set_attr: None,
                write_lock: Mutex::new(()),
            },
        }
    }

    /// Name of the control file.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Builder wiring the optional handlers of a [`ControlInterface`].
pub struct ControlBuilder {
    control: ControlInterface,
}

impl ControlBuilder {
    /// Handler producing the file contents.
    pub fn on_read(mut self, handler: impl Fn() -> Result<Vec<u8>> + Send + Sync + 'static) -> Self {
        self.control.read = Some(Box::new(handler));
        self
    }

    /// Handler producing attributes; receives the control's inode number.
    pub fn on_attr(mut self, handler: impl Fn(u64) -> Result<NodeAttr> + Send + Sync + 'static) -> Self {
        self.control.attr = Some(Box::new(handler));
        self
    }

    /// Handler consuming written bytes.
    pub fn on_write(mut self, handler: impl Fn(&[u8]) -> Result<usize> + Send + Sync + 'static) -> Self {
        self.control.write = Some(Box::new(handler));
        self
    }

    /// Handler for attribute updates.
    pub fn on_set_attr(mut self, handler: impl Fn(&AttrUpdate) -> Result<()> + Send + Sync + 'static) -> Self {
        self.control.set_attr = Some(Box::new(handler));
        self
    }

    /// Finish the control.
    pub fn build(self) -> Arc<ControlInterface> {
        Arc::new(self.control)
    }
}

impl FsNode for ControlInterface {
    fn index(&self) -> u64 {
        self.index
    }

    fn attr(&self) -> Result<NodeAttr> {
        match &self.attr {
            Some(handler) => handler(self.index),
            None => Err(FsError::NotSupported { operation: "attr" }),
        }
    }

    fn read(&self) -> Result<Vec<u8>> {
        match &self.read {
            Some(handler) => handler(),
            None => Err(FsError::NotSupported { operation: "read" }),
        }
    }

    fn write(&self, _offset: u64, data: &[u8]) -> Result<usize> {
        let _guard = self.write_lock.lock().map_err(|_| FsError::LockPoisoned { node: "control" })?;
        match &self.write {
            Some(handler) => handler(data),
            None => Err(FsError::NotSupported { operation: "write" }),
        }
    }

    fn set_attributes(&self, update: &AttrUpdate) -> Result<()> {
        match &self.set_attr {
            Some(handler) => handler(update),
            None => Err(FsError::NotSupported {
                operation: "set_attributes",
            }),
        }
    }
}

/// Root control reporting the process configuration.
pub fn info_control(allocator: &IndexAllocator, config: Arc<FsConfig>) -> Arc<ControlInterface> {
    let read_config = config.clone();
    ControlInterface::builder(INFO_CONTROL, allocator)
        .on_read(move || Ok(read_config.info_json()))
        .on_attr(move |index| Ok(NodeAttr::file(index, READ_ONLY_CONTROL_PERM, config.info_json().len() as u64)))
        .build()
}

/// Worm control generating a batch of mutants on `touch`.
pub fn mutate_control(allocator: &IndexAllocator, worm: Weak<Worm>) -> Arc<ControlInterface> {
    ControlInterface::builder(MUTATE_CONTROL, allocator)
        .on_attr(|index| Ok(NodeAttr::file(index, READ_ONLY_CONTROL_PERM, 0)))
        .on_set_attr(move |update| {
            if !update.is_touch_now() {
                return Ok(());
            }
            let worm = upgrade(&worm)?;
            debug!(worm = %worm.name(), "mutate triggered");
            worm.mutate_batch()
        })
        .build()
}

/// Worm control accepting JSON byte-range masks.
pub fn mask_control(allocator: &IndexAllocator, worm: Weak<Worm>) -> Arc<ControlInterface> {
    ControlInterface::builder(MASK_CONTROL, allocator)
        .on_attr(|index| Ok(NodeAttr::file(index, WRITABLE_CONTROL_PERM, 0)))
        .on_write(move |raw| {
            let document = MaskDocument::parse(raw)?;
            let worm = upgrade(&worm)?;
            worm.apply_mask(&document)?;
            Ok(raw.len())
        })
        // Shell redirection truncates before writing
        .on_set_attr(|_| Ok(()))
        .build()
}

fn upgrade(worm: &Weak<Worm>) -> Result<Arc<Worm>> {
    worm.upgrade().ok_or_else(|| FsError::NotFound {
        name: "worm".to_string(),
    })
}
