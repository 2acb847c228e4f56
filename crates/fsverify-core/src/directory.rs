//! A directory of test files and the chain that tracks them.
//!
//! The chain is a doubly linked list whose links are file ids into a map the
//! directory owns, so unlinking never leaves a dangling neighbor behind. All
//! chain mutation happens under the directory's own lock; a file's lock is
//! never taken while the chain lock is held.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use fsverify_config::{log_dir_debug, log_dir_info, FileConfig};

use crate::error::{IoOp, Result, VerifyError};
use crate::lock::EntityLock;
use crate::random::IdSource;
use crate::test_file::{Deletion, TestFile};

#[derive(Debug)]
struct Node {
    file: Arc<TestFile>,
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Debug, Default)]
struct Chain {
    nodes: BTreeMap<u32, Node>,
    head: Option<u32>,
    tail: Option<u32>,
}

impl Chain {
    fn insert_before(&mut self, file: Arc<TestFile>, before: Option<u32>) {
        let id = file.id();
        let before = before.filter(|b| self.nodes.contains_key(b));

        let (prev, next) = match before {
            Some(b) => (self.nodes[&b].prev, Some(b)),
            None => (self.tail, None),
        };

        match prev {
            Some(p) => self.node_mut(p).next = Some(id),
            None => self.head = Some(id),
        }
        match next {
            Some(n) => self.node_mut(n).prev = Some(id),
            None => self.tail = Some(id),
        }

        self.nodes.insert(id, Node { file, prev, next });
    }

    fn remove(&mut self, id: u32) -> Option<Arc<TestFile>> {
        let node = self.nodes.remove(&id)?;

        match node.prev {
            Some(p) => self.node_mut(p).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(n) => self.node_mut(n).prev = node.prev,
            None => self.tail = node.prev,
        }

        Some(node.file)
    }

    // Links always point at live nodes; both mutators keep them in sync.
    fn node_mut(&mut self, id: u32) -> &mut Node {
        self.nodes
            .get_mut(&id)
            .unwrap_or_else(|| panic!("chain link to missing node {:08x}", id))
    }
}

/// What [`Directory::release`] found for a file's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Release {
    /// The file was linked and has been spliced out.
    Unlinked,
    /// No node carries this id.
    NotLinked,
    /// The id is linked to a different, newer file; nothing was changed.
    Superseded,
}

/// Files deleted and retained by [`Directory::delete_all`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeleteSummary {
    pub removed: usize,
    pub refused: usize,
}

/// A storage directory and the test files living in it.
#[derive(Debug)]
pub struct Directory {
    path: PathBuf,
    me: Weak<Directory>,
    chain: EntityLock<Chain>,
}

impl Directory {
    /// Open (creating if needed) the directory at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Arc<Directory>> {
        let path = path.into();
        std::fs::create_dir_all(&path).map_err(|e| VerifyError::io(IoOp::Create, &path, e))?;
        log_dir_debug!("Directory ready", path = display(path.display()));

        let name = path.display().to_string();
        Ok(Arc::new_cyclic(|me| Directory {
            path,
            me: me.clone(),
            chain: EntityLock::new(name, Chain::default()),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn downgrade(&self) -> Weak<Directory> {
        self.me.clone()
    }

    /// Reserve a new file here and link it at the head of the chain.
    pub fn create_file(&self, config: &FileConfig, rng: &mut impl IdSource) -> Result<Arc<TestFile>> {
        let file = Arc::new(TestFile::create(self, config, rng)?);

        let mut chain = self.chain.lock()?;
        // The name was free on disk, so any node with this id is stale:
        // its file was removed behind the chain's back.
        if chain.remove(file.id()).is_some() {
            log_dir_info!("Dropped stale chain entry", name = file.name());
        }
        let head = chain.head;
        chain.insert_before(Arc::clone(&file), head);
        Ok(file)
    }

    /// Insert `file` immediately before `before`, or at the tail when `before`
    /// is `None` or not in the chain.
    ///
    /// Returns `false` without linking when the file belongs to another
    /// directory or is already linked.
    pub fn link(&self, file: Arc<TestFile>, before: Option<u32>) -> Result<bool> {
        if !file.belongs_to(&self.me) {
            log_dir_info!("Refusing to link a file from another directory", name = file.name());
            return Ok(false);
        }

        let mut chain = self.chain.lock()?;
        if chain.nodes.contains_key(&file.id()) {
            return Ok(false);
        }
        chain.insert_before(file, before);
        Ok(true)
    }

    /// Splice the file out of the chain, reconnecting its neighbors.
    pub fn unlink(&self, id: u32) -> Result<Option<Arc<TestFile>>> {
        Ok(self.chain.lock()?.remove(id))
    }

    /// Detach `file` from tracking. `Ok(false)` if it was not linked,
    /// including when its id now belongs to another file.
    pub fn remove_file(&self, file: &TestFile) -> Result<bool> {
        Ok(self.release(file)? == Release::Unlinked)
    }

    /// Unlink `file` only if the chain node for its id is this very file.
    pub(crate) fn release(&self, file: &TestFile) -> Result<Release> {
        let mut chain = self.chain.lock()?;
        let owned = match chain.nodes.get(&file.id()) {
            None => return Ok(Release::NotLinked),
            Some(node) => std::ptr::eq(Arc::as_ptr(&node.file), file),
        };
        if !owned {
            return Ok(Release::Superseded);
        }
        chain.remove(file.id());
        Ok(Release::Unlinked)
    }

    pub fn get(&self, id: u32) -> Result<Option<Arc<TestFile>>> {
        Ok(self.chain.lock()?.nodes.get(&id).map(|n| Arc::clone(&n.file)))
    }

    /// `(prev, next)` of a linked file.
    pub fn neighbors(&self, id: u32) -> Result<Option<(Option<u32>, Option<u32>)>> {
        Ok(self.chain.lock()?.nodes.get(&id).map(|n| (n.prev, n.next)))
    }

    /// Snapshot of the chain from head to tail.
    pub fn files(&self) -> Result<Vec<Arc<TestFile>>> {
        let chain = self.chain.lock()?;
        let mut files = Vec::with_capacity(chain.nodes.len());
        let mut cursor = chain.head;
        while let Some(id) = cursor {
            let node = &chain.nodes[&id];
            files.push(Arc::clone(&node.file));
            cursor = node.next;
        }
        Ok(files)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.chain.lock()?.nodes.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Delete every file in the chain, head first.
    ///
    /// Each file is locked and put through [`FileGuard::delete`]; quarantined
    /// files stay on disk but leave the chain. Files removed by someone else
    /// while the walk is in progress are simply not visited.
    ///
    /// [`FileGuard::delete`]: crate::FileGuard::delete
    pub fn delete_all(&self) -> Result<DeleteSummary> {
        let mut summary = DeleteSummary::default();

        loop {
            let next = {
                let chain = self.chain.lock()?;
                chain.head.map(|id| Arc::clone(&chain.nodes[&id].file))
            };
            let Some(file) = next else {
                break;
            };

            let deletion = file.lock()?.delete()?;
            match deletion {
                Deletion::Removed | Deletion::AlreadyGone => summary.removed += 1,
                Deletion::Refused => {
                    self.remove_file(&file)?;
                    summary.refused += 1;
                }
            }
        }

        log_dir_info!(
            "Directory emptied",
            path = display(self.path.display()),
            removed = summary.removed,
            refused = summary.refused,
        );
        Ok(summary)
    }
}
