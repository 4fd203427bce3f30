//! The caller-facing repository.
//!
//! [`Repo`] wraps a native repository object (`RepoCore`) through a
//! [`Handle`]. Clones of a `Repo` share that object, and with it the single
//! transaction slot; independent writers open the repository separately.
//!
//! # Usage
//!
//! ```no_run
//! use treerepo::{MutableTree, Repo};
//!
//! # fn main() -> treerepo::Result<()> {
//! let repo = Repo::open("/srv/repo")?;
//! let resumed = repo.prepare_transaction()?;
//!
//! let tree = MutableTree::new();
//! repo.write_directory_to_tree("/tmp/rootfs", &tree)?;
//! let root = repo.write_mtree(&tree)?;
//! let commit = repo.write_commit(None, "init", "", None, &root)?;
//! repo.set_ref(None, "os/stable", Some(commit))?;
//!
//! let stats = repo.commit_transaction()?;
//! println!("resumed={} {}", resumed, stats);
//! # Ok(())
//! # }
//! ```

mod config;
mod freeze;
mod import;
mod resolve;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::mtree::MutableTree;
use crate::native::Handle;
use crate::storage::{
    decode_file, encode_file, Checksum, Commit, DirMeta, DirTree, FileHeader, FileObject, ObjectStore, ObjectType,
    RefManager, RefSpec, RefUpdate, CONFIG_MODE, CONFIG_PARENT,
};
use crate::transaction::{TransactionGuard, TransactionManager, TransactionStats, TxState};
use crate::variant::{Variant, VariantDict};

pub use config::{RepoConfig, RepoMode};
pub use freeze::FrozenTree;

/// The native repository object.
#[derive(Debug)]
pub struct RepoCore {
    store: ObjectStore,
    mode: RepoMode,
    parent: Option<Handle<RepoCore>>,
    txn: TransactionManager,
}

impl RepoCore {
    fn open_chain(config: &RepoConfig, visited: &mut Vec<PathBuf>) -> Result<Self> {
        let path = config.path.as_path();
        let store = if config.create_if_missing && is_vacant(path) {
            let store = ObjectStore::init(path, config.mode.as_str())?;
            if let Some(parent) = &config.parent {
                store.set_config_string(CONFIG_PARENT, &parent.to_string_lossy())?;
            }
            info!(path = %path.display(), mode = %config.mode, "created repository");
            store
        } else {
            ObjectStore::open(path)?
        };

        let canonical = path.canonicalize()?;
        if visited.contains(&canonical) {
            return Err(Error::Config(format!(
                "parent chain of {} loops back to itself",
                path.display()
            )));
        }
        visited.push(canonical);

        let mode = match store.config_string(CONFIG_MODE)? {
            Some(mode) => mode.parse()?,
            None => return Err(Error::NotARepository(path.to_path_buf())),
        };

        let parent = match store.config_string(CONFIG_PARENT)? {
            Some(parent) => {
                let parent_config = RepoConfig::new(resolve_relative(path, &parent));
                let core = Self::open_chain(&parent_config, visited)?;
                debug!(path = %path.display(), parent = %parent, "opened parent repository");
                Some(Handle::new(core))
            }
            None => None,
        };

        let txn = TransactionManager::new(store.git_dir());
        Ok(Self {
            store,
            mode,
            parent,
            txn,
        })
    }

    // ==================== Objects ====================

    /// Stage one object in the active transaction.
    fn write_object(&mut self, kind: ObjectType, payload: &[u8]) -> Result<Checksum> {
        self.txn.require_prepared("write object")?;
        let outcome = self.store.write(kind, payload)?;
        self.txn.record(&outcome)?;
        Ok(outcome.checksum)
    }

    /// Payload of an object, looking through the parent chain if absent here.
    fn read_payload(&self, kind: ObjectType, checksum: &Checksum) -> Result<bytes::Bytes> {
        match self.store.read(kind, checksum) {
            Err(e) if e.is_not_found() => match &self.parent {
                Some(parent) => parent.with(|p| p.read_payload(kind, checksum))?,
                None => Err(e),
            },
            other => other,
        }
    }

    fn object_type(&self, checksum: &Checksum) -> Result<ObjectType> {
        match self.store.object_type(checksum) {
            Err(e) if e.is_not_found() => match &self.parent {
                Some(parent) => parent.with(|p| p.object_type(checksum))?,
                None => Err(e),
            },
            other => other,
        }
    }

    fn load_variant(&self, kind: ObjectType, checksum: &Checksum) -> Result<Variant> {
        let payload = self.read_payload(kind, checksum)?;
        match kind {
            ObjectType::File => Ok(decode_file(checksum, payload)?.header.to_variant()),
            _ => Ok(Variant::from_bytes(kind.variant_type(), payload)?),
        }
    }

    fn load_commit(&self, checksum: &Checksum) -> Result<Commit> {
        let value = self.load_variant(ObjectType::Commit, checksum)?;
        Commit::from_variant(checksum, &value)
    }

    fn load_dirtree(&self, checksum: &Checksum) -> Result<DirTree> {
        DirTree::from_variant(&self.load_variant(ObjectType::DirTree, checksum)?)
    }

    fn write_dirmeta(&mut self, meta: &DirMeta) -> Result<Checksum> {
        let value = meta.to_variant();
        self.write_object(ObjectType::DirMeta, value.data())
    }

    fn write_content(&mut self, header: &FileHeader, content: &[u8]) -> Result<Checksum> {
        let payload = encode_file(header, content);
        self.write_object(ObjectType::File, &payload)
    }

    fn write_commit(
        &mut self,
        parent: Option<Checksum>,
        subject: &str,
        body: &str,
        metadata: Option<&Variant>,
        root: &FrozenTree,
        timestamp: DateTime<Utc>,
    ) -> Result<Checksum> {
        self.txn.require_prepared("write commit")?;
        if let Some(parent) = &parent {
            self.read_payload(ObjectType::Commit, parent)?;
        }
        self.read_payload(ObjectType::DirTree, &root.contents_checksum())?;
        self.read_payload(ObjectType::DirMeta, &root.metadata_checksum())?;

        let mut dict = VariantDict::new();
        if let Some(metadata) = metadata {
            dict.merge(VariantDict::from_variant(metadata)?);
        }

        let commit = Commit {
            metadata: dict.end(),
            parent,
            subject: subject.to_string(),
            body: body.to_string(),
            timestamp,
            root_contents: root.contents_checksum(),
            root_metadata: root.metadata_checksum(),
        };
        let checksum = self.write_object(ObjectType::Commit, commit.to_variant().data())?;
        info!(%checksum, parent = ?parent.map(|p| p.short()), subject, "wrote commit");
        Ok(checksum)
    }

    fn mtree_from_dirtree(&self, contents: &Checksum, metadata: &Checksum) -> Result<MutableTree> {
        let tree = MutableTree::new();
        tree.set_metadata_checksum(*metadata)?;
        let dirtree = self.load_dirtree(contents)?;
        for (name, checksum) in dirtree.files {
            tree.replace_file(&name, checksum)?;
        }
        for (name, contents, metadata) in dirtree.dirs {
            let child = self.mtree_from_dirtree(&contents, &metadata)?;
            tree.insert_tree(&name, child)?;
        }
        Ok(tree)
    }
}

/// whether nothing (or only an empty directory) exists at `path`
fn is_vacant(path: &Path) -> bool {
    match path.read_dir() {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => !path.exists(),
    }
}

fn resolve_relative(base: &Path, target: &str) -> PathBuf {
    let target = Path::new(target);
    if target.is_absolute() {
        target.to_path_buf()
    } else {
        base.join(target)
    }
}

/// Handle to an open repository.
#[derive(Debug, Clone)]
pub struct Repo {
    core: Handle<RepoCore>,
}

impl Repo {
    /// Open an existing repository.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(RepoConfig::new(path.as_ref()))
    }

    /// Create a repository at `path` (which must not exist or be empty),
    /// or open the one already there.
    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(RepoConfig::new(path.as_ref()).create_if_missing(true))
    }

    pub fn open_with_config(config: RepoConfig) -> Result<Self> {
        let core = RepoCore::open_chain(&config, &mut Vec::new())?;
        debug!(path = %config.path.display(), mode = %core.mode, "opened repository");
        Ok(Self {
            core: Handle::new(core),
        })
    }

    fn with_core<T>(&self, f: impl FnOnce(&mut RepoCore) -> Result<T>) -> Result<T> {
        self.core.with(f)?
    }

    pub fn handle(&self) -> &Handle<RepoCore> {
        &self.core
    }

    /// Give this handle's reference back. Later calls fail with
    /// [`Error::Released`].
    pub fn release(&mut self) {
        self.core.release();
    }

    pub fn path(&self) -> Result<PathBuf> {
        self.with_core(|core| Ok(core.store.path().to_path_buf()))
    }

    pub fn mode(&self) -> Result<RepoMode> {
        self.with_core(|core| Ok(core.mode))
    }

    /// the parent repository, if this one is layered on another
    pub fn parent(&self) -> Result<Option<Repo>> {
        self.with_core(|core| Ok(core.parent.clone().map(|core| Repo { core })))
    }

    // ==================== Refs ====================

    /// Resolve a rev (ref name, `remote:name`, checksum, checksum prefix or
    /// `rev^`) to a commit checksum.
    ///
    /// With `allow_noent` a rev that names nothing yields `Ok(None)`;
    /// otherwise it fails with [`Error::NotFound`].
    pub fn resolve_rev(&self, rev: &str, allow_noent: bool) -> Result<Option<Checksum>> {
        self.with_core(|core| core.resolve_rev(rev, allow_noent))
    }

    /// local refs whose name starts with `prefix`
    pub fn list_refs(&self, prefix: Option<&str>) -> Result<BTreeMap<String, Checksum>> {
        self.with_core(|core| RefManager::list(core.store.repo(), None, prefix))
    }

    /// refs of one remote whose name starts with `prefix`
    pub fn list_remote_refs(&self, remote: &str, prefix: Option<&str>) -> Result<BTreeMap<String, Checksum>> {
        self.with_core(|core| RefManager::list(core.store.repo(), Some(remote), prefix))
    }

    /// Queue pointing `remote:name` (or local `name`) at `checksum`, or
    /// deleting it when `checksum` is `None`. Takes effect at commit.
    pub fn set_ref(&self, remote: Option<&str>, name: &str, checksum: Option<Checksum>) -> Result<()> {
        let spec = RefSpec::new(remote, name)?;
        self.with_core(|core| {
            core.txn.stage_ref(RefUpdate {
                spec,
                target: checksum,
            })
        })
    }

    // ==================== Objects ====================

    pub fn has_object(&self, kind: ObjectType, checksum: &Checksum) -> Result<bool> {
        self.with_core(|core| match core.object_type(checksum) {
            Ok(found) => Ok(found == kind),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        })
    }

    /// Load the variant form of an object. File objects yield their header.
    pub fn load_object(&self, kind: ObjectType, checksum: &Checksum) -> Result<Variant> {
        self.with_core(|core| core.load_variant(kind, checksum))
    }

    pub fn load_commit(&self, checksum: &Checksum) -> Result<Commit> {
        self.with_core(|core| core.load_commit(checksum))
    }

    pub fn load_dirtree(&self, checksum: &Checksum) -> Result<DirTree> {
        self.with_core(|core| core.load_dirtree(checksum))
    }

    pub fn load_dirmeta(&self, checksum: &Checksum) -> Result<DirMeta> {
        self.with_core(|core| DirMeta::from_variant(&core.load_variant(ObjectType::DirMeta, checksum)?))
    }

    /// header and content of a file object
    pub fn load_file(&self, checksum: &Checksum) -> Result<FileObject> {
        self.with_core(|core| decode_file(checksum, core.read_payload(ObjectType::File, checksum)?))
    }

    // ==================== Transactions ====================

    /// Begin a transaction. The returned flag is only a hint that leftovers
    /// of an unfinished transaction may be reused.
    pub fn prepare_transaction(&self) -> Result<bool> {
        self.with_core(|core| core.txn.prepare())
    }

    pub fn commit_transaction(&self) -> Result<TransactionStats> {
        self.with_core(|core| core.txn.commit(core.store.repo()))
    }

    pub fn abort_transaction(&self) -> Result<()> {
        self.with_core(|core| core.txn.abort())
    }

    pub fn transaction_state(&self) -> Result<TxState> {
        self.with_core(|core| Ok(core.txn.state()))
    }

    /// Begin a transaction that is aborted unless committed explicitly.
    pub fn transaction(&self) -> Result<TransactionGuard<'_>> {
        let resumed = self.prepare_transaction()?;
        Ok(TransactionGuard::new(self, resumed))
    }

    /// Run `f` inside a transaction, committing if it returns `Ok` and
    /// aborting otherwise.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<(T, TransactionStats)>
    where
        F: FnOnce(&Repo) -> Result<T>,
    {
        let guard = self.transaction()?;
        let value = f(&guard)?;
        let stats = guard.commit()?;
        Ok((value, stats))
    }

    // ==================== Writes ====================

    /// Store one file object.
    pub fn write_content(&self, header: &FileHeader, content: &[u8]) -> Result<Checksum> {
        self.with_core(|core| core.write_content(header, content))
    }

    /// Store one directory metadata object.
    pub fn write_dirmeta(&self, meta: &DirMeta) -> Result<Checksum> {
        self.with_core(|core| core.write_dirmeta(meta))
    }

    /// Import the directory at `path` into `tree`. File content is stored
    /// right away; it becomes reachable once a commit referencing it lands.
    pub fn write_directory_to_tree(&self, path: impl AsRef<Path>, tree: &MutableTree) -> Result<()> {
        self.with_core(|core| core.write_directory_to_tree(path.as_ref(), tree))
    }

    /// Freeze `tree` into dirtree and dirmeta objects.
    pub fn write_mtree(&self, tree: &MutableTree) -> Result<FrozenTree> {
        self.with_core(|core| core.write_mtree(tree))
    }

    /// Write a commit of `root`, timestamped now. Does not move any ref.
    pub fn write_commit(
        &self,
        parent: Option<Checksum>,
        subject: &str,
        body: &str,
        metadata: Option<&Variant>,
        root: &FrozenTree,
    ) -> Result<Checksum> {
        self.write_commit_with_time(parent, subject, body, metadata, root, Utc::now())
    }

    pub fn write_commit_with_time(
        &self,
        parent: Option<Checksum>,
        subject: &str,
        body: &str,
        metadata: Option<&Variant>,
        root: &FrozenTree,
        timestamp: DateTime<Utc>,
    ) -> Result<Checksum> {
        self.with_core(|core| core.write_commit(parent, subject, body, metadata, root, timestamp))
    }

    /// A mutable tree holding the contents of `rev`'s root directory.
    pub fn mutable_tree_from_commit(&self, rev: &str) -> Result<MutableTree> {
        self.with_core(|core| {
            let checksum = core
                .resolve_rev(rev, false)?
                .ok_or_else(|| Error::NotFound(format!("rev '{}'", rev)))?;
            let commit = core.load_commit(&checksum)?;
            core.mtree_from_dirtree(&commit.root_contents, &commit.root_metadata)
        })
    }
}
