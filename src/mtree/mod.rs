//! Mutable staging trees.
//!
//! A [`MutableTree`] is one directory level held in a native object: files
//! by name (each a file object checksum), subdirectories by name (each another
//! node, of which the parent holds one reference) and an optional directory
//! metadata checksum. Nothing is content-addressed while staging; entries can
//! be replaced, removed and nested freely until the repository freezes the
//! tree into dirtree/dirmeta objects.
//!
//! A tree must not be mutated from more than one logical owner at a time. Each
//! node is locked for the duration of a single operation only.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::native::{Handle, ObjectId};
use crate::storage::Checksum;

/// Contents of one staged directory.
#[derive(Debug, Default)]
pub struct TreeNode {
    files: BTreeMap<String, Checksum>,
    subdirs: BTreeMap<String, Handle<TreeNode>>,
    metadata: Option<Checksum>,
}

/// What a name in a tree refers to.
#[derive(Debug, Clone)]
pub enum TreeEntry {
    File(Checksum),
    Dir(MutableTree),
}

/// Handle to a staged directory.
///
/// Cloning takes another reference to the same node, so changes through a
/// clone are visible through the original.
#[derive(Debug, Clone)]
pub struct MutableTree {
    node: Handle<TreeNode>,
}

pub(crate) fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_name(name, "empty file name"));
    }
    if name == "." || name == ".." {
        return Err(Error::invalid_name(name, "'.' and '..' are not allowed"));
    }
    if name.contains('/') {
        return Err(Error::invalid_name(name, "file names cannot contain '/'"));
    }
    if name.contains('\0') {
        return Err(Error::invalid_name(name, "file names cannot contain NUL"));
    }
    Ok(())
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

impl Default for MutableTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MutableTree {
    /// An empty tree owned by the caller.
    pub fn new() -> Self {
        Self {
            node: Handle::new(TreeNode::default()),
        }
    }

    /// An empty tree whose reference is left floating, for handing straight
    /// to [`MutableTree::insert_tree`].
    pub fn new_floating() -> Self {
        Self {
            node: Handle::new_floating(TreeNode::default()),
        }
    }

    pub fn from_handle(node: Handle<TreeNode>) -> Self {
        Self { node }
    }

    pub fn handle(&self) -> &Handle<TreeNode> {
        &self.node
    }

    pub fn into_handle(self) -> Handle<TreeNode> {
        self.node
    }

    pub fn is_floating(&self) -> bool {
        self.node.is_floating()
    }

    /// Give this handle's reference back; the node lives on while its
    /// parent or other handles still reference it.
    pub fn release(&mut self) {
        self.node.release();
    }

    /// whether both handles refer to the same node
    pub fn same_tree(&self, other: &MutableTree) -> bool {
        self.node.same_object(&other.node)
    }

    fn id(&self) -> Result<ObjectId> {
        self.node.id()
    }

    // ==================== Metadata ====================

    pub fn metadata_checksum(&self) -> Result<Option<Checksum>> {
        self.node.with(|node| node.metadata)
    }

    pub fn set_metadata_checksum(&self, checksum: Checksum) -> Result<()> {
        self.node.with(|node| node.metadata = Some(checksum))
    }

    // ==================== Entries ====================

    /// Add or replace the file `name`. Replacing a directory is an error.
    pub fn replace_file(&self, name: &str, checksum: Checksum) -> Result<()> {
        validate_filename(name)?;
        self.node.with(|node| {
            if node.subdirs.contains_key(name) {
                return Err(Error::InvalidTree(format!("cannot replace directory '{}' with a file", name)));
            }
            node.files.insert(name.to_string(), checksum);
            Ok(())
        })?
    }

    /// Remove the file or directory `name`.
    pub fn remove(&self, name: &str, allow_noent: bool) -> Result<()> {
        let removed = self.node.with(|node| {
            let file = node.files.remove(name).is_some();
            let dir = node.subdirs.remove(name);
            file || dir.is_some()
        })?;
        if !removed && !allow_noent {
            return Err(Error::NotFound(format!("no entry '{}' in tree", name)));
        }
        Ok(())
    }

    /// The subdirectory `name`, created empty if missing.
    pub fn ensure_dir(&self, name: &str) -> Result<MutableTree> {
        validate_filename(name)?;
        let node = self.node.with(|node| {
            if node.files.contains_key(name) {
                return Err(Error::InvalidTree(format!("cannot replace file '{}' with a directory", name)));
            }
            Ok(node
                .subdirs
                .entry(name.to_string())
                .or_insert_with(|| Handle::new(TreeNode::default()))
                .clone())
        })??;
        Ok(Self { node })
    }

    /// Attach `child` as the subdirectory `name`, replacing any directory of
    /// that name. A floating child is claimed by this tree.
    pub fn insert_tree(&self, name: &str, child: MutableTree) -> Result<()> {
        validate_filename(name)?;
        let own_id = self.id()?;
        if child.id()? == own_id || child.contains_node(own_id)? {
            return Err(Error::InvalidTree(format!("inserting '{}' would create a cycle", name)));
        }

        let node = child.node.claim()?;
        self.node.with(|tree| {
            if tree.files.contains_key(name) {
                return Err(Error::InvalidTree(format!("cannot replace file '{}' with a directory", name)));
            }
            tree.subdirs.insert(name.to_string(), node);
            Ok(())
        })?
    }

    fn contains_node(&self, id: ObjectId) -> Result<bool> {
        for child in self.subdirs()?.values() {
            if child.id()? == id || child.contains_node(id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn lookup(&self, name: &str) -> Result<Option<TreeEntry>> {
        self.node.with(|node| {
            if let Some(checksum) = node.files.get(name) {
                return Some(TreeEntry::File(*checksum));
            }
            node.subdirs
                .get(name)
                .map(|dir| TreeEntry::Dir(Self { node: dir.clone() }))
        })
    }

    /// The directory at `path` (`/`-separated, relative to this tree).
    pub fn walk(&self, path: &str) -> Result<MutableTree> {
        let mut current = self.clone();
        for component in split_path(path) {
            let next = current.node.with(|node| node.subdirs.get(component).cloned())?;
            current = match next {
                Some(node) => Self { node },
                None => return Err(Error::NotFound(format!("no directory '{}' in tree", path))),
            };
        }
        Ok(current)
    }

    /// Create every missing directory leading to `path` and return the
    /// parent of its last component. New directories get `metadata`.
    pub fn ensure_parent_dirs(&self, path: &str, metadata: Checksum) -> Result<MutableTree> {
        let components = split_path(path);
        let Some((_, parents)) = components.split_last() else {
            return Err(Error::invalid_name(path, "empty path"));
        };

        let mut current = self.clone();
        for &component in parents {
            validate_filename(component)?;
            let node = current.node.with(|node| {
                if node.files.contains_key(component) {
                    return Err(Error::InvalidTree(format!("'{}' in '{}' is a file", component, path)));
                }
                Ok(node
                    .subdirs
                    .entry(component.to_string())
                    .or_insert_with(|| {
                        Handle::new(TreeNode {
                            metadata: Some(metadata),
                            ..TreeNode::default()
                        })
                    })
                    .clone())
            })??;
            current = Self { node };
        }
        Ok(current)
    }

    /// file entries, by name
    pub fn files(&self) -> Result<BTreeMap<String, Checksum>> {
        self.node.with(|node| node.files.clone())
    }

    /// subdirectories, by name; each value is a new handle to the child
    pub fn subdirs(&self) -> Result<BTreeMap<String, MutableTree>> {
        self.node.with(|node| {
            node.subdirs
                .iter()
                .map(|(name, dir)| (name.clone(), Self { node: dir.clone() }))
                .collect()
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.node.with(|node| node.files.is_empty() && node.subdirs.is_empty())
    }
}
