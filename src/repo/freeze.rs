//! Freezing a mutable tree into stored dirtree and dirmeta objects.

use std::collections::HashSet;

use bytes::Bytes;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mtree::MutableTree;
use crate::repo::RepoCore;
use crate::storage::{Checksum, DirMeta, DirTree, ObjectStore, ObjectType};

/// Checksums of a stored directory: its listing and its own metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrozenTree {
    contents: Checksum,
    metadata: Checksum,
}

impl FrozenTree {
    pub fn contents_checksum(&self) -> Checksum {
        self.contents
    }

    pub fn metadata_checksum(&self) -> Checksum {
        self.metadata
    }
}

/// Objects computed by the serialization pass, written afterwards.
#[derive(Default)]
struct Pending {
    objects: Vec<(ObjectType, Bytes)>,
    seen: HashSet<Checksum>,
}

impl Pending {
    fn add(&mut self, kind: ObjectType, payload: Bytes) -> Result<Checksum> {
        let checksum = ObjectStore::checksum_of(kind, &payload)?;
        if self.seen.insert(checksum) {
            self.objects.push((kind, payload));
        }
        Ok(checksum)
    }
}

impl RepoCore {
    /// Serialize `tree` bottom-up, then store every resulting object.
    ///
    /// Nothing is written if any referenced object is missing or of the
    /// wrong type.
    pub(crate) fn write_mtree(&mut self, tree: &MutableTree) -> Result<FrozenTree> {
        self.txn.require_prepared("write tree")?;

        let mut pending = Pending::default();
        let frozen = self.serialize_tree(tree, "", &mut pending)?;

        let count = pending.objects.len();
        for (kind, payload) in pending.objects {
            self.write_object(kind, &payload)?;
        }
        debug!(contents = %frozen.contents, objects = count, "froze tree");
        Ok(frozen)
    }

    fn serialize_tree(&self, tree: &MutableTree, path: &str, pending: &mut Pending) -> Result<FrozenTree> {
        let mut dirtree = DirTree::default();

        for (name, checksum) in tree.files()? {
            self.expect_object(ObjectType::File, &checksum, path, &name)?;
            dirtree.files.push((name, checksum));
        }
        for (name, child) in tree.subdirs()? {
            let child_path = format!("{}/{}", path, name);
            let frozen = self.serialize_tree(&child, &child_path, pending)?;
            dirtree.dirs.push((name, frozen.contents, frozen.metadata));
        }

        let metadata = match tree.metadata_checksum()? {
            Some(checksum) => {
                self.expect_object(ObjectType::DirMeta, &checksum, path, ".")?;
                checksum
            }
            None => pending.add(ObjectType::DirMeta, DirMeta::default().to_variant().data().clone())?,
        };
        let contents = pending.add(ObjectType::DirTree, dirtree.to_variant().data().clone())?;
        Ok(FrozenTree { contents, metadata })
    }

    fn expect_object(&self, kind: ObjectType, checksum: &Checksum, path: &str, name: &str) -> Result<()> {
        match self.object_type(checksum) {
            Ok(found) if found == kind => Ok(()),
            Ok(found) => Err(Error::InvalidTree(format!(
                "{}/{}: {} is a {} object, expected {}",
                path, name, checksum, found, kind
            ))),
            Err(e) if e.is_not_found() => Err(Error::InvalidTree(format!(
                "{}/{}: missing {} object {}",
                path, name, kind, checksum
            ))),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::Repo;
    use crate::storage::FileHeader;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repo) {
        let dir = TempDir::new().unwrap();
        let repo = Repo::init(dir.path().join("repo")).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_empty_tree_gets_default_metadata() {
        let (_dir, repo) = setup();
        repo.prepare_transaction().unwrap();

        let frozen = repo.write_mtree(&MutableTree::new()).unwrap();
        assert_eq!(repo.load_dirmeta(&frozen.metadata_checksum()).unwrap(), DirMeta::default());
        assert_eq!(repo.load_dirtree(&frozen.contents_checksum()).unwrap(), DirTree::default());

        let stats = repo.commit_transaction().unwrap();
        assert_eq!(stats.metadata_objects_written, 2);
    }

    #[test]
    fn test_nested_tree_listing() {
        let (_dir, repo) = setup();
        repo.prepare_transaction().unwrap();

        let file = repo.write_content(&FileHeader::regular(0o644), b"hi").unwrap();
        let tree = MutableTree::new();
        tree.replace_file("top", file).unwrap();
        tree.ensure_dir("etc").unwrap().replace_file("conf", file).unwrap();

        let frozen = repo.write_mtree(&tree).unwrap();
        let root = repo.load_dirtree(&frozen.contents_checksum()).unwrap();
        assert_eq!(root.files, vec![("top".to_string(), file)]);
        assert_eq!(root.dirs.len(), 1);
        let (name, contents, _) = &root.dirs[0];
        assert_eq!(name, "etc");
        assert_eq!(repo.load_dirtree(contents).unwrap().files, vec![("conf".to_string(), file)]);
        repo.abort_transaction().unwrap();
    }

    #[test]
    fn test_missing_file_object_rejected() {
        let (_dir, repo) = setup();
        repo.prepare_transaction().unwrap();

        let bogus = ObjectStore::checksum_of(ObjectType::File, b"never written").unwrap();
        let tree = MutableTree::new();
        tree.replace_file("ghost", bogus).unwrap();

        let err = repo.write_mtree(&tree).unwrap_err();
        assert!(matches!(err, Error::InvalidTree(_)));
        repo.abort_transaction().unwrap();
    }

    #[test]
    fn test_identical_subdirs_written_once() {
        let (_dir, repo) = setup();
        repo.prepare_transaction().unwrap();

        let tree = MutableTree::new();
        tree.ensure_dir("a").unwrap();
        tree.ensure_dir("b").unwrap();
        repo.write_mtree(&tree).unwrap();

        let stats = repo.commit_transaction().unwrap();
        // one default dirmeta, one empty dirtree, one root dirtree
        assert_eq!(stats.metadata_objects_considered, 3);
    }

    #[test]
    fn test_requires_transaction() {
        let (_dir, repo) = setup();
        let err = repo.write_mtree(&MutableTree::new()).unwrap_err();
        assert!(matches!(err, Error::TransactionState { .. }));
    }
}
