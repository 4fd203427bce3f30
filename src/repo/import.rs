//! Importing an on-disk directory into a mutable tree.

use std::fs::{self, Metadata};
use std::path::Path;

use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::mtree::MutableTree;
use crate::repo::RepoCore;
use crate::storage::{DirMeta, FileHeader, S_IFDIR};

impl RepoCore {
    /// Store every file under `root` and mirror the directory structure into
    /// `tree`.
    ///
    /// Files already in `tree` are replaced by name and directories are merged
    /// into. A name that is a file on one side and a directory on the other
    /// fails with [`Error::InvalidTree`].
    pub(crate) fn write_directory_to_tree(&mut self, root: &Path, tree: &MutableTree) -> Result<()> {
        self.txn.require_prepared("write directory")?;

        let root_meta = fs::metadata(root)?;
        if !root_meta.is_dir() {
            return Err(Error::InvalidTree(format!("{} is not a directory", root.display())));
        }
        tree.set_metadata_checksum(self.write_dirmeta(&dir_meta(&root_meta))?)?;

        let mut files = 0usize;
        for entry in WalkDir::new(root).min_depth(1).follow_links(false).sort_by_file_name() {
            let entry = entry?;
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let name = utf8_name(entry.file_name())?;
            let parent = match relative.parent() {
                Some(dir) => tree.walk(&relative_path(dir)?)?,
                None => tree.clone(),
            };

            let metadata = entry.metadata()?;
            let file_type = metadata.file_type();
            if file_type.is_dir() {
                let dir = parent.ensure_dir(name)?;
                dir.set_metadata_checksum(self.write_dirmeta(&dir_meta(&metadata))?)?;
            } else if file_type.is_symlink() {
                let target = fs::read_link(entry.path())?;
                let target = target
                    .to_str()
                    .ok_or_else(|| Error::invalid_name(target.to_string_lossy(), "symlink target is not UTF-8"))?;
                let (uid, gid) = owner(&metadata);
                let header = FileHeader {
                    uid,
                    gid,
                    ..FileHeader::symlink(target)
                };
                parent.replace_file(name, self.write_content(&header, &[])?)?;
                files += 1;
            } else if file_type.is_file() {
                let content = fs::read(entry.path())?;
                let (uid, gid) = owner(&metadata);
                let header = FileHeader {
                    uid,
                    gid,
                    ..FileHeader::regular(permissions(&metadata, 0o644))
                };
                parent.replace_file(name, self.write_content(&header, &content)?)?;
                trace!(path = %relative.display(), size = content.len(), "imported file");
                files += 1;
            } else {
                return Err(Error::InvalidTree(format!(
                    "{}: unsupported file type",
                    entry.path().display()
                )));
            }
        }

        debug!(root = %root.display(), files, "imported directory");
        Ok(())
    }
}

fn utf8_name(name: &std::ffi::OsStr) -> Result<&str> {
    name.to_str()
        .ok_or_else(|| Error::invalid_name(name.to_string_lossy(), "file name is not UTF-8"))
}

fn relative_path(dir: &Path) -> Result<String> {
    let components = dir
        .components()
        .map(|c| utf8_name(c.as_os_str()))
        .collect::<Result<Vec<_>>>()?;
    Ok(components.join("/"))
}

fn dir_meta(metadata: &Metadata) -> DirMeta {
    let (uid, gid) = owner(metadata);
    DirMeta {
        uid,
        gid,
        mode: S_IFDIR | permissions(metadata, 0o755),
        ..DirMeta::default()
    }
}

#[cfg(unix)]
fn owner(metadata: &Metadata) -> (u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (metadata.uid(), metadata.gid())
}

#[cfg(not(unix))]
fn owner(_metadata: &Metadata) -> (u32, u32) {
    (0, 0)
}

#[cfg(unix)]
fn permissions(metadata: &Metadata, _default: u32) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode() & 0o7777
}

#[cfg(not(unix))]
fn permissions(_metadata: &Metadata, default: u32) -> u32 {
    default
}
