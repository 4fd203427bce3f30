//! Payload formats of stored objects.
//!
//! Metadata objects are plain variants:
//!
//! ```text
//! dirtree   (a(say)a(sayay))          files, then subdirectories, sorted by name
//! dirmeta   (uuua(ayay))              uid, gid, mode, xattrs
//! commit    (a{sv}aya(say)sstayay)    metadata, parent, related, subject, body,
//!                                     timestamp (big-endian), root contents, root meta
//! tombstone a{sv}                     "commit" => deleted commit checksum
//! ```
//!
//! A file object is a length-prefixed header variant followed by the raw
//! content: `[u32 BE header length][4 zero bytes][(uuuusa(ayay))][content]`.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::storage::types::{Checksum, ObjectType};
use crate::variant::{BasicType, Signature, Variant, VariantDict, VariantError};

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;

/// Extended attributes as (name, value) byte pairs.
pub type Xattrs = Vec<(Vec<u8>, Vec<u8>)>;

fn bytes_sig() -> Signature {
    Signature::Array(Box::new(Signature::Basic(BasicType::Byte)))
}

fn string_sig() -> Signature {
    Signature::Basic(BasicType::String)
}

fn xattrs_to_variant(xattrs: &Xattrs) -> Variant {
    let items: Vec<Variant> = xattrs
        .iter()
        .map(|(name, value)| Variant::tuple(&[Variant::byte_array(name), Variant::byte_array(value)]))
        .collect();
    Variant::array_unchecked(Signature::Tuple(vec![bytes_sig(), bytes_sig()]), &items)
}

fn xattrs_from_variant(value: &Variant) -> Result<Xattrs> {
    let mut xattrs = Vec::new();
    for pair in value.children()? {
        let pair = pair?;
        let name = pair.child_value(0)?.as_bytes()?.to_vec();
        let value = pair.child_value(1)?.as_bytes()?.to_vec();
        xattrs.push((name, value));
    }
    Ok(xattrs)
}

fn checksum_child(value: &Variant, index: usize) -> Result<Checksum> {
    Checksum::from_bytes(value.child_value(index)?.as_bytes()?)
}

fn expect_shape(value: &Variant, kind: ObjectType) -> Result<()> {
    if value.is_of_type(kind.variant_type()) {
        Ok(())
    } else {
        Err(VariantError::TypeMismatch {
            expected: kind.variant_type().to_string(),
            found: value.type_string(),
        }
        .into())
    }
}

// ==================== Directory metadata ====================

/// Ownership, mode and xattrs of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirMeta {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub xattrs: Xattrs,
}

impl Default for DirMeta {
    fn default() -> Self {
        Self {
            uid: 0,
            gid: 0,
            mode: S_IFDIR | 0o755,
            xattrs: Vec::new(),
        }
    }
}

impl DirMeta {
    pub fn to_variant(&self) -> Variant {
        Variant::tuple(&[
            Variant::uint32(self.uid),
            Variant::uint32(self.gid),
            Variant::uint32(self.mode),
            xattrs_to_variant(&self.xattrs),
        ])
    }

    pub fn from_variant(value: &Variant) -> Result<Self> {
        expect_shape(value, ObjectType::DirMeta)?;
        Ok(Self {
            uid: value.child_value(0)?.as_u32()?,
            gid: value.child_value(1)?.as_u32()?,
            mode: value.child_value(2)?.as_u32()?,
            xattrs: xattrs_from_variant(&value.child_value(3)?)?,
        })
    }
}

// ==================== Directory trees ====================

/// One directory level: file entries and subdirectory entries by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirTree {
    /// (name, file checksum), sorted by name
    pub files: Vec<(String, Checksum)>,
    /// (name, contents checksum, metadata checksum), sorted by name
    pub dirs: Vec<(String, Checksum, Checksum)>,
}

impl DirTree {
    pub fn to_variant(&self) -> Variant {
        let files: Vec<Variant> = self
            .files
            .iter()
            .map(|(name, checksum)| Variant::tuple(&[Variant::string(name), Variant::byte_array(checksum.as_bytes())]))
            .collect();
        let dirs: Vec<Variant> = self
            .dirs
            .iter()
            .map(|(name, contents, meta)| {
                Variant::tuple(&[
                    Variant::string(name),
                    Variant::byte_array(contents.as_bytes()),
                    Variant::byte_array(meta.as_bytes()),
                ])
            })
            .collect();

        Variant::tuple(&[
            Variant::array_unchecked(Signature::Tuple(vec![string_sig(), bytes_sig()]), &files),
            Variant::array_unchecked(Signature::Tuple(vec![string_sig(), bytes_sig(), bytes_sig()]), &dirs),
        ])
    }

    pub fn from_variant(value: &Variant) -> Result<Self> {
        expect_shape(value, ObjectType::DirTree)?;
        let mut tree = DirTree::default();
        for entry in value.child_value(0)?.children()? {
            let entry = entry?;
            let name = entry.child_value(0)?.as_str()?.to_string();
            tree.files.push((name, checksum_child(&entry, 1)?));
        }
        for entry in value.child_value(1)?.children()? {
            let entry = entry?;
            let name = entry.child_value(0)?.as_str()?.to_string();
            tree.dirs.push((name, checksum_child(&entry, 1)?, checksum_child(&entry, 2)?));
        }
        Ok(tree)
    }
}

// ==================== Files ====================

/// Header stored in front of a file object's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub rdev: u32,
    /// empty unless this is a symbolic link
    pub symlink_target: String,
    pub xattrs: Xattrs,
}

impl FileHeader {
    /// a regular file with the given permission bits
    pub fn regular(permissions: u32) -> Self {
        Self {
            uid: 0,
            gid: 0,
            mode: S_IFREG | (permissions & 0o7777),
            rdev: 0,
            symlink_target: String::new(),
            xattrs: Vec::new(),
        }
    }

    pub fn symlink(target: impl Into<String>) -> Self {
        Self {
            mode: S_IFLNK | 0o777,
            symlink_target: target.into(),
            ..Self::regular(0)
        }
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    pub fn to_variant(&self) -> Variant {
        Variant::tuple(&[
            Variant::uint32(self.uid),
            Variant::uint32(self.gid),
            Variant::uint32(self.mode),
            Variant::uint32(self.rdev),
            Variant::string(&self.symlink_target),
            xattrs_to_variant(&self.xattrs),
        ])
    }

    pub fn from_variant(value: &Variant) -> Result<Self> {
        expect_shape(value, ObjectType::File)?;
        Ok(Self {
            uid: value.child_value(0)?.as_u32()?,
            gid: value.child_value(1)?.as_u32()?,
            mode: value.child_value(2)?.as_u32()?,
            rdev: value.child_value(3)?.as_u32()?,
            symlink_target: value.child_value(4)?.as_str()?.to_string(),
            xattrs: xattrs_from_variant(&value.child_value(5)?)?,
        })
    }
}

/// A decoded file object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileObject {
    pub header: FileHeader,
    pub content: Bytes,
}

/// serialize a file object payload
pub fn encode_file(header: &FileHeader, content: &[u8]) -> Bytes {
    let header = header.to_variant();
    let header_bytes = header.data();
    let mut buf = BytesMut::with_capacity(8 + header_bytes.len() + content.len());
    buf.put_u32(header_bytes.len() as u32);
    buf.put_u32(0);
    buf.put_slice(header_bytes);
    buf.put_slice(content);
    buf.freeze()
}

/// split a file object payload into header and content, sharing `payload`
pub fn decode_file(checksum: &Checksum, payload: Bytes) -> Result<FileObject> {
    let corrupted = |reason: &str| Error::Corrupted {
        checksum: checksum.to_string(),
        reason: reason.to_string(),
    };
    if payload.len() < 8 {
        return Err(corrupted("file object shorter than its length prefix"));
    }
    let header_len = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let header_end = 8usize
        .checked_add(header_len)
        .filter(|&end| end <= payload.len())
        .ok_or_else(|| corrupted("file header overruns object"))?;

    let header = Variant::from_bytes(ObjectType::File.variant_type(), payload.slice(8..header_end))?;
    Ok(FileObject {
        header: FileHeader::from_variant(&header)?,
        content: payload.slice(header_end..),
    })
}

// ==================== Commits ====================

/// A commit decoded once from its stored tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// the commit's own `a{sv}` metadata mapping
    pub metadata: Variant,
    pub parent: Option<Checksum>,
    pub subject: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub root_contents: Checksum,
    pub root_metadata: Checksum,
}

impl Commit {
    /// string value of a metadata key
    pub fn metadata_string(&self, key: &str) -> Result<String> {
        Ok(self.metadata.lookup_string(key)?)
    }

    /// a metadata value of any type
    pub fn metadata_value(&self, key: &str) -> Result<Variant> {
        Ok(self.metadata.lookup(key)?)
    }

    pub fn to_variant(&self) -> Variant {
        let parent = self.parent.map(|p| p.as_bytes().to_vec()).unwrap_or_default();
        let related = Variant::array_unchecked(Signature::Tuple(vec![string_sig(), bytes_sig()]), &[]);
        let seconds = self.timestamp.timestamp().max(0) as u64;
        Variant::tuple(&[
            self.metadata.clone(),
            Variant::byte_array(&parent),
            related,
            Variant::string(&self.subject),
            Variant::string(&self.body),
            // stored big-endian inside a little-endian container
            Variant::uint64(seconds.swap_bytes()),
            Variant::byte_array(self.root_contents.as_bytes()),
            Variant::byte_array(self.root_metadata.as_bytes()),
        ])
    }

    pub fn from_variant(checksum: &Checksum, value: &Variant) -> Result<Self> {
        expect_shape(value, ObjectType::Commit)?;

        let parent_bytes = value.child_value(1)?;
        let parent = match parent_bytes.as_bytes()? {
            [] => None,
            raw => Some(Checksum::from_bytes(raw)?),
        };

        let seconds = value.child_value(5)?.as_u64()?.swap_bytes();
        let timestamp = i64::try_from(seconds)
            .ok()
            .and_then(|s| DateTime::from_timestamp(s, 0))
            .ok_or_else(|| Error::Corrupted {
                checksum: checksum.to_string(),
                reason: format!("commit timestamp {} out of range", seconds),
            })?;

        Ok(Self {
            metadata: value.child_value(0)?,
            parent,
            subject: value.child_value(3)?.as_str()?.to_string(),
            body: value.child_value(4)?.as_str()?.to_string(),
            timestamp,
            root_contents: checksum_child(value, 6)?,
            root_metadata: checksum_child(value, 7)?,
        })
    }
}

/// Metadata of a commit tombstone.
pub fn tombstone_variant(commit: &Checksum) -> Variant {
    let mut dict = VariantDict::new();
    dict.insert("commit", Variant::byte_array(commit.as_bytes()));
    dict.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Oid;

    fn checksum(seed: &str) -> Checksum {
        Checksum::new(Oid::hash_object(git2::ObjectType::Blob, seed.as_bytes()).unwrap())
    }

    #[test]
    fn test_tombstone_names_commit() {
        let commit = checksum("dead");
        let value = tombstone_variant(&commit);
        assert_eq!(value.type_string(), "a{sv}");
        assert_eq!(value.lookup("commit").unwrap().as_bytes().unwrap(), commit.as_bytes());
    }

    #[test]
    fn test_dirtree_shape() {
        let tree = DirTree {
            files: vec![("a.txt".to_string(), checksum("a")), ("b.txt".to_string(), checksum("b"))],
            dirs: vec![("usr".to_string(), checksum("usr"), checksum("meta"))],
        };
        let value = tree.to_variant();
        assert_eq!(value.type_string(), "(a(say)a(sayay))");
        assert_eq!(DirTree::from_variant(&value).unwrap(), tree);
    }

    #[test]
    fn test_empty_dirtree() {
        let value = DirTree::default().to_variant();
        assert_eq!(value.type_string(), "(a(say)a(sayay))");
        assert_eq!(value.child_value(0).unwrap().n_children().unwrap(), 0);
        assert_eq!(DirTree::from_variant(&value).unwrap(), DirTree::default());
    }

    #[test]
    fn test_default_dirmeta() {
        let value = DirMeta::default().to_variant();
        assert_eq!(value.type_string(), "(uuua(ayay))");
        let meta = DirMeta::from_variant(&value).unwrap();
        assert_eq!(meta.mode, 0o40755);
        assert_eq!(meta.uid, 0);
    }

    #[test]
    fn test_file_object_layout() {
        let mut header = FileHeader::regular(0o644);
        header.xattrs.push((b"user.origin".to_vec(), b"import".to_vec()));
        let payload = encode_file(&header, b"world");

        let header_len = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        assert_eq!(&payload[4..8], &[0, 0, 0, 0]);
        assert_eq!(&payload[8 + header_len..], b"world");

        let decoded = decode_file(&checksum("x"), payload).unwrap();
        assert_eq!(decoded.header, header);
        assert_eq!(decoded.content.as_ref(), b"world");
    }

    #[test]
    fn test_truncated_file_object() {
        let err = decode_file(&checksum("x"), Bytes::from_static(b"\0\0\0\x40\0\0\0\0abc")).unwrap_err();
        assert!(matches!(err, Error::Corrupted { .. }));
    }

    #[test]
    fn test_commit_decodes_typed_fields() {
        let mut meta = VariantDict::new();
        meta.insert_str("version", "1.2");
        let commit = Commit {
            metadata: meta.end(),
            parent: Some(checksum("parent")),
            subject: "init".to_string(),
            body: String::new(),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            root_contents: checksum("root"),
            root_metadata: checksum("meta"),
        };
        let value = commit.to_variant();
        assert_eq!(value.type_string(), "(a{sv}aya(say)sstayay)");

        // the timestamp is stored big-endian
        let raw = value.child_value(5).unwrap();
        assert_eq!(raw.data().as_ref(), &1_700_000_000u64.to_be_bytes());

        let decoded = Commit::from_variant(&checksum("c"), &value).unwrap();
        assert_eq!(decoded, commit);
        assert_eq!(decoded.metadata_string("version").unwrap(), "1.2");
        assert!(decoded.metadata_string("missing").is_err());
    }

    #[test]
    fn test_commit_shape_is_checked() {
        let value = DirMeta::default().to_variant();
        let err = Commit::from_variant(&checksum("c"), &value).unwrap_err();
        assert!(matches!(err, Error::MalformedVariant(_)));
    }
}
