//! Construction of variant values.
//!
//! Containers are built from already-serialized children, the same way the
//! decoder reads them back: members aligned, variable-sized ends recorded in
//! a framing table sized to the smallest offset width that fits.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::variant::signature::{align_up, BasicType, Signature};
use crate::variant::value::{offset_size_for, Variant};
use crate::variant::VariantError;

impl Variant {
    pub fn string(value: &str) -> Self {
        let mut buf = BytesMut::with_capacity(value.len() + 1);
        buf.put_slice(value.as_bytes());
        buf.put_u8(0);
        Self::from_parts(Signature::Basic(BasicType::String), buf.freeze())
    }

    pub fn boolean(value: bool) -> Self {
        Self::from_parts(Signature::Basic(BasicType::Bool), Bytes::copy_from_slice(&[u8::from(value)]))
    }

    pub fn byte(value: u8) -> Self {
        Self::from_parts(Signature::Basic(BasicType::Byte), Bytes::copy_from_slice(&[value]))
    }

    pub fn uint32(value: u32) -> Self {
        Self::from_parts(Signature::Basic(BasicType::Uint32), Bytes::copy_from_slice(&value.to_le_bytes()))
    }

    pub fn int64(value: i64) -> Self {
        Self::from_parts(Signature::Basic(BasicType::Int64), Bytes::copy_from_slice(&value.to_le_bytes()))
    }

    pub fn uint64(value: u64) -> Self {
        Self::from_parts(Signature::Basic(BasicType::Uint64), Bytes::copy_from_slice(&value.to_le_bytes()))
    }

    /// an `ay` holding `value`
    pub fn byte_array(value: &[u8]) -> Self {
        Self::from_parts(
            Signature::Array(Box::new(Signature::Basic(BasicType::Byte))),
            Bytes::copy_from_slice(value),
        )
    }

    /// box any value into a `v`
    pub fn boxed(inner: &Variant) -> Self {
        let type_string = inner.type_string();
        let mut buf = BytesMut::with_capacity(inner.data.len() + type_string.len() + 1);
        buf.put_slice(&inner.data);
        buf.put_u8(0);
        buf.put_slice(type_string.as_bytes());
        Self::from_parts(Signature::Variant, buf.freeze())
    }

    pub fn tuple(members: &[Variant]) -> Self {
        let signature = Signature::Tuple(members.iter().map(|m| m.signature.clone()).collect());
        let data = serialize_struct(&signature, members);
        Self::from_parts(signature, data)
    }

    pub fn dict_entry(key: &Variant, value: &Variant) -> Result<Self, VariantError> {
        if !matches!(key.signature, Signature::Basic(_)) {
            return Err(VariantError::TypeMismatch {
                expected: "basic type".to_string(),
                found: key.type_string(),
            });
        }
        let signature = Signature::DictEntry(Box::new(key.signature.clone()), Box::new(value.signature.clone()));
        let data = serialize_struct(&signature, &[key.clone(), value.clone()]);
        Ok(Self::from_parts(signature, data))
    }

    /// an array of `element` values; every item must have that type
    pub fn array(element: Signature, items: &[Variant]) -> Result<Self, VariantError> {
        if let Some(item) = items.iter().find(|item| item.signature != element) {
            return Err(VariantError::TypeMismatch {
                expected: element.to_string(),
                found: item.type_string(),
            });
        }
        Ok(Self::array_unchecked(element, items))
    }

    /// array built from items already known to have type `element`
    pub(crate) fn array_unchecked(element: Signature, items: &[Variant]) -> Self {
        let mut buf = BytesMut::new();
        match element.fixed_size() {
            Some(_) => {
                for item in items {
                    buf.put_slice(&item.data);
                }
            }
            None => {
                let alignment = element.alignment();
                let mut ends = Vec::with_capacity(items.len());
                for item in items {
                    pad_to(&mut buf, alignment);
                    buf.put_slice(&item.data);
                    ends.push(buf.len());
                }
                append_framing(&mut buf, &ends);
            }
        }
        Self::from_parts(Signature::Array(Box::new(element)), buf.freeze())
    }
}

fn serialize_struct(signature: &Signature, members: &[Variant]) -> Bytes {
    let mut buf = BytesMut::new();
    let mut ends = Vec::new();
    let last = members.len().saturating_sub(1);

    for (i, member) in members.iter().enumerate() {
        pad_to(&mut buf, member.signature.alignment());
        buf.put_slice(&member.data);
        if member.signature.fixed_size().is_none() && i != last {
            ends.push(buf.len());
        }
    }

    match signature.fixed_size() {
        Some(size) => buf.resize(size, 0),
        None => {
            ends.reverse();
            append_framing(&mut buf, &ends);
        }
    }
    buf.freeze()
}

fn pad_to(buf: &mut BytesMut, alignment: usize) {
    let target = align_up(buf.len(), alignment);
    buf.resize(target, 0);
}

/// append framing offsets, widening them until the container size fits
fn append_framing(buf: &mut BytesMut, offsets: &[usize]) {
    if offsets.is_empty() {
        return;
    }
    let body = buf.len();
    let width = [1usize, 2, 4, 8]
        .into_iter()
        .find(|&width| offset_size_for(body + offsets.len() * width) <= width)
        .unwrap_or(8);
    for &offset in offsets {
        buf.put_slice(&(offset as u64).to_le_bytes()[..width]);
    }
}

/// Builder for `a{sv}` mappings such as commit metadata.
///
/// Keys are kept sorted, so equal contents always serialize identically.
#[derive(Debug, Clone, Default)]
pub struct VariantDict {
    entries: BTreeMap<String, Variant>,
}

impl VariantDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// start from the entries of an existing `a{sv}` value
    pub fn from_variant(mapping: &Variant) -> Result<Self, VariantError> {
        if !mapping.is_of_type("a{sv}") {
            return Err(VariantError::NotAMapping(mapping.type_string()));
        }
        let mut dict = Self::new();
        for entry in mapping.children()? {
            let entry = entry?;
            let key = entry.child_value(0)?.as_str()?.to_string();
            let value = entry.child_value(1)?.unbox()?;
            dict.entries.insert(key, value);
        }
        Ok(dict)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Variant) -> &mut Self {
        self.entries.insert(key.into(), value);
        self
    }

    pub fn insert_str(&mut self, key: impl Into<String>, value: &str) -> &mut Self {
        self.insert(key, Variant::string(value))
    }

    /// copy every entry of `other` over this one
    pub fn merge(&mut self, other: VariantDict) -> &mut Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// serialize into an `a{sv}` variant
    pub fn end(&self) -> Variant {
        let entry_sig = Signature::DictEntry(
            Box::new(Signature::Basic(BasicType::String)),
            Box::new(Signature::Variant),
        );
        let items: Vec<Variant> = self
            .entries
            .iter()
            .map(|(key, value)| {
                let signature = entry_sig.clone();
                let members = [Variant::string(key), Variant::boxed(value)];
                Variant::from_parts(signature.clone(), serialize_struct(&signature, &members))
            })
            .collect();
        Variant::array_unchecked(entry_sig, &items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_layout_matches_framing_rules() {
        let value = Variant::tuple(&[Variant::string("ab"), Variant::byte(7), Variant::string("cd")]);
        assert_eq!(value.data().as_ref(), b"ab\0\x07cd\0\x03");
        assert_eq!(value.type_string(), "(sys)");
    }

    #[test]
    fn test_fixed_tuple_is_padded() {
        let value = Variant::tuple(&[Variant::uint32(1), Variant::byte(2)]);
        assert_eq!(value.data().len(), 8);
        assert_eq!(value.child_value(1).unwrap().as_byte().unwrap(), 2);
    }

    #[test]
    fn test_dirmeta_shape() {
        let xattrs = Variant::array(Signature::parse("(ayay)").unwrap(), &[]).unwrap();
        let meta = Variant::tuple(&[Variant::uint32(0), Variant::uint32(0), Variant::uint32(0o40755), xattrs]);
        assert_eq!(meta.type_string(), "(uuua(ayay))");
        assert_eq!(meta.child_value(2).unwrap().as_u32().unwrap(), 0o40755);
        assert_eq!(meta.child_value(3).unwrap().n_children().unwrap(), 0);
    }

    #[test]
    fn test_dict_lookup() {
        let mut dict = VariantDict::new();
        dict.insert_str("version", "42.1")
            .insert("n-files", Variant::uint32(3))
            .insert("flag", Variant::boolean(true));
        let mapping = dict.end();

        assert_eq!(mapping.type_string(), "a{sv}");
        assert_eq!(mapping.n_children().unwrap(), 3);
        assert_eq!(mapping.lookup_string("version").unwrap(), "42.1");
        assert_eq!(mapping.lookup("n-files").unwrap().as_u32().unwrap(), 3);
        assert!(mapping.lookup("flag").unwrap().as_bool().unwrap());

        let err = mapping.lookup("missing").unwrap_err();
        assert!(matches!(err, VariantError::MissingKey(ref key) if key == "missing"));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_dict_from_variant_and_merge() {
        let mut base = VariantDict::new();
        base.insert_str("version", "1").insert_str("source", "import");

        let mut overrides = VariantDict::new();
        overrides.insert_str("version", "2");

        let mut merged = VariantDict::from_variant(&base.end()).unwrap();
        merged.merge(overrides);
        let mapping = merged.end();

        assert_eq!(mapping.lookup_string("version").unwrap(), "2");
        assert_eq!(mapping.lookup_string("source").unwrap(), "import");
    }

    #[test]
    fn test_wide_framing_offsets() {
        // pushes the array past 255 bytes so two byte offsets are needed
        let long = "x".repeat(300);
        let items = vec![Variant::string(&long), Variant::string("tail")];
        let array = Variant::array(Signature::Basic(BasicType::String), &items).unwrap();
        assert_eq!(array.n_children().unwrap(), 2);
        assert_eq!(array.child_value(0).unwrap().as_str().unwrap(), long);
        assert_eq!(array.child_value(1).unwrap().as_str().unwrap(), "tail");
    }

    #[test]
    fn test_array_rejects_mixed_items() {
        let result = Variant::array(Signature::Basic(BasicType::String), &[Variant::uint32(1)]);
        assert!(matches!(result, Err(VariantError::TypeMismatch { .. })));
    }

    #[test]
    fn test_display() {
        let value = Variant::tuple(&[Variant::string("init"), Variant::uint64(3), Variant::byte_array(&[0xab])]);
        assert_eq!(value.to_string(), "('init', 3, b'ab')");

        let mut dict = VariantDict::new();
        dict.insert_str("version", "1.0");
        assert_eq!(dict.end().to_string(), "{'version': <'1.0'>}");
    }
}
