//! Decoding of serialized variant values.
//!
//! A [`Variant`] is a type signature plus a shared byte buffer. Child values
//! are views into the parent's buffer (`Bytes::slice`), so fetching a child
//! never copies payload and the parent storage stays alive as long as any
//! child does.

use std::fmt;

use bytes::Bytes;

use crate::variant::signature::{align_up, BasicType, Signature, MAX_DEPTH};
use crate::variant::VariantError;

/// An immutable, self-describing structured value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Variant {
    pub(crate) signature: Signature,
    pub(crate) data: Bytes,
}

impl Variant {
    /// Wrap serialized bytes whose type is described by `type_string`.
    ///
    /// Only the signature is validated here; framing errors surface when a
    /// child or scalar is extracted.
    pub fn from_bytes(type_string: &str, data: impl Into<Bytes>) -> Result<Self, VariantError> {
        let signature = Signature::parse(type_string)?;
        Ok(Self::from_parts(signature, data.into()))
    }

    pub(crate) fn from_parts(signature: Signature, data: Bytes) -> Self {
        Self { signature, data }
    }

    /// the type signature as a string, e.g. `(a{sv}aya(say)sstayay)`
    pub fn type_string(&self) -> String {
        self.signature.to_string()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// serialized form of this value
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn is_of_type(&self, type_string: &str) -> bool {
        self.type_string() == type_string
    }

    fn expect_type(&self, type_string: &str) -> Result<(), VariantError> {
        if self.is_of_type(type_string) {
            Ok(())
        } else {
            Err(VariantError::TypeMismatch {
                expected: type_string.to_string(),
                found: self.type_string(),
            })
        }
    }

    // ==================== Containers ====================

    /// number of children of a container value
    pub fn n_children(&self) -> Result<usize, VariantError> {
        match &self.signature {
            Signature::Tuple(members) => Ok(members.len()),
            Signature::DictEntry(..) => Ok(2),
            Signature::Variant => Ok(1),
            Signature::Maybe(inner) => Ok(usize::from(self.maybe_range(inner)?.is_some())),
            Signature::Array(element) => self.array_len(element),
            Signature::Basic(_) => Err(VariantError::NotAContainer(self.type_string())),
        }
    }

    /// the `index`-th child, sharing this value's buffer
    pub fn child_value(&self, index: usize) -> Result<Variant, VariantError> {
        match &self.signature {
            Signature::Tuple(members) => self.struct_child(members, index),
            Signature::DictEntry(key, value) => {
                let members = [key.as_ref().clone(), value.as_ref().clone()];
                self.struct_child(&members, index)
            }
            Signature::Array(element) => {
                let len = self.array_len(element)?;
                if index >= len {
                    return Err(VariantError::OutOfBounds { index, len });
                }
                let (start, end) = self.array_range(element, index)?;
                Ok(Variant::from_parts(element.as_ref().clone(), self.data.slice(start..end)))
            }
            Signature::Maybe(inner) => match self.maybe_range(inner)? {
                Some((start, end)) if index == 0 => {
                    Ok(Variant::from_parts(inner.as_ref().clone(), self.data.slice(start..end)))
                }
                Some(_) => Err(VariantError::OutOfBounds { index, len: 1 }),
                None => Err(VariantError::OutOfBounds { index, len: 0 }),
            },
            Signature::Variant if index == 0 => self.unbox(),
            Signature::Variant => Err(VariantError::OutOfBounds { index, len: 1 }),
            Signature::Basic(_) => Err(VariantError::NotAContainer(self.type_string())),
        }
    }

    /// iterate over all children of a container value
    pub fn children(&self) -> Result<impl Iterator<Item = Result<Variant, VariantError>> + '_, VariantError> {
        let n = self.n_children()?;
        Ok((0..n).map(move |i| self.child_value(i)))
    }

    /// the value boxed inside a `v`
    pub fn unbox(&self) -> Result<Variant, VariantError> {
        self.expect_type("v")?;
        let nul = self
            .data
            .iter()
            .rposition(|&b| b == 0)
            .ok_or_else(|| VariantError::Framing("boxed value has no type separator".to_string()))?;
        let type_string = std::str::from_utf8(&self.data[nul + 1..]).map_err(|_| VariantError::InvalidUtf8)?;
        let signature = Signature::parse(type_string)?;
        Ok(Variant::from_parts(signature, self.data.slice(..nul)))
    }

    /// Look up `key` in an `a{s*}` mapping.
    ///
    /// Values of `a{sv}` mappings are unboxed, so the result is the stored
    /// value itself rather than its `v` wrapper.
    pub fn lookup(&self, key: &str) -> Result<Variant, VariantError> {
        let value_sig = match &self.signature {
            Signature::Array(entry) => match entry.as_ref() {
                Signature::DictEntry(k, v) if **k == Signature::Basic(BasicType::String) => v.as_ref().clone(),
                _ => return Err(VariantError::NotAMapping(self.type_string())),
            },
            _ => return Err(VariantError::NotAMapping(self.type_string())),
        };

        for entry in self.children()? {
            let entry = entry?;
            if entry.child_value(0)?.as_str()? != key {
                continue;
            }
            let value = entry.child_value(1)?;
            return match value_sig {
                Signature::Variant => value.unbox(),
                _ => Ok(value),
            };
        }
        Err(VariantError::MissingKey(key.to_string()))
    }

    /// look up `key` and extract it as a string
    pub fn lookup_string(&self, key: &str) -> Result<String, VariantError> {
        Ok(self.lookup(key)?.as_str()?.to_string())
    }

    // ==================== Scalars ====================

    /// borrow a `s`, `o` or `g` value as text
    pub fn as_str(&self) -> Result<&str, VariantError> {
        match self.signature {
            Signature::Basic(basic) if basic.is_string_like() => {}
            _ => {
                return Err(VariantError::TypeMismatch {
                    expected: "s".to_string(),
                    found: self.type_string(),
                })
            }
        }
        match self.data.split_last() {
            Some((0, text)) => std::str::from_utf8(text).map_err(|_| VariantError::InvalidUtf8),
            _ => Err(VariantError::Framing("string is not nul-terminated".to_string())),
        }
    }

    /// borrow an `ay` value
    pub fn as_bytes(&self) -> Result<&[u8], VariantError> {
        self.expect_type("ay")?;
        Ok(&self.data)
    }

    /// an `ay` value as a shared slice of the parent buffer
    pub fn to_bytes(&self) -> Result<Bytes, VariantError> {
        self.expect_type("ay")?;
        Ok(self.data.clone())
    }

    pub fn as_bool(&self) -> Result<bool, VariantError> {
        self.expect_type("b")?;
        Ok(self.fixed::<1>()?[0] != 0)
    }

    pub fn as_byte(&self) -> Result<u8, VariantError> {
        self.expect_type("y")?;
        Ok(self.fixed::<1>()?[0])
    }

    pub fn as_u32(&self) -> Result<u32, VariantError> {
        self.expect_type("u")?;
        Ok(u32::from_le_bytes(self.fixed::<4>()?))
    }

    pub fn as_i64(&self) -> Result<i64, VariantError> {
        self.expect_type("x")?;
        Ok(i64::from_le_bytes(self.fixed::<8>()?))
    }

    pub fn as_u64(&self) -> Result<u64, VariantError> {
        self.expect_type("t")?;
        Ok(u64::from_le_bytes(self.fixed::<8>()?))
    }

    fn fixed<const N: usize>(&self) -> Result<[u8; N], VariantError> {
        <[u8; N]>::try_from(&self.data[..])
            .map_err(|_| VariantError::Framing(format!("expected {} bytes, found {}", N, self.data.len())))
    }

    // ==================== Framing ====================

    fn struct_child(&self, members: &[Signature], index: usize) -> Result<Variant, VariantError> {
        if index >= members.len() {
            return Err(VariantError::OutOfBounds {
                index,
                len: members.len(),
            });
        }

        let len = self.data.len();
        let offset_size = offset_size_for(len);
        let last = members.len() - 1;
        let mut frame = 0;
        let mut offset = 0;

        for (i, member) in members.iter().enumerate() {
            let start = align_up(offset, member.alignment());
            let end = match member.fixed_size() {
                Some(size) => start + size,
                None if i == last => {
                    let frames = members[..last].iter().filter(|m| m.fixed_size().is_none()).count();
                    len.checked_sub(frames * offset_size)
                        .ok_or_else(|| VariantError::Framing("tuple framing table overruns value".to_string()))?
                }
                None => {
                    frame += 1;
                    let at = len
                        .checked_sub(frame * offset_size)
                        .ok_or_else(|| VariantError::Framing("tuple framing table overruns value".to_string()))?;
                    read_offset(&self.data, at, offset_size)?
                }
            };
            if start > end || end > len {
                return Err(VariantError::Framing(format!("member {} spans {}..{} of {}", i, start, end, len)));
            }
            if i == index {
                return Ok(Variant::from_parts(member.clone(), self.data.slice(start..end)));
            }
            offset = end;
        }
        Err(VariantError::OutOfBounds {
            index,
            len: members.len(),
        })
    }

    fn array_len(&self, element: &Signature) -> Result<usize, VariantError> {
        let len = self.data.len();
        if len == 0 {
            return Ok(0);
        }
        match element.fixed_size() {
            Some(size) if len % size == 0 => Ok(len / size),
            Some(size) => Err(VariantError::Framing(format!("array of {} is not a multiple of {}", len, size))),
            None => {
                let offset_size = offset_size_for(len);
                let table_start = read_offset(&self.data, len - offset_size, offset_size)?;
                if table_start > len || (len - table_start) % offset_size != 0 {
                    return Err(VariantError::Framing("array framing table is inconsistent".to_string()));
                }
                Ok((len - table_start) / offset_size)
            }
        }
    }

    fn array_range(&self, element: &Signature, index: usize) -> Result<(usize, usize), VariantError> {
        if let Some(size) = element.fixed_size() {
            return Ok((index * size, (index + 1) * size));
        }
        let len = self.data.len();
        let offset_size = offset_size_for(len);
        let table_start = read_offset(&self.data, len - offset_size, offset_size)?;
        let start = match index {
            0 => 0,
            _ => align_up(
                read_offset(&self.data, table_start + (index - 1) * offset_size, offset_size)?,
                element.alignment(),
            ),
        };
        let end = read_offset(&self.data, table_start + index * offset_size, offset_size)?;
        if start > end || end > table_start {
            return Err(VariantError::Framing(format!("array element {} spans {}..{}", index, start, end)));
        }
        Ok((start, end))
    }

    fn maybe_range(&self, inner: &Signature) -> Result<Option<(usize, usize)>, VariantError> {
        let len = self.data.len();
        if len == 0 {
            return Ok(None);
        }
        match inner.fixed_size() {
            Some(size) if size == len => Ok(Some((0, len))),
            Some(size) => Err(VariantError::Framing(format!("maybe holds {} bytes, expected {}", len, size))),
            None => Ok(Some((0, len - 1))),
        }
    }
}

/// number of bytes used by each framing offset in a container of `len` bytes
pub(crate) fn offset_size_for(len: usize) -> usize {
    if len == 0 {
        0
    } else if len <= u8::MAX as usize {
        1
    } else if len <= u16::MAX as usize {
        2
    } else if len <= u32::MAX as usize {
        4
    } else {
        8
    }
}

fn read_offset(data: &[u8], at: usize, size: usize) -> Result<usize, VariantError> {
    let bytes = data
        .get(at..at + size)
        .ok_or_else(|| VariantError::Framing(format!("framing offset at {} out of range", at)))?;
    let mut buf = [0u8; 8];
    buf[..size].copy_from_slice(bytes);
    usize::try_from(u64::from_le_bytes(buf)).map_err(|_| VariantError::Framing("framing offset overflow".to_string()))
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Variant<{}>({})", self.signature, self)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}

impl Variant {
    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        if depth > MAX_DEPTH {
            return write!(f, "<...>");
        }
        let unreadable = |f: &mut fmt::Formatter<'_>| write!(f, "<malformed {}>", self.signature);

        match &self.signature {
            Signature::Basic(basic) => {
                let rendered = match basic {
                    BasicType::Bool => self.as_bool().map(|b| b.to_string()),
                    BasicType::Byte => self.as_byte().map(|b| format!("0x{:02x}", b)),
                    BasicType::Uint32 => self.as_u32().map(|v| v.to_string()),
                    BasicType::Uint64 => self.as_u64().map(|v| v.to_string()),
                    BasicType::Int64 => self.as_i64().map(|v| v.to_string()),
                    BasicType::String | BasicType::ObjectPath | BasicType::Signature => {
                        self.as_str().map(|s| format!("'{}'", s.replace('\'', "\\'")))
                    }
                    _ => Ok(format!("<{} bytes>", self.data.len())),
                };
                match rendered {
                    Ok(text) => write!(f, "{}", text),
                    Err(_) => unreadable(f),
                }
            }
            Signature::Array(element) if **element == Signature::Basic(BasicType::Byte) => {
                write!(f, "b'")?;
                for byte in self.data.iter() {
                    write!(f, "{:02x}", byte)?;
                }
                write!(f, "'")
            }
            Signature::Variant => match self.unbox() {
                Ok(inner) => {
                    write!(f, "<")?;
                    inner.render(f, depth + 1)?;
                    write!(f, ">")
                }
                Err(_) => unreadable(f),
            },
            Signature::Maybe(_) => match self.n_children() {
                Ok(0) => write!(f, "nothing"),
                Ok(_) => match self.child_value(0) {
                    Ok(inner) => {
                        write!(f, "just ")?;
                        inner.render(f, depth + 1)
                    }
                    Err(_) => unreadable(f),
                },
                Err(_) => unreadable(f),
            },
            Signature::DictEntry(..) => match (self.child_value(0), self.child_value(1)) {
                (Ok(key), Ok(value)) => {
                    key.render(f, depth + 1)?;
                    write!(f, ": ")?;
                    value.render(f, depth + 1)
                }
                _ => unreadable(f),
            },
            Signature::Array(element) => {
                let (open, close) = match element.as_ref() {
                    Signature::DictEntry(..) => ("{", "}"),
                    _ => ("[", "]"),
                };
                let children = match self.children() {
                    Ok(children) => children.collect::<Result<Vec<_>, _>>(),
                    Err(e) => Err(e),
                };
                let Ok(children) = children else {
                    return unreadable(f);
                };
                write!(f, "{}", open)?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    child.render(f, depth + 1)?;
                }
                write!(f, "{}", close)
            }
            Signature::Tuple(members) => {
                write!(f, "(")?;
                for i in 0..members.len() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match self.child_value(i) {
                        Ok(child) => child.render(f, depth + 1)?,
                        Err(_) => return unreadable(f),
                    }
                }
                if members.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hand_framed_tuple() {
        // (sy s) laid out by hand: "ab\0" then byte 7, then "cd\0", then one
        // framing offset (end of the first string = 3)
        let data = b"ab\0\x07cd\0\x03".to_vec();
        let value = Variant::from_bytes("(sys)", data).unwrap();

        assert_eq!(value.n_children().unwrap(), 3);
        assert_eq!(value.child_value(0).unwrap().as_str().unwrap(), "ab");
        assert_eq!(value.child_value(1).unwrap().as_byte().unwrap(), 7);
        assert_eq!(value.child_value(2).unwrap().as_str().unwrap(), "cd");
        assert!(matches!(value.child_value(3), Err(VariantError::OutOfBounds { index: 3, len: 3 })));
    }

    #[test]
    fn test_decode_string_array() {
        // ["x", "yz"] with framing offsets 2 and 5
        let data = b"x\0yz\0\x02\x05".to_vec();
        let value = Variant::from_bytes("as", data).unwrap();
        assert_eq!(value.n_children().unwrap(), 2);
        assert_eq!(value.child_value(1).unwrap().as_str().unwrap(), "yz");
    }

    #[test]
    fn test_child_shares_parent_buffer() {
        // "name\0", the byte payload, then the end offset of the string
        let value = Variant::from_bytes("(say)", b"name\0\x01\x02\x03\x05".to_vec()).unwrap();
        let bytes = value.child_value(1).unwrap();
        assert_eq!(bytes.as_bytes().unwrap(), &[1, 2, 3]);

        let parent_range = value.data().as_ptr_range();
        assert!(parent_range.contains(&bytes.data().as_ptr()));

        // the child outlives the parent value and still reads the same storage
        drop(value);
        assert_eq!(bytes.as_bytes().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_scalar_type_checks() {
        let value = Variant::from_bytes("u", 42u32.to_le_bytes().to_vec()).unwrap();
        assert_eq!(value.as_u32().unwrap(), 42);
        assert!(matches!(value.as_str(), Err(VariantError::TypeMismatch { .. })));
        assert!(matches!(value.child_value(0), Err(VariantError::NotAContainer(_))));
    }

    #[test]
    fn test_truncated_framing_is_reported() {
        // claims its framing table starts beyond the end of the value
        let value = Variant::from_bytes("as", b"x\0\x09".to_vec()).unwrap();
        assert!(matches!(value.n_children(), Err(VariantError::Framing(_))));
    }

    #[test]
    fn test_lookup_on_non_mapping() {
        let value = Variant::from_bytes("as", Vec::new()).unwrap();
        assert!(matches!(value.lookup("version"), Err(VariantError::NotAMapping(_))));
    }

    #[test]
    fn test_deeply_nested_type_is_an_error() {
        let deep = format!("{}y", "a".repeat(1_000_000));
        let err = Variant::from_bytes(&deep, Vec::new()).unwrap_err();
        assert!(matches!(err, VariantError::InvalidSignature(_)));

        // a boxed value carrying such a type fails to unbox instead of crashing
        let mut data = Vec::new();
        data.push(0);
        data.extend_from_slice(deep.as_bytes());
        let boxed = Variant::from_bytes("v", data).unwrap();
        assert!(matches!(boxed.unbox(), Err(VariantError::InvalidSignature(_))));
    }

    #[test]
    fn test_display_of_deeply_boxed_value_is_cut_off() {
        let mut value = Variant::uint32(1);
        for _ in 0..(MAX_DEPTH + 10) {
            value = Variant::boxed(&value);
        }
        let text = value.to_string();
        assert!(text.contains("<...>"));
        assert!(!text.contains('1'));
    }
}
