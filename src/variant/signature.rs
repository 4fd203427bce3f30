//! Type signature strings.
//!
//! A signature is a compact grammar describing a value's structure:
//! basic codes (`b y n q i u x t h d s o g`), `v` for a boxed value of any
//! type, `m` (maybe), `a` (array), `(...)` (tuple) and `{kv}` (dict entry).
//! Alignment and fixed size are derived from the parsed tree and drive the
//! framing rules used by the decoder.

use std::fmt;

use crate::variant::VariantError;

/// A parsed, definite type signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Signature {
    Basic(BasicType),
    Variant,
    Maybe(Box<Signature>),
    Array(Box<Signature>),
    Tuple(Vec<Signature>),
    DictEntry(Box<Signature>, Box<Signature>),
}

/// Basic (non-container) type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicType {
    Bool,
    Byte,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Handle,
    Double,
    String,
    ObjectPath,
    Signature,
}

impl BasicType {
    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            b'b' => Self::Bool,
            b'y' => Self::Byte,
            b'n' => Self::Int16,
            b'q' => Self::Uint16,
            b'i' => Self::Int32,
            b'u' => Self::Uint32,
            b'x' => Self::Int64,
            b't' => Self::Uint64,
            b'h' => Self::Handle,
            b'd' => Self::Double,
            b's' => Self::String,
            b'o' => Self::ObjectPath,
            b'g' => Self::Signature,
            _ => return None,
        })
    }

    fn code(self) -> char {
        match self {
            Self::Bool => 'b',
            Self::Byte => 'y',
            Self::Int16 => 'n',
            Self::Uint16 => 'q',
            Self::Int32 => 'i',
            Self::Uint32 => 'u',
            Self::Int64 => 'x',
            Self::Uint64 => 't',
            Self::Handle => 'h',
            Self::Double => 'd',
            Self::String => 's',
            Self::ObjectPath => 'o',
            Self::Signature => 'g',
        }
    }

    /// size in bytes, `None` for the string-like types
    fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Bool | Self::Byte => Some(1),
            Self::Int16 | Self::Uint16 => Some(2),
            Self::Int32 | Self::Uint32 | Self::Handle => Some(4),
            Self::Int64 | Self::Uint64 | Self::Double => Some(8),
            Self::String | Self::ObjectPath | Self::Signature => None,
        }
    }

    pub fn is_string_like(self) -> bool {
        self.fixed_size().is_none()
    }
}

/// deepest container nesting accepted in a type or a value
pub(crate) const MAX_DEPTH: usize = 128;

impl Signature {
    /// parse a complete signature string holding exactly one type
    pub fn parse(text: &str) -> Result<Self, VariantError> {
        let bytes = text.as_bytes();
        let (sig, used) = Self::parse_one(bytes, 0, text, 0)?;
        if used != bytes.len() {
            return Err(VariantError::InvalidSignature(text.to_string()));
        }
        Ok(sig)
    }

    fn parse_one(bytes: &[u8], pos: usize, text: &str, depth: usize) -> Result<(Self, usize), VariantError> {
        let invalid = || VariantError::InvalidSignature(text.to_string());
        let code = *bytes.get(pos).ok_or_else(invalid)?;

        if let Some(basic) = BasicType::from_code(code) {
            return Ok((Signature::Basic(basic), pos + 1));
        }
        if matches!(code, b'm' | b'a' | b'(' | b'{') && depth >= MAX_DEPTH {
            return Err(VariantError::InvalidSignature(format!(
                "type nested deeper than {} levels",
                MAX_DEPTH
            )));
        }
        let depth = depth + 1;

        match code {
            b'v' => Ok((Signature::Variant, pos + 1)),
            b'm' => {
                let (inner, next) = Self::parse_one(bytes, pos + 1, text, depth)?;
                Ok((Signature::Maybe(Box::new(inner)), next))
            }
            b'a' => {
                let (inner, next) = Self::parse_one(bytes, pos + 1, text, depth)?;
                Ok((Signature::Array(Box::new(inner)), next))
            }
            b'(' => {
                let mut members = Vec::new();
                let mut next = pos + 1;
                loop {
                    match bytes.get(next) {
                        Some(b')') => return Ok((Signature::Tuple(members), next + 1)),
                        Some(_) => {
                            let (member, after) = Self::parse_one(bytes, next, text, depth)?;
                            members.push(member);
                            next = after;
                        }
                        None => return Err(invalid()),
                    }
                }
            }
            b'{' => {
                let (key, next) = Self::parse_one(bytes, pos + 1, text, depth)?;
                if !matches!(key, Signature::Basic(_)) {
                    return Err(invalid());
                }
                let (value, next) = Self::parse_one(bytes, next, text, depth)?;
                if bytes.get(next) != Some(&b'}') {
                    return Err(invalid());
                }
                Ok((Signature::DictEntry(Box::new(key), Box::new(value)), next + 1))
            }
            _ => Err(invalid()),
        }
    }

    /// required alignment of a serialized value of this type
    pub fn alignment(&self) -> usize {
        match self {
            Signature::Basic(basic) => basic.fixed_size().unwrap_or(1),
            Signature::Variant => 8,
            Signature::Maybe(inner) | Signature::Array(inner) => inner.alignment(),
            Signature::Tuple(members) => members.iter().map(Signature::alignment).max().unwrap_or(1),
            Signature::DictEntry(key, value) => key.alignment().max(value.alignment()),
        }
    }

    /// serialized size if every value of this type has the same size
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            Signature::Basic(basic) => basic.fixed_size(),
            Signature::Variant | Signature::Maybe(_) | Signature::Array(_) => None,
            Signature::Tuple(members) => Self::fixed_struct_size(members),
            Signature::DictEntry(key, value) => {
                Self::fixed_struct_size(&[key.as_ref().clone(), value.as_ref().clone()])
            }
        }
    }

    fn fixed_struct_size(members: &[Signature]) -> Option<usize> {
        // the unit tuple is a single zero byte
        if members.is_empty() {
            return Some(1);
        }
        let mut offset = 0;
        let mut alignment = 1;
        for member in members {
            let size = member.fixed_size()?;
            let align = member.alignment();
            alignment = alignment.max(align);
            offset = align_up(offset, align) + size;
        }
        Some(align_up(offset, alignment))
    }

    /// member types of a tuple or dict entry
    pub fn members(&self) -> Option<Vec<Signature>> {
        match self {
            Signature::Tuple(members) => Some(members.clone()),
            Signature::DictEntry(key, value) => Some(vec![key.as_ref().clone(), value.as_ref().clone()]),
            _ => None,
        }
    }

    /// element type of an array or maybe
    pub fn element(&self) -> Option<&Signature> {
        match self {
            Signature::Array(inner) | Signature::Maybe(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_container(&self) -> bool {
        !matches!(self, Signature::Basic(_))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signature::Basic(basic) => write!(f, "{}", basic.code()),
            Signature::Variant => write!(f, "v"),
            Signature::Maybe(inner) => write!(f, "m{}", inner),
            Signature::Array(inner) => write!(f, "a{}", inner),
            Signature::Tuple(members) => {
                write!(f, "(")?;
                for member in members {
                    write!(f, "{}", member)?;
                }
                write!(f, ")")
            }
            Signature::DictEntry(key, value) => write!(f, "{{{}{}}}", key, value),
        }
    }
}

pub(crate) fn align_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}
