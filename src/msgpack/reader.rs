//! MessagePack decoder.
//!
//! Markers are classified with `rmp::Marker`; payloads are read straight
//! from the input slice. Decoding is driven by an explicit stack of
//! partially built containers rather than recursion, so nesting depth is
//! limited only by memory. Length prefixes are never trusted for
//! allocation: a container announcing more elements than there are bytes
//! left cannot be satisfied and is reserved only up to the remaining input
//! size.

use byteorder::{BigEndian, ByteOrder};
use rmp::Marker;
use thiserror::Error;

use super::tree::Builder;
use super::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input at offset {offset}: needed {needed} more bytes")]
    UnexpectedEof { offset: usize, needed: usize },
    #[error("reserved type tag 0xc1 at offset {offset}")]
    ReservedTag { offset: usize },
    #[error("invalid utf-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("{count} trailing bytes after value ending at offset {offset}")]
    TrailingBytes { offset: usize, count: usize },
    #[error("empty input")]
    Empty,
}

/// Cursor over an encoded buffer.
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }

    // Basic operations --------------------------------------------------------

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    // Read and interpret types ------------------------------------------------

    fn read_str(&mut self, len: usize) -> Result<&'a str, DecodeError> {
        let offset = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { offset })
    }

    fn read_ext(&mut self, len: usize) -> Result<Head<'a>, DecodeError> {
        let kind = self.read_u8()? as i8;
        Ok(Head::Ext(kind, self.take(len)?))
    }

    /// Reads one marker and either a complete scalar or a container header.
    fn read_head(&mut self) -> Result<Head<'a>, DecodeError> {
        let offset = self.pos;
        let head = match Marker::from_u8(self.read_u8()?) {
            Marker::FixPos(v) => Head::Int(i64::from(v)),
            Marker::FixNeg(v) => Head::Int(i64::from(v)),
            Marker::Null => Head::Nil,
            Marker::True => Head::Bool(true),
            Marker::False => Head::Bool(false),
            Marker::U8 => Head::Int(i64::from(self.read_u8()?)),
            Marker::U16 => Head::Int(i64::from(self.read_u16()?)),
            Marker::U32 => Head::Int(i64::from(self.read_u32()?)),
            Marker::U64 => Head::UInt(self.read_u64()?),
            Marker::I8 => Head::Int(i64::from(self.read_u8()? as i8)),
            Marker::I16 => Head::Int(i64::from(self.read_u16()? as i16)),
            Marker::I32 => Head::Int(i64::from(self.read_u32()? as i32)),
            Marker::I64 => Head::Int(self.read_u64()? as i64),
            Marker::F32 => Head::F32(f32::from_bits(self.read_u32()?)),
            Marker::F64 => Head::F64(f64::from_bits(self.read_u64()?)),
            Marker::FixStr(len) => Head::Str(self.read_str(usize::from(len))?),
            Marker::Str8 => {
                let len = self.read_u8()?;
                Head::Str(self.read_str(usize::from(len))?)
            }
            Marker::Str16 => {
                let len = self.read_u16()?;
                Head::Str(self.read_str(usize::from(len))?)
            }
            Marker::Str32 => {
                let len = self.read_u32()?;
                Head::Str(self.read_str(len as usize)?)
            }
            Marker::Bin8 => {
                let len = self.read_u8()?;
                Head::Bin(self.take(usize::from(len))?)
            }
            Marker::Bin16 => {
                let len = self.read_u16()?;
                Head::Bin(self.take(usize::from(len))?)
            }
            Marker::Bin32 => {
                let len = self.read_u32()?;
                Head::Bin(self.take(len as usize)?)
            }
            Marker::FixArray(len) => Head::Array(usize::from(len)),
            Marker::Array16 => Head::Array(usize::from(self.read_u16()?)),
            Marker::Array32 => Head::Array(self.read_u32()? as usize),
            Marker::FixMap(len) => Head::Map(usize::from(len)),
            Marker::Map16 => Head::Map(usize::from(self.read_u16()?)),
            Marker::Map32 => Head::Map(self.read_u32()? as usize),
            Marker::FixExt1 => self.read_ext(1)?,
            Marker::FixExt2 => self.read_ext(2)?,
            Marker::FixExt4 => self.read_ext(4)?,
            Marker::FixExt8 => self.read_ext(8)?,
            Marker::FixExt16 => self.read_ext(16)?,
            Marker::Ext8 => {
                let len = self.read_u8()?;
                self.read_ext(usize::from(len))?
            }
            Marker::Ext16 => {
                let len = self.read_u16()?;
                self.read_ext(usize::from(len))?
            }
            Marker::Ext32 => {
                let len = self.read_u32()?;
                self.read_ext(len as usize)?
            }
            Marker::Reserved => return Err(DecodeError::ReservedTag { offset }),
        };
        Ok(head)
    }

    /// Decodes the next complete value, leaving the cursor just past it.
    pub fn read_value(&mut self) -> Result<Value, DecodeError> {
        let mut builder = Builder::default();
        loop {
            let done = match self.read_head()? {
                Head::Array(len) => builder.array(len, self.remaining()),
                Head::Map(len) => builder.map(len, self.remaining() / 2),
                scalar => builder.leaf(scalar.into_value()),
            };
            if let Some(value) = done {
                return Ok(value);
            }
        }
    }

    /// Checks the next complete value and moves past it without building it.
    ///
    /// Fails exactly where [`Reader::read_value`] would. Returns the kind of
    /// the value, as named by [`Value::kind`].
    pub fn skip_value(&mut self) -> Result<&'static str, DecodeError> {
        let root = self.read_head()?;
        let mut pending = root.children();
        while pending > 0 {
            pending = pending - 1 + self.read_head()?.children();
        }
        Ok(root.kind())
    }
}

/// One marker with its payload, borrowed from the input.
enum Head<'a> {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    F32(f32),
    F64(f64),
    Str(&'a str),
    Bin(&'a [u8]),
    Ext(i8, &'a [u8]),
    Array(usize),
    Map(usize),
}

impl Head<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Head::Nil => "nil",
            Head::Bool(_) => "bool",
            Head::Int(_) | Head::UInt(_) => "int",
            Head::F32(_) | Head::F64(_) => "float",
            Head::Str(_) => "str",
            Head::Bin(_) => "bin",
            Head::Ext(..) => "ext",
            Head::Array(_) => "array",
            Head::Map(_) => "map",
        }
    }

    /// Number of values that follow as part of this one.
    fn children(&self) -> u64 {
        match self {
            Head::Array(len) => *len as u64,
            Head::Map(len) => 2 * *len as u64,
            _ => 0,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Head::Nil => Value::Nil,
            Head::Bool(b) => Value::Bool(b),
            Head::Int(v) => Value::Int(v),
            Head::UInt(v) => Value::from_u64(v),
            Head::F32(v) => Value::F32(v),
            Head::F64(v) => Value::F64(v),
            Head::Str(s) => Value::Str(s.to_owned()),
            Head::Bin(b) => Value::Bin(b.to_vec()),
            Head::Ext(kind, data) => Value::Ext {
                kind,
                data: data.to_vec(),
            },
            Head::Array(_) => Value::Array(Vec::new()),
            Head::Map(_) => Value::Map(Vec::new()),
        }
    }
}

/// Runs `read` over the whole of `bytes`, which must hold exactly one value.
fn read_exactly<'a, T>(
    bytes: &'a [u8],
    read: impl FnOnce(&mut Reader<'a>) -> Result<T, DecodeError>,
) -> Result<T, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let mut reader = Reader::new(bytes);
    let value = read(&mut reader)?;
    if !reader.is_empty() {
        return Err(DecodeError::TrailingBytes {
            offset: reader.pos(),
            count: reader.remaining(),
        });
    }
    Ok(value)
}

/// Decodes exactly one value from `bytes`.
///
/// Trailing bytes after the value are an error, as is empty input.
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    read_exactly(bytes, Reader::read_value)
}

/// Checks that `bytes` holds exactly one well-formed value and returns its
/// kind. Accepts and rejects the same inputs as [`decode`] without
/// allocating the tree.
pub fn validate(bytes: &[u8]) -> Result<&'static str, DecodeError> {
    read_exactly(bytes, Reader::skip_value)
}
