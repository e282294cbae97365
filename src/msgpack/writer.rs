//! MessagePack encoder.
//!
//! Tags and length prefixes are written with `rmp`, which always picks the
//! shortest form: non-negative integers use the unsigned families (fixint,
//! `uint8`..`uint64`), negative integers the signed ones, and lengths the
//! smallest prefix that fits.

use rmp::encode::{self as rmp_encode, ValueWriteError};
use std::io::{self, Write};
use thiserror::Error;

use super::tree::{Event, Events};
use super::Value;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{kind} of length {len} exceeds the 32-bit length limit")]
    TooLong { kind: &'static str, len: usize },
    #[error("I/O error while encoding: {0}")]
    Io(#[from] io::Error),
}

impl From<ValueWriteError<io::Error>> for EncodeError {
    fn from(err: ValueWriteError<io::Error>) -> Self {
        match err {
            ValueWriteError::InvalidMarkerWrite(e) | ValueWriteError::InvalidDataWrite(e) => EncodeError::Io(e),
        }
    }
}

/// Encodes `value` into a freshly allocated buffer.
pub fn encode(value: &Value) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    write_value(&mut buf, value)?;
    Ok(buf)
}

/// Encodes a positional argument list as a single top-level array.
pub fn encode_args(args: &[Value]) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    rmp_encode::write_array_len(&mut buf, length("array", args.len())?)?;
    for arg in args {
        write_value(&mut buf, arg)?;
    }
    Ok(buf)
}

/// Writes the encoding of `value` to `w`.
pub fn write_value<W: Write>(w: &mut W, value: &Value) -> Result<(), EncodeError> {
    for event in Events::new(value) {
        match event {
            Event::Array(len) => {
                rmp_encode::write_array_len(w, length("array", len)?)?;
            }
            Event::Map(len) => {
                rmp_encode::write_map_len(w, length("map", len)?)?;
            }
            Event::Leaf(leaf) => write_leaf(w, leaf)?,
        }
    }
    Ok(())
}

fn write_leaf<W: Write>(w: &mut W, value: &Value) -> Result<(), EncodeError> {
    match value {
        Value::Nil => rmp_encode::write_nil(w)?,
        Value::Bool(b) => rmp_encode::write_bool(w, *b)?,
        Value::Int(v) if *v >= 0 => {
            rmp_encode::write_uint(w, *v as u64)?;
        }
        Value::Int(v) => {
            rmp_encode::write_sint(w, *v)?;
        }
        Value::UInt(v) => {
            rmp_encode::write_uint(w, *v)?;
        }
        Value::F32(v) => rmp_encode::write_f32(w, *v)?,
        Value::F64(v) => rmp_encode::write_f64(w, *v)?,
        Value::Bin(bytes) => {
            rmp_encode::write_bin_len(w, length("bin", bytes.len())?)?;
            w.write_all(bytes)?;
        }
        Value::Str(s) => {
            rmp_encode::write_str_len(w, length("str", s.len())?)?;
            w.write_all(s.as_bytes())?;
        }
        Value::Ext { kind, data } => {
            rmp_encode::write_ext_meta(w, length("ext", data.len())?, *kind)?;
            w.write_all(data)?;
        }
        // Headers come from the walk; children follow as their own events.
        Value::Array(_) | Value::Map(_) => {}
    }
    Ok(())
}

fn length(kind: &'static str, len: usize) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| EncodeError::TooLong { kind, len })
}
