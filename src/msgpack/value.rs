//! Decoded MessagePack values

use std::fmt;
use std::mem;

use super::tree::{Builder, Event, Events};

/// A structured value as carried across the host/guest boundary.
///
/// Integers are normalised: anything that fits in `i64` is [`Value::Int`],
/// and [`Value::UInt`] only holds values above `i64::MAX`. The decoder and
/// the `From` conversions both apply this rule, so two values that denote
/// the same number always compare equal.
///
/// Nesting depth is bounded only by memory. Dropping, cloning, comparing,
/// formatting and encoding a value never recurse into its children.
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    F32(f32),
    F64(f64),
    Bin(Vec<u8>),
    Str(String),
    Array(Vec<Value>),
    /// Entries in wire order. Equality ignores order.
    Map(Vec<(Value, Value)>),
    Ext { kind: i8, data: Vec<u8> },
}

impl Value {
    /// Builds an integer value, normalising to [`Value::Int`] where possible.
    pub fn from_u64(v: u64) -> Value {
        match i64::try_from(v) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::UInt(v),
        }
    }

    /// Short name of this value's kind
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::UInt(_) => "int",
            Value::F32(_) | Value::F64(_) => "float",
            Value::Bin(_) => "bin",
            Value::Str(_) => "str",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Ext { .. } => "ext",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(v) => u64::try_from(*v).ok(),
            Value::UInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of any integer or float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::F32(v) => Some(f64::from(*v)),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bin(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Takes the elements out of an array.
    pub fn into_array(mut self) -> Option<Vec<Value>> {
        match &mut self {
            Value::Array(items) => Some(mem::take(items)),
            _ => None,
        }
    }

    fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Map(_))
    }

    /// Copies a childless value. Containers come back empty.
    fn clone_leaf(&self) -> Value {
        match self {
            Value::Nil => Value::Nil,
            Value::Bool(b) => Value::Bool(*b),
            Value::Int(v) => Value::Int(*v),
            Value::UInt(v) => Value::UInt(*v),
            Value::F32(v) => Value::F32(*v),
            Value::F64(v) => Value::F64(*v),
            Value::Bin(b) => Value::Bin(b.clone()),
            Value::Str(s) => Value::Str(s.clone()),
            Value::Ext { kind, data } => Value::Ext {
                kind: *kind,
                data: data.clone(),
            },
            Value::Array(_) => Value::Array(Vec::new()),
            Value::Map(_) => Value::Map(Vec::new()),
        }
    }

    /// Looks up a map entry by string key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}

impl Drop for Value {
    fn drop(&mut self) {
        let mut pending = match self {
            Value::Array(items) if items.iter().any(Value::is_container) => mem::take(items),
            Value::Map(entries) if entries.iter().any(|(k, v)| k.is_container() || v.is_container()) => {
                mem::take(entries).into_iter().flat_map(|(k, v)| [k, v]).collect()
            }
            _ => return,
        };
        // Detach grandchildren before each child is dropped, so no drop
        // ever sees more than one level.
        while let Some(mut value) = pending.pop() {
            match &mut value {
                Value::Array(items) => pending.append(items),
                Value::Map(entries) => pending.extend(mem::take(entries).into_iter().flat_map(|(k, v)| [k, v])),
                _ => {}
            }
        }
    }
}

impl Clone for Value {
    fn clone(&self) -> Value {
        let mut builder = Builder::default();
        for event in Events::new(self) {
            let done = match event {
                Event::Leaf(v) => builder.leaf(v.clone_leaf()),
                Event::Array(len) => builder.array(len, len),
                Event::Map(len) => builder.map(len, len),
            };
            if let Some(root) = done {
                return root;
            }
        }
        // The walk always ends with the event that completes the root.
        self.clone_leaf()
    }
}

impl PartialEq for Value {
    /// Structural equality. Floats compare bitwise, so NaN payloads survive
    /// a round trip comparison. Map entries are matched by key regardless of
    /// order; with duplicate keys, each entry pairs with the first unused
    /// entry under an equal key.
    fn eq(&self, other: &Value) -> bool {
        let mut work = vec![(self, other)];
        while let Some((a, b)) = work.pop() {
            let same = match (a, b) {
                (Value::Nil, Value::Nil) => true,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (Value::Int(a), Value::Int(b)) => a == b,
                (Value::UInt(a), Value::UInt(b)) => a == b,
                (Value::F32(a), Value::F32(b)) => a.to_bits() == b.to_bits(),
                (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
                (Value::Bin(a), Value::Bin(b)) => a == b,
                (Value::Str(a), Value::Str(b)) => a == b,
                (Value::Array(a), Value::Array(b)) => {
                    work.extend(a.iter().zip(b));
                    a.len() == b.len()
                }
                (Value::Map(a), Value::Map(b)) => a.len() == b.len() && pair_entries(a, b, &mut work),
                (Value::Ext { kind: ka, data: da }, Value::Ext { kind: kb, data: db }) => ka == kb && da == db,
                _ => false,
            };
            if !same {
                return false;
            }
        }
        true
    }
}

/// Matches each entry of `a` to an entry of `b` with an equal key and queues
/// the value pairs. False if some key has no partner.
fn pair_entries<'a>(a: &'a [(Value, Value)], b: &'a [(Value, Value)], work: &mut Vec<(&'a Value, &'a Value)>) -> bool {
    let mut used = vec![false; b.len()];
    for (k, v) in a {
        let Some(j) = (0..b.len()).find(|&j| !used[j] && b[j].0 == *k) else {
            return false;
        };
        used[j] = true;
        work.push((v, &b[j].1));
    }
    true
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

macro_rules! from_signed {
    ($($t:ty),*) => {$(
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        }
    )*};
}

macro_rules! from_unsigned {
    ($($t:ty),*) => {$(
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::from_u64(u64::from(v))
            }
        }
    )*};
}

from_signed!(i8, i16, i32, i64);
from_unsigned!(u8, u16, u32, u64);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bin(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

enum Token<'a> {
    Value(&'a Value),
    Text(&'static str),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens = vec![Token::Value(self)];
        while let Some(token) = tokens.pop() {
            let value = match token {
                Token::Text(text) => {
                    f.write_str(text)?;
                    continue;
                }
                Token::Value(value) => value,
            };
            match value {
                Value::Nil => write!(f, "nil")?,
                Value::Bool(b) => write!(f, "{b}")?,
                Value::Int(v) => write!(f, "{v}")?,
                Value::UInt(v) => write!(f, "{v}")?,
                Value::F32(v) => write!(f, "{v:?}")?,
                Value::F64(v) => write!(f, "{v:?}")?,
                Value::Bin(b) => write!(f, "b'{}'", hex::encode(b))?,
                Value::Str(s) => write!(f, "{s:?}")?,
                Value::Ext { kind, data } => write!(f, "ext({kind}, b'{}')", hex::encode(data))?,
                Value::Array(items) => {
                    f.write_str("[")?;
                    tokens.push(Token::Text("]"));
                    for (i, item) in items.iter().enumerate().rev() {
                        tokens.push(Token::Value(item));
                        if i > 0 {
                            tokens.push(Token::Text(", "));
                        }
                    }
                }
                Value::Map(entries) => {
                    f.write_str("{")?;
                    tokens.push(Token::Text("}"));
                    for (i, (k, v)) in entries.iter().enumerate().rev() {
                        tokens.push(Token::Value(v));
                        tokens.push(Token::Text(": "));
                        tokens.push(Token::Value(k));
                        if i > 0 {
                            tokens.push(Token::Text(", "));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Same as `Display`.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_normalisation() {
        assert_eq!(Value::from(5u64), Value::Int(5));
        assert_eq!(Value::from(u64::MAX), Value::UInt(u64::MAX));
        assert_eq!(Value::from(-3i8), Value::Int(-3));
        assert_eq!(Value::from(i64::MAX as u64), Value::Int(i64::MAX));
    }

    #[test]
    fn map_equality_ignores_order() {
        let a = Value::Map(vec![(Value::from("a"), Value::from(1)), (Value::from("b"), Value::from(2))]);
        let b = Value::Map(vec![(Value::from("b"), Value::from(2)), (Value::from("a"), Value::from(1))]);
        let c = Value::Map(vec![(Value::from("a"), Value::from(1)), (Value::from("b"), Value::from(3))]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(Value::F64(f64::NAN), Value::F64(f64::NAN));
        assert_ne!(Value::F64(0.0), Value::F64(-0.0));
        assert_ne!(Value::F32(1.0), Value::F64(1.0));
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::Int(2).as_f64(), Some(2.0));
        assert_eq!(Value::UInt(u64::MAX).as_u64(), Some(u64::MAX));
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::Nil.as_str(), None);

        let map = Value::Map(vec![(Value::from("k"), Value::from(true))]);
        assert_eq!(map.get("k"), Some(&Value::Bool(true)));
        assert_eq!(map.get("missing"), None);
    }

    fn nested(depth: usize) -> Value {
        let mut v = Value::Nil;
        for i in 0..depth {
            v = if i % 2 == 0 {
                Value::Array(vec![Value::Int(i as i64), v])
            } else {
                Value::Map(vec![(Value::from("k"), v)])
            };
        }
        v
    }

    #[test]
    fn deep_values_do_not_recurse() {
        let depth = 1_000_000;
        let v = nested(depth);
        let copy = v.clone();
        assert_eq!(v, copy);
        assert_ne!(v, nested(depth - 1));
        let text = v.to_string();
        assert!(text.starts_with("{\"k\": [999998, {"));
        assert!(text.contains("{\"k\": [0, nil]}"));
        drop(v);
        drop(copy);
    }

    #[test]
    fn into_array() {
        assert_eq!(
            Value::Array(vec![Value::Nil]).into_array(),
            Some(vec![Value::Nil])
        );
        assert_eq!(Value::from("x").into_array(), None);
    }

    #[test]
    fn duplicate_map_keys_pair_in_order() {
        let a = Value::Map(vec![(Value::from("a"), Value::Int(1)), (Value::from("a"), Value::Int(2))]);
        let b = Value::Map(vec![(Value::from("a"), Value::Int(1)), (Value::from("a"), Value::Int(2))]);
        let c = Value::Map(vec![(Value::from("a"), Value::Int(1)), (Value::from("a"), Value::Int(1))]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(c, a);
    }

    #[test]
    fn display() {
        let v = Value::Array(vec![
            Value::from("hello"),
            Value::Int(2),
            Value::Nil,
            Value::Bin(vec![0xde, 0xad]),
            Value::Map(vec![(Value::from("k"), Value::F64(1.5))]),
        ]);
        assert_eq!(v.to_string(), r#"["hello", 2, nil, b'dead', {"k": 1.5}]"#);
    }
}
