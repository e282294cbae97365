//! MessagePack, the wire format between the host and the script engine.
//!
//! Call arguments travel as one top-level array holding the positional
//! arguments in call order. A result is a single top-level value of any
//! kind. The format must match the guest's serializer bit for bit, so the
//! encoder is deterministic and always picks the shortest representation.
//! Markers and length prefixes come from `rmp`; the value tree, its
//! non-recursive traversal and the error types live here.
//!
//! # Example
//!
//! ```
//! use udf_gateway::msgpack::{self, Value};
//!
//! let bytes = msgpack::encode_args(&[Value::from("hello")]).unwrap();
//! assert_eq!(bytes, b"\x91\xa5hello");
//!
//! let args = msgpack::decode(&bytes).unwrap();
//! assert_eq!(args, Value::Array(vec![Value::from("hello")]));
//! ```

pub mod json;
pub mod reader;
mod tree;
pub mod value;
pub mod writer;

pub use json::JsonError;
pub use reader::{decode, validate, DecodeError, Reader};
pub use value::Value;
pub use writer::{encode, encode_args, write_value, EncodeError};
