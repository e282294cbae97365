//! Guest ABI: export names and the layout of values in linear memory.
//!
//! The UDF module follows the wit-bindgen canonical ABI for its two
//! entry points:
//!
//! ```text
//! exec(code_ptr, code_len) -> status               ;; 0 = ok
//! call(name_ptr, name_len, args_ptr, args_len) -> ret_ptr
//! ```
//!
//! `call` returns a pointer to a return area holding the result list as a
//! little-endian `(data_ptr: u32, data_len: u32)` pair. Strings and byte
//! lists passed in are placed in guest memory with the guest's own realloc.

use byteorder::{ByteOrder, LittleEndian};
use serde::Deserialize;

/// Names of the exports the gateway drives.
///
/// Allocator exports are tried in order, since older wit-bindgen releases
/// used the `canonical_abi_*` names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GuestAbi {
    pub memory: String,
    pub initialize: String,
    pub exec: String,
    pub call: String,
    pub realloc: Vec<String>,
    /// Optional `(ptr, size, align)` deallocator for result buffers.
    pub free: Vec<String>,
    /// Optional post-return hook for `call`, given the return area pointer.
    /// Takes precedence over `free` when exported.
    pub post_call: Vec<String>,
    /// Byte offset of the length field inside the return area.
    pub result_len_offset: u32,
}

impl Default for GuestAbi {
    fn default() -> Self {
        GuestAbi {
            memory: "memory".to_string(),
            initialize: "_initialize".to_string(),
            exec: "exec".to_string(),
            call: "call".to_string(),
            realloc: vec!["cabi_realloc".to_string(), "canonical_abi_realloc".to_string()],
            free: vec!["cabi_free".to_string(), "canonical_abi_free".to_string()],
            post_call: vec!["cabi_post_call".to_string()],
            result_len_offset: 4,
        }
    }
}

impl GuestAbi {
    /// Size of the return area in bytes.
    pub fn return_area_size(&self) -> usize {
        self.result_len_offset as usize + 4
    }
}

/// A `(ptr, len)` region of guest linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestSlice {
    pub ptr: u32,
    pub len: u32,
}

impl GuestSlice {
    pub const EMPTY: GuestSlice = GuestSlice { ptr: 0, len: 0 };

    pub fn new(ptr: u32, len: u32) -> Self {
        Self { ptr, len }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Decodes a return area laid out per `abi`. `area` must be at least
    /// [`GuestAbi::return_area_size`] bytes.
    pub fn from_return_area(area: &[u8], abi: &GuestAbi) -> Option<Self> {
        let len_at = abi.result_len_offset as usize;
        if area.len() < abi.return_area_size() || len_at < 4 {
            return None;
        }
        Some(Self {
            ptr: LittleEndian::read_u32(&area[0..4]),
            len: LittleEndian::read_u32(&area[len_at..len_at + 4]),
        })
    }

    /// Byte range inside a memory image, if it lies entirely within it.
    pub fn range_in(&self, memory_size: usize) -> Option<std::ops::Range<usize>> {
        let start = self.ptr as usize;
        let end = start.checked_add(self.len as usize)?;
        (end <= memory_size).then_some(start..end)
    }

    /// Wasm `i32` parameters for this slice.
    pub fn as_params(&self) -> (i32, i32) {
        (self.ptr as i32, self.len as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_abi_matches_canonical_layout() {
        let abi = GuestAbi::default();
        assert_eq!(abi.return_area_size(), 8);
        assert_eq!(abi.realloc[0], "cabi_realloc");
    }

    #[test]
    fn return_area_decoding() {
        let abi = GuestAbi::default();
        let area = [0x10, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00];
        assert_eq!(GuestSlice::from_return_area(&area, &abi), Some(GuestSlice::new(16, 5)));
        assert_eq!(GuestSlice::from_return_area(&area[..6], &abi), None);

        let wide = GuestAbi {
            result_len_offset: 8,
            ..GuestAbi::default()
        };
        let area = [0x20, 0, 0, 0, 0xff, 0xff, 0xff, 0xff, 0x03, 0, 0, 0];
        assert_eq!(GuestSlice::from_return_area(&area, &wide), Some(GuestSlice::new(32, 3)));
    }

    #[test]
    fn abi_deserializes_with_defaults() {
        let abi: GuestAbi = serde_json::from_str(r#"{"exec": "udf_exec"}"#).unwrap();
        assert_eq!(abi.exec, "udf_exec");
        assert_eq!(abi.call, "call");
        assert_eq!(abi.result_len_offset, 4);
    }

    #[test]
    fn range_checks() {
        assert_eq!(GuestSlice::new(10, 5).range_in(15), Some(10..15));
        assert_eq!(GuestSlice::new(10, 6).range_in(15), None);
        assert_eq!(GuestSlice::new(u32::MAX, 2).range_in(u32::MAX as usize), None);
    }
}
