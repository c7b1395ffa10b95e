// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element precisions supported by compiled graphs.

use std::fmt;

/// Enumerates the element types a graph argument can carry.
///
/// Request-side validation compares a caller tensor's `DType` against the
/// descriptor's precision exactly; there is no implicit conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// Boolean stored as one byte.
    Boolean,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    /// 16-bit IEEE 754 floating point.
    F16,
    /// 16-bit brain floating point.
    BF16,
    /// 32-bit IEEE 754 floating point.
    F32,
    /// 64-bit IEEE 754 floating point.
    F64,
}

impl DType {
    /// Every supported precision, in declaration order.
    pub const ALL: [DType; 13] = [
        DType::Boolean,
        DType::U8,
        DType::I8,
        DType::U16,
        DType::I16,
        DType::U32,
        DType::I32,
        DType::U64,
        DType::I64,
        DType::F16,
        DType::BF16,
        DType::F32,
        DType::F64,
    ];

    /// Returns the size of a single element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::Boolean | DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 | DType::F16 | DType::BF16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 => 8,
        }
    }

    /// Returns a human-readable label for this data type.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::Boolean => "boolean",
            DType::U8 => "u8",
            DType::I8 => "i8",
            DType::U16 => "u16",
            DType::I16 => "i16",
            DType::U32 => "u32",
            DType::I32 => "i32",
            DType::U64 => "u64",
            DType::I64 => "i64",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    /// Parses a precision label (case-insensitive).
    ///
    /// Accepts the labels produced by [`DType::as_str`] plus the common
    /// aliases `bool`, `float32`, `float16`, `int32` and friends.
    pub fn parse(s: &str) -> Option<DType> {
        let dtype = match s.trim().to_ascii_lowercase().as_str() {
            "boolean" | "bool" => DType::Boolean,
            "u8" | "uint8" => DType::U8,
            "i8" | "int8" => DType::I8,
            "u16" | "uint16" => DType::U16,
            "i16" | "int16" => DType::I16,
            "u32" | "uint32" => DType::U32,
            "i32" | "int32" => DType::I32,
            "u64" | "uint64" => DType::U64,
            "i64" | "int64" => DType::I64,
            "f16" | "float16" => DType::F16,
            "bf16" | "bfloat16" => DType::BF16,
            "f32" | "float32" => DType::F32,
            "f64" | "float64" => DType::F64,
            _ => return None,
        };
        Some(dtype)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(DType::Boolean.size_bytes(), 1);
        assert_eq!(DType::BF16.size_bytes(), 2);
        assert_eq!(DType::U32.size_bytes(), 4);
        assert_eq!(DType::I64.size_bytes(), 8);
    }

    #[test]
    fn test_parse_labels_and_aliases() {
        for dtype in DType::ALL {
            assert_eq!(DType::parse(dtype.as_str()), Some(dtype));
        }
        assert_eq!(DType::parse("FLOAT32"), Some(DType::F32));
        assert_eq!(DType::parse(" bool "), Some(DType::Boolean));
        assert_eq!(DType::parse("u4"), None);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&DType::BF16).unwrap();
        assert_eq!(json, "\"bf16\"");
        let back: DType = serde_json::from_str("\"u32\"").unwrap();
        assert_eq!(back, DType::U32);
    }
}
