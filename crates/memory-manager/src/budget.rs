// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-context memory budgets.
//!
//! Each [`DeviceContext`](crate::DeviceContext) enforces one
//! [`MemoryBudget`]. Configuration files spell budgets as `"256M"`,
//! `"1GB"`, `"4096"` or `"unlimited"`.

use crate::MemoryError;
use std::fmt;

const KIB: usize = 1 << 10;
const MIB: usize = 1 << 20;
const GIB: usize = 1 << 30;

/// Longest suffixes first so `"MB"` is not read as `"B"`.
const SUFFIXES: [(&str, usize); 7] = [
    ("GB", GIB),
    ("MB", MIB),
    ("KB", KIB),
    ("G", GIB),
    ("M", MIB),
    ("K", KIB),
    ("B", 1),
];

/// Upper bound on the bytes a device context may hand out at once.
///
/// ```
/// use memory_manager::MemoryBudget;
///
/// assert_eq!(MemoryBudget::parse("1G").unwrap(), MemoryBudget::from_mb(1024));
/// assert!(MemoryBudget::parse("unlimited").unwrap().is_unlimited());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    pub fn from_mb(mb: usize) -> Self {
        Self::from_bytes(mb.saturating_mul(MIB))
    }

    pub fn from_gb(gb: usize) -> Self {
        Self::from_bytes(gb.saturating_mul(GIB))
    }

    /// Never rejects an allocation.
    pub fn unlimited() -> Self {
        Self::from_bytes(usize::MAX)
    }

    pub fn is_unlimited(&self) -> bool {
        self.bytes == usize::MAX
    }

    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Whole mebibytes, rounded down.
    pub fn as_mb(&self) -> usize {
        self.bytes / MIB
    }

    /// Parses a budget string. Suffixes are case-insensitive powers of
    /// 1024; a bare number is a byte count. Zero is rejected.
    pub fn parse(s: &str) -> Result<Self, MemoryError> {
        let text = s.trim();
        if text.eq_ignore_ascii_case("unlimited") {
            return Ok(Self::unlimited());
        }
        let invalid = |why: &str| MemoryError::InvalidBudget(format!("'{text}': {why}"));
        if text.is_empty() {
            return Err(MemoryError::InvalidBudget("empty budget string".into()));
        }

        let upper = text.to_ascii_uppercase();
        let (digits, unit) = SUFFIXES
            .iter()
            .find(|(suffix, _)| upper.ends_with(suffix))
            .map(|&(suffix, unit)| (&text[..text.len() - suffix.len()], unit))
            .unwrap_or((text, 1));

        let count: usize = digits
            .trim()
            .parse()
            .map_err(|_| invalid("expected a number followed by an optional K, M or G suffix"))?;
        match count.checked_mul(unit) {
            Some(0) => Err(invalid("budget is zero")),
            Some(bytes) => Ok(Self { bytes }),
            None => Err(invalid("overflows")),
        }
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unlimited() {
            return f.write_str("unlimited");
        }
        let unit = [(GIB, "GB"), (MIB, "MB"), (KIB, "KB")]
            .into_iter()
            .find(|&(size, _)| self.bytes >= size && self.bytes % size == 0);
        match unit {
            Some((size, name)) => write!(f, "{} {name}", self.bytes / size),
            None => write!(f, "{} B", self.bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixes_are_binary_and_case_insensitive() {
        let cases = [
            ("256M", 256 * MIB),
            ("256mb", 256 * MIB),
            ("2g", 2 * GIB),
            ("64K", 64 * KIB),
            ("512B", 512),
            (" 4096 ", 4096),
        ];
        for (text, bytes) in cases {
            assert_eq!(MemoryBudget::parse(text).unwrap().as_bytes(), bytes, "{text}");
        }
    }

    #[test]
    fn test_unlimited() {
        let b = MemoryBudget::parse("UNLIMITED").unwrap();
        assert!(b.is_unlimited());
        assert_eq!(b.to_string(), "unlimited");
    }

    #[test]
    fn test_rejects_garbage_zero_and_overflow() {
        for bad in ["", "   ", "MB", "1.5G", "0K", "99999999999999999999G"] {
            assert!(
                matches!(MemoryBudget::parse(bad), Err(MemoryError::InvalidBudget(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_display_picks_largest_exact_unit() {
        assert_eq!(MemoryBudget::from_gb(2).to_string(), "2 GB");
        assert_eq!(MemoryBudget::from_mb(1536).to_string(), "1536 MB");
        assert_eq!(MemoryBudget::from_bytes(3 * KIB).to_string(), "3 KB");
        assert_eq!(MemoryBudget::from_bytes(100).to_string(), "100 B");
    }

    #[test]
    fn test_display_parses_back() {
        let b = MemoryBudget::from_mb(48);
        let text = b.to_string().replace(' ', "");
        assert_eq!(MemoryBudget::parse(&text).unwrap(), b);
    }

    #[test]
    fn test_serializes_as_byte_count() {
        let json = serde_json::to_string(&MemoryBudget::from_mb(2)).unwrap();
        assert_eq!(json, r#"{"bytes":2097152}"#);
        let back: MemoryBudget = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_mb(), 2);
    }
}
