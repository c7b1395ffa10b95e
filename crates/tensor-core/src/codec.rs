// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Little-endian element encoding.
//!
//! Shape tensors carry the dimensions of a paired data tensor as `u32`
//! values in reverse order: for a data shape `[d0, d1, .., dn]` the payload
//! is `[dn, .., d1, d0]`.

use crate::{DType, Shape, TensorError};

/// Decodes a byte payload as `u32` elements.
pub fn read_u32s(bytes: &[u8]) -> Result<Vec<u32>, TensorError> {
    if bytes.len() % 4 != 0 {
        return Err(TensorError::MisalignedPayload {
            len: bytes.len(),
            dtype: DType::U32,
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Encodes `values` into the front of `bytes`.
pub fn write_u32s(bytes: &mut [u8], values: &[u32]) -> Result<(), TensorError> {
    let needed = values.len() * 4;
    if bytes.len() < needed {
        return Err(TensorError::BufferSizeMismatch {
            expected: needed,
            actual: bytes.len(),
        });
    }
    for (chunk, v) in bytes.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&v.to_le_bytes());
    }
    Ok(())
}

/// Decodes a byte payload as `f32` elements.
pub fn read_f32s(bytes: &[u8]) -> Result<Vec<f32>, TensorError> {
    if bytes.len() % 4 != 0 {
        return Err(TensorError::MisalignedPayload {
            len: bytes.len(),
            dtype: DType::F32,
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Encodes `values` into the front of `bytes`.
pub fn write_f32s(bytes: &mut [u8], values: &[f32]) -> Result<(), TensorError> {
    let needed = values.len() * 4;
    if bytes.len() < needed {
        return Err(TensorError::BufferSizeMismatch {
            expected: needed,
            actual: bytes.len(),
        });
    }
    for (chunk, v) in bytes.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&v.to_le_bytes());
    }
    Ok(())
}

/// Encodes a shape as a reversed `u32` dimension list.
pub fn shape_to_reversed_u32(shape: &Shape) -> Result<Vec<u32>, TensorError> {
    shape
        .dims()
        .iter()
        .rev()
        .map(|&d| {
            u32::try_from(d).map_err(|_| TensorError::DimensionOverflow {
                value: d,
                target: "u32",
            })
        })
        .collect()
}

/// Decodes a reversed `u32` dimension list into a shape.
pub fn shape_from_reversed_u32(values: &[u32]) -> Shape {
    Shape::new(values.iter().rev().map(|&v| v as usize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_layout_is_little_endian() {
        let mut buf = [0u8; 8];
        write_u32s(&mut buf, &[1, 0x0102_0304]).unwrap();
        assert_eq!(buf, [1, 0, 0, 0, 4, 3, 2, 1]);
        assert_eq!(read_u32s(&buf).unwrap(), vec![1, 0x0102_0304]);
    }

    #[test]
    fn test_reversed_shape_encoding() {
        let shape = Shape::new(vec![1, 3, 5]);
        let encoded = shape_to_reversed_u32(&shape).unwrap();
        assert_eq!(encoded, vec![5, 3, 1]);
        assert_eq!(shape_from_reversed_u32(&encoded), shape);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let mut buf = [0u8; 4];
        assert!(matches!(
            write_f32s(&mut buf, &[1.0, 2.0]),
            Err(TensorError::BufferSizeMismatch { expected: 8, actual: 4 })
        ));
        assert!(read_f32s(&[0u8; 3]).is_err());
    }

    #[test]
    fn test_dimension_overflow() {
        let shape = Shape::vector(u32::MAX as usize + 1);
        assert!(matches!(
            shape_to_reversed_u32(&shape),
            Err(TensorError::DimensionOverflow { .. })
        ));
    }
}
