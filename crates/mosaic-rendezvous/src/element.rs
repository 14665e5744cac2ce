//! Element types the transport can carry
//!
//! The collective algorithms are generic over [`Element`]. Supporting a new
//! element type means adding an impl here, nothing in the algorithms changes.

use mosaic_types::{DataType, MosaicError, ReduceOp, Result};

/// A fixed-size scalar with a little-endian wire form and reduction rules
pub trait Element: Copy + Send + Sync + PartialOrd + std::fmt::Debug + 'static {
    const DTYPE: DataType;
    /// Encoded size in bytes
    const SIZE: usize;

    fn write_le(self, out: &mut Vec<u8>);

    /// Decode from exactly `SIZE` bytes
    fn read_le(bytes: &[u8]) -> Self;

    fn add(self, other: Self) -> Self;

    fn mul(self, other: Self) -> Self;

    fn to_f64(self) -> f64;

    /// Convert back from f64, rounding half away from zero for integers
    fn from_f64(value: f64) -> Self;

    /// Combine two values under a reduction operator.
    ///
    /// `Avg` combines like `Sum`; the caller divides once at the end.
    fn combine(self, other: Self, op: ReduceOp) -> Self {
        match op {
            ReduceOp::Sum | ReduceOp::Avg => self.add(other),
            ReduceOp::Product => self.mul(other),
            ReduceOp::Min => {
                if other < self {
                    other
                } else {
                    self
                }
            }
            ReduceOp::Max => {
                if other > self {
                    other
                } else {
                    self
                }
            }
        }
    }
}

macro_rules! impl_int_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DataType = $dtype;
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }

            fn add(self, other: Self) -> Self {
                self.wrapping_add(other)
            }

            fn mul(self, other: Self) -> Self {
                self.wrapping_mul(other)
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(value: f64) -> Self {
                value.round() as $ty
            }
        }
    };
}

macro_rules! impl_float_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DataType = $dtype;
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }

            fn add(self, other: Self) -> Self {
                self + other
            }

            fn mul(self, other: Self) -> Self {
                self * other
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(value: f64) -> Self {
                value as $ty
            }
        }
    };
}

impl_int_element!(i32, DataType::I32);
impl_int_element!(i64, DataType::I64);
impl_float_element!(f32, DataType::F32);
impl_float_element!(f64, DataType::F64);

/// Encode a slice as concatenated little-endian elements
pub fn encode<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::SIZE);
    for value in values {
        value.write_le(&mut out);
    }
    out
}

/// Decode concatenated little-endian elements
pub fn decode<T: Element>(bytes: &[u8]) -> Result<Vec<T>> {
    if bytes.len() % T::SIZE != 0 {
        return Err(MosaicError::serialization(format!(
            "payload of {} bytes is not a whole number of {} elements",
            bytes.len(),
            T::DTYPE
        )));
    }
    Ok(bytes.chunks_exact(T::SIZE).map(T::read_le).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_little_endian() {
        assert_eq!(encode(&[1i32, 256]), vec![1, 0, 0, 0, 0, 1, 0, 0]);
        assert_eq!(decode::<i32>(&[1, 0, 0, 0, 0, 1, 0, 0]).unwrap(), vec![1, 256]);
    }

    #[test]
    fn test_decode_rejects_ragged_payload() {
        assert!(decode::<f64>(&[0u8; 12]).is_err());
    }

    #[test]
    fn test_combine() {
        assert_eq!(3i64.combine(4, ReduceOp::Sum), 7);
        assert_eq!(3i64.combine(4, ReduceOp::Product), 12);
        assert_eq!(3.5f32.combine(-1.0, ReduceOp::Min), -1.0);
        assert_eq!(3.5f64.combine(-1.0, ReduceOp::Max), 3.5);
    }

    #[test]
    fn test_integer_rounding_half_away_from_zero() {
        assert_eq!(i32::from_f64(1.5), 2);
        assert_eq!(i32::from_f64(-1.5), -2);
        assert_eq!(i64::from_f64(2.49), 2);
        assert_eq!(f32::from_f64(0.25), 0.25);
    }
}
