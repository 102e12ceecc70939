//! Element types and reductions used by collective operations.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element type of a buffer taking part in a reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    /// One-byte boolean.
    Pred,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 32-bit integer.
    S32,
    /// Signed 64-bit integer.
    S64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
}

impl PrimitiveType {
    /// Size of one element in bytes.
    #[must_use]
    pub const fn byte_width(self) -> usize {
        match self {
            Self::Pred | Self::U8 => 1,
            Self::S32 | Self::F32 => 4,
            Self::S64 | Self::F64 => 8,
        }
    }
}

/// Element-wise reduction applied by all-reduce and reduce-scatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReductionKind {
    /// Addition (logical or for `Pred`).
    Sum,
    /// Multiplication (logical and for `Pred`).
    Product,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
}

macro_rules! reduce_numeric {
    ($ty:ty, $kind:expr, $acc:expr, $other:expr) => {{
        const W: usize = std::mem::size_of::<$ty>();
        for (a, b) in $acc.chunks_exact_mut(W).zip($other.chunks_exact(W)) {
            let mut lhs = [0u8; W];
            lhs.copy_from_slice(a);
            let mut rhs = [0u8; W];
            rhs.copy_from_slice(b);
            let x = <$ty>::from_ne_bytes(lhs);
            let y = <$ty>::from_ne_bytes(rhs);
            let r: $ty = match $kind {
                ReductionKind::Sum => x + y,
                ReductionKind::Product => x * y,
                ReductionKind::Min => {
                    if y < x {
                        y
                    } else {
                        x
                    }
                }
                ReductionKind::Max => {
                    if y > x {
                        y
                    } else {
                        x
                    }
                }
            };
            a.copy_from_slice(&r.to_ne_bytes());
        }
    }};
}

macro_rules! reduce_wrapping_int {
    ($ty:ty, $kind:expr, $acc:expr, $other:expr) => {{
        const W: usize = std::mem::size_of::<$ty>();
        for (a, b) in $acc.chunks_exact_mut(W).zip($other.chunks_exact(W)) {
            let mut lhs = [0u8; W];
            lhs.copy_from_slice(a);
            let mut rhs = [0u8; W];
            rhs.copy_from_slice(b);
            let x = <$ty>::from_ne_bytes(lhs);
            let y = <$ty>::from_ne_bytes(rhs);
            let r: $ty = match $kind {
                ReductionKind::Sum => x.wrapping_add(y),
                ReductionKind::Product => x.wrapping_mul(y),
                ReductionKind::Min => x.min(y),
                ReductionKind::Max => x.max(y),
            };
            a.copy_from_slice(&r.to_ne_bytes());
        }
    }};
}

/// Folds `other` into `acc` element-wise.
///
/// Integer sums and products wrap on overflow.
pub fn reduce_into(
    dtype: PrimitiveType,
    kind: ReductionKind,
    acc: &mut [u8],
    other: &[u8],
) -> Result<()> {
    if acc.len() != other.len() {
        return Err(Error::invalid_argument(format!(
            "reduction operands differ in size: {} vs {} bytes",
            acc.len(),
            other.len()
        )));
    }
    if acc.len() % dtype.byte_width() != 0 {
        return Err(Error::invalid_argument(format!(
            "{} bytes is not a whole number of {dtype:?} elements",
            acc.len()
        )));
    }
    match dtype {
        PrimitiveType::Pred => {
            for (a, b) in acc.iter_mut().zip(other) {
                let (x, y) = (*a != 0, *b != 0);
                let r = match kind {
                    ReductionKind::Sum | ReductionKind::Max => x || y,
                    ReductionKind::Product | ReductionKind::Min => x && y,
                };
                *a = u8::from(r);
            }
        }
        PrimitiveType::U8 => {
            for (a, b) in acc.iter_mut().zip(other) {
                *a = match kind {
                    ReductionKind::Sum => a.wrapping_add(*b),
                    ReductionKind::Product => a.wrapping_mul(*b),
                    ReductionKind::Min => (*a).min(*b),
                    ReductionKind::Max => (*a).max(*b),
                };
            }
        }
        PrimitiveType::S32 => reduce_wrapping_int!(i32, kind, acc, other),
        PrimitiveType::S64 => reduce_wrapping_int!(i64, kind, acc, other),
        PrimitiveType::F32 => reduce_numeric!(f32, kind, acc, other),
        PrimitiveType::F64 => reduce_numeric!(f64, kind, acc, other),
    }
    Ok(())
}
