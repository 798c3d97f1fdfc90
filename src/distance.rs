//! Distance kernels over decoded `f32` vectors.
//!
//! Euclidean returns squared L2 (order-preserving, no `sqrt`), matching the
//! rest of the engine which only ever compares distances rather than reports
//! true metric distances for that space. Inner product and cosine are both
//! `1 - dot`; cosine's vectors are L2-normalized at encode/query time so the
//! two kernels share the same formula afterward.
use pulp::{Arch, Simd, WithSimd};

/// One of the three supported distance spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Space {
    Euclidean,
    InnerProduct,
    Cosine,
}

impl Space {
    pub fn tag(self) -> u8 {
        match self {
            Space::Euclidean => 0,
            Space::InnerProduct => 1,
            Space::Cosine => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Space::Euclidean),
            1 => Some(Space::InnerProduct),
            2 => Some(Space::Cosine),
            _ => None,
        }
    }

    /// Whether vectors in this space must be L2-normalized before storage
    /// and before querying.
    pub fn normalizes(self) -> bool {
        matches!(self, Space::Cosine)
    }

    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Space::Euclidean => squared_euclidean_distance(a, b),
            Space::InnerProduct | Space::Cosine => 1.0 - dot_product(a, b),
        }
    }
}

struct DotProduct<'a> {
    first: &'a [f32],
    second: &'a [f32],
}

impl WithSimd for DotProduct<'_> {
    type Output = f32;

    #[inline(always)]
    fn with_simd<S: Simd>(self, simd: S) -> Self::Output {
        let (first_head, first_tail) = S::as_simd_f32s(self.first);
        let (second_head, second_tail) = S::as_simd_f32s(self.second);

        let mut sum = simd.splat_f32s(0.0);
        for (&x, &y) in first_head.iter().zip(second_head) {
            sum = simd.mul_add_f32s(x, y, sum);
        }
        let mut total = simd.reduce_sum_f32s(sum);
        total += first_tail
            .iter()
            .zip(second_tail)
            .map(|(&x, &y)| x * y)
            .sum::<f32>();
        total
    }
}

/// Dot product of two equal-length vectors.
#[tracing::instrument(skip_all)]
pub fn dot_product(first: &[f32], second: &[f32]) -> f32 {
    debug_assert_eq!(first.len(), second.len(), "vectors must have the same length");
    Arch::new().dispatch(DotProduct { first, second })
}

struct SquaredEuclidean<'a> {
    first: &'a [f32],
    second: &'a [f32],
}

impl WithSimd for SquaredEuclidean<'_> {
    type Output = f32;

    #[inline(always)]
    fn with_simd<S: Simd>(self, simd: S) -> Self::Output {
        let (first_head, first_tail) = S::as_simd_f32s(self.first);
        let (second_head, second_tail) = S::as_simd_f32s(self.second);

        let mut sum = simd.splat_f32s(0.0);
        for (&x, &y) in first_head.iter().zip(second_head) {
            let diff = simd.sub_f32s(x, y);
            sum = simd.mul_add_f32s(diff, diff, sum);
        }
        let mut total = simd.reduce_sum_f32s(sum);
        total += first_tail
            .iter()
            .zip(second_tail)
            .map(|(&x, &y)| {
                let diff = x - y;
                diff * diff
            })
            .sum::<f32>();
        total
    }
}

/// Squared Euclidean distance (no `sqrt`): relative ordering of distances is
/// all the graph ever needs, and skipping the square root saves a transcendental
/// call on every edge comparison.
#[tracing::instrument(skip_all)]
pub fn squared_euclidean_distance(first: &[f32], second: &[f32]) -> f32 {
    debug_assert_eq!(first.len(), second.len(), "vectors must have the same length");
    Arch::new().dispatch(SquaredEuclidean { first, second })
}

struct Magnitude<'a> {
    v: &'a [f32],
}

impl WithSimd for Magnitude<'_> {
    type Output = f32;

    #[inline(always)]
    fn with_simd<S: Simd>(self, simd: S) -> Self::Output {
        let (head, tail) = S::as_simd_f32s(self.v);
        let mut sum = simd.splat_f32s(0.0);
        for &x in head {
            sum = simd.mul_add_f32s(x, x, sum);
        }
        let mut total = simd.reduce_sum_f32s(sum);
        total += tail.iter().map(|&x| x * x).sum::<f32>();
        total.sqrt()
    }
}

/// L2-normalize `v` in place. A zero vector is left untouched rather than
/// producing NaNs, since a zero-magnitude embedding has no well-defined
/// direction.
pub fn l2_normalize(v: &mut [f32]) {
    let magnitude = Arch::new().dispatch(Magnitude { v });
    if magnitude > 0.0 {
        for x in v.iter_mut() {
            *x /= magnitude;
        }
    }
}
