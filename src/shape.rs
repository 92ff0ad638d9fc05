use std::{fmt::Display, ops::Index};

use crate::error::TensorError;

/// Ordered dimension sizes of a tensor, row-major.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<usize>);

impl From<(usize, usize, usize, usize)> for Shape {
    fn from(value: (usize, usize, usize, usize)) -> Self {
        Shape(vec![value.0, value.1, value.2, value.3])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from(value: (usize, usize, usize)) -> Self {
        Shape(vec![value.0, value.1, value.2])
    }
}

impl From<(usize, usize)> for Shape {
    fn from(value: (usize, usize)) -> Self {
        Shape(vec![value.0, value.1])
    }
}

impl From<usize> for Shape {
    fn from(value: usize) -> Self {
        Shape(vec![value])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(value: Vec<usize>) -> Self {
        Shape(value)
    }
}

impl From<&[usize]> for Shape {
    fn from(value: &[usize]) -> Self {
        Shape(value.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(value: [usize; N]) -> Self {
        Shape(value.to_vec())
    }
}

impl Shape {
    /// Number of dimensions.
    #[inline]
    pub fn ndims(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Product of all dimensions.
    #[inline]
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    /// Size of the last dimension, or `1` for a rank-0 shape.
    #[inline]
    pub fn last(&self) -> usize {
        self.0.last().copied().unwrap_or(1)
    }

    /// Maps a multi-index to a flat row-major offset (last dimension fastest).
    ///
    /// # Errors
    /// Returns [`TensorError::RankMismatch`] if `index` has the wrong length,
    /// or [`TensorError::IndexOutOfBounds`] if any component exceeds its dimension.
    pub fn offset(&self, index: &[usize]) -> Result<usize, TensorError> {
        if index.len() != self.ndims() {
            return Err(TensorError::RankMismatch {
                op: "offset",
                expected: self.ndims(),
                actual: index.len(),
            });
        }
        let mut flat = 0;
        for (&i, &dim) in index.iter().zip(&self.0) {
            if i >= dim {
                return Err(TensorError::IndexOutOfBounds { index: i, len: dim });
            }
            flat = flat * dim + i;
        }
        Ok(flat)
    }

    /// Panicking counterpart of [`Shape::offset`] used by indexing operators.
    pub fn linear_index<const D: usize>(&self, index: [usize; D]) -> usize {
        self.offset(&index)
            .unwrap_or_else(|e| panic!("invalid index {index:?} for {self}: {e}"))
    }

    /// Shape with the first two dimensions swapped.
    pub(crate) fn transposed(&self) -> Shape {
        let mut dims = self.0.clone();
        dims.swap(0, 1);
        Shape(dims)
    }
}

impl Index<usize> for Shape {
    type Output = usize;

    fn index(&self, index: usize) -> &Self::Output {
        assert!(index < self.ndims());
        &self.0[index]
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Shape(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_offsets() {
        let shape = Shape::from((2, 3, 4));
        assert_eq!(shape.offset(&[0, 0, 0]).unwrap(), 0);
        assert_eq!(shape.offset(&[0, 0, 3]).unwrap(), 3);
        assert_eq!(shape.offset(&[0, 1, 0]).unwrap(), 4);
        assert_eq!(shape.offset(&[1, 2, 3]).unwrap(), 23);
        assert_eq!(shape.linear_index([1, 0, 1]), 13);
    }

    #[test]
    fn offset_rejects_bad_indices() {
        let shape = Shape::from((2, 2));
        assert!(matches!(
            shape.offset(&[2, 0]),
            Err(TensorError::IndexOutOfBounds { index: 2, len: 2 })
        ));
        assert!(matches!(
            shape.offset(&[0]),
            Err(TensorError::RankMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn numel_and_display() {
        let shape = Shape::from([2, 5]);
        assert_eq!(shape.numel(), 10);
        assert_eq!(shape.to_string(), "Shape(2, 5)");
        assert_eq!(shape.transposed(), Shape::from((5, 2)));
        assert_eq!(Shape::from(vec![3]).last(), 3);
    }
}
