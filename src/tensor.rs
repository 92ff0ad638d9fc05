use std::{
    fmt,
    marker::PhantomData,
    ops::{Index, IndexMut},
};

use crate::{
    error::TensorError,
    fixed::Fixed,
    graph::{BackwardRule, Parents},
    shape::Shape,
    storage::Storage,
    tensorizable::Tensorizable,
};

/// A node of the computation graph: fixed-point data, an optional gradient
/// of the same length, and the links recorded by the operation that made it.
pub struct Tensor<Q: Fixed, S: Storage<Q>> {
    data: S,
    shape: Shape,
    // present iff requires_grad
    grad: Option<S>,
    parents: Parents,
    rule: Option<BackwardRule<Q>>,
    _marker: PhantomData<Q>,
}

impl<Q: Fixed, S: Storage<Q>> Tensor<Q, S> {
    /// Creates a leaf whose every element is `fill`.
    ///
    /// # Errors
    /// Returns [`TensorError::RankMismatch`] if the storage bounds the rank and
    /// `shape` exceeds it, or [`TensorError::CapacityExceeded`] if the
    /// elements do not fit.
    pub fn filled(shape: impl Into<Shape>, fill: Q, requires_grad: bool) -> Result<Self, TensorError> {
        let shape = shape.into();
        let data = S::filled(shape.numel(), fill)?;
        Self::from_raw(data, shape, requires_grad)
    }

    /// Creates a leaf from real values, encoding each one.
    ///
    /// Values outside the format's range saturate.
    ///
    /// # Errors
    /// Returns [`TensorError::LengthMismatch`] if `values.len()` differs from
    /// the shape's element count, plus the errors of [`Tensor::filled`].
    pub fn from_values(
        values: &[f32],
        shape: impl Into<Shape>,
        requires_grad: bool,
    ) -> Result<Self, TensorError> {
        let shape = shape.into();
        if values.len() != shape.numel() {
            return Err(TensorError::LengthMismatch {
                expected: shape.numel(),
                actual: values.len(),
            });
        }
        let data = S::from_fn(values.len(), |i| Q::encode(values[i]))?;
        Self::from_raw(data, shape, requires_grad)
    }

    /// Creates a leaf from nested real data such as `[[1.0, 2.0], [3.0, 4.0]]`.
    ///
    /// # Errors
    /// Returns [`TensorError::InconsistentDimensions`] for ragged input, plus
    /// the errors of [`Tensor::from_values`].
    pub fn new(data: impl Tensorizable, requires_grad: bool) -> Result<Self, TensorError> {
        let (values, shape) = data.into_values()?;
        Self::from_values(&values, shape, requires_grad)
    }

    /// Wraps already-encoded storage. `data.len()` must equal `shape.numel()`.
    ///
    /// Every constructor and every operation output passes through here, so
    /// this is where the storage's rank bound is enforced.
    ///
    /// # Errors
    /// Returns [`TensorError::LengthMismatch`] on a length disagreement and
    /// [`TensorError::RankMismatch`] if the storage bounds the rank and
    /// `shape` exceeds it.
    pub fn from_raw(data: S, shape: Shape, requires_grad: bool) -> Result<Self, TensorError> {
        check_rank::<Q, S>(&shape)?;
        if data.len() != shape.numel() {
            return Err(TensorError::LengthMismatch {
                expected: shape.numel(),
                actual: data.len(),
            });
        }
        let grad = if requires_grad {
            Some(S::zeroed(data.len())?)
        } else {
            None
        };
        Ok(Self {
            data,
            shape,
            grad,
            parents: Parents::none(),
            rule: None,
            _marker: PhantomData,
        })
    }

    /// Links this tensor to the operands and rule that produced it.
    pub(crate) fn with_creator(mut self, parents: Parents, rule: Option<BackwardRule<Q>>) -> Self {
        self.parents = parents;
        self.rule = rule;
        self
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Number of elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.ndims()
    }

    /// # Panics
    /// Panics if `i >= self.ndim()`.
    #[inline]
    pub fn dim(&self, i: usize) -> usize {
        self.shape[i]
    }

    #[inline]
    pub fn data(&self) -> &[Q] {
        self.data.as_slice()
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [Q] {
        self.data.as_mut_slice()
    }

    /// Data decoded into reals.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data().iter().map(|q| q.decode()).collect()
    }

    /// Flat read.
    ///
    /// # Errors
    /// Returns [`TensorError::IndexOutOfBounds`] past the end.
    pub fn get(&self, index: usize) -> Result<Q, TensorError> {
        self.data()
            .get(index)
            .copied()
            .ok_or(TensorError::IndexOutOfBounds {
                index,
                len: self.size(),
            })
    }

    /// Flat write.
    ///
    /// # Errors
    /// Returns [`TensorError::IndexOutOfBounds`] past the end.
    pub fn set(&mut self, index: usize, value: Q) -> Result<(), TensorError> {
        let len = self.size();
        let slot = self
            .data_mut()
            .get_mut(index)
            .ok_or(TensorError::IndexOutOfBounds { index, len })?;
        *slot = value;
        Ok(())
    }

    /// Multi-index read, row-major.
    ///
    /// # Errors
    /// See [`Shape::offset`].
    pub fn at(&self, index: &[usize]) -> Result<Q, TensorError> {
        let offset = self.shape.offset(index)?;
        self.get(offset)
    }

    /// Multi-index write, row-major.
    ///
    /// # Errors
    /// See [`Shape::offset`].
    pub fn set_at(&mut self, index: &[usize], value: Q) -> Result<(), TensorError> {
        let offset = self.shape.offset(index)?;
        self.set(offset, value)
    }

    #[inline]
    pub fn requires_grad(&self) -> bool {
        self.grad.is_some()
    }

    /// Turning gradients on allocates a zeroed buffer (an existing one is kept);
    /// turning them off releases it.
    ///
    /// # Errors
    /// Returns [`TensorError::CapacityExceeded`] if the buffer cannot be allocated.
    pub fn set_requires_grad(&mut self, requires_grad: bool) -> Result<(), TensorError> {
        match (requires_grad, self.grad.is_some()) {
            (true, false) => self.grad = Some(S::zeroed(self.size())?),
            (false, true) => self.grad = None,
            _ => {}
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`TensorError::InvalidState`] if the tensor does not require gradients.
    pub fn grad(&self) -> Result<&[Q], TensorError> {
        self.grad
            .as_ref()
            .map(|g| g.as_slice())
            .ok_or(TensorError::InvalidState {
                why: "gradient not available for this tensor",
            })
    }

    /// # Errors
    /// Returns [`TensorError::InvalidState`] if the tensor does not require gradients.
    pub fn grad_mut(&mut self) -> Result<&mut [Q], TensorError> {
        self.grad
            .as_mut()
            .map(|g| g.as_mut_slice())
            .ok_or(TensorError::InvalidState {
                why: "gradient not available for this tensor",
            })
    }

    /// Gradient decoded into reals.
    ///
    /// # Errors
    /// Returns [`TensorError::InvalidState`] if the tensor does not require gradients.
    pub fn grad_to_vec(&self) -> Result<Vec<f32>, TensorError> {
        Ok(self.grad()?.iter().map(|q| q.decode()).collect())
    }

    /// Adds `delta` into the gradient element-wise. Returns `true` if any
    /// element saturated.
    pub(crate) fn accumulate_grad(&mut self, delta: &[Q]) -> Result<bool, TensorError> {
        let grad = self.grad_mut()?;
        debug_assert_eq!(grad.len(), delta.len());
        let mut overflowed = false;
        for (g, &d) in grad.iter_mut().zip(delta) {
            let (sum, o) = g.overflowing_add(d);
            *g = sum;
            overflowed |= o;
        }
        Ok(overflowed)
    }

    /// Fills the gradient with `value`; a no-op without one.
    pub(crate) fn fill_grad(&mut self, value: Q) {
        if let Some(grad) = self.grad.as_mut() {
            grad.as_mut_slice().fill(value);
        }
    }

    /// One gradient-descent step: `data[i] -= rate * grad[i]`, evaluated on
    /// exact decodes and re-encoded. Returns `true` if any element saturated.
    ///
    /// # Errors
    /// Returns [`TensorError::InvalidState`] if the tensor does not require gradients.
    pub fn update(&mut self, rate: f32) -> Result<bool, TensorError> {
        let Some(grad) = self.grad.as_ref() else {
            return Err(TensorError::InvalidState {
                why: "cannot update a tensor without gradients",
            });
        };
        let mut overflowed = false;
        for (x, g) in self.data.as_mut_slice().iter_mut().zip(grad.as_slice()) {
            let (next, o) = Q::overflowing_encode_f64(x.decode_f64() - f64::from(rate) * g.decode_f64());
            *x = next;
            overflowed |= o;
        }
        Ok(overflowed)
    }

    #[inline]
    pub fn parents(&self) -> &Parents {
        &self.parents
    }

    #[inline]
    pub fn rule(&self) -> Option<&BackwardRule<Q>> {
        self.rule.as_ref()
    }

    /// A leaf has neither parents nor a backward rule.
    pub fn is_leaf(&self) -> bool {
        self.rule.is_none() && self.parents.is_empty()
    }

    /// Renders the gradient in the real domain.
    ///
    /// # Errors
    /// Returns [`TensorError::InvalidState`] if the tensor does not require gradients.
    pub fn display_grad(&self) -> Result<GradDisplay<'_, Q>, TensorError> {
        Ok(GradDisplay {
            values: self.grad()?,
            shape: &self.shape,
        })
    }
}

fn check_rank<Q: Fixed, S: Storage<Q>>(shape: &Shape) -> Result<(), TensorError> {
    match S::MAX_RANK {
        Some(max) if shape.ndims() > max => Err(TensorError::RankMismatch {
            op: "construct",
            expected: max,
            actual: shape.ndims(),
        }),
        _ => Ok(()),
    }
}

/// Writes `values` as nested rows of the last dimension, decoded.
fn render<Q: Fixed>(f: &mut fmt::Formatter<'_>, values: &[Q], shape: &Shape) -> fmt::Result {
    let row = shape.last().max(1);
    let nested = shape.ndims() > 1;
    write!(f, "[")?;
    for (r, chunk) in values.chunks(row).enumerate() {
        if r > 0 {
            write!(f, ", ")?;
        }
        if nested {
            write!(f, "[")?;
        }
        for (i, v) in chunk.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.4}", v.decode_f64())?;
        }
        if nested {
            write!(f, "]")?;
        }
    }
    write!(f, "]")
}

/// Textual rendering of a tensor's gradient, see [`Tensor::display_grad`].
pub struct GradDisplay<'a, Q: Fixed> {
    values: &'a [Q],
    shape: &'a Shape,
}

impl<Q: Fixed> fmt::Display for GradDisplay<'_, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(f, self.values, self.shape)
    }
}

impl<Q: Fixed, S: Storage<Q>> fmt::Display for Tensor<Q, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(f, self.data(), &self.shape)
    }
}

impl<Q: Fixed, S: Storage<Q>> fmt::Debug for Tensor<Q, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("data", &self.data)
            .field("grad", &self.grad)
            .field("parents", &self.parents)
            .field("rule", &self.rule)
            .finish()
    }
}

impl<Q: Fixed, S: Storage<Q>> Index<usize> for Tensor<Q, S> {
    type Output = Q;

    fn index(&self, index: usize) -> &Self::Output {
        &self.data()[index]
    }
}

impl<Q: Fixed, S: Storage<Q>> IndexMut<usize> for Tensor<Q, S> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.data_mut()[index]
    }
}

impl<Q: Fixed, S: Storage<Q>, const D: usize> Index<[usize; D]> for Tensor<Q, S> {
    type Output = Q;

    fn index(&self, index: [usize; D]) -> &Self::Output {
        &self.data()[self.shape.linear_index(index)]
    }
}

impl<Q: Fixed, S: Storage<Q>, const D: usize> IndexMut<[usize; D]> for Tensor<Q, S> {
    fn index_mut(&mut self, index: [usize; D]) -> &mut Self::Output {
        let offset = self.shape.linear_index(index);
        &mut self.data_mut()[offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fixed::{Q8, Q16},
        storage::{HeapStorage, InlineStorage},
    };

    type DesktopTensor = Tensor<Q16, HeapStorage<Q16>>;
    type EmbeddedTensor = Tensor<Q8, InlineStorage<Q8, 16>>;

    #[test]
    fn construct_with_fill() {
        let t = DesktopTensor::filled((2, 3), Q16::encode(1.5), false).unwrap();
        assert_eq!(t.size(), 6);
        assert_eq!(t.ndim(), 2);
        assert_eq!(t.dim(1), 3);
        assert!(t.to_vec().iter().all(|&v| v == 1.5));
        assert!(t.is_leaf());
    }

    #[test]
    fn from_nested_arrays() {
        let t = EmbeddedTensor::new([[0.5f32, 1.0], [-2.0, 3.25]], true).unwrap();
        assert_eq!(t.shape(), &Shape::from((2, 2)));
        assert_eq!(t.to_vec(), vec![0.5, 1.0, -2.0, 3.25]);
        assert!(t.requires_grad());
        assert!(EmbeddedTensor::new(vec![vec![1.0f32], vec![]], false).is_err());
    }

    #[test]
    fn from_values_checks_length() {
        let err = DesktopTensor::from_values(&[1.0, 2.0, 3.0], (2, 2), false).unwrap_err();
        assert_eq!(err, TensorError::LengthMismatch { expected: 4, actual: 3 });
    }

    #[test]
    fn multi_index_access() {
        let mut t = DesktopTensor::from_values(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), false).unwrap();
        assert_eq!(t.at(&[1, 0]).unwrap().decode(), 4.0);
        assert_eq!(t[[0, 2]].decode(), 3.0);
        t[[1, 2]] = Q16::encode(-1.0);
        assert_eq!(t[5].decode(), -1.0);
        t.set_at(&[0, 0], Q16::ONE).unwrap();
        assert_eq!(t.get(0).unwrap(), Q16::ONE);
        assert!(t.get(6).is_err());
        assert!(t.at(&[2, 0]).is_err());
    }

    #[test]
    fn grad_requires_flag() {
        let mut t = DesktopTensor::filled(3, Q16::ZERO, false).unwrap();
        assert!(matches!(t.grad(), Err(TensorError::InvalidState { .. })));
        assert!(matches!(t.update(0.1), Err(TensorError::InvalidState { .. })));
        assert!(t.display_grad().is_err());

        t.set_requires_grad(true).unwrap();
        assert_eq!(t.grad().unwrap().len(), t.size());
        assert!(t.grad().unwrap().iter().all(|&g| g == Q16::ZERO));

        t.set_requires_grad(false).unwrap();
        assert!(t.grad().is_err());
    }

    #[test]
    fn set_requires_grad_retains_existing_buffer() {
        let mut t = DesktopTensor::filled(2, Q16::ZERO, true).unwrap();
        t.grad_mut().unwrap()[0] = Q16::ONE;
        t.set_requires_grad(true).unwrap();
        assert_eq!(t.grad().unwrap()[0], Q16::ONE);
    }

    #[test]
    fn update_descends_gradient() {
        let mut t = DesktopTensor::from_values(&[1.0, -2.0], 2, true).unwrap();
        t.grad_mut().unwrap().copy_from_slice(&[Q16::encode(2.0), Q16::encode(-4.0)]);
        assert!(!t.update(0.5).unwrap());
        assert_eq!(t.to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn update_keeps_full_precision_at_large_magnitudes() {
        let mut t = DesktopTensor::filled(1, Q16::encode(1000.0), true).unwrap();
        let before = t[0].to_raw();
        t.grad_mut().unwrap()[0] = Q16::from_raw(66);
        t.update(0.1).unwrap();
        // 0.1 * 66 = 6.6 units, rounded to 7
        assert_eq!(before - t[0].to_raw(), 7);
    }

    #[test]
    fn inline_storage_limits() {
        let err = EmbeddedTensor::filled(17, Q8::ZERO, false).unwrap_err();
        assert!(matches!(err, TensorError::CapacityExceeded { requested: 17, capacity: 16 }));
        let err = EmbeddedTensor::filled([1, 1, 1, 1, 1], Q8::ZERO, false).unwrap_err();
        assert!(matches!(err, TensorError::RankMismatch { expected: 4, actual: 5, .. }));
        assert!(EmbeddedTensor::filled([1, 2, 2, 2], Q8::ZERO, true).is_ok());
    }

    #[test]
    fn renders_decoded_values() {
        let mut t = DesktopTensor::from_values(&[0.5, -1.0, 2.0, 0.0], (2, 2), true).unwrap();
        assert_eq!(t.to_string(), "[[0.5000, -1.0000], [2.0000, 0.0000]]");
        t.grad_mut().unwrap()[3] = Q16::encode(0.25);
        assert_eq!(
            t.display_grad().unwrap().to_string(),
            "[[0.0000, 0.0000], [0.0000, 0.2500]]"
        );
        let v = DesktopTensor::from_values(&[1.0, 2.0], 2, false).unwrap();
        assert_eq!(v.to_string(), "[1.0000, 2.0000]");
    }
}
