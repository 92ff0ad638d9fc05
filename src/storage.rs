//! Element storage strategies for tensor data and gradients.
//!
//! A tensor is generic over its storage so that one tensor abstraction serves
//! both deployment profiles:
//!
//! - [`HeapStorage`]: an aligned heap allocation sized at construction.
//! - [`InlineStorage`]: a fixed-capacity inline array that never touches the
//!   heap and rejects oversized tensors with [`TensorError::CapacityExceeded`].

use std::{fmt, marker::PhantomData};

use bytemuck::Zeroable;

use crate::{
    error::TensorError,
    memory::{AlignmentStrategy, Buffer, BufferBuilder, SimdAlignment},
};

/// A contiguous, fully initialized run of `T`.
pub trait Storage<T: Copy + Zeroable + fmt::Debug>: Sized + fmt::Debug {
    /// Highest tensor rank this storage accepts, if bounded.
    const MAX_RANK: Option<usize>;

    /// Whether the element capacity is fixed at compile time.
    const FIXED_CAPACITY: bool;

    /// Builds storage of `len` elements, computing each with `f(index)`.
    ///
    /// # Errors
    /// Returns [`TensorError::CapacityExceeded`] if `len` does not fit.
    fn from_fn(len: usize, f: impl FnMut(usize) -> T) -> Result<Self, TensorError>;

    /// Builds storage of `len` zero elements.
    ///
    /// # Errors
    /// See [`Storage::from_fn`].
    fn zeroed(len: usize) -> Result<Self, TensorError> {
        Self::from_fn(len, |_| T::zeroed())
    }

    /// # Errors
    /// See [`Storage::from_fn`].
    fn filled(len: usize, value: T) -> Result<Self, TensorError> {
        Self::from_fn(len, |_| value)
    }

    /// # Errors
    /// See [`Storage::from_fn`].
    fn from_slice(values: &[T]) -> Result<Self, TensorError> {
        Self::from_fn(values.len(), |i| values[i])
    }

    fn as_slice(&self) -> &[T];

    fn as_mut_slice(&mut self) -> &mut [T];

    #[inline]
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Heap storage backed by an aligned [`Buffer`].
///
/// Empty storage holds no allocation at all.
pub struct HeapStorage<T: Copy, A: AlignmentStrategy = SimdAlignment> {
    /// See [`crate::memory::Buffer`].
    buffer: Option<Buffer<T>>,
    _align: PhantomData<A>,
}

impl<T: Copy + Zeroable + fmt::Debug, A: AlignmentStrategy> Storage<T> for HeapStorage<T, A> {
    const MAX_RANK: Option<usize> = None;
    const FIXED_CAPACITY: bool = false;

    fn from_fn(len: usize, mut f: impl FnMut(usize) -> T) -> Result<Self, TensorError> {
        if len == 0 {
            return Ok(Self::empty());
        }
        let mut buffer: Buffer<T> = BufferBuilder::new(len).aligned::<A>().build()?;
        for i in 0..len {
            let value = f(i);
            // SAFETY:
            // - `i < len == buffer.numel()`, so the write stays inside the allocation.
            // - `value` is produced before the write so a panic in `f` never
            //   leaves a half-written slot observable; `T: Copy` needs no drop.
            unsafe {
                std::ptr::write(buffer.as_mut_ptr().add(i), value);
            }
        }
        Ok(Self {
            buffer: Some(buffer),
            _align: PhantomData,
        })
    }

    fn zeroed(len: usize) -> Result<Self, TensorError> {
        if len == 0 {
            return Ok(Self::empty());
        }
        Ok(Self {
            buffer: Some(Buffer::zeroed::<A>(len)?),
            _align: PhantomData,
        })
    }

    fn as_slice(&self) -> &[T] {
        match &self.buffer {
            // SAFETY:
            // - every constructor initializes all `numel` elements
            //   (explicit writes in `from_fn`, all-zero bytes in `zeroed`).
            Some(buffer) => unsafe { buffer.as_slice() },
            None => &[],
        }
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        match &mut self.buffer {
            // SAFETY:
            // - every constructor initializes all `numel` elements.
            Some(buffer) => unsafe { buffer.as_slice_mut() },
            None => &mut [],
        }
    }
}

impl<T: Copy, A: AlignmentStrategy> HeapStorage<T, A> {
    fn empty() -> Self {
        Self {
            buffer: None,
            _align: PhantomData,
        }
    }
}

impl<T: Copy + Zeroable + fmt::Debug, A: AlignmentStrategy> fmt::Debug for HeapStorage<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

/// Fixed-capacity inline storage holding at most `N` elements.
#[derive(Clone)]
pub struct InlineStorage<T: Copy, const N: usize> {
    buf: [T; N],
    len: usize,
}

/// Maximum tensor rank in the embedded profile.
pub const MAX_DIMS: usize = 4;

impl<T: Copy + Zeroable + fmt::Debug, const N: usize> Storage<T> for InlineStorage<T, N> {
    const MAX_RANK: Option<usize> = Some(MAX_DIMS);
    const FIXED_CAPACITY: bool = true;

    fn from_fn(len: usize, mut f: impl FnMut(usize) -> T) -> Result<Self, TensorError> {
        if len > N {
            return Err(TensorError::CapacityExceeded {
                requested: len,
                capacity: N,
            });
        }
        let mut buf = [T::zeroed(); N];
        for (i, slot) in buf.iter_mut().take(len).enumerate() {
            *slot = f(i);
        }
        Ok(Self { buf, len })
    }

    #[inline]
    fn as_slice(&self) -> &[T] {
        &self.buf[..self.len]
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.buf[..self.len]
    }
}

impl<T: Copy + fmt::Debug, const N: usize> fmt::Debug for InlineStorage<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.buf[..self.len]).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fixed::{Fixed, Q8, Q16},
        memory::CustomAlignment,
    };

    #[test]
    fn heap_from_fn_and_mutation() {
        let mut s: HeapStorage<Q16> = HeapStorage::from_fn(4, |i| Q16::encode(i as f32)).unwrap();
        assert_eq!(s.len(), 4);
        s.as_mut_slice()[2] = Q16::ONE;
        let decoded: Vec<f32> = s.as_slice().iter().map(|q| q.decode()).collect();
        assert_eq!(decoded, vec![0.0, 1.0, 1.0, 3.0]);
    }

    #[test]
    fn heap_zeroed_and_empty() {
        let z: HeapStorage<Q8> = HeapStorage::zeroed(5).unwrap();
        assert!(z.as_slice().iter().all(|&q| q == Q8::ZERO));
        let e: HeapStorage<Q8> = HeapStorage::zeroed(0).unwrap();
        assert!(e.is_empty());
        assert_eq!(e.as_slice().len(), 0);
    }

    #[test]
    fn heap_custom_alignment() {
        let s: HeapStorage<Q16, CustomAlignment<64>> = HeapStorage::filled(3, Q16::ONE).unwrap();
        assert_eq!(s.as_slice().as_ptr() as usize % 64, 0);
        assert_eq!(format!("{s:?}").matches("Q16").count(), 3);
    }

    #[test]
    fn inline_respects_capacity() {
        let s: InlineStorage<Q8, 4> = InlineStorage::filled(4, Q8::ONE).unwrap();
        assert_eq!(s.as_slice(), &[Q8::ONE; 4]);
        let err = InlineStorage::<Q8, 4>::zeroed(5).unwrap_err();
        assert_eq!(
            err,
            TensorError::CapacityExceeded {
                requested: 5,
                capacity: 4
            }
        );
    }

    #[test]
    fn inline_from_slice() {
        let values = [Q8::encode(0.5), Q8::encode(-0.5)];
        let s: InlineStorage<Q8, 8> = InlineStorage::from_slice(&values).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.as_slice(), &values);
    }
}
