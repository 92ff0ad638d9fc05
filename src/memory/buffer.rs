use std::{alloc::Layout, marker::PhantomData, ptr::NonNull};

use bytemuck::Zeroable;

use crate::{
    error::TensorError,
    memory::policy::{AlignmentStrategy, InitStrategy, SimdAlignment, Uninitialized, Zeroed},
};

/// Owned heap allocation of `numel` elements of `T`.
///
/// The allocation is rounded up to a multiple of the alignment chosen by an
/// [`AlignmentStrategy`]; the bytes past `numel` are always zero. Element
/// initialisation is up to the caller, so the slice views are `unsafe`.
/// [`crate::storage::HeapStorage`] is the safe layer on top.
#[derive(Debug)]
pub struct Buffer<T: Copy> {
    ptr: NonNull<T>,
    numel: usize,
    // exactly the layout handed to the allocator
    layout: Layout,
}

/// Type-state builder for [`Buffer`]: pick an [`InitStrategy`] and an
/// [`AlignmentStrategy`], then [`BufferBuilder::build`].
pub struct BufferBuilder<I: InitStrategy, A: AlignmentStrategy> {
    numel: usize,
    _marker: PhantomData<(I, A)>,
}

impl BufferBuilder<Uninitialized, SimdAlignment> {
    pub fn new(numel: usize) -> Self {
        Self {
            numel,
            _marker: PhantomData,
        }
    }
}

impl<I: InitStrategy, A: AlignmentStrategy> BufferBuilder<I, A> {
    fn retype<J: InitStrategy, B: AlignmentStrategy>(self) -> BufferBuilder<J, B> {
        BufferBuilder {
            numel: self.numel,
            _marker: PhantomData,
        }
    }

    /// Request all-zero bytes.
    #[must_use]
    pub fn zeroed(self) -> BufferBuilder<Zeroed, A> {
        self.retype()
    }

    #[must_use]
    pub fn aligned<B: AlignmentStrategy>(self) -> BufferBuilder<I, B> {
        self.retype()
    }

    /// # Errors
    /// Returns [`TensorError::InvalidState`] for zero elements or a
    /// zero-sized `T`, and [`TensorError::CapacityExceeded`] if the byte size
    /// overflows or the allocator refuses.
    pub fn build<T: Copy>(self) -> Result<Buffer<T>, TensorError> {
        Buffer::allocate::<I, A>(self.numel)
    }
}

impl<T: Copy> Buffer<T> {
    fn allocate<I: InitStrategy, A: AlignmentStrategy>(numel: usize) -> Result<Self, TensorError> {
        let elem = std::mem::size_of::<T>();
        if elem == 0 || numel == 0 {
            return Err(TensorError::InvalidState {
                why: "buffers hold at least one non-zero-sized element",
            });
        }

        let refused = TensorError::CapacityExceeded {
            requested: numel,
            capacity: isize::MAX as usize / elem,
        };
        let align = A::alignment::<T>();
        let layout = padded_size::<T>(numel, align)
            .and_then(|size| Layout::from_size_align(size, align).ok())
            .ok_or_else(|| refused.clone())?;

        // SAFETY:
        // - `layout.size() >= numel * elem > 0`.
        let raw = unsafe { I::allocate(layout) }.ok_or(refused)?;

        // SAFETY:
        // - `raw` points to a fresh allocation of `layout.size()` bytes.
        unsafe { clear_padding(raw.as_ptr(), numel * elem, layout.size()) };

        Ok(Self {
            ptr: raw.cast(),
            numel,
            layout,
        })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Logical length.
    #[inline]
    pub fn numel(&self) -> usize {
        self.numel
    }

    /// # Safety
    /// All `numel` elements must have been initialised.
    pub unsafe fn as_slice(&self) -> &[T] {
        // SAFETY:
        // - `ptr` is non-null, aligned for `T` and valid for `numel` elements.
        // - initialisation is guaranteed by the caller.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.numel) }
    }

    /// # Safety
    /// All `numel` elements must have been initialised.
    pub unsafe fn as_slice_mut(&mut self) -> &mut [T] {
        // SAFETY:
        // - `ptr` is non-null, aligned for `T` and valid for `numel` elements.
        // - `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.numel) }
    }
}

impl<T: Copy + Zeroable> Buffer<T> {
    /// Buffer of `numel` zero elements.
    ///
    /// # Errors
    /// See [`BufferBuilder::build`].
    pub fn zeroed<A: AlignmentStrategy>(numel: usize) -> Result<Self, TensorError> {
        BufferBuilder::new(numel).zeroed().aligned::<A>().build()
    }
}

impl<T: Copy> Drop for Buffer<T> {
    fn drop(&mut self) {
        // SAFETY:
        // - `ptr` came from the global allocator with exactly `layout`.
        unsafe { std::alloc::dealloc(self.ptr.as_ptr().cast(), self.layout) }
    }
}

/// Byte size of `numel` elements of `T` rounded up to `align`, `None` on overflow.
#[inline]
fn padded_size<T>(numel: usize, align: usize) -> Option<usize> {
    let bytes = numel.checked_mul(std::mem::size_of::<T>())?;
    Some(bytes.checked_add(align - 1)? & !(align - 1))
}

/// Zeroes bytes `used..size` of an allocation.
///
/// # Safety
/// `ptr` must be valid for writes of `size` bytes.
#[inline]
unsafe fn clear_padding(ptr: *mut u8, used: usize, size: usize) {
    if used < size {
        // SAFETY:
        // - `used < size`, so the range stays inside the allocation.
        unsafe { std::ptr::write_bytes(ptr.add(used), 0, size - used) }
    }
}
