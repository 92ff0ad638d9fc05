//! Allocation policies plugged into [`super::BufferBuilder`].

use std::{alloc::Layout, ptr::NonNull};

/// How fresh bytes are produced.
pub trait InitStrategy {
    /// Allocates `layout` from the global allocator, `None` if it refuses.
    ///
    /// # Safety
    /// `layout.size()` must be non-zero.
    unsafe fn allocate(layout: Layout) -> Option<NonNull<u8>>;
}

/// Alignment, in bytes, of a buffer of `T`. Always a power of two and never
/// below `align_of::<T>()`.
pub trait AlignmentStrategy {
    fn alignment<T>() -> usize;
}

/// Widest vector register width the build targets: 32 bytes with AVX2,
/// 16 with NEON, otherwise the natural alignment of `T`.
#[derive(Debug)]
pub struct SimdAlignment;

impl SimdAlignment {
    const fn register_width() -> Option<usize> {
        if cfg!(all(target_arch = "aarch64", target_feature = "neon")) {
            Some(16)
        } else if cfg!(all(any(target_arch = "x86", target_arch = "x86_64"), target_feature = "avx2")) {
            Some(32)
        } else {
            None
        }
    }
}

impl AlignmentStrategy for SimdAlignment {
    fn alignment<T>() -> usize {
        Self::register_width().map_or(std::mem::align_of::<T>(), |w| w.max(std::mem::align_of::<T>()))
    }
}

/// Fixed alignment chosen at compile time, e.g. a cache line or a DMA
/// boundary.
///
/// # Panics
/// [`AlignmentStrategy::alignment`] panics if `ALIGN` is not a power of two.
#[derive(Debug)]
pub struct CustomAlignment<const ALIGN: usize>;

impl<const ALIGN: usize> AlignmentStrategy for CustomAlignment<ALIGN> {
    fn alignment<T>() -> usize {
        assert!(ALIGN.is_power_of_two(), "alignment {ALIGN} is not a power of two");
        ALIGN.max(std::mem::align_of::<T>())
    }
}

/// Bytes are left as the allocator returns them; debug builds fill them with
/// `0xAB` so reads of unwritten elements are recognisable.
#[derive(Debug)]
pub struct Uninitialized;

impl InitStrategy for Uninitialized {
    unsafe fn allocate(layout: Layout) -> Option<NonNull<u8>> {
        // SAFETY:
        // - the caller guarantees a non-zero size.
        let ptr = NonNull::new(unsafe { std::alloc::alloc(layout) })?;
        if cfg!(debug_assertions) {
            // SAFETY:
            // - `ptr` is a fresh allocation of `layout.size()` bytes.
            unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0xAB, layout.size()) };
        }
        Some(ptr)
    }
}

/// All-zero bytes, which decode as `0.0` in every fixed-point format.
#[derive(Debug)]
pub struct Zeroed;

impl InitStrategy for Zeroed {
    unsafe fn allocate(layout: Layout) -> Option<NonNull<u8>> {
        // SAFETY:
        // - the caller guarantees a non-zero size.
        NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_alignment_never_below_natural() {
        assert_eq!(CustomAlignment::<64>::alignment::<i16>(), 64);
        assert_eq!(CustomAlignment::<1>::alignment::<i32>(), 4);
    }

    #[test]
    #[should_panic(expected = "not a power of two")]
    fn custom_alignment_rejects_odd_values() {
        let _ = CustomAlignment::<24>::alignment::<i16>();
    }

    #[test]
    fn simd_alignment_is_power_of_two() {
        assert!(SimdAlignment::alignment::<i16>().is_power_of_two());
        assert!(SimdAlignment::alignment::<i32>() >= 4);
    }

    #[test]
    fn zeroed_allocation_reads_zero() {
        let layout = Layout::from_size_align(16, 8).unwrap();
        // SAFETY: non-zero size.
        let ptr = unsafe { Zeroed::allocate(layout) }.unwrap();
        // SAFETY: 16 bytes were just allocated.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 16) };
        assert!(bytes.iter().all(|&b| b == 0));
        // SAFETY: same layout as the allocation.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}
