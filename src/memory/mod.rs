//! Aligned heap memory backing the desktop storage profile.

pub mod buffer;
pub mod policy;

pub use buffer::{Buffer, BufferBuilder};
pub use policy::{AlignmentStrategy, CustomAlignment, SimdAlignment};
