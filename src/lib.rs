//! # fixgrad
//!
//! A minimal reverse-mode automatic differentiation (autodiff) engine over
//! fixed-point tensors, for targets where floating point is slow or absent.
//!
//! ## Features
//!
//! - Q7.8 ([`Q8`]) and Q15.16 ([`Q16`]) element formats with explicit
//!   rounding, saturation and an overflow policy.
//! - One [`Tensor`] type parameterised by its storage: aligned heap buffers
//!   ([`HeapStorage`]) or fixed-capacity inline buffers ([`InlineStorage`]).
//! - A [`Graph`] holding caller leaves and an epoch arena of operation
//!   outputs, reclaimed in bulk by [`Graph::sweep`].
//! - Element-wise, reduction, trigonometric and matrix operations, each with
//!   its backward rule.
//!
//! ## Training loop
//!
//! ```
//! use fixgrad::EmbeddedGraph;
//!
//! let mut g = EmbeddedGraph::default();
//! let a = g.from_values(&[0.0, 0.0], 2, true)?;
//! let b = g.from_values(&[4.0, 5.0], 2, false)?;
//! for _ in 0..64 {
//!     let e = g.sub(a, b)?;
//!     let d = g.mul(e, e)?;
//!     g.backward(d)?;
//!     g.update(a, 0.1)?;
//!     g.zero_grad(d)?;
//!     g.sweep();
//! }
//! let a = g.data(a)?;
//! assert!((a[0] - 4.0).abs() < 0.05 && (a[1] - 5.0).abs() < 0.05);
//! # Ok::<(), fixgrad::TensorError>(())
//! ```

#![warn(
    clippy::perf,
    clippy::correctness,
    clippy::complexity,
    clippy::style,
    clippy::suspicious,
    // clippy::pedantic
)]
#![deny(clippy::undocumented_unsafe_blocks, clippy::cast_possible_truncation)]
#![allow(clippy::float_cmp)]

pub mod config;
mod error;
pub mod fixed;
pub mod graph;
pub mod memory;
mod ops;
mod shape;
pub mod storage;
pub mod telemetry;
mod tensor;
mod tensorizable;

// Re-export core types for convenience.
pub use config::{ConfigError, GraphConfig, OverflowPolicy};
pub use error::TensorError;
pub use fixed::{Fixed, Q8, Q16};
pub use graph::{
    BackwardRule, DesktopGraph, EmbeddedGraph, Graph, GraphId, LeafId, LeafStore, MAX_TENSOR_SIZE, NodeArena,
    NodeId, Parents, TensorId,
};
pub use shape::Shape;
pub use storage::{HeapStorage, InlineStorage, MAX_DIMS, Storage};
pub use tensor::{GradDisplay, Tensor};
pub use tensorizable::Tensorizable;
