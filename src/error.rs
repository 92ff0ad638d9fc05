use thiserror::Error;

use crate::{graph::TensorId, shape::Shape};

/// Errors raised by tensor construction, the graph engine and the operation library.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TensorError {
    /// Nested input rows do not agree in length.
    #[error("inconsistent dimensions. expected: {expected}, received: {received}")]
    InconsistentDimensions { expected: Shape, received: Shape },

    /// Number of supplied values does not match the shape.
    #[error("length mismatch: shape holds {expected} elements, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Operand shapes are incompatible for `op`.
    #[error("shape mismatch in {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// Operand has the wrong number of dimensions for `op`.
    #[error("rank mismatch in {op}: expected rank {expected}, got {actual}")]
    RankMismatch {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A fixed-capacity buffer or a bounded arena is full.
    #[error("capacity exceeded: requested {requested}, capacity {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    /// Gradient access on a tensor that does not hold one.
    #[error("invalid state: {why}")]
    InvalidState { why: &'static str },

    /// Fixed-point overflow under [`crate::OverflowPolicy::Trap`].
    #[error("fixed-point overflow in {op}")]
    NumericRange { op: &'static str },

    /// The handle was issued before the last sweep of the node arena.
    #[error("tensor {id} was reclaimed by a sweep")]
    UseAfterReclaim { id: TensorId },

    /// The handle does not belong to this graph.
    #[error("unknown tensor {id}")]
    UnknownTensor { id: TensorId },
}
