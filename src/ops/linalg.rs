use tracing::instrument;

use crate::{
    error::TensorError,
    fixed::Fixed,
    graph::{BackwardRule, Graph, Parents, TensorId},
    shape::Shape,
    storage::Storage,
    tensor::Tensor,
};

fn require_rank2<Q: Fixed, S: Storage<Q>>(op: &'static str, t: &Tensor<Q, S>) -> Result<(usize, usize), TensorError> {
    if t.ndim() != 2 {
        return Err(TensorError::RankMismatch {
            op,
            expected: 2,
            actual: t.ndim(),
        });
    }
    Ok((t.dim(0), t.dim(1)))
}

impl<Q: Fixed, S: Storage<Q>> Graph<Q, S> {
    /// Matrix product of an `m x k` and a `k x n` tensor. Each output element
    /// is accumulated at full width and rounded once.
    ///
    /// # Errors
    /// Returns [`TensorError::RankMismatch`] unless both operands are rank 2,
    /// [`TensorError::ShapeMismatch`] if the inner dimensions differ.
    #[instrument(level = "trace", skip(self))]
    pub fn dot(&mut self, lhs: TensorId, rhs: TensorId) -> Result<TensorId, TensorError> {
        let (m, k, n, data, overflowed) = {
            let a = self.get(lhs)?;
            let b = self.get(rhs)?;
            let (m, k) = require_rank2("dot", a)?;
            let (k2, n) = require_rank2("dot", b)?;
            if k != k2 {
                return Err(TensorError::ShapeMismatch {
                    op: "dot",
                    lhs: a.shape().clone(),
                    rhs: b.shape().clone(),
                });
            }
            let (a, b) = (a.data(), b.data());
            let mut overflowed = false;
            let data = S::from_fn(m * n, |idx| {
                let (i, j) = (idx / n, idx % n);
                let (v, o) = Q::overflowing_dot((0..k).map(|kk| (a[i * k + kk], b[kk * n + j])));
                overflowed |= o;
                v
            })?;
            (m, k, n, data, overflowed)
        };
        self.record(
            "dot",
            Shape::from((m, n)),
            data,
            Parents::binary(lhs, rhs),
            BackwardRule::MatMul { m, k, n },
            overflowed,
        )
    }

    /// Alias of [`Graph::dot`].
    ///
    /// # Errors
    /// See [`Graph::dot`].
    pub fn matmul(&mut self, lhs: TensorId, rhs: TensorId) -> Result<TensorId, TensorError> {
        self.dot(lhs, rhs)
    }

    /// Rank-2 transpose, copied into a new node.
    ///
    /// The output is linked to its input and inherits `requires_grad`, but
    /// carries no backward rule: gradients do not flow through it.
    ///
    /// # Errors
    /// Returns [`TensorError::RankMismatch`] unless the input is rank 2.
    #[instrument(level = "trace", skip(self))]
    pub fn transpose(&mut self, input: TensorId) -> Result<TensorId, TensorError> {
        let (shape, data, requires_grad) = {
            let t = self.get(input)?;
            let (rows, cols) = require_rank2("transpose", t)?;
            let src = t.data();
            // out[j, i] = in[i, j]
            let data = S::from_fn(rows * cols, |idx| src[(idx % rows) * cols + idx / rows])?;
            (t.shape().transposed(), data, t.requires_grad())
        };
        self.register("transpose", shape, data, requires_grad, Parents::unary(input), None)
    }

    /// Concatenates along the last axis. All leading dimensions must agree.
    ///
    /// # Errors
    /// Returns [`TensorError::ShapeMismatch`] if ranks or leading dimensions differ.
    #[instrument(level = "trace", skip(self))]
    pub fn cat(&mut self, lhs: TensorId, rhs: TensorId) -> Result<TensorId, TensorError> {
        let (shape, data, outer, left, right) = {
            let a = self.get(lhs)?;
            let b = self.get(rhs)?;
            let (da, db) = (a.shape().dims(), b.shape().dims());
            let rank = da.len();
            if rank == 0 || rank != db.len() || da[..rank - 1] != db[..rank - 1] {
                return Err(TensorError::ShapeMismatch {
                    op: "cat",
                    lhs: a.shape().clone(),
                    rhs: b.shape().clone(),
                });
            }
            let (left, right) = (da[rank - 1], db[rank - 1]);
            let outer: usize = da[..rank - 1].iter().product();
            let width = left + right;

            let mut dims = da.to_vec();
            dims[rank - 1] = width;
            let (x, y) = (a.data(), b.data());
            let data = S::from_fn(outer * width, |idx| {
                let (row, col) = (idx / width, idx % width);
                if col < left {
                    x[row * left + col]
                } else {
                    y[row * right + col - left]
                }
            })?;
            (Shape::from(dims), data, outer, left, right)
        };
        self.record(
            "cat",
            shape,
            data,
            Parents::binary(lhs, rhs),
            BackwardRule::Cat { outer, left, right },
            false,
        )
    }
}
