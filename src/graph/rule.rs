//! Backward rules: one variant per differentiable primitive.
//!
//! A rule reads the output node's gradient and the operands' forward data and
//! returns the contribution for each operand that requires gradients. The
//! engine adds those contributions into the operands' accumulators.

use crate::{error::TensorError, fixed::Fixed, storage::Storage, tensor::Tensor};

/// Gradient rule attached to an operation's output node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackwardRule<Q> {
    Add,
    Sub,
    Mul,
    Div,
    AddScalar,
    SubScalar,
    MulScalar { factor: Q },
    DivScalar { divisor: Q },
    Sum,
    Pow { exponent: f32 },
    Exp,
    Relu,
    Sigmoid { alpha: f32 },
    Sin,
    Cos,
    /// Concatenation of an `outer x left` and an `outer x right` block along the last axis.
    Cat { outer: usize, left: usize, right: usize },
    /// `(m x k) . (k x n)`.
    MatMul { m: usize, k: usize, n: usize },
    /// Random fill has no operands; it contributes nothing.
    RandomFill,
}

/// Per-operand contributions of one rule application.
pub(crate) struct Gradients<S> {
    pub lhs: Option<S>,
    pub rhs: Option<S>,
    pub overflowed: bool,
}

impl<Q: Fixed> BackwardRule<Q> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add => "AddBackward",
            Self::Sub => "SubBackward",
            Self::Mul => "MulBackward",
            Self::Div => "DivBackward",
            Self::AddScalar => "AddScalarBackward",
            Self::SubScalar => "SubScalarBackward",
            Self::MulScalar { .. } => "MulScalarBackward",
            Self::DivScalar { .. } => "DivScalarBackward",
            Self::Sum => "SumBackward",
            Self::Pow { .. } => "PowBackward",
            Self::Exp => "ExpBackward",
            Self::Relu => "ReluBackward",
            Self::Sigmoid { .. } => "SigmoidBackward",
            Self::Sin => "SinBackward",
            Self::Cos => "CosBackward",
            Self::Cat { .. } => "CatBackward",
            Self::MatMul { .. } => "MatMulBackward",
            Self::RandomFill => "RandomFillBackward",
        }
    }

    /// Computes the contributions of `out`'s gradient to its operands.
    ///
    /// Operands that are absent or do not require gradients get `None`.
    ///
    /// # Errors
    /// Returns [`TensorError::InvalidState`] if `out` holds no gradient or a
    /// needed operand is missing, and storage errors for the contribution buffers.
    pub(crate) fn gradients<S: Storage<Q>>(
        &self,
        out: &Tensor<Q, S>,
        lhs: Option<&Tensor<Q, S>>,
        rhs: Option<&Tensor<Q, S>>,
    ) -> Result<Gradients<S>, TensorError> {
        let g = out.grad()?;
        let want_lhs = lhs.filter(|t| t.requires_grad());
        let want_rhs = rhs.filter(|t| t.requires_grad());
        let mut overflowed = false;

        let (dl, dr) = match *self {
            Self::Add => (
                contribution(want_lhs, g.len(), &mut overflowed, |i| (g[i], false))?,
                contribution(want_rhs, g.len(), &mut overflowed, |i| (g[i], false))?,
            ),
            Self::Sub => (
                contribution(want_lhs, g.len(), &mut overflowed, |i| (g[i], false))?,
                contribution(want_rhs, g.len(), &mut overflowed, |i| g[i].overflowing_neg())?,
            ),
            Self::Mul => {
                let a = operand(lhs)?.data();
                let b = operand(rhs)?.data();
                (
                    contribution(want_lhs, g.len(), &mut overflowed, |i| g[i].overflowing_mul(b[i]))?,
                    contribution(want_rhs, g.len(), &mut overflowed, |i| g[i].overflowing_mul(a[i]))?,
                )
            }
            Self::Div => {
                let a = operand(lhs)?.data();
                let b = operand(rhs)?.data();
                (
                    contribution(want_lhs, g.len(), &mut overflowed, |i| g[i].overflowing_div(b[i]))?,
                    contribution(want_rhs, g.len(), &mut overflowed, |i| {
                        if b[i] == Q::ZERO {
                            return (Q::ZERO, false);
                        }
                        let (gi, ai, bi) = (g[i].decode_f64(), a[i].decode_f64(), b[i].decode_f64());
                        Q::overflowing_encode_f64(-(gi * ai) / (bi * bi))
                    })?,
                )
            }
            Self::AddScalar | Self::SubScalar => (
                contribution(want_lhs, g.len(), &mut overflowed, |i| (g[i], false))?,
                None,
            ),
            Self::MulScalar { factor } => (
                contribution(want_lhs, g.len(), &mut overflowed, |i| g[i].overflowing_mul(factor))?,
                None,
            ),
            Self::DivScalar { divisor } => (
                contribution(want_lhs, g.len(), &mut overflowed, |i| g[i].overflowing_div(divisor))?,
                None,
            ),
            Self::Sum => {
                let total = g.first().copied().unwrap_or(Q::ZERO);
                let len = operand(lhs)?.size();
                (contribution(want_lhs, len, &mut overflowed, |_| (total, false))?, None)
            }
            Self::Pow { exponent } => {
                let t = operand(lhs)?.data();
                let exponent = f64::from(exponent);
                let d = contribution(want_lhs, g.len(), &mut overflowed, |i| {
                    let x = t[i].decode_f64();
                    Q::overflowing_encode_f64(g[i].decode_f64() * exponent * x.powf(exponent - 1.0))
                })?;
                (d, None)
            }
            Self::Exp => {
                let t = operand(lhs)?.data();
                let d = contribution(want_lhs, g.len(), &mut overflowed, |i| {
                    Q::overflowing_encode_f64(g[i].decode_f64() * t[i].decode_f64().exp())
                })?;
                (d, None)
            }
            Self::Relu => {
                let t = operand(lhs)?.data();
                let d = contribution(want_lhs, g.len(), &mut overflowed, |i| {
                    if t[i] > Q::ZERO { (g[i], false) } else { (Q::ZERO, false) }
                })?;
                (d, None)
            }
            Self::Sigmoid { alpha } => {
                let s = out.data();
                let alpha = f64::from(alpha);
                let d = contribution(want_lhs, g.len(), &mut overflowed, |i| {
                    let si = s[i].decode_f64();
                    Q::overflowing_encode_f64(g[i].decode_f64() * si * (1.0 - si) * alpha)
                })?;
                (d, None)
            }
            Self::Sin => {
                let t = operand(lhs)?.data();
                let d = contribution(want_lhs, g.len(), &mut overflowed, |i| {
                    Q::overflowing_encode_f64(g[i].decode_f64() * t[i].decode_f64().cos())
                })?;
                (d, None)
            }
            Self::Cos => {
                let t = operand(lhs)?.data();
                let d = contribution(want_lhs, g.len(), &mut overflowed, |i| {
                    Q::overflowing_encode_f64(-g[i].decode_f64() * t[i].decode_f64().sin())
                })?;
                (d, None)
            }
            Self::Cat { outer, left, right } => {
                let width = left + right;
                (
                    contribution(want_lhs, outer * left, &mut overflowed, |i| {
                        (g[(i / left) * width + i % left], false)
                    })?,
                    contribution(want_rhs, outer * right, &mut overflowed, |i| {
                        (g[(i / right) * width + left + i % right], false)
                    })?,
                )
            }
            Self::MatMul { m, k, n } => {
                let a = operand(lhs)?.data();
                let b = operand(rhs)?.data();
                // dA = G . B^T, dB = A^T . G
                (
                    contribution(want_lhs, m * k, &mut overflowed, |idx| {
                        let (i, kk) = (idx / k, idx % k);
                        Q::overflowing_dot((0..n).map(|j| (g[i * n + j], b[kk * n + j])))
                    })?,
                    contribution(want_rhs, k * n, &mut overflowed, |idx| {
                        let (kk, j) = (idx / n, idx % n);
                        Q::overflowing_dot((0..m).map(|i| (a[i * k + kk], g[i * n + j])))
                    })?,
                )
            }
            Self::RandomFill => (None, None),
        };

        Ok(Gradients {
            lhs: dl,
            rhs: dr,
            overflowed,
        })
    }
}

fn operand<Q: Fixed, S: Storage<Q>>(t: Option<&Tensor<Q, S>>) -> Result<&Tensor<Q, S>, TensorError> {
    t.ok_or(TensorError::InvalidState {
        why: "backward rule is missing an operand",
    })
}

/// Builds one operand's contribution, or `None` if it does not want one.
fn contribution<Q: Fixed, S: Storage<Q>>(
    target: Option<&Tensor<Q, S>>,
    len: usize,
    overflowed: &mut bool,
    mut f: impl FnMut(usize) -> (Q, bool),
) -> Result<Option<S>, TensorError> {
    if target.is_none() {
        return Ok(None);
    }
    let mut any = false;
    let grad = S::from_fn(len, |i| {
        let (v, o) = f(i);
        any |= o;
        v
    })?;
    *overflowed |= any;
    Ok(Some(grad))
}
