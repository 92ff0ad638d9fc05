//! Operation library.
//!
//! Every operation is a method on [`Graph`] taking operand handles and
//! returning the handle of a new arena node. Forward arithmetic happens in
//! the fixed-point domain where a primitive exists (`add`, `mul`, `dot`, ...)
//! and in `f64` for transcendental functions, re-encoded once per element.

mod elementwise;
mod linalg;
mod loss;
mod random;
mod reduce;
mod unary;

use crate::{
    error::TensorError,
    fixed::Fixed,
    graph::{BackwardRule, Graph, Parents, TensorId},
    storage::Storage,
};

impl<Q: Fixed, S: Storage<Q>> Graph<Q, S> {
    /// Element-wise binary op over equally shaped operands.
    fn zip_with(
        &mut self,
        op: &'static str,
        lhs: TensorId,
        rhs: TensorId,
        rule: BackwardRule<Q>,
        f: impl Fn(Q, Q) -> (Q, bool),
    ) -> Result<TensorId, TensorError> {
        let (shape, data, overflowed) = {
            let a = self.get(lhs)?;
            let b = self.get(rhs)?;
            if a.shape() != b.shape() {
                return Err(TensorError::ShapeMismatch {
                    op,
                    lhs: a.shape().clone(),
                    rhs: b.shape().clone(),
                });
            }
            let mut overflowed = false;
            let data = S::from_fn(a.size(), |i| {
                let (v, o) = f(a[i], b[i]);
                overflowed |= o;
                v
            })?;
            (a.shape().clone(), data, overflowed)
        };
        self.record(op, shape, data, Parents::binary(lhs, rhs), rule, overflowed)
    }

    /// Element-wise unary op in the fixed-point domain.
    fn map_fixed(
        &mut self,
        op: &'static str,
        input: TensorId,
        rule: BackwardRule<Q>,
        f: impl Fn(Q) -> (Q, bool),
    ) -> Result<TensorId, TensorError> {
        let (shape, data, overflowed) = {
            let t = self.get(input)?;
            let mut overflowed = false;
            let data = S::from_fn(t.size(), |i| {
                let (v, o) = f(t[i]);
                overflowed |= o;
                v
            })?;
            (t.shape().clone(), data, overflowed)
        };
        self.record(op, shape, data, Parents::unary(input), rule, overflowed)
    }

    /// Element-wise unary op evaluated on exactly decoded reals.
    fn map_real(
        &mut self,
        op: &'static str,
        input: TensorId,
        rule: BackwardRule<Q>,
        f: impl Fn(f64) -> f64,
    ) -> Result<TensorId, TensorError> {
        self.map_fixed(op, input, rule, |q| Q::overflowing_encode_f64(f(q.decode_f64())))
    }
}
