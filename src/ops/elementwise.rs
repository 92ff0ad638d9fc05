use tracing::instrument;

use crate::{
    error::TensorError,
    fixed::Fixed,
    graph::{BackwardRule, Graph, TensorId},
    storage::Storage,
};

impl<Q: Fixed, S: Storage<Q>> Graph<Q, S> {
    /// `lhs + rhs`, element-wise.
    ///
    /// # Errors
    /// Returns [`TensorError::ShapeMismatch`] if the shapes differ.
    #[instrument(level = "trace", skip(self))]
    pub fn add(&mut self, lhs: TensorId, rhs: TensorId) -> Result<TensorId, TensorError> {
        self.zip_with("add", lhs, rhs, BackwardRule::Add, Q::overflowing_add)
    }

    /// `lhs - rhs`, element-wise.
    ///
    /// # Errors
    /// Returns [`TensorError::ShapeMismatch`] if the shapes differ.
    #[instrument(level = "trace", skip(self))]
    pub fn sub(&mut self, lhs: TensorId, rhs: TensorId) -> Result<TensorId, TensorError> {
        self.zip_with("sub", lhs, rhs, BackwardRule::Sub, Q::overflowing_sub)
    }

    /// Hadamard product, rounded to nearest.
    ///
    /// # Errors
    /// Returns [`TensorError::ShapeMismatch`] if the shapes differ.
    #[instrument(level = "trace", skip(self))]
    pub fn mul(&mut self, lhs: TensorId, rhs: TensorId) -> Result<TensorId, TensorError> {
        self.zip_with("mul", lhs, rhs, BackwardRule::Mul, Q::overflowing_mul)
    }

    /// `lhs / rhs`, element-wise. Positions where `rhs` is zero yield zero.
    ///
    /// # Errors
    /// Returns [`TensorError::ShapeMismatch`] if the shapes differ.
    #[instrument(level = "trace", skip(self))]
    pub fn div(&mut self, lhs: TensorId, rhs: TensorId) -> Result<TensorId, TensorError> {
        self.zip_with("div", lhs, rhs, BackwardRule::Div, Q::overflowing_div)
    }

    /// # Errors
    /// Fails on stale or foreign handles, or overflow under the trapping policy.
    #[instrument(level = "trace", skip(self))]
    pub fn add_scalar(&mut self, input: TensorId, value: f32) -> Result<TensorId, TensorError> {
        let (c, o) = Q::overflowing_encode(value);
        self.check_overflow("add_scalar", o)?;
        self.map_fixed("add_scalar", input, BackwardRule::AddScalar, |x| x.overflowing_add(c))
    }

    /// `input - value`.
    ///
    /// # Errors
    /// Fails on stale or foreign handles, or overflow under the trapping policy.
    #[instrument(level = "trace", skip(self))]
    pub fn sub_scalar(&mut self, input: TensorId, value: f32) -> Result<TensorId, TensorError> {
        let (c, o) = Q::overflowing_encode(value);
        self.check_overflow("sub_scalar", o)?;
        self.map_fixed("sub_scalar", input, BackwardRule::SubScalar, |x| x.overflowing_sub(c))
    }

    /// # Errors
    /// Fails on stale or foreign handles, or overflow under the trapping policy.
    #[instrument(level = "trace", skip(self))]
    pub fn mul_scalar(&mut self, input: TensorId, value: f32) -> Result<TensorId, TensorError> {
        let (c, o) = Q::overflowing_encode(value);
        self.check_overflow("mul_scalar", o)?;
        self.mul_fixed(input, c)
    }

    /// Multiplies by an already-encoded constant.
    ///
    /// # Errors
    /// Fails on stale or foreign handles, or overflow under the trapping policy.
    #[instrument(level = "trace", skip(self))]
    pub fn mul_fixed(&mut self, input: TensorId, factor: Q) -> Result<TensorId, TensorError> {
        self.map_fixed("mul_scalar", input, BackwardRule::MulScalar { factor }, |x| {
            x.overflowing_mul(factor)
        })
    }

    /// `input / value`. A zero `value` yields all zeros.
    ///
    /// # Errors
    /// Fails on stale or foreign handles, or overflow under the trapping policy.
    #[instrument(level = "trace", skip(self))]
    pub fn div_scalar(&mut self, input: TensorId, value: f32) -> Result<TensorId, TensorError> {
        let (divisor, o) = Q::overflowing_encode(value);
        self.check_overflow("div_scalar", o)?;
        self.map_fixed("div_scalar", input, BackwardRule::DivScalar { divisor }, |x| {
            x.overflowing_div(divisor)
        })
    }

    /// `value - input`, built as a negated [`Graph::sub_scalar`].
    ///
    /// # Errors
    /// See [`Graph::sub_scalar`].
    pub fn rsub_scalar(&mut self, value: f32, input: TensorId) -> Result<TensorId, TensorError> {
        let shifted = self.sub_scalar(input, value)?;
        self.mul_fixed(shifted, Q::ONE.overflowing_neg().0)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        error::TensorError,
        graph::{DesktopGraph, EmbeddedGraph},
        shape::Shape,
    };

    #[test]
    fn arithmetic_forward() {
        let mut g = DesktopGraph::default();
        let a = g.from_values(&[1.0, -2.0, 3.0], 3, false).unwrap();
        let b = g.from_values(&[0.5, 4.0, -1.5], 3, false).unwrap();
        let s = g.add(a, b).unwrap();
        let d = g.sub(a, b).unwrap();
        let m = g.mul(a, b).unwrap();
        let q = g.div(a, b).unwrap();
        assert_eq!(g.data(s).unwrap(), vec![1.5, 2.0, 1.5]);
        assert_eq!(g.data(d).unwrap(), vec![0.5, -6.0, 4.5]);
        assert_eq!(g.data(m).unwrap(), vec![0.5, -8.0, -4.5]);
        assert_eq!(g.data(q).unwrap(), vec![2.0, -0.5, -2.0]);
    }

    #[test]
    fn arithmetic_backward() {
        let mut g = DesktopGraph::default();
        let a = g.from_values(&[1.0, 2.0], 2, true).unwrap();
        let b = g.from_values(&[4.0, -0.5], 2, true).unwrap();
        let m = g.mul(a, b).unwrap();
        g.backward(m).unwrap();
        assert_eq!(g.grad(a).unwrap(), vec![4.0, -0.5]);
        assert_eq!(g.grad(b).unwrap(), vec![1.0, 2.0]);

        g.zero_grad(m).unwrap();
        let q = g.div(a, b).unwrap();
        g.backward(q).unwrap();
        assert_eq!(g.grad(a).unwrap(), vec![0.25, -2.0]);
        // -a / b^2
        assert_eq!(g.grad(b).unwrap(), vec![-0.0625, -8.0]);

        g.zero_grad(q).unwrap();
        let s = g.sub(a, b).unwrap();
        g.backward(s).unwrap();
        assert_eq!(g.grad(a).unwrap(), vec![1.0, 1.0]);
        assert_eq!(g.grad(b).unwrap(), vec![-1.0, -1.0]);
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let mut g = DesktopGraph::default();
        let a = g.filled((2, 2), 1.0, false).unwrap();
        let b = g.filled(4, 1.0, false).unwrap();
        assert_eq!(
            g.add(a, b),
            Err(TensorError::ShapeMismatch {
                op: "add",
                lhs: Shape::from((2, 2)),
                rhs: Shape::from(4),
            })
        );
        assert_eq!(g.count_pending(), 0);
    }

    #[test]
    fn zero_divisor_gives_zero() {
        let mut g = EmbeddedGraph::default();
        let a = g.from_values(&[1.0, -3.0, 0.0], 3, true).unwrap();
        let z = g.zeros_like(a, true).unwrap();
        let q = g.div(a, z).unwrap();
        assert_eq!(g.data(q).unwrap(), vec![0.0; 3]);
        g.backward(q).unwrap();
        assert_eq!(g.grad(a).unwrap(), vec![0.0; 3]);
        assert_eq!(g.grad(z).unwrap(), vec![0.0; 3]);

        let h = g.div_scalar(a, 0.0).unwrap();
        assert_eq!(g.data(h).unwrap(), vec![0.0; 3]);
    }

    #[test]
    fn scalar_variants() {
        let mut g = DesktopGraph::default();
        let a = g.from_values(&[1.0, 2.0], 2, true).unwrap();
        let s = g.add_scalar(a, 0.5).unwrap();
        let d = g.sub_scalar(a, 10.0).unwrap();
        let m = g.mul_scalar(a, -3.0).unwrap();
        let q = g.div_scalar(a, 4.0).unwrap();
        let r = g.rsub_scalar(1.0, a).unwrap();
        assert_eq!(g.data(s).unwrap(), vec![1.5, 2.5]);
        assert_eq!(g.data(d).unwrap(), vec![-9.0, -8.0]);
        assert_eq!(g.data(m).unwrap(), vec![-3.0, -6.0]);
        assert_eq!(g.data(q).unwrap(), vec![0.25, 0.5]);
        assert_eq!(g.data(r).unwrap(), vec![0.0, -1.0]);

        g.backward(m).unwrap();
        assert_eq!(g.grad(a).unwrap(), vec![-3.0, -3.0]);
        g.zero_grad(m).unwrap();
        g.backward(q).unwrap();
        assert_eq!(g.grad(a).unwrap(), vec![0.25, 0.25]);
        g.zero_grad(q).unwrap();
        g.backward(r).unwrap();
        assert_eq!(g.grad(a).unwrap(), vec![-1.0, -1.0]);
    }
}
