use std::f64::consts::{PI, TAU};

use tracing::instrument;

use crate::{
    error::TensorError,
    fixed::Fixed,
    graph::{Graph, TensorId},
    storage::Storage,
    tensor::Tensor,
};

impl<Q: Fixed, S: Storage<Q>> Graph<Q, S> {
    /// Sum of squared errors, `sum((prediction - target)^2)`, as a
    /// one-element tensor.
    ///
    /// # Errors
    /// Returns [`TensorError::ShapeMismatch`] if the shapes differ.
    #[instrument(level = "trace", skip(self))]
    pub fn mse(&mut self, prediction: TensorId, target: TensorId) -> Result<TensorId, TensorError> {
        let diff = self.sub(prediction, target)?;
        let squared = self.mul(diff, diff)?;
        self.sum(squared)
    }

    /// Wraps every element of `id` into `[-pi, pi)` in place.
    ///
    /// This edits data only; it records nothing and leaves gradients alone.
    ///
    /// # Errors
    /// Fails on stale or foreign handles, or overflow under the trapping policy.
    pub fn wrap_angle(&mut self, id: TensorId) -> Result<(), TensorError> {
        let mut overflowed = false;
        for x in self.get_mut(id)?.data_mut() {
            let wrapped = (x.decode_f64() + PI).rem_euclid(TAU) - PI;
            let (q, o) = Q::overflowing_encode_f64(wrapped);
            *x = q;
            overflowed |= o;
        }
        self.check_overflow("wrap_angle", overflowed)
    }

    /// Copies the gradient of `id` into a new leaf that does not require
    /// gradients. The copy survives sweeps.
    ///
    /// # Errors
    /// Returns [`TensorError::InvalidState`] if `id` does not require gradients.
    pub fn grad_tensor(&mut self, id: TensorId) -> Result<TensorId, TensorError> {
        let (data, shape) = {
            let t = self.get(id)?;
            (S::from_slice(t.grad()?)?, t.shape().clone())
        };
        self.insert(Tensor::from_raw(data, shape, false)?)
    }
}
