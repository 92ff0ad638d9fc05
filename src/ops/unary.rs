use tracing::instrument;

use crate::{
    error::TensorError,
    fixed::Fixed,
    graph::{BackwardRule, Graph, TensorId},
    storage::Storage,
};

impl<Q: Fixed, S: Storage<Q>> Graph<Q, S> {
    /// `input ^ exponent`, element-wise.
    ///
    /// # Errors
    /// Fails on stale or foreign handles, or overflow under the trapping policy.
    #[instrument(level = "trace", skip(self))]
    pub fn pow(&mut self, input: TensorId, exponent: f32) -> Result<TensorId, TensorError> {
        self.map_real("pow", input, BackwardRule::Pow { exponent }, |x| x.powf(f64::from(exponent)))
    }

    /// # Errors
    /// Fails on stale or foreign handles, or overflow under the trapping policy.
    #[instrument(level = "trace", skip(self))]
    pub fn exp(&mut self, input: TensorId) -> Result<TensorId, TensorError> {
        self.map_real("exp", input, BackwardRule::Exp, f64::exp)
    }

    /// `max(input, 0)`.
    ///
    /// # Errors
    /// Fails on stale or foreign handles.
    #[instrument(level = "trace", skip(self))]
    pub fn relu(&mut self, input: TensorId) -> Result<TensorId, TensorError> {
        self.map_fixed("relu", input, BackwardRule::Relu, |x| {
            (if x > Q::ZERO { x } else { Q::ZERO }, false)
        })
    }

    /// Logistic function with slope `alpha`: `1 / (1 + e^(-alpha * x))`.
    ///
    /// # Errors
    /// Fails on stale or foreign handles.
    #[instrument(level = "trace", skip(self))]
    pub fn sigmoid(&mut self, input: TensorId, alpha: f32) -> Result<TensorId, TensorError> {
        let alpha_f64 = f64::from(alpha);
        self.map_real("sigmoid", input, BackwardRule::Sigmoid { alpha }, |x| {
            1.0 / (1.0 + (-alpha_f64 * x).exp())
        })
    }

    /// # Errors
    /// Fails on stale or foreign handles.
    #[instrument(level = "trace", skip(self))]
    pub fn sin(&mut self, input: TensorId) -> Result<TensorId, TensorError> {
        self.map_real("sin", input, BackwardRule::Sin, f64::sin)
    }

    /// # Errors
    /// Fails on stale or foreign handles.
    #[instrument(level = "trace", skip(self))]
    pub fn cos(&mut self, input: TensorId) -> Result<TensorId, TensorError> {
        self.map_real("cos", input, BackwardRule::Cos, f64::cos)
    }
}
