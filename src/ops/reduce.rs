use tracing::instrument;

use crate::{
    error::TensorError,
    fixed::Fixed,
    graph::{BackwardRule, Graph, Parents, TensorId},
    shape::Shape,
    storage::Storage,
};

impl<Q: Fixed, S: Storage<Q>> Graph<Q, S> {
    /// Total of all elements as a one-element tensor.
    ///
    /// # Errors
    /// Fails on stale or foreign handles, or overflow under the trapping policy.
    #[instrument(level = "trace", skip(self))]
    pub fn sum(&mut self, input: TensorId) -> Result<TensorId, TensorError> {
        let (total, overflowed) = {
            let t = self.get(input)?;
            t.data().iter().fold((Q::ZERO, false), |(acc, o), &x| {
                let (next, carry) = acc.overflowing_add(x);
                (next, o || carry)
            })
        };
        let data = S::filled(1, total)?;
        self.record("sum", Shape::from(1), data, Parents::unary(input), BackwardRule::Sum, overflowed)
    }
}
