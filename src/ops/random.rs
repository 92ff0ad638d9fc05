use rand::{Rng, distr::StandardUniform};
use tracing::instrument;

use crate::{
    error::TensorError,
    fixed::Fixed,
    graph::{BackwardRule, Graph, Parents, TensorId},
    shape::Shape,
    storage::Storage,
};

impl<Q: Fixed, S: Storage<Q>> Graph<Q, S> {
    /// New node of uniform samples in `[0, 1)`, drawn from the graph's
    /// seeded generator and rounded down to the format's resolution.
    ///
    /// The node has no operands. With `requires_grad` it carries a rule that
    /// contributes nothing.
    ///
    /// # Errors
    /// Returns [`TensorError::CapacityExceeded`] or
    /// [`TensorError::RankMismatch`] if the storage cannot hold `shape`.
    #[instrument(level = "trace", skip(self, shape))]
    pub fn random_fill(&mut self, shape: impl Into<Shape>, requires_grad: bool) -> Result<TensorId, TensorError> {
        let shape = shape.into();
        let steps = 1.0 / Q::resolution();
        let rng = &mut self.rng;
        let data = S::from_fn(shape.numel(), |_| {
            let x: f32 = rng.sample(StandardUniform);
            Q::encode((x * steps).floor() / steps)
        })?;
        let rule = requires_grad.then_some(BackwardRule::RandomFill);
        self.register("random_fill", shape, data, requires_grad, Parents::none(), rule)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::GraphConfig,
        error::TensorError,
        fixed::{Fixed, Q8},
        graph::{DesktopGraph, EmbeddedGraph},
    };

    #[test]
    fn values_in_unit_interval() {
        let mut g = EmbeddedGraph::default();
        let r = g.random_fill((4, 8), false).unwrap();
        let t = g.get(r).unwrap();
        assert_eq!(t.size(), 32);
        assert!(t.data().iter().all(|&q| q >= Q8::ZERO && q < Q8::ONE));
    }

    #[test]
    fn embedded_rank_is_bounded() {
        let mut g = EmbeddedGraph::default();
        assert_eq!(
            g.random_fill([1, 1, 1, 1, 1], false),
            Err(TensorError::RankMismatch {
                op: "construct",
                expected: 4,
                actual: 5,
            })
        );
        assert_eq!(g.count_pending(), 0);
        assert!(g.random_fill([1, 2, 2, 2], true).is_ok());
    }

    #[test]
    fn same_seed_same_stream() {
        let mut a = DesktopGraph::new(GraphConfig::default().with_seed(7));
        let mut b = DesktopGraph::new(GraphConfig::default().with_seed(7));
        let (x, y) = (a.random_fill(16, false).unwrap(), b.random_fill(16, false).unwrap());
        assert_eq!(a.data(x).unwrap(), b.data(y).unwrap());

        let z = a.random_fill(16, false).unwrap();
        assert_ne!(a.data(x).unwrap(), a.data(z).unwrap());

        a.reseed(7);
        let w = a.random_fill(16, false).unwrap();
        assert_eq!(a.data(w).unwrap(), b.data(y).unwrap());
    }

    #[test]
    fn gradient_stops_at_random_node() {
        let mut g = DesktopGraph::default();
        let r = g.random_fill(3, true).unwrap();
        let a = g.from_values(&[1.0, 2.0, 3.0], 3, true).unwrap();
        let p = g.mul(r, a).unwrap();
        g.backward(p).unwrap();
        assert_eq!(g.grad(a).unwrap(), g.data(r).unwrap());
        assert!(g.get(r).unwrap().parents().is_empty());
        assert!(!g.get(r).unwrap().is_leaf());
    }
}
