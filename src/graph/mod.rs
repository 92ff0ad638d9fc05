//! Computation graph and reverse-mode engine.
//!
//! A [`Graph`] owns two regions:
//!
//! - a [`LeafStore`] of caller-created tensors, untouched by sweeps and
//!   released one at a time with [`Graph::remove_leaf`];
//! - an epoch [`NodeArena`] holding every operation output until the next
//!   [`Graph::sweep`].
//!
//! Both are addressed through copyable [`TensorId`] handles stamped with the
//! graph that issued them. Operations (see
//! [`crate::ops`]) follow one recording protocol: compute the output, OR the
//! operands' `requires_grad` flags, and attach the operands plus a
//! [`BackwardRule`] when the output requires gradients.
//!
//! ```
//! use fixgrad::DesktopGraph;
//!
//! let mut g = DesktopGraph::default();
//! let a = g.from_values(&[1.0, 2.0], 2, true)?;
//! let b = g.from_values(&[4.0, 5.0], 2, false)?;
//! let e = g.sub(a, b)?;
//! let d = g.mul(e, e)?;
//! g.backward(d)?;
//! assert_eq!(g.grad(a)?, vec![-6.0, -6.0]);
//! g.zero_grad(d)?;
//! g.sweep();
//! # Ok::<(), fixgrad::TensorError>(())
//! ```

pub mod arena;
pub mod leaves;
pub mod rule;

use std::{
    collections::HashSet,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use rand::{SeedableRng, rngs::StdRng};
use tracing::{debug, debug_span, trace, trace_span};

pub use arena::{NodeArena, NodeId};
pub use leaves::{LeafId, LeafStore};
pub use rule::BackwardRule;

use crate::{
    config::{GraphConfig, OverflowPolicy},
    error::TensorError,
    fixed::{Fixed, Q8, Q16},
    shape::Shape,
    storage::{HeapStorage, InlineStorage, Storage},
    tensor::Tensor,
    tensorizable::Tensorizable,
};

/// Element ceiling of a tensor in the embedded profile.
pub const MAX_TENSOR_SIZE: usize = 1024;

/// Q15.16 on aligned heap buffers.
pub type DesktopGraph = Graph<Q16, HeapStorage<Q16>>;

/// Q7.8 on fixed-capacity inline buffers, no heap growth per tensor.
///
/// `EmbeddedGraph::default()` starts from [`GraphConfig::embedded`], so the
/// node arena is bounded.
pub type EmbeddedGraph = Graph<Q8, InlineStorage<Q8, MAX_TENSOR_SIZE>>;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of the [`Graph`] a handle was issued by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(u64);

impl GraphId {
    pub(crate) fn next() -> Self {
        Self(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle to a tensor owned by a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorId {
    /// Caller-created tensor, valid until [`Graph::remove_leaf`].
    Leaf(LeafId),
    /// Operation output, valid until the next sweep.
    Node(NodeId),
}

impl TensorId {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(id) => write!(f, "{id}"),
            Self::Node(id) => write!(f, "{id}"),
        }
    }
}

/// The one or two operands an output was computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Parents {
    lhs: Option<TensorId>,
    rhs: Option<TensorId>,
}

impl Parents {
    pub const fn none() -> Self {
        Self { lhs: None, rhs: None }
    }

    pub const fn unary(input: TensorId) -> Self {
        Self {
            lhs: Some(input),
            rhs: None,
        }
    }

    pub const fn binary(lhs: TensorId, rhs: TensorId) -> Self {
        Self {
            lhs: Some(lhs),
            rhs: Some(rhs),
        }
    }

    #[inline]
    pub fn lhs(&self) -> Option<TensorId> {
        self.lhs
    }

    #[inline]
    pub fn rhs(&self) -> Option<TensorId> {
        self.rhs
    }

    pub fn is_empty(&self) -> bool {
        self.lhs.is_none() && self.rhs.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = TensorId> + use<> {
        self.lhs.into_iter().chain(self.rhs)
    }
}

/// Tensor store and autodiff engine.
pub struct Graph<Q: Fixed, S: Storage<Q>> {
    id: GraphId,
    leaves: LeafStore<Tensor<Q, S>>,
    arena: NodeArena<Tensor<Q, S>>,
    config: GraphConfig,
    pub(crate) rng: StdRng,
}

/// Fixed-capacity storage gets the bounded [`GraphConfig::embedded`] preset,
/// heap storage the unbounded [`GraphConfig::default`].
impl<Q: Fixed, S: Storage<Q>> Default for Graph<Q, S> {
    fn default() -> Self {
        let config = if S::FIXED_CAPACITY {
            GraphConfig::embedded()
        } else {
            GraphConfig::default()
        };
        Self::new(config)
    }
}

impl<Q: Fixed, S: Storage<Q>> Graph<Q, S> {
    pub fn new(config: GraphConfig) -> Self {
        let id = GraphId::next();
        Self {
            id,
            leaves: LeafStore::new(id),
            arena: NodeArena::new(id, config.max_pending_nodes),
            rng: StdRng::seed_from_u64(config.seed),
            config,
        }
    }

    #[inline]
    pub fn id(&self) -> GraphId {
        self.id
    }

    #[inline]
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Restarts the random stream used by [`Graph::random_fill`].
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Takes ownership of a caller-built tensor as a leaf.
    ///
    /// # Errors
    /// Returns [`TensorError::InvalidState`] if the tensor was produced by an operation.
    pub fn insert(&mut self, tensor: Tensor<Q, S>) -> Result<TensorId, TensorError> {
        if !tensor.is_leaf() {
            return Err(TensorError::InvalidState {
                why: "only leaf tensors can be inserted",
            });
        }
        Ok(TensorId::Leaf(self.leaves.insert(tensor)))
    }

    /// Releases a leaf and hands its tensor back. Copies of `id` become
    /// stale, and so does any pending node that reads it during `backward`.
    ///
    /// # Errors
    /// Returns [`TensorError::InvalidState`] for an operation output (those
    /// are reclaimed by [`Graph::sweep`]), plus the errors of [`Graph::get`].
    pub fn remove_leaf(&mut self, id: TensorId) -> Result<Tensor<Q, S>, TensorError> {
        match id {
            TensorId::Leaf(leaf) => self.leaves.remove(leaf),
            TensorId::Node(_) => Err(TensorError::InvalidState {
                why: "operation outputs are reclaimed by sweep, not removed",
            }),
        }
    }

    /// Leaf from nested real data.
    ///
    /// # Errors
    /// See [`Tensor::new`].
    pub fn tensor(&mut self, data: impl Tensorizable, requires_grad: bool) -> Result<TensorId, TensorError> {
        self.insert(Tensor::new(data, requires_grad)?)
    }

    /// Leaf from flat real values and a shape.
    ///
    /// # Errors
    /// See [`Tensor::from_values`].
    pub fn from_values(
        &mut self,
        values: &[f32],
        shape: impl Into<Shape>,
        requires_grad: bool,
    ) -> Result<TensorId, TensorError> {
        self.insert(Tensor::from_values(values, shape, requires_grad)?)
    }

    /// Leaf with every element set to the encoding of `fill`.
    ///
    /// # Errors
    /// See [`Tensor::filled`].
    pub fn filled(&mut self, shape: impl Into<Shape>, fill: f32, requires_grad: bool) -> Result<TensorId, TensorError> {
        self.filled_fixed(shape, Q::encode(fill), requires_grad)
    }

    /// Leaf with every element set to an already-encoded value.
    ///
    /// # Errors
    /// See [`Tensor::filled`].
    pub fn filled_fixed(
        &mut self,
        shape: impl Into<Shape>,
        fill: Q,
        requires_grad: bool,
    ) -> Result<TensorId, TensorError> {
        self.insert(Tensor::filled(shape, fill, requires_grad)?)
    }

    /// Zero leaf with the shape of `like`.
    ///
    /// # Errors
    /// Fails if `like` is not a live tensor of this graph.
    pub fn zeros_like(&mut self, like: TensorId, requires_grad: bool) -> Result<TensorId, TensorError> {
        let shape = self.get(like)?.shape().clone();
        self.filled_fixed(shape, Q::ZERO, requires_grad)
    }

    /// # Errors
    /// Returns [`TensorError::UseAfterReclaim`] for a node swept or a leaf
    /// removed since `id` was issued, or [`TensorError::UnknownTensor`] for a
    /// handle issued by another graph.
    pub fn get(&self, id: TensorId) -> Result<&Tensor<Q, S>, TensorError> {
        match id {
            TensorId::Leaf(leaf) => self.leaves.get(leaf),
            TensorId::Node(node) => self.arena.get(node),
        }
    }

    /// # Errors
    /// See [`Graph::get`].
    pub fn get_mut(&mut self, id: TensorId) -> Result<&mut Tensor<Q, S>, TensorError> {
        match id {
            TensorId::Leaf(leaf) => self.leaves.get_mut(leaf),
            TensorId::Node(node) => self.arena.get_mut(node),
        }
    }

    /// Decoded data of `id`.
    ///
    /// # Errors
    /// See [`Graph::get`].
    pub fn data(&self, id: TensorId) -> Result<Vec<f32>, TensorError> {
        Ok(self.get(id)?.to_vec())
    }

    /// Decoded gradient of `id`.
    ///
    /// # Errors
    /// Returns [`TensorError::InvalidState`] if `id` does not require gradients.
    pub fn grad(&self, id: TensorId) -> Result<Vec<f32>, TensorError> {
        self.get(id)?.grad_to_vec()
    }

    /// # Errors
    /// See [`Tensor::set_requires_grad`].
    pub fn set_requires_grad(&mut self, id: TensorId, requires_grad: bool) -> Result<(), TensorError> {
        self.get_mut(id)?.set_requires_grad(requires_grad)
    }

    /// Number of live leaves.
    #[inline]
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Number of operation outputs awaiting the next sweep.
    #[inline]
    pub fn count_pending(&self) -> usize {
        self.arena.count_pending()
    }

    /// Sweep counter; node handles carry the epoch they were issued in.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.arena.epoch()
    }

    /// Reclaims every operation output. Leaves are untouched. Returns the
    /// number of nodes reclaimed.
    pub fn sweep(&mut self) -> usize {
        let reclaimed = self.arena.sweep();
        debug!(reclaimed, epoch = self.arena.epoch(), "swept node arena");
        reclaimed
    }

    /// Seeds `root`'s gradient with ones and propagates it to every ancestor.
    ///
    /// Each backward rule runs once, after every consumer of its node has
    /// contributed. Intermediate gradients restart from zero on every pass;
    /// leaf gradients accumulate until [`Graph::zero_grad`].
    ///
    /// # Errors
    /// Returns [`TensorError::InvalidState`] if `root` does not require
    /// gradients, [`TensorError::NumericRange`] on overflow under
    /// [`OverflowPolicy::Trap`], and lookup errors for stale handles.
    pub fn backward(&mut self, root: TensorId) -> Result<(), TensorError> {
        let node = self.get_mut(root)?;
        if !node.requires_grad() {
            return Err(TensorError::InvalidState {
                why: "backward on a tensor that does not require gradients",
            });
        }
        node.fill_grad(Q::ONE);
        self.propagate(root)
    }

    /// Like [`Graph::backward`] with `seed` as `root`'s gradient.
    ///
    /// # Errors
    /// Returns [`TensorError::LengthMismatch`] if `seed` does not cover
    /// `root`, plus the errors of [`Graph::backward`].
    pub fn backward_with_grad(&mut self, root: TensorId, seed: &[f32]) -> Result<(), TensorError> {
        let grad = self.get_mut(root)?.grad_mut()?;
        if grad.len() != seed.len() {
            return Err(TensorError::LengthMismatch {
                expected: grad.len(),
                actual: seed.len(),
            });
        }
        let mut overflowed = false;
        for (g, &s) in grad.iter_mut().zip(seed) {
            let (q, o) = Q::overflowing_encode(s);
            *g = q;
            overflowed |= o;
        }
        self.check_overflow("backward", overflowed)?;
        self.propagate(root)
    }

    fn propagate(&mut self, root: TensorId) -> Result<(), TensorError> {
        let _span = debug_span!("backward", %root).entered();
        let order = self.topological_order(root)?;

        for &id in order.iter().skip(1) {
            if !id.is_leaf() {
                self.get_mut(id)?.fill_grad(Q::ZERO);
            }
        }

        let mut overflowed = false;
        for &id in &order {
            let node = self.get(id)?;
            let Some(rule) = node.rule().copied() else {
                continue;
            };
            let parents = *node.parents();
            let _rule_span = trace_span!("rule", op = rule.name(), node = %id).entered();

            let lhs = parents.lhs().map(|p| self.get(p)).transpose()?;
            let rhs = parents.rhs().map(|p| self.get(p)).transpose()?;
            let grads = rule.gradients(node, lhs, rhs)?;
            overflowed |= grads.overflowed;

            if let (Some(p), Some(delta)) = (parents.lhs(), grads.lhs) {
                overflowed |= self.get_mut(p)?.accumulate_grad(delta.as_slice())?;
            }
            if let (Some(p), Some(delta)) = (parents.rhs(), grads.rhs) {
                overflowed |= self.get_mut(p)?.accumulate_grad(delta.as_slice())?;
            }
        }
        trace!(nodes = order.len(), "backward pass complete");
        self.check_overflow("backward", overflowed)
    }

    /// Reachable nodes from `root`, every node before its parents.
    fn topological_order(&self, root: TensorId) -> Result<Vec<TensorId>, TensorError> {
        let mut visited = HashSet::new();
        let mut post = Vec::new();
        // (node, parents already pushed)
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                post.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            for parent in self.get(id)?.parents().iter() {
                if !visited.contains(&parent) {
                    stack.push((parent, false));
                }
            }
        }
        post.reverse();
        Ok(post)
    }

    /// Zeroes the gradient of `root` and of every tensor it depends on,
    /// leaves included.
    ///
    /// # Errors
    /// Fails on stale or foreign handles.
    pub fn zero_grad(&mut self, root: TensorId) -> Result<(), TensorError> {
        for id in self.topological_order(root)? {
            self.get_mut(id)?.fill_grad(Q::ZERO);
        }
        Ok(())
    }

    /// Gradient-descent step on `id`, see [`Tensor::update`].
    ///
    /// # Errors
    /// Returns [`TensorError::InvalidState`] if `id` does not require
    /// gradients, or [`TensorError::NumericRange`] on overflow under
    /// [`OverflowPolicy::Trap`].
    pub fn update(&mut self, id: TensorId, rate: f32) -> Result<(), TensorError> {
        let overflowed = self.get_mut(id)?.update(rate)?;
        self.check_overflow("update", overflowed)
    }

    /// Applies the overflow policy to a primitive's overflow flag.
    pub(crate) fn check_overflow(&self, op: &'static str, overflowed: bool) -> Result<(), TensorError> {
        if !overflowed {
            return Ok(());
        }
        match self.config.overflow {
            OverflowPolicy::Trap => Err(TensorError::NumericRange { op }),
            OverflowPolicy::Saturate => {
                debug!(op, "fixed-point overflow saturated");
                Ok(())
            }
        }
    }

    /// Records the output of a differentiable operation: the output requires
    /// gradients iff any operand does, and only then keeps `parents` and `rule`.
    pub(crate) fn record(
        &mut self,
        op: &'static str,
        shape: Shape,
        data: S,
        parents: Parents,
        rule: BackwardRule<Q>,
        overflowed: bool,
    ) -> Result<TensorId, TensorError> {
        self.check_overflow(op, overflowed)?;
        let mut requires_grad = false;
        for parent in parents.iter() {
            requires_grad |= self.get(parent)?.requires_grad();
        }
        self.register(op, shape, data, requires_grad, parents, Some(rule))
    }

    /// Places an operation output in the arena.
    pub(crate) fn register(
        &mut self,
        op: &'static str,
        shape: Shape,
        data: S,
        requires_grad: bool,
        parents: Parents,
        rule: Option<BackwardRule<Q>>,
    ) -> Result<TensorId, TensorError> {
        let mut tensor = Tensor::from_raw(data, shape, requires_grad)?;
        if requires_grad {
            tensor = tensor.with_creator(parents, rule);
        }
        let id = TensorId::Node(self.arena.register(tensor)?);
        trace!(op, %id, requires_grad, "recorded node");
        Ok(id)
    }
}

impl<Q: Fixed, S: Storage<Q>> fmt::Debug for Graph<Q, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("leaves", &self.leaves.len())
            .field("pending", &self.arena.count_pending())
            .field("epoch", &self.arena.epoch())
            .field("config", &self.config)
            .finish()
    }
}
