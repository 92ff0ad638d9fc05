//! Epoch arena owning every intermediate node produced by an operation.
//!
//! Nodes are addressed by [`NodeId`], an index stamped with the epoch it was
//! issued in. [`NodeArena::sweep`] drops every node at once and advances the
//! epoch, so a handle kept across a sweep is rejected with
//! [`TensorError::UseAfterReclaim`] instead of aliasing a newer node.

use std::{cmp::Ordering, fmt};

use crate::{
    error::TensorError,
    graph::{GraphId, TensorId},
};

/// Handle to a node in a [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: usize,
    epoch: u64,
    graph: GraphId,
}

impl NodeId {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}@{}", self.index, self.epoch)
    }
}

/// Registry of intermediate nodes created since the last sweep.
#[derive(Debug)]
pub struct NodeArena<T> {
    nodes: Vec<T>,
    epoch: u64,
    capacity: Option<usize>,
    owner: GraphId,
}

impl<T> NodeArena<T> {
    /// Creates an arena for `owner`, bounded to `capacity` live nodes if given.
    pub fn new(owner: GraphId, capacity: Option<usize>) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity.unwrap_or(0)),
            epoch: 0,
            capacity,
            owner,
        }
    }

    /// Takes ownership of `node` until the next sweep.
    ///
    /// # Errors
    /// Returns [`TensorError::CapacityExceeded`] if the arena is bounded and full.
    pub fn register(&mut self, node: T) -> Result<NodeId, TensorError> {
        if let Some(capacity) = self.capacity
            && self.nodes.len() >= capacity
        {
            return Err(TensorError::CapacityExceeded {
                requested: self.nodes.len() + 1,
                capacity,
            });
        }
        let id = NodeId {
            index: self.nodes.len(),
            epoch: self.epoch,
            graph: self.owner,
        };
        self.nodes.push(node);
        Ok(id)
    }

    /// # Errors
    /// Returns [`TensorError::UseAfterReclaim`] for a handle from an earlier
    /// epoch, [`TensorError::UnknownTensor`] for one this arena never issued
    /// (including handles of another graph).
    pub fn get(&self, id: NodeId) -> Result<&T, TensorError> {
        self.check(id)?;
        self.nodes
            .get(id.index)
            .ok_or(TensorError::UnknownTensor { id: TensorId::Node(id) })
    }

    /// # Errors
    /// See [`NodeArena::get`].
    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut T, TensorError> {
        self.check(id)?;
        self.nodes
            .get_mut(id.index)
            .ok_or(TensorError::UnknownTensor { id: TensorId::Node(id) })
    }

    fn check(&self, id: NodeId) -> Result<(), TensorError> {
        if id.graph != self.owner {
            return Err(TensorError::UnknownTensor { id: TensorId::Node(id) });
        }
        match id.epoch.cmp(&self.epoch) {
            Ordering::Less => Err(TensorError::UseAfterReclaim { id: TensorId::Node(id) }),
            Ordering::Greater => Err(TensorError::UnknownTensor { id: TensorId::Node(id) }),
            Ordering::Equal => Ok(()),
        }
    }

    /// Drops every registered node and starts a new epoch.
    ///
    /// Returns the number of nodes reclaimed. Sweeping an empty arena is a
    /// no-op apart from the epoch bump.
    pub fn sweep(&mut self) -> usize {
        let reclaimed = self.nodes.len();
        self.nodes.clear();
        self.epoch += 1;
        reclaimed
    }

    /// Number of nodes awaiting the next sweep.
    #[inline]
    pub fn count_pending(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}
