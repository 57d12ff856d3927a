//! Hierarchical capacity accounting.
//!
//! A [`CapacitySource`] hands out units of permission to run one concurrent
//! operation. Sources can be chained to a parent: a unit is granted only when
//! the node and every ancestor have a free unit at the same moment, and the
//! grant takes one unit from all of them at once. This lets a per-job (local)
//! ceiling and a process-wide (global) ceiling be enforced with one primitive.
//!
//! Capacity is returned by dropping the [`CapacityPermit`] that `acquire`
//! produced, so a release without a matching acquire cannot be expressed.
//!
//! # Locking
//!
//! A grant locks the chain leaf-to-root, checks every level, and either
//! decrements all of them or parks a waiter on the first level without
//! capacity before unlocking. Every acquirer locks in the same (depth) order,
//! so concurrent chains sharing an ancestor cannot deadlock. A release
//! increments each level separately and wakes every waiter parked on it; woken
//! waiters retry the whole chain.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::core::TaskPoolError;

/// Mutable per-node state, guarded by the node mutex.
struct NodeState {
    available: u32,
    /// Acquirers parked on this level, oldest first.
    waiters: VecDeque<oneshot::Sender<()>>,
}

struct CapacityNode {
    label: String,
    total_units: u32,
    state: Mutex<NodeState>,
    /// Children reference their parent; parents never know their children.
    parent: Option<CapacitySource>,
}

/// A concurrency budget, optionally chained to a parent budget.
///
/// Cloning is cheap and shares the same budget.
#[derive(Clone)]
pub struct CapacitySource {
    node: Arc<CapacityNode>,
}

impl CapacitySource {
    /// Create a root capacity source with `total_units` units.
    ///
    /// # Errors
    ///
    /// Returns [`TaskPoolError::InvalidCapacity`] if `total_units` is zero.
    pub fn new(label: impl Into<String>, total_units: u32) -> Result<Self, TaskPoolError> {
        Self::build(label.into(), total_units, None)
    }

    /// Create a capacity source whose grants also consume a unit from `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskPoolError::InvalidCapacity`] if `total_units` is zero.
    pub fn with_parent(
        label: impl Into<String>,
        total_units: u32,
        parent: &Self,
    ) -> Result<Self, TaskPoolError> {
        Self::build(label.into(), total_units, Some(parent.clone()))
    }

    fn build(label: String, total_units: u32, parent: Option<Self>) -> Result<Self, TaskPoolError> {
        if total_units == 0 {
            return Err(TaskPoolError::InvalidCapacity(format!(
                "`{label}` must have at least one unit"
            )));
        }
        debug!(
            capacity = %label,
            total_units,
            parent = parent.as_ref().map(|p| p.label()),
            "capacity source created"
        );
        Ok(Self {
            node: Arc::new(CapacityNode {
                label,
                total_units,
                state: Mutex::new(NodeState {
                    available: total_units,
                    waiters: VecDeque::new(),
                }),
                parent,
            }),
        })
    }

    /// Label used in logs.
    pub fn label(&self) -> &str {
        &self.node.label
    }

    /// Units this node was created with.
    pub fn total_units(&self) -> u32 {
        self.node.total_units
    }

    /// Units currently free at this node (ancestors not considered).
    pub fn available_units(&self) -> u32 {
        self.node.state.lock().available
    }

    /// Units currently held by permits granted through this node.
    pub fn in_flight(&self) -> u32 {
        self.node.total_units - self.available_units()
    }

    /// Parent source, if chained.
    pub fn parent(&self) -> Option<&Self> {
        self.node.parent.as_ref()
    }

    /// Whether a unit is free at this node and at every ancestor right now.
    ///
    /// The answer can be stale as soon as it is returned; use
    /// [`try_acquire`](Self::try_acquire) to actually take a unit.
    pub fn peek(&self) -> bool {
        self.chain()
            .iter()
            .all(|node| node.state.lock().available > 0)
    }

    /// Take one unit at every level if all of them have one, without waiting.
    pub fn try_acquire(&self) -> Option<CapacityPermit> {
        self.attempt(&mut None).then(|| self.permit())
    }

    /// Take one unit at every level, suspending until all levels can grant.
    ///
    /// Waiting does not hold a unit at any level. Dropping the returned future
    /// abandons the request without consuming capacity.
    pub async fn acquire(&self) -> CapacityPermit {
        loop {
            let (tx, rx) = oneshot::channel();
            let mut waiter = Some(tx);
            if self.attempt(&mut waiter) {
                return self.permit();
            }
            // The sender lives in a node queue owned by this chain, so the only
            // outcome is a wake-up.
            let _ = rx.await;
        }
    }

    fn permit(&self) -> CapacityPermit {
        trace!(capacity = %self.node.label, "unit granted");
        CapacityPermit {
            source: self.clone(),
        }
    }

    /// Nodes from this one up to the root.
    fn chain(&self) -> Vec<&CapacityNode> {
        let mut nodes = vec![self.node.as_ref()];
        let mut cursor = self.node.parent.as_ref();
        while let Some(parent) = cursor {
            nodes.push(parent.node.as_ref());
            cursor = parent.node.parent.as_ref();
        }
        nodes
    }

    /// All-or-nothing grant across the chain. On failure the waiter, if any,
    /// is parked on the first level that had no capacity.
    fn attempt(&self, waiter: &mut Option<oneshot::Sender<()>>) -> bool {
        let chain = self.chain();
        let mut guards: Vec<MutexGuard<'_, NodeState>> =
            chain.iter().map(|&node| node.state.lock()).collect();

        if let Some(blocked) = guards.iter().position(|state| state.available == 0) {
            if let Some(tx) = waiter.take() {
                guards[blocked].waiters.push_back(tx);
            }
            trace!(
                capacity = %self.node.label,
                blocked_on = %chain[blocked].label,
                "no capacity"
            );
            return false;
        }

        for state in &mut guards {
            state.available -= 1;
        }
        true
    }

    fn release_one(&self) {
        for node in self.chain() {
            let woken = {
                let mut state = node.state.lock();
                debug_assert!(
                    state.available < node.total_units,
                    "capacity `{}` released more units than it granted",
                    node.label
                );
                state.available = (state.available + 1).min(node.total_units);
                std::mem::take(&mut state.waiters)
            };
            for waiter in woken {
                let _ = waiter.send(());
            }
        }
        trace!(capacity = %self.node.label, "unit released");
    }
}

impl fmt::Debug for CapacitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapacitySource")
            .field("label", &self.node.label)
            .field("total_units", &self.node.total_units)
            .field("available_units", &self.available_units())
            .field("parent", &self.node.parent.as_ref().map(Self::label))
            .finish()
    }
}

/// One granted unit of capacity at a node and all of its ancestors.
///
/// The unit is returned to every level when the permit is dropped.
#[must_use = "capacity is released as soon as the permit is dropped"]
pub struct CapacityPermit {
    source: CapacitySource,
}

impl CapacityPermit {
    /// Source the unit was granted from.
    pub const fn source(&self) -> &CapacitySource {
        &self.source
    }

    /// Return the unit now. Equivalent to dropping the permit.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for CapacityPermit {
    fn drop(&mut self) {
        self.source.release_one();
    }
}

impl fmt::Debug for CapacityPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapacityPermit")
            .field("source", &self.source.label())
            .finish()
    }
}
