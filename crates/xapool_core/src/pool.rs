//! Pool bookkeeping: idle queue, branch map and active slot.

use crate::error::{PoolError, PoolResult};
use std::collections::{HashMap, VecDeque};
use xapool_facade::Xid;

/// Runtime state of a pooling provider.
///
/// Every facade the provider owns lives in exactly one place: the idle
/// queue or the branch map. The active slot does not own a facade; it
/// names the branch-map entry that is currently active, so the active
/// facade is always also mapped.
#[derive(Debug)]
pub(crate) struct PoolState<T> {
    /// Idle facades, oldest-returned first.
    idle: VecDeque<T>,
    /// Facades bound to an active or prepared branch.
    mapped: HashMap<Xid, T>,
    /// The branch whose facade is active, if any.
    active: Option<Xid>,
}

impl<T> Default for PoolState<T> {
    fn default() -> Self {
        Self {
            idle: VecDeque::new(),
            mapped: HashMap::new(),
            active: None,
        }
    }
}

impl<T> PoolState<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn active(&self) -> Option<&Xid> {
        self.active.as_ref()
    }

    pub(crate) fn active_facade(&self) -> Option<&T> {
        self.active.as_ref().and_then(|xid| self.mapped.get(xid))
    }

    pub(crate) fn active_facade_mut(&mut self) -> Option<&mut T> {
        match &self.active {
            Some(xid) => self.mapped.get_mut(xid),
            None => None,
        }
    }

    pub(crate) fn is_mapped(&self, xid: &Xid) -> bool {
        self.mapped.contains_key(xid)
    }

    pub(crate) fn mapped_facade(&self, xid: &Xid) -> Option<&T> {
        self.mapped.get(xid)
    }

    /// Maps `facade` under `xid` and marks it active.
    pub(crate) fn bind_active(&mut self, xid: Xid, facade: T) {
        self.active = Some(xid.clone());
        self.mapped.insert(xid, facade);
    }

    /// Empties the active slot; the facade stays mapped.
    pub(crate) fn clear_active(&mut self) -> Option<Xid> {
        self.active.take()
    }

    /// Removes the facade bound to `xid`, clearing the active slot if it
    /// pointed at that branch.
    pub(crate) fn unbind(&mut self, xid: &Xid) -> Option<T> {
        let facade = self.mapped.remove(xid)?;
        if self.active.as_ref() == Some(xid) {
            self.active = None;
        }
        Some(facade)
    }

    /// Dequeues the oldest idle facade.
    pub(crate) fn take_idle(&mut self) -> Option<T> {
        self.idle.pop_front()
    }

    /// Returns a facade to the tail of the idle queue.
    pub(crate) fn offer_idle(&mut self, facade: T) {
        self.idle.push_back(facade);
    }

    /// Returns the head of the idle queue without removing it, enqueueing
    /// a facade from `create` first if the queue is empty.
    pub(crate) fn peek_idle_or_insert_with<F>(&mut self, create: F) -> PoolResult<&mut T>
    where
        F: FnOnce() -> PoolResult<T>,
    {
        if self.idle.is_empty() {
            let facade = create()?;
            self.idle.push_back(facade);
        }
        self.idle
            .front_mut()
            .ok_or_else(|| PoolError::state_violation("idle pool empty after insert"))
    }

    pub(crate) fn idle_len(&self) -> usize {
        self.idle.len()
    }

    pub(crate) fn mapped_len(&self) -> usize {
        self.mapped.len()
    }

    pub(crate) fn mapped_branches(&self) -> impl Iterator<Item = &Xid> {
        self.mapped.keys()
    }

    pub(crate) fn idle_iter(&self) -> impl Iterator<Item = &T> {
        self.idle.iter()
    }

    /// Consumes the state, yielding every facade it owns: mapped ones
    /// first, then the idle queue in order.
    pub(crate) fn into_facades(self) -> impl Iterator<Item = T> {
        self.mapped.into_values().chain(self.idle)
    }
}
