use std::collections::{BTreeMap, HashSet};

use crate::{
    error::SimError,
    event::{Action, EventHandle, EventKey, ScheduledEvent},
    time::SimTime,
};

/// Pending events in execution order.
///
/// Backed by a B-tree keyed on [`EventKey`]; the sequence number makes
/// every key unique, so the tree is a strict total order.
pub struct EventQueue<T: SimTime> {
    events: BTreeMap<EventKey<T>, Action<T>>,
    seqs: HashSet<u64>,
}

impl<T: SimTime> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            events: BTreeMap::new(),
            seqs: HashSet::new(),
        }
    }

    /// Queue an event. A second event with an already queued sequence
    /// number is refused.
    pub fn insert(&mut self, event: ScheduledEvent<T>) -> Result<EventHandle<T>, SimError> {
        let key = event.key;
        if !self.seqs.insert(key.seq) {
            return Err(SimError::DuplicateEvent(key.seq));
        }
        self.events.insert(key, event.action);
        Ok(EventHandle(key))
    }

    pub fn peek_first(&self) -> Option<&EventKey<T>> {
        self.events.first_key_value().map(|(key, _)| key)
    }

    pub fn first_time(&self) -> Option<T> {
        self.peek_first().map(|key| key.time)
    }

    /// `None` when the queue is empty.
    pub fn remove_first(&mut self) -> Option<ScheduledEvent<T>> {
        let (key, action) = self.events.pop_first()?;
        self.seqs.remove(&key.seq);
        Some(ScheduledEvent { key, action })
    }

    /// Remove a pending event. Returns false if it already ran, was
    /// already cancelled or never belonged to this queue.
    pub fn cancel(&mut self, handle: &EventHandle<T>) -> bool {
        match self.events.remove(&handle.0) {
            Some(_) => {
                self.seqs.remove(&handle.0.seq);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, handle: &EventHandle<T>) -> bool {
        self.events.contains_key(&handle.0)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.seqs.clear();
    }

    /// Empty the queue, yielding the events in execution order.
    pub fn drain_ordered(&mut self) -> Vec<ScheduledEvent<T>> {
        self.seqs.clear();
        std::mem::take(&mut self.events)
            .into_iter()
            .map(|(key, action)| ScheduledEvent { key, action })
            .collect()
    }
}

impl<T: SimTime> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
