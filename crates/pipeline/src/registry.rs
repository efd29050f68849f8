use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::Tracker;

/// Set of live trackers keyed by identity.
#[derive(Default)]
pub struct TrackerRegistry {
    trackers: RwLock<HashMap<String, Arc<Tracker>>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins tracking a request.
    pub fn track(&self, tracker: Arc<Tracker>) {
        let mut trackers = self.trackers.write().unwrap_or_else(PoisonError::into_inner);
        trackers.insert(tracker.identity().to_string(), tracker);
    }

    /// Stops tracking `tracker`. A newer tracker registered under the same
    /// identity is left alone.
    pub fn untrack(&self, tracker: &Arc<Tracker>) {
        let mut trackers = self.trackers.write().unwrap_or_else(PoisonError::into_inner);
        if trackers
            .get(tracker.identity())
            .is_some_and(|current| Arc::ptr_eq(current, tracker))
        {
            trackers.remove(tracker.identity());
        }
    }

    pub fn get(&self, identity: &str) -> Option<Arc<Tracker>> {
        let trackers = self.trackers.read().unwrap_or_else(PoisonError::into_inner);
        trackers.get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.trackers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
