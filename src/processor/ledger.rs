use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Notification ids first written during this process lifetime, oldest
/// first. Holds at most `capacity` ids; older ones are evicted.
#[derive(Debug)]
pub struct SessionLedger {
    capacity: usize,
    ids: Mutex<VecDeque<String>>,
}

impl SessionLedger {
    /// A capacity of zero disables recording.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ids: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn record(&self, id: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if ids.len() == self.capacity {
            ids.pop_front();
        }
        ids.push_back(id.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        let ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        ids.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
