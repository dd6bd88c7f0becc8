//! Per-key write locks.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::DatasetKey;

/// One mutex per dataset key, created on first use.
///
/// Writers of the same key serialize; writers of different keys and all
/// readers proceed independently.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<DatasetKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &DatasetKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
