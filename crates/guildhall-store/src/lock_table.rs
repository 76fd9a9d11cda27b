// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-entity mutual exclusion: a `Mutex<HashMap<id, Arc<Mutex<()>>>>` that
/// hands out a dedicated lock per id, so concurrent mutations to the same
/// entity serialize while mutations to different entities never contend
/// (spec §4.G "concurrent mutations to the same session must serialize").
#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            locks.entry(id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        entry.lock_owned().await
    }
}
