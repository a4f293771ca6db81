//! Per-customer mutual exclusion: at most one in-flight cycle per customer id,
//! unconstrained across customers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct CustomerLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CustomerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `customer_id`. Released when the guard drops.
    pub async fn acquire(&self, customer_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            // entries nobody holds or waits on
            map.retain(|_, l| Arc::strong_count(l) > 1);
            map.entry(customer_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Customers with a held or awaited lock.
    pub fn active(&self) -> usize {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.values().filter(|l| Arc::strong_count(l) > 1).count()
    }
}
