//! In-process warehouse locks.
//!
//! A ledger operation holds the locks of every warehouse it touches from the
//! first read to the commit. Locking the warehouse rather than the single
//! (product, warehouse) key also covers the capacity check, which reads the
//! warehouse-wide total.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use stockledger_core::WarehouseId;

#[derive(Debug, Default)]
pub struct WarehouseLocks {
    locks: Mutex<HashMap<WarehouseId, Arc<AsyncMutex<()>>>>,
}

/// Held locks; released on drop.
#[derive(Debug)]
pub struct WarehouseGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl WarehouseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock all `warehouses`, always in ascending id order so concurrent
    /// transfers in opposite directions cannot deadlock.
    pub async fn lock(&self, warehouses: &[WarehouseId]) -> WarehouseGuard {
        let mut ids = warehouses.to_vec();
        ids.sort();
        ids.dedup();

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            ids.iter()
                .map(|id| locks.entry(*id).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        WarehouseGuard { _guards: guards }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_locker_waits_for_first() {
        let locks = Arc::new(WarehouseLocks::new());
        let w = WarehouseId::new();

        let guard = locks.lock(&[w]).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&[w]).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn opposite_order_requests_do_not_deadlock() {
        let locks = Arc::new(WarehouseLocks::new());
        let a = WarehouseId::new();
        let b = WarehouseId::new();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let locks = locks.clone();
            let order = if i % 2 == 0 { [a, b] } else { [b, a] };
            tasks.push(tokio::spawn(async move {
                let _g = locks.lock(&order).await;
                tokio::task::yield_now().await;
            }));
        }
        for t in tasks {
            tokio::time::timeout(Duration::from_secs(2), t).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn duplicate_ids_lock_once() {
        let locks = WarehouseLocks::new();
        let w = WarehouseId::new();
        let _g = tokio::time::timeout(Duration::from_secs(1), locks.lock(&[w, w]))
            .await
            .unwrap();
    }
}
