use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use callsight_core::domain::call::CallId;

/// One async mutex per call id. Different calls never contend.
///
/// Every holder and every pending waiter is counted against its entry; the
/// entry is pruned when that count reaches zero, including when a waiter is
/// cancelled before it ever gets the lock.
#[derive(Default)]
pub struct CallLocks {
    locks: Mutex<HashMap<String, Slot>>,
}

struct Slot {
    lock: Arc<AsyncMutex<()>>,
    users: usize,
}

struct Registration<'a> {
    owner: &'a CallLocks,
    call_id: String,
}

pub struct CallGuard<'a> {
    // Field order matters: the mutex is released before the registration.
    _guard: OwnedMutexGuard<()>,
    _registration: Registration<'a>,
}

impl CallLocks {
    pub async fn acquire(&self, call_id: &CallId) -> CallGuard<'_> {
        let (lock, registration) = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let slot = locks
                .entry(call_id.0.clone())
                .or_insert_with(|| Slot { lock: Arc::default(), users: 0 });
            slot.users += 1;
            (slot.lock.clone(), Registration { owner: self, call_id: call_id.0.clone() })
        };
        let guard = lock.lock_owned().await;
        CallGuard { _guard: guard, _registration: registration }
    }

    pub fn active(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut locks = self.owner.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(slot) = locks.get_mut(&self.call_id) else {
            return;
        };
        slot.users = slot.users.saturating_sub(1);
        if slot.users == 0 {
            locks.remove(&self.call_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use callsight_core::domain::call::CallId;

    use super::CallLocks;

    #[tokio::test]
    async fn same_call_is_serialized_other_calls_are_not() {
        let locks = Arc::new(CallLocks::default());
        let first = locks.acquire(&CallId("a".to_string())).await;

        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&CallId("b".to_string()))).await;
        assert!(other.is_ok());
        drop(other);

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&CallId("a".to_string()))).await;
        assert!(blocked.is_err());

        drop(first);
        let reacquired =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire(&CallId("a".to_string()))).await;
        assert!(reacquired.is_ok());
        drop(reacquired);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiters_do_not_leak_entries() {
        let locks = CallLocks::default();
        let call_id = CallId("a".to_string());

        let holder = locks.acquire(&call_id).await;
        let timed_out = tokio::time::timeout(Duration::from_millis(20), locks.acquire(&call_id)).await;
        assert!(timed_out.is_err());
        assert_eq!(locks.active(), 1);

        let mut waiter = Box::pin(locks.acquire(&call_id));
        assert!(tokio::time::timeout(Duration::from_millis(20), &mut waiter).await.is_err());
        drop(holder);
        assert_eq!(locks.active(), 1, "the pending waiter still owns the entry");

        drop(waiter);
        assert_eq!(locks.active(), 0);
    }
}
