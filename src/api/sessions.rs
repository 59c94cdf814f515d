//! Per-session turn serialization
//!
//! A turn loads the stored history, runs the agent and writes the extended
//! history back. Two turns on one session must not interleave, or the later
//! write drops the earlier turn.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as TurnLock, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<Uuid, Arc<TurnLock<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other turn holds `session`. The lock is released when
    /// the guard drops.
    pub async fn acquire(&self, session: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // idle entries are only referenced by the map
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(session).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_session_waits() {
        let locks = Arc::new(SessionLocks::new());
        let session = Uuid::new_v4();
        let guard = locks.acquire(session).await;

        let waiting = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(session).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        // other sessions are independent
        let _other = locks.acquire(Uuid::new_v4()).await;

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_released_sessions_are_forgotten() {
        let locks = SessionLocks::new();
        for _ in 0..10 {
            let _guard = locks.acquire(Uuid::new_v4()).await;
        }
        let _held = locks.acquire(Uuid::new_v4()).await;
        assert_eq!(locks.tracked(), 1);
    }
}
