//! Single-flight guard for synchronization passes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::game::{Environment, GameType};

/// Serializes passes that target the same game and environment.
///
/// Passes for different targets run concurrently; a second pass for a busy
/// target waits for the first to finish.
#[derive(Clone, Default)]
pub struct SyncGuard {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SyncGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(game: GameType, environment: Environment) -> String {
        format!("{}/{}", game, environment)
    }

    /// Wait until no other pass holds the target, then hold it until the
    /// returned guard is dropped.
    pub async fn acquire(&self, game: GameType, environment: Environment) -> OwnedMutexGuard<()> {
        let key = Self::key(game, environment);
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        if lock.try_lock().is_err() {
            debug!("Pass for {} already running, waiting", key);
        }
        lock.lock_owned().await
    }

    /// Whether a pass currently holds the target.
    pub fn is_running(&self, game: GameType, environment: Environment) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .get(&Self::key(game, environment))
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}
