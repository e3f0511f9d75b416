use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::SubscriberId;

/// Subscribers whose alert evaluation is suspended, e.g. while they are in
/// the middle of creating a tracker interactively.
///
/// A pause lasts as long as its [`PauseGuard`]; nested pauses for the same
/// subscriber are counted and the subscriber resumes when the last guard drops.
#[derive(Debug, Clone, Default)]
pub struct PauseRegistry {
    inner: Arc<Mutex<HashMap<SubscriberId, usize>>>,
}

impl PauseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use = "the subscriber resumes as soon as the guard is dropped"]
    pub fn pause(&self, subscriber: SubscriberId) -> PauseGuard {
        let depth = {
            let mut paused = self.lock();
            let depth = paused.entry(subscriber).or_insert(0);
            *depth += 1;
            *depth
        };
        debug!(subscriber_id = %subscriber, depth, "subscriber paused");
        PauseGuard {
            registry: self.clone(),
            subscriber,
        }
    }

    pub fn is_paused(&self, subscriber: SubscriberId) -> bool {
        self.lock().contains_key(&subscriber)
    }

    pub fn paused(&self) -> Vec<SubscriberId> {
        let mut paused = self.lock().keys().copied().collect::<Vec<_>>();
        paused.sort();
        paused
    }

    fn release(&self, subscriber: SubscriberId) {
        let mut paused = self.lock();
        if let Some(depth) = paused.get_mut(&subscriber) {
            *depth -= 1;
            if *depth == 0 {
                paused.remove(&subscriber);
                debug!(subscriber_id = %subscriber, "subscriber resumed");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, usize>> {
        self.inner
            .lock()
            .expect("pause registry lock is not poisoned")
    }
}

/// Keeps a subscriber paused until dropped.
#[derive(Debug)]
pub struct PauseGuard {
    registry: PauseRegistry,
    subscriber: SubscriberId,
}

impl PauseGuard {
    pub fn subscriber(&self) -> SubscriberId {
        self.subscriber
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.registry.release(self.subscriber);
    }
}
