use std::sync::Weak;

use parking_lot::Mutex;

/// Implemented by anything that can be torn down at process shutdown
/// (engines, brokers).
pub trait Teardown: Send + Sync {
    fn teardown(&self);
}

/// Explicit registry of live components for graceful shutdown.
///
/// Owned by whatever composes the process's top-level lifecycle; members
/// are held weakly so the registry never extends their lifetime.
#[derive(Default)]
pub struct LifecycleRegistry {
    members: Mutex<Vec<Weak<dyn Teardown>>>,
}

impl LifecycleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, member: Weak<dyn Teardown>) {
        self.members.lock().push(member);
    }

    /// Tear down every still-live member and empty the registry.
    pub fn shutdown_all(&self) {
        let members = std::mem::take(&mut *self.members.lock());
        let mut torn_down = 0usize;
        for member in members {
            if let Some(member) = member.upgrade() {
                member.teardown();
                torn_down += 1;
            }
        }
        log::info!("lifecycle registry shut down {torn_down} member(s)");
    }

    /// Number of members still alive; prunes dropped ones.
    pub fn live_count(&self) -> usize {
        let mut members = self.members.lock();
        members.retain(|m| m.strong_count() > 0);
        members.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct Counted(Arc<AtomicUsize>);

    impl Teardown for Counted {
        fn teardown(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn shutdown_tears_down_live_members_once() {
        let registry = LifecycleRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let member: Arc<dyn Teardown> = Arc::new(Counted(Arc::clone(&calls)));
        registry.register(Arc::downgrade(&member));

        registry.shutdown_all();
        registry.shutdown_all();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_members_are_skipped() {
        let registry = LifecycleRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let member: Arc<dyn Teardown> = Arc::new(Counted(Arc::clone(&calls)));
            registry.register(Arc::downgrade(&member));
        }
        assert_eq!(registry.live_count(), 0);
        registry.shutdown_all();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
