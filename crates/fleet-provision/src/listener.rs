//! Provisioning listeners, notified around every launch.
//!
//! Listeners are called synchronously in registration order. Each call is
//! isolated: a panicking listener is logged and the remaining listeners
//! still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use fleet_core::WorkerTemplate;
use tracing::{debug, error};

/// Observer of provisioning activity.
///
/// Every method has a no-op default so implementors only override the
/// events they care about.
pub trait ProvisioningListener: Send + Sync {
    fn name(&self) -> &str;

    /// Asked before a controller provisions `instances` from `template`.
    /// Returning `Err(reason)` vetoes the attempt on that controller.
    fn on_check(&self, _controller: &str, _template: &WorkerTemplate, _instances: u32) -> Result<(), String> {
        Ok(())
    }

    /// Instances were inserted and their launches started.
    fn on_started(&self, _controller: &str, _template: &WorkerTemplate, _workers: &[String]) {}

    /// A pending worker came online.
    fn on_complete(&self, _controller: &str, _worker: &str) {}

    /// A pending worker failed to launch.
    fn on_failure(&self, _controller: &str, _worker: &str, _error: &str) {}
}

/// A listener veto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Veto {
    pub listener: String,
    pub reason: String,
}

/// Ordered, immutable set of listeners. Cheap to clone.
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Arc<Vec<Arc<dyn ProvisioningListener>>>,
}

impl ListenerSet {
    /// Listeners are called in the given order.
    pub fn new(listeners: Vec<Arc<dyn ProvisioningListener>>) -> Self {
        Self {
            listeners: Arc::new(listeners),
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// First veto raised by any listener. A listener that panics does not
    /// veto.
    pub fn check(&self, controller: &str, template: &WorkerTemplate, instances: u32) -> Option<Veto> {
        for listener in self.listeners.iter() {
            let verdict = isolated(listener.as_ref(), "on_check", || {
                listener.on_check(controller, template, instances)
            });
            if let Some(Err(reason)) = verdict {
                return Some(Veto {
                    listener: listener.name().to_string(),
                    reason,
                });
            }
        }
        None
    }

    /// Announce that `workers` were inserted on `controller`.
    pub fn started(&self, controller: &str, template: &WorkerTemplate, workers: &[String]) {
        for listener in self.listeners.iter() {
            isolated(listener.as_ref(), "on_started", || {
                listener.on_started(controller, template, workers)
            });
        }
    }

    /// Announce that `worker` came online.
    pub fn complete(&self, controller: &str, worker: &str) {
        for listener in self.listeners.iter() {
            isolated(listener.as_ref(), "on_complete", || {
                listener.on_complete(controller, worker)
            });
        }
    }

    /// Announce that the launch of `worker` failed.
    pub fn failure(&self, controller: &str, worker: &str, error: &str) {
        for listener in self.listeners.iter() {
            isolated(listener.as_ref(), "on_failure", || {
                listener.on_failure(controller, worker, error)
            });
        }
    }
}

fn isolated<T>(listener: &dyn ProvisioningListener, event: &str, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => {
            debug!(listener = listener.name(), event, "listener notified");
            Some(value)
        }
        Err(_) => {
            error!(listener = listener.name(), event, "listener panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::fixtures::template;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ProvisioningListener for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn on_started(&self, controller: &str, _template: &WorkerTemplate, workers: &[String]) {
            self.events
                .lock()
                .unwrap()
                .push(format!("started {controller} {}", workers.join(",")));
        }
        fn on_complete(&self, controller: &str, worker: &str) {
            self.events.lock().unwrap().push(format!("complete {controller} {worker}"));
        }
        fn on_failure(&self, controller: &str, worker: &str, _error: &str) {
            self.events.lock().unwrap().push(format!("failure {controller} {worker}"));
        }
    }

    struct Panicker;

    impl ProvisioningListener for Panicker {
        fn name(&self) -> &str {
            "panicker"
        }
        fn on_check(&self, _: &str, _: &WorkerTemplate, _: u32) -> Result<(), String> {
            panic!("check exploded")
        }
        fn on_started(&self, _: &str, _: &WorkerTemplate, _: &[String]) {
            panic!("started exploded")
        }
    }

    struct Quota(u32);

    impl ProvisioningListener for Quota {
        fn name(&self) -> &str {
            "quota"
        }
        fn on_check(&self, _: &str, _: &WorkerTemplate, instances: u32) -> Result<(), String> {
            if instances > self.0 {
                Err(format!("{instances} instances exceed quota {}", self.0))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let recorder = Arc::new(Recorder::default());
        let set = ListenerSet::new(vec![Arc::new(Panicker), recorder.clone()]);
        let t = template("build", "build");

        assert_eq!(set.check("c1", &t, 3), None);
        set.started("c1", &t, &["w1".to_string(), "w2".to_string()]);
        set.complete("c1", "w1");
        set.failure("c1", "w2", "boom");

        assert_eq!(
            recorder.events(),
            vec!["started c1 w1,w2", "complete c1 w1", "failure c1 w2"]
        );
    }

    #[test]
    fn first_veto_wins() {
        let set = ListenerSet::new(vec![Arc::new(Quota(5)), Arc::new(Quota(1))]);
        let t = template("build", "");

        assert_eq!(set.check("c1", &t, 1), None);
        let veto = set.check("c1", &t, 2).unwrap();
        assert_eq!(veto.listener, "quota");
        assert_eq!(veto.reason, "2 instances exceed quota 1");
    }

    #[test]
    fn empty_set_never_vetoes() {
        let set = ListenerSet::default();
        assert!(set.is_empty());
        assert_eq!(set.check("c1", &template("build", ""), 100), None);
    }
}
