//! Observer membership and isolated fan-out.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::event::Event;
use crate::observer::Observer;

/// Result of a single [`ListenerRegistry::dispatch`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Observers that returned normally
    pub delivered: usize,
    /// Observers that returned an error or panicked
    pub failed: usize,
}

/// Ordered set of observers for one event kind.
///
/// Membership has set semantics keyed on observer identity. Dispatch works on
/// a snapshot taken before the first callback runs, so observers may add or
/// remove members (themselves included) while being called; such changes apply
/// from the next dispatch on.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    members: Mutex<Vec<Observer>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer; adding a current member again has no effect
    pub fn add(&self, observer: Observer) {
        let mut members = self.lock();
        if members.contains(&observer) {
            log::trace!("{:?} already registered", observer);
            return;
        }
        members.push(observer);
    }

    /// Remove an observer; returns whether it was a member
    pub fn remove(&self, observer: &Observer) -> bool {
        let mut members = self.lock();
        match members.iter().position(|member| member == observer) {
            Some(index) => {
                members.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, observer: &Observer) -> bool {
        self.lock().contains(observer)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Current members in insertion order
    pub fn members(&self) -> Vec<Observer> {
        self.lock().clone()
    }

    /// Deliver `event` to every member in insertion order.
    ///
    /// A member that returns an error or panics is logged and skipped; it stays
    /// registered and the remaining members are still called.
    pub fn dispatch(&self, event: &Event) -> DispatchOutcome {
        let snapshot = self.members();
        let mut outcome = DispatchOutcome::default();

        for observer in &snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.call(event))) {
                Ok(Ok(())) => outcome.delivered += 1,
                Ok(Err(e)) => {
                    log::warn!("{:?} failed handling {} event: {}", observer, event.kind, e);
                    outcome.failed += 1;
                }
                Err(payload) => {
                    log::warn!(
                        "{:?} panicked handling {} event: {}",
                        observer,
                        event.kind,
                        panic_message(payload.as_ref())
                    );
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Observer>> {
        // Callbacks never run under this lock, so a poisoned guard still holds a
        // consistent list.
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Observer {
        let log = log.clone();
        Observer::infallible(move |_| log.lock().unwrap().push(name))
    }

    #[test]
    fn test_add_is_idempotent() {
        let registry = ListenerRegistry::new();
        let observer = Observer::infallible(|_| {});

        registry.add(observer.clone());
        registry.add(observer.clone());
        assert_eq!(registry.len(), 1);

        let outcome = registry.dispatch(&Event::message(json!(1)));
        assert_eq!(outcome.delivered, 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let registry = ListenerRegistry::new();
        let member = Observer::infallible(|_| {});
        let stranger = Observer::infallible(|_| {});

        registry.add(member.clone());
        assert!(!registry.remove(&stranger));
        assert!(registry.contains(&member));

        assert!(registry.remove(&member));
        assert!(!registry.remove(&member));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_membership_matches_set_replay() {
        let observers: Vec<Observer> = (0..4).map(|_| Observer::infallible(|_| {})).collect();
        // (add?, index)
        let ops = [
            (true, 0),
            (true, 1),
            (true, 0),
            (false, 2),
            (true, 2),
            (false, 1),
            (true, 3),
            (true, 1),
            (false, 0),
            (true, 2),
        ];

        let registry = ListenerRegistry::new();
        let mut expected: Vec<usize> = Vec::new();
        for (add, i) in ops {
            if add {
                registry.add(observers[i].clone());
                if !expected.contains(&i) {
                    expected.push(i);
                }
            } else {
                registry.remove(&observers[i]);
                expected.retain(|&e| e != i);
            }
        }

        let expected: Vec<Observer> = expected.into_iter().map(|i| observers[i].clone()).collect();
        assert_eq!(registry.members(), expected);
    }

    #[test]
    fn test_dispatch_in_order_despite_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ListenerRegistry::new();

        registry.add(recording(&log, "first"));
        registry.add(Observer::new(|_| Err("broken observer".into())));
        registry.add(recording(&log, "third"));
        registry.add(Observer::infallible(|_| panic!("observer blew up")));
        registry.add(recording(&log, "fifth"));

        let outcome = registry.dispatch(&Event::message(json!({"type": "hello"})));

        assert_eq!(outcome, DispatchOutcome { delivered: 3, failed: 2 });
        assert_eq!(*log.lock().unwrap(), vec!["first", "third", "fifth"]);
        // Failing observers are not evicted
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_reentrant_remove_applies_to_next_dispatch() {
        let registry = Arc::new(ListenerRegistry::new());
        let calls = Arc::new(Mutex::new(0usize));

        let self_removing = {
            let registry = Arc::downgrade(&registry);
            let calls = calls.clone();
            let me: Arc<Mutex<Option<Observer>>> = Arc::new(Mutex::new(None));
            let me_inner = me.clone();
            let observer = Observer::infallible(move |_| {
                *calls.lock().unwrap() += 1;
                if let (Some(registry), Some(me)) = (registry.upgrade(), me_inner.lock().unwrap().clone()) {
                    registry.remove(&me);
                }
            });
            *me.lock().unwrap() = Some(observer.clone());
            observer
        };

        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add(self_removing.clone());
        registry.add(recording(&log, "after"));

        let first = registry.dispatch(&Event::message(json!(1)));
        assert_eq!(first.delivered, 2);
        assert!(!registry.contains(&self_removing));

        let second = registry.dispatch(&Event::message(json!(2)));
        assert_eq!(second.delivered, 1);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["after", "after"]);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn std::any::Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
