//! Change notification for user-editable values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Callback)>>,
}

/// A multicast "something changed" signal.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    listeners: Arc<Listeners>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: Callback) -> Subscription {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.entries.lock().push((id, callback));

        let weak: Weak<Listeners> = Arc::downgrade(&self.listeners);
        Subscription::from_fn(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners.entries.lock().retain(|(other, _)| *other != id);
            }
        })
    }

    /// Invoke every listener once. Listeners are called outside the lock so
    /// they may subscribe or unsubscribe.
    pub fn notify(&self) {
        let callbacks: Vec<Callback> = self
            .listeners
            .entries
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in callbacks {
            cb();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.entries.lock().len()
    }
}

/// Handle returned by a subscription. Unsubscribes when dropped;
/// unsubscribing more than once is a no-op.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
    children: Vec<Subscription>,
}

impl Subscription {
    pub fn empty() -> Self {
        Self {
            unsubscribe: None,
            children: Vec::new(),
        }
    }

    pub fn from_fn(f: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(f)),
            children: Vec::new(),
        }
    }

    /// One handle owning several subscriptions.
    pub fn merge(children: Vec<Subscription>) -> Self {
        Self {
            unsubscribe: None,
            children,
        }
    }

    pub fn unsubscribe(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
        for child in &mut self.children {
            child.unsubscribe();
        }
        self.children.clear();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
