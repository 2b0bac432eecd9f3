use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Callback invoked with every newly published value
pub type Listener<T> = Arc<dyn Fn(&Arc<T>) + Send + Sync>;

/// Token returned by [`Subscriptions::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Inner<T> {
    current: Option<Arc<T>>,
    listeners: BTreeMap<SubscriptionId, Listener<T>>,
    next_id: u64,
}

/// Subscription manager
///
/// Holds the latest published value and the listeners interested in changes.
/// Listeners are kept in subscription order and every publish round iterates a
/// snapshot of them, so a listener may subscribe or unsubscribe others (or
/// itself) from inside its callback. Listeners must not publish.
pub struct Subscriptions<T> {
    inner: Mutex<Inner<T>>,
    // Serializes publish rounds so every listener sees values in production order
    publishing: Mutex<()>,
}

fn lock<U>(mutex: &Mutex<U>) -> MutexGuard<'_, U> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> Subscriptions<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: None,
                listeners: BTreeMap::new(),
                next_id: 0,
            }),
            publishing: Mutex::new(()),
        }
    }

    /// The most recently published value, if any
    pub fn current(&self) -> Option<Arc<T>> {
        lock(&self.inner).current.clone()
    }

    /// Adds a listener for future publish rounds.
    pub fn subscribe(&self, listener: Listener<T>) -> SubscriptionId {
        self.observe(listener).1
    }

    /// Adds a listener and returns the value it starts from.
    ///
    /// The snapshot and the registration are taken atomically with respect to
    /// publishing: every later value reaches the listener, and no value older
    /// than or equal to the snapshot does.
    pub fn observe(&self, listener: Listener<T>) -> (Option<Arc<T>>, SubscriptionId) {
        let mut inner = lock(&self.inner);
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.listeners.insert(id, listener);
        (inner.current.clone(), id)
    }

    /// Removes a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.inner).listeners.remove(&id).is_some()
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the current value with `next(previous)` and notifies every
    /// listener registered at the time of the swap.
    pub fn publish_with<F>(&self, next: F) -> Arc<T>
    where
        F: FnOnce(Option<&T>) -> T,
    {
        let _round = lock(&self.publishing);

        let (value, listeners) = {
            let mut inner = lock(&self.inner);
            let value = Arc::new(next(inner.current.as_deref()));
            inner.current = Some(Arc::clone(&value));
            let listeners: Vec<Listener<T>> = inner.listeners.values().cloned().collect();
            (value, listeners)
        };

        for listener in &listeners {
            listener(&value);
        }

        value
    }

    /// Publishes `value` unconditionally.
    pub fn publish(&self, value: T) -> Arc<T> {
        self.publish_with(|_| value)
    }
}

impl<T> Default for Subscriptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subscriptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriptions")
            .field("listeners", &self.len())
            .finish()
    }
}
