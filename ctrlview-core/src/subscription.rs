//! Disposable subscriptions
//!
//! Every listener registration and stream subscription hands back a
//! `Subscription`. Disposing it runs the teardown at most once; dropping an
//! undisposed subscription disposes it.

use std::fmt;

type Teardown = Box<dyn FnOnce() + Send + 'static>;

pub struct Subscription {
    teardown: Option<Teardown>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// A subscription with nothing to release
    pub fn empty() -> Self {
        Self { teardown: None }
    }

    /// Run the teardown. Safe to call any number of times.
    pub fn dispose(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.teardown.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A bag of subscriptions released together, in registration order
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    items: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subscription: Subscription) {
        self.items.push(subscription);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn dispose_all(&mut self) {
        for mut subscription in self.items.drain(..) {
            subscription.dispose();
        }
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (count, mut sub) = counter();
        sub.dispose();
        sub.dispose();
        drop(sub);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_disposes() {
        let (count, sub) = counter();
        drop(sub);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_disposes_everything_once() {
        let (a, sub_a) = counter();
        let (b, sub_b) = counter();
        let mut set = SubscriptionSet::new();
        set.push(sub_a);
        set.push(sub_b);
        assert_eq!(set.len(), 2);

        set.dispose_all();
        drop(set);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }
}
