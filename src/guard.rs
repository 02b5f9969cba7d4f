//! Release-exactly-once ownership wrapper for session resources.

/// Wraps an acquired resource together with its release action.
///
/// `release()` runs the action at most once; further calls and `Drop` are
/// no-ops, so teardown can be invoked from overlapping error and
/// user-initiated paths without double-releasing.
pub struct ResourceGuard<T> {
    name: &'static str,
    inner: Option<T>,
    release: Option<Box<dyn FnOnce(T) + Send>>,
}

impl<T> ResourceGuard<T> {
    pub fn new(name: &'static str, value: T, release: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            name,
            inner: Some(value),
            release: Some(Box::new(release)),
        }
    }

    /// Access the resource while it is still held.
    pub fn get(&self) -> Option<&T> {
        self.inner.as_ref()
    }

    /// Run the release action if it has not run yet.
    pub fn release(&mut self) {
        if let (Some(value), Some(release)) = (self.inner.take(), self.release.take()) {
            release(value);
            log::debug!("released {}", self.name);
        }
    }
}

impl<T> Drop for ResourceGuard<T> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn releases_exactly_once() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let mut guard = ResourceGuard::new("thing", (), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        guard.release();
        guard.release();
        drop(guard);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases_when_not_released_explicitly() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        {
            let _guard = ResourceGuard::new("thing", 42u8, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn get_is_none_after_release() {
        let mut guard = ResourceGuard::new("thing", 7u8, |_| {});
        assert_eq!(guard.get(), Some(&7));
        guard.release();
        assert_eq!(guard.get(), None);
    }
}
