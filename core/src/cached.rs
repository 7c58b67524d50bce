use std::{sync::Arc, time::Instant};

use parking_lot::Mutex;
use tracing::debug;

/// A memoized value shared by every clone of the handle.
///
/// The value is produced on first access and kept until [`Cached::clear`]
/// is called on any of the clones.
#[derive(Clone, Debug)]
pub struct Cached<T>
where
    T: Clone,
{
    inner: Arc<Mutex<CachedInner<T>>>,
}

#[derive(Debug)]
struct CachedInner<T>
where
    T: Clone,
{
    last_fetched: Option<(Instant, T)>,
    last_accessed: Option<Instant>,
}

impl<T> Cached<T>
where
    T: Clone,
{
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CachedInner {
                last_fetched: None,
                last_accessed: None,
            })),
        }
    }

    pub fn filled(value: T) -> Self {
        let cached = Self::empty();
        cached.inner.lock().last_fetched = Some((Instant::now(), value));
        cached
    }

    /// Returns the cached value, or runs `f` to produce and store it.
    pub fn get_cached<F, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let mut inner = self.inner.lock();
        inner.last_accessed = Some(Instant::now());

        if let Some((_, value)) = inner.last_fetched.as_ref() {
            return Ok(value.clone());
        }

        debug!("Cache miss, fetching");
        let value = f()?;
        inner.last_fetched = Some((Instant::now(), value.clone()));
        Ok(value)
    }

    pub fn try_get(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        inner.last_accessed = Some(Instant::now());
        inner.last_fetched.as_ref().map(|(_, v)| v.clone())
    }

    pub fn set(&self, value: T) {
        self.inner.lock().last_fetched = Some((Instant::now(), value));
    }

    pub fn is_cached(&self) -> bool {
        self.inner.lock().last_fetched.is_some()
    }

    pub fn get_last_accessed(&self) -> Option<Instant> {
        self.inner.lock().last_accessed
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        if let Some((fetched_at, _)) = inner.last_fetched.take() {
            debug!(age = ?fetched_at.elapsed(), "Dropping cached value");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn fetches_once() {
        let calls = Cell::new(0);
        let cached = Cached::empty();
        let fetch = || -> Result<i32, ()> {
            calls.set(calls.get() + 1);
            Ok(7)
        };
        assert_eq!(cached.get_cached(fetch), Ok(7));
        assert_eq!(cached.get_cached(fetch), Ok(7));
        assert_eq!(calls.get(), 1);
        assert!(cached.get_last_accessed().is_some());
    }

    #[test]
    fn clones_share_the_value() {
        let a = Cached::filled(1);
        let b = a.clone();
        b.clear();
        assert!(!a.is_cached());
        a.set(2);
        assert_eq!(b.try_get(), Some(2));
    }

    #[test]
    fn errors_are_not_cached() {
        let cached: Cached<i32> = Cached::empty();
        assert_eq!(cached.get_cached(|| Err("nope")), Err("nope"));
        assert!(!cached.is_cached());
    }
}
