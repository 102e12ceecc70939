//! Write-once completion handles.
//!
//! An [`AsyncValue`] is a reference-counted cell that starts pending and is
//! resolved exactly once, either to a concrete value or to an [`Error`]. The
//! single writer side is a [`Promise`]; any number of readers may hold clones
//! of the value, poll it, attach continuations, or (outside the scheduling hot
//! path) block on it.
//!
//! # Continuations
//!
//! Continuations registered with [`AsyncValue::and_then`] run exactly once. If
//! the value is already resolved they run immediately on the caller's thread,
//! otherwise on the thread that resolves the promise. They must not block.
//!
//! # Dropped promises
//!
//! A [`Promise`] dropped without a value resolves its cell to an
//! [`ErrorKind::Unavailable`] error, so readers never hang on an abandoned
//! writer.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, ErrorKind, Result};

type Waiter = Box<dyn FnOnce() + Send + 'static>;

struct Inner<T> {
    result: OnceLock<Result<T>>,
    waiters: Mutex<Vec<Waiter>>,
    ready: Condvar,
}

impl<T> Inner<T> {
    fn new() -> Self {
        Self {
            result: OnceLock::new(),
            waiters: Mutex::new(Vec::new()),
            ready: Condvar::new(),
        }
    }

    fn resolve(&self, result: Result<T>) {
        let waiters = {
            let mut waiters = self.waiters.lock();
            if self.result.set(result).is_err() {
                return;
            }
            std::mem::take(&mut *waiters)
        };
        self.ready.notify_all();
        for waiter in waiters {
            waiter();
        }
    }
}

/// Reference-counted, write-once result cell.
pub struct AsyncValue<T> {
    inner: Arc<Inner<T>>,
}

/// Completion handle of an operation: `()` on success or an error.
pub type ExecuteEvent = AsyncValue<()>;

impl<T> Clone for AsyncValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Creates a pending value and the promise that resolves it.
#[must_use]
pub fn promise<T>() -> (Promise<T>, AsyncValue<T>) {
    let inner = Arc::new(Inner::new());
    (
        Promise {
            inner: Some(Arc::clone(&inner)),
        },
        AsyncValue { inner },
    )
}

impl<T> AsyncValue<T> {
    /// A value that is already concrete.
    #[must_use]
    pub fn ready(value: T) -> Self {
        let inner = Inner::new();
        let _ = inner.result.set(Ok(value));
        Self {
            inner: Arc::new(inner),
        }
    }

    /// A value that has already failed.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        let inner = Inner::new();
        let _ = inner.result.set(Err(error));
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Returns true once the value is concrete or failed.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.result.get().is_some()
    }

    /// Returns true if the value resolved successfully.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        matches!(self.inner.result.get(), Some(Ok(_)))
    }

    /// Returns true if the value resolved to an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self.inner.result.get(), Some(Err(_)))
    }

    /// The concrete value, if resolved successfully.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.inner.result.get().and_then(|r| r.as_ref().ok())
    }

    /// The error, if resolved to one.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.inner.result.get().and_then(|r| r.as_ref().err())
    }

    /// Non-blocking read of the outcome.
    #[must_use]
    pub fn get(&self) -> Option<Result<&T>> {
        self.inner
            .result
            .get()
            .map(|r| r.as_ref().map_err(Clone::clone))
    }

    /// Blocks until the value resolves.
    ///
    /// Only for callers outside the scheduling path; an operation must never
    /// block on work it submitted itself.
    pub fn wait(&self) -> Result<&T> {
        if let Some(result) = self.get() {
            return result;
        }
        let mut guard = self.inner.waiters.lock();
        while self.inner.result.get().is_none() {
            self.inner.ready.wait(&mut guard);
        }
        drop(guard);
        self.get().unwrap_or_else(|| unreachable!("value resolved under lock"))
    }

    /// Blocks until the value resolves or `timeout` elapses.
    ///
    /// Returns `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<&T>> {
        if let Some(result) = self.get() {
            return Some(result);
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.waiters.lock();
        while self.inner.result.get().is_none() {
            if self.inner.ready.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        drop(guard);
        self.get()
    }

    /// Runs `f` once the value resolves, successfully or not.
    pub fn and_then<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut waiters = self.inner.waiters.lock();
        if self.inner.result.get().is_none() {
            waiters.push(Box::new(f));
            return;
        }
        drop(waiters);
        f();
    }

    /// Returns true if both handles share the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Send + Sync + 'static> AsyncValue<T> {
    /// Derives a new value once this one is concrete; errors pass through.
    #[must_use]
    pub fn map<U, F>(&self, f: F) -> AsyncValue<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        self.try_map(move |v| Ok(f(v)))
    }

    /// Like [`map`](Self::map) but the mapping itself may fail.
    #[must_use]
    pub fn try_map<U, F>(&self, f: F) -> AsyncValue<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> Result<U> + Send + 'static,
    {
        if let Some(result) = self.get() {
            return match result.and_then(f) {
                Ok(v) => AsyncValue::ready(v),
                Err(e) => AsyncValue::failed(e),
            };
        }
        let (promise, mapped) = promise();
        let source = self.clone();
        self.and_then(move || {
            promise.set_result(
                source
                    .get()
                    .unwrap_or_else(|| unreachable!("continuation ran before resolution"))
                    .and_then(f),
            );
        });
        mapped
    }

    /// Completes when every input has resolved.
    ///
    /// Fails if any input failed, reporting the error of the lowest-index
    /// failed input. An empty input set is already complete.
    #[must_use]
    pub fn join<I>(values: I) -> ExecuteEvent
    where
        I: IntoIterator<Item = Self>,
    {
        let values: Vec<Self> = values.into_iter().collect();
        if values.iter().all(Self::is_available) {
            return match first_error(&values) {
                None => ExecuteEvent::ok(),
                Some(e) => ExecuteEvent::failed(e),
            };
        }

        let (promise, joined) = promise();
        let promise = Arc::new(Mutex::new(Some(promise)));
        let remaining = Arc::new(AtomicUsize::new(values.len()));
        let values = Arc::new(values);
        for value in values.iter() {
            let promise = Arc::clone(&promise);
            let remaining = Arc::clone(&remaining);
            let all = Arc::clone(&values);
            value.and_then(move || {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    if let Some(p) = promise.lock().take() {
                        p.set_result(first_error(&all).map_or(Ok(()), Err));
                    }
                }
            });
        }
        joined
    }
}

fn first_error<T>(values: &[AsyncValue<T>]) -> Option<Error> {
    values.iter().find_map(|v| v.error().cloned())
}

impl AsyncValue<()> {
    /// The shared, already-complete event.
    #[must_use]
    pub fn ok() -> Self {
        static OK: OnceLock<ExecuteEvent> = OnceLock::new();
        OK.get_or_init(|| Self::ready(())).clone()
    }
}

impl<T: fmt::Debug> fmt::Debug for AsyncValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.result.get() {
            None => f.write_str("AsyncValue(<pending>)"),
            Some(Ok(v)) => f.debug_tuple("AsyncValue").field(v).finish(),
            Some(Err(e)) => write!(f, "AsyncValue(<error: {e}>)"),
        }
    }
}

/// The writing side of an [`AsyncValue`].
pub struct Promise<T> {
    inner: Option<Arc<Inner<T>>>,
}

impl<T> Promise<T> {
    /// Another reader handle for the value this promise resolves.
    #[must_use]
    pub fn value(&self) -> AsyncValue<T> {
        AsyncValue {
            inner: Arc::clone(self.inner.as_ref().unwrap_or_else(|| {
                unreachable!("promise is only emptied when consumed")
            })),
        }
    }

    /// Resolves the value successfully.
    pub fn set(self, value: T) {
        self.set_result(Ok(value));
    }

    /// Resolves the value to an error.
    pub fn set_error(self, error: Error) {
        self.set_result(Err(error));
    }

    /// Resolves the value with an explicit outcome.
    pub fn set_result(mut self, result: Result<T>) {
        if let Some(inner) = self.inner.take() {
            inner.resolve(result);
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.resolve(Err(Error::new(ErrorKind::Unavailable)
                .with_message("promise dropped without a value")));
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("pending", &self.inner.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn ok_singleton_is_shared() {
        let a = ExecuteEvent::ok();
        let b = ExecuteEvent::ok();
        assert!(a.ptr_eq(&b));
        assert!(a.is_concrete());
    }

    #[test]
    fn continuation_runs_on_resolution() {
        let (p, v) = promise::<u32>();
        let fired = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&fired);
        v.and_then(move || f.store(true, Ordering::SeqCst));
        assert!(!fired.load(Ordering::SeqCst));
        p.set(7);
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(v.value(), Some(&7));
    }

    #[test]
    fn continuation_on_resolved_value_runs_inline() {
        let v = AsyncValue::ready(1u8);
        let fired = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&fired);
        v.and_then(move || f.store(true, Ordering::SeqCst));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn dropped_promise_is_unavailable() {
        let (p, v) = promise::<()>();
        drop(p);
        assert_eq!(v.error().map(Error::kind), Some(ErrorKind::Unavailable));
    }

    #[test]
    fn wait_across_threads() {
        let (p, v) = promise::<String>();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            p.set("done".to_string());
        });
        assert_eq!(v.wait().expect("value").as_str(), "done");
        handle.join().expect("join");
    }

    #[test]
    fn wait_timeout_expires() {
        let (_p, v) = promise::<()>();
        assert!(v.wait_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn map_and_try_map() {
        let (p, v) = promise::<i32>();
        let doubled = v.map(|x| x * 2);
        let checked = v.try_map(|x| {
            if *x > 0 {
                Ok(*x)
            } else {
                Err(Error::invalid_argument("negative"))
            }
        });
        p.set(-3);
        assert_eq!(doubled.value(), Some(&-6));
        assert_eq!(checked.error().map(Error::kind), Some(ErrorKind::InvalidArgument));
    }

    #[test]
    fn join_reports_lowest_index_error() {
        let (p0, e0) = promise::<()>();
        let (p1, e1) = promise::<()>();
        let (p2, e2) = promise::<()>();
        let joined = ExecuteEvent::join([e0, e1, e2]);
        p2.set_error(Error::execution("third"));
        assert!(!joined.is_available());
        p0.set(());
        p1.set_error(Error::execution("second"));
        let err = joined.error().expect("joined error");
        assert_eq!(err.message(), Some("second"));
    }

    #[test]
    fn join_of_nothing_is_ok() {
        let joined = ExecuteEvent::join(Vec::new());
        assert!(joined.is_concrete());
    }
}
