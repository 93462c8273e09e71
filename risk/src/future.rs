//! Deferred pricing results
//!
//! A [`PricingFuture`] is a shared handle to a value that a batch dispatch
//! will produce later. Handles are cheap to clone; every clone observes the
//! same outcome. Futures created while a [`BatchScope`] is open refuse to be
//! waited on until the scope has exited, since the value cannot arrive before
//! the batch is dispatched.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Result, RiskError};

/// Lifecycle of a batching scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Idle,
    Entered,
    Exited,
}

/// Shared marker for one batch; futures registered in it hold a clone
#[derive(Debug, Clone)]
pub struct BatchScope {
    state: Arc<Mutex<ScopeState>>,
}

impl BatchScope {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScopeState::Idle)),
        }
    }

    pub fn enter(&self) {
        *self.state.lock() = ScopeState::Entered;
    }

    pub fn exit(&self) {
        *self.state.lock() = ScopeState::Exited;
    }

    pub fn state(&self) -> ScopeState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ScopeState::Entered
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

type Callback<T> = Box<dyn FnOnce(&Result<T>) + Send>;

struct Inner<T> {
    outcome: Option<Result<T>>,
    callbacks: Vec<Callback<T>>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
    scope: Option<BatchScope>,
}

/// Handle to a value produced by a (possibly deferred) calculation
pub struct PricingFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for PricingFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for PricingFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let done = self.shared.inner.lock().outcome.is_some();
        f.debug_struct("PricingFuture").field("done", &done).finish()
    }
}

impl<T: Clone + Send + 'static> PricingFuture<T> {
    /// Pending future outside any batch
    pub fn new() -> Self {
        Self::with_scope(None)
    }

    /// Pending future owned by `scope`
    pub fn in_scope(scope: &BatchScope) -> Self {
        Self::with_scope(Some(scope.clone()))
    }

    fn with_scope(scope: Option<BatchScope>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    outcome: None,
                    callbacks: Vec::new(),
                }),
                ready: Condvar::new(),
                scope,
            }),
        }
    }

    /// Already completed with a value
    pub fn resolved(value: T) -> Self {
        let f = Self::new();
        f.complete(Ok(value));
        f
    }

    /// Already completed with an error
    pub fn failed(error: RiskError) -> Self {
        let f = Self::new();
        f.complete(Err(error));
        f
    }

    pub fn scope(&self) -> Option<&BatchScope> {
        self.shared.scope.as_ref()
    }

    pub fn set_result(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn set_error(&self, error: RiskError) -> bool {
        self.complete(Err(error))
    }

    /// Store the outcome and wake waiters; returns false if already done
    ///
    /// Callbacks run on the completing thread, after the lock is released.
    pub fn complete(&self, outcome: Result<T>) -> bool {
        let callbacks = {
            let mut inner = self.shared.inner.lock();
            if inner.outcome.is_some() {
                return false;
            }
            inner.outcome = Some(outcome.clone());
            std::mem::take(&mut inner.callbacks)
        };
        self.shared.ready.notify_all();
        for cb in callbacks {
            cb(&outcome);
        }
        true
    }

    pub fn done(&self) -> bool {
        self.shared.inner.lock().outcome.is_some()
    }

    /// Outcome if already completed
    pub fn try_result(&self) -> Option<Result<T>> {
        self.shared.inner.lock().outcome.clone()
    }

    fn check_scope(&self) -> Result<()> {
        match &self.shared.scope {
            Some(scope) if scope.is_open() => Err(RiskError::ResultUnderOpenContext),
            _ => Ok(()),
        }
    }

    /// Block until the outcome is available
    ///
    /// Fails immediately with [`RiskError::ResultUnderOpenContext`] if the
    /// value is still pending and its batch has not been dispatched.
    pub fn result(&self) -> Result<T> {
        let mut inner = self.shared.inner.lock();
        if let Some(outcome) = &inner.outcome {
            return outcome.clone();
        }
        self.check_scope()?;
        loop {
            if let Some(outcome) = &inner.outcome {
                return outcome.clone();
            }
            self.shared.ready.wait(&mut inner);
        }
    }

    /// As [`PricingFuture::result`], giving up after `timeout`
    pub fn result_timeout(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock();
        if let Some(outcome) = &inner.outcome {
            return outcome.clone();
        }
        self.check_scope()?;
        loop {
            if let Some(outcome) = &inner.outcome {
                return outcome.clone();
            }
            if self.shared.ready.wait_until(&mut inner, deadline).timed_out() {
                return match &inner.outcome {
                    Some(outcome) => outcome.clone(),
                    None => Err(RiskError::Timeout(timeout)),
                };
            }
        }
    }

    /// Run `callback` on completion, or now if already complete
    pub fn add_done_callback(&self, callback: impl FnOnce(&Result<T>) + Send + 'static) {
        let outcome = {
            let mut inner = self.shared.inner.lock();
            match &inner.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    inner.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&outcome);
    }

    /// Future of `f` applied to this future's value
    pub fn then<U, F>(&self, f: F) -> PricingFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let out = PricingFuture::<U>::with_scope(self.shared.scope.clone());
        let target = out.clone();
        self.add_done_callback(move |outcome| {
            target.complete(outcome.clone().and_then(f));
        });
        out
    }

    /// Composite future over `futures`
    ///
    /// Completes once every child has completed, with the values in child
    /// order, or with the first error in child order.
    pub fn join_all(futures: Vec<PricingFuture<T>>) -> PricingFuture<Vec<T>> {
        if futures.is_empty() {
            return PricingFuture::resolved(Vec::new());
        }

        let scope = futures.iter().find_map(|f| f.shared.scope.clone());
        let out = PricingFuture::<Vec<T>>::with_scope(scope);
        let slots: Arc<Mutex<(usize, Vec<Option<Result<T>>>)>> =
            Arc::new(Mutex::new((futures.len(), vec![None; futures.len()])));

        for (idx, child) in futures.iter().enumerate() {
            let slots = Arc::clone(&slots);
            let target = out.clone();
            child.add_done_callback(move |outcome| {
                let finished = {
                    let mut guard = slots.lock();
                    guard.1[idx] = Some(outcome.clone());
                    guard.0 -= 1;
                    if guard.0 == 0 {
                        Some(std::mem::take(&mut guard.1))
                    } else {
                        None
                    }
                };
                if let Some(all) = finished {
                    let values = all
                        .into_iter()
                        .map(|slot| slot.unwrap_or(Err(RiskError::NotFound("child outcome".to_string()))))
                        .collect::<Result<Vec<T>>>();
                    target.complete(values);
                }
            });
        }
        out
    }
}

impl<T: Clone + Send + 'static> Default for PricingFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}
