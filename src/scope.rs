//! Cancellation scopes.
//!
//! A [`Scope`] is the cancellable execution context threaded through the whole run of an
//! application. Scopes form a tree: deriving a scope ([`Scope::with_cancel`],
//! [`Scope::with_timeout`], [`Scope::with_deadline`]) creates a child whose cancellation fires
//! either when the parent fires or when the child itself is cancelled (or its deadline passes).
//! Cancellation only ever flows downwards, cancelling a child never affects the parent.
//!
//! Deriving a cancellable scope returns a [`CancelGuard`] next to the new scope. The guard
//! cancels the scope when dropped, so the timer thread of a deadline (and the registration in the
//! parent) are released on every exit path, including an unwinding panic.
//!
//! Scopes can also carry values ([`Scope::with_value`]). These are visible from the scope they
//! were attached to and from everything derived from it.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//!
//! use appctx::scope::{Cancelled, Scope};
//!
//! let root = Scope::background();
//! let (scope, _guard) = root.with_timeout(Duration::from_millis(10));
//! assert_eq!(Cancelled::DeadlineExceeded, scope.wait());
//! assert!(!root.is_cancelled());
//! ```

use std::any::Any;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::mem;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use log::{trace, warn};
use parking_lot::{Condvar, Mutex};

/// The reason a scope got cancelled.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, thiserror::Error)]
pub enum Cancelled {
    /// Cancelled explicitly (a stop request, a signal or a released [`CancelGuard`]).
    #[error("context canceled")]
    Canceled,

    /// The deadline of the scope (or one of its parents) passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Default)]
struct State {
    cause: Option<Cancelled>,
    children: Vec<Weak<Node>>,
}

struct Node {
    state: Mutex<State>,
    cond: Condvar,
    parent: Option<Weak<Node>>,
    deadline: Option<Instant>,
    // The background node is never cancelled, so nobody registers with it.
    cancellable: bool,
}

impl Node {
    fn background() -> Arc<Self> {
        Arc::new(Node {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
            parent: None,
            deadline: None,
            cancellable: false,
        })
    }

    fn child(parent: &Arc<Node>, deadline: Option<Instant>) -> Arc<Self> {
        let deadline = match (parent.deadline, deadline) {
            (Some(p), Some(d)) => Some(p.min(d)),
            (p, d) => p.or(d),
        };
        let child = Arc::new(Node {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
            parent: Some(Arc::downgrade(parent)),
            deadline,
            cancellable: true,
        });
        if parent.cancellable {
            let mut state = parent.state.lock();
            match state.cause {
                Some(cause) => child.state.lock().cause = Some(cause),
                None => {
                    state.children.retain(|c| c.strong_count() > 0);
                    state.children.push(Arc::downgrade(&child));
                }
            }
        }
        child
    }

    fn cancel(self: &Arc<Self>, cause: Cancelled) {
        let children = {
            let mut state = self.state.lock();
            if state.cause.is_some() {
                return;
            }
            state.cause = Some(cause);
            self.cond.notify_all();
            mem::take(&mut state.children)
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel(cause);
        }
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            let me = Arc::as_ptr(self);
            parent.state.lock().children.retain(|c| c.as_ptr() != me);
        }
    }

    fn cause(&self) -> Option<Cancelled> {
        self.state.lock().cause
    }

    fn wait(&self) -> Cancelled {
        let mut state = self.state.lock();
        loop {
            if let Some(cause) = state.cause {
                return cause;
            }
            self.cond.wait(&mut state);
        }
    }

    fn wait_until(&self, until: Instant) -> Option<Cancelled> {
        let mut state = self.state.lock();
        while state.cause.is_none() {
            if self.cond.wait_until(&mut state, until).timed_out() {
                break;
            }
        }
        state.cause
    }

    fn expire_at(self: Arc<Self>, deadline: Instant) {
        if self.wait_until(deadline).is_none() {
            trace!("Scope deadline passed");
            self.cancel(Cancelled::DeadlineExceeded);
        }
    }
}

struct ValueEntry {
    key: &'static str,
    value: Box<dyn Any + Send + Sync>,
    parent: Option<Arc<ValueEntry>>,
}

/// A cancellable execution context, possibly carrying some values.
///
/// Cloning is cheap and the clone is the *same* scope (cancelling one is seen by the other).
/// Independent scopes are created by the `with_*` derivation methods.
#[derive(Clone)]
pub struct Scope {
    node: Arc<Node>,
    values: Option<Arc<ValueEntry>>,
}

impl Scope {
    /// The root of a scope tree, never cancelled on its own.
    pub fn background() -> Self {
        Scope {
            node: Node::background(),
            values: None,
        }
    }

    fn derive(&self, deadline: Option<Instant>) -> (Self, CancelGuard) {
        let node = Node::child(&self.node, deadline);
        let guard = CancelGuard {
            node: Arc::clone(&node),
        };
        let scope = Scope {
            node,
            values: self.values.clone(),
        };
        (scope, guard)
    }

    /// Derives a child scope cancelled by the returned guard (or by the parent).
    pub fn with_cancel(&self) -> (Self, CancelGuard) {
        self.derive(None)
    }

    /// Derives a child scope that is cancelled after the given time elapses.
    ///
    /// See [`with_deadline`][Scope::with_deadline].
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelGuard) {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a child scope that is cancelled once the deadline passes.
    ///
    /// The deadline is watched by a helper thread that lives until the deadline passes or the
    /// scope is cancelled, whichever comes first. Dropping (or explicitly using) the returned
    /// guard releases it.
    pub fn with_deadline(&self, deadline: Instant) -> (Self, CancelGuard) {
        let (scope, guard) = self.derive(Some(deadline));
        if scope.is_cancelled() {
            return (scope, guard);
        }
        let effective = scope.node.deadline.unwrap_or(deadline);
        if effective <= Instant::now() {
            scope.node.cancel(Cancelled::DeadlineExceeded);
            return (scope, guard);
        }
        let node = Arc::clone(&scope.node);
        let spawned = thread::Builder::new()
            .name("appctx-deadline".to_owned())
            .spawn(move || node.expire_at(effective));
        if let Err(e) = spawned {
            warn!("Can't watch scope deadline, cancelling right away: {}", e);
            scope.node.cancel(Cancelled::DeadlineExceeded);
        }
        (scope, guard)
    }

    /// Derives a scope with an additional key/value binding.
    ///
    /// The new scope shares the cancellation with this one. A binding shadows any previous
    /// binding of the same key (and the same type).
    pub fn with_value<V>(&self, key: &'static str, value: V) -> Self
    where
        V: Any + Send + Sync,
    {
        let entry = ValueEntry {
            key,
            value: Box::new(value),
            parent: self.values.clone(),
        };
        Scope {
            node: Arc::clone(&self.node),
            values: Some(Arc::new(entry)),
        }
    }

    /// Looks up a value bound to the key in this scope or any of its ancestors.
    pub fn value<V: Any>(&self, key: &str) -> Option<&V> {
        let mut entry = self.values.as_deref();
        while let Some(e) = entry {
            if e.key == key {
                if let Some(v) = e.value.downcast_ref::<V>() {
                    return Some(v);
                }
            }
            entry = e.parent.as_deref();
        }
        None
    }

    /// Has the scope been cancelled already?
    pub fn is_cancelled(&self) -> bool {
        self.node.cause().is_some()
    }

    /// The reason of cancellation, if the scope is cancelled.
    pub fn cause(&self) -> Option<Cancelled> {
        self.node.cause()
    }

    /// Returns an error if the scope is cancelled.
    ///
    /// Handy for bailing out of a loop with `?`.
    pub fn check(&self) -> Result<(), Cancelled> {
        match self.cause() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }

    /// The effective deadline of the scope (the earliest one along the chain of parents).
    pub fn deadline(&self) -> Option<Instant> {
        self.node.deadline
    }

    /// Blocks until the scope is cancelled.
    pub fn wait(&self) -> Cancelled {
        self.node.wait()
    }

    /// Blocks until the scope is cancelled or the timeout elapses.
    ///
    /// Returns `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Cancelled> {
        self.node.wait_until(Instant::now() + timeout)
    }

    pub(crate) fn cancel(&self) {
        if self.node.cancellable {
            self.node.cancel(Cancelled::Canceled);
        }
    }
}

impl Debug for Scope {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.debug_struct("Scope")
            .field("cause", &self.cause())
            .field("deadline", &self.deadline())
            .finish()
    }
}

/// Releases a derived scope.
///
/// Returned by the derivation methods of [`Scope`] (and of [`App`][crate::App]). Dropping the
/// guard cancels the scope it belongs to; [`cancel`][CancelGuard::cancel] does the same
/// explicitly. Cancelling an already cancelled scope does nothing.
#[must_use = "Dropping the guard cancels the derived scope right away"]
pub struct CancelGuard {
    node: Arc<Node>,
}

impl CancelGuard {
    /// Cancels the scope now.
    pub fn cancel(self) {
        // Drop does the work.
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.node.cancel(Cancelled::Canceled);
    }
}

impl Debug for CancelGuard {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.debug_struct("CancelGuard")
            .field("cause", &self.node.cause())
            .finish()
    }
}
