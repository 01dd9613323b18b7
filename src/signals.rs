//! Termination signal handling.
//!
//! While the application runs, a background thread listens for `SIGINT` and `SIGTERM` and turns
//! each of them into a cancellation of the root scope. The handling is installed at the start of
//! the lifecycle and torn down (the thread closed and joined) at its end, by dropping the
//! [`SignalGuard`].
//!
//! Once no guard is installed in the process, the signals take their default action (terminate
//! the process) again.

use std::io::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::debug;
use parking_lot::{const_mutex, Mutex};
use signal_hook::flag;
use signal_hook::iterator::{Handle, Signals};

const TERM_SIGNALS: &[libc::c_int] = &[libc::SIGINT, libc::SIGTERM];

/// Process-wide count of installed guards.
struct Installed {
    count: usize,
    // Registered once, true while the count is 0.
    default_action: Option<Arc<AtomicBool>>,
}

static INSTALLED: Mutex<Installed> = const_mutex(Installed {
    count: 0,
    default_action: None,
});

fn acquire() -> Result<(), Error> {
    let mut installed = INSTALLED.lock();
    let default_action = match installed.default_action.as_ref() {
        Some(default_action) => Arc::clone(default_action),
        None => {
            let default_action = Arc::new(AtomicBool::new(false));
            for sig in TERM_SIGNALS {
                flag::register_conditional_default(*sig, Arc::clone(&default_action))?;
            }
            installed.default_action = Some(Arc::clone(&default_action));
            default_action
        }
    };
    default_action.store(false, Ordering::Release);
    installed.count += 1;
    Ok(())
}

fn release() {
    let mut installed = INSTALLED.lock();
    installed.count -= 1;
    if installed.count == 0 {
        if let Some(default_action) = installed.default_action.as_ref() {
            default_action.store(true, Ordering::Release);
        }
    }
}

use crate::scope::Scope;

pub(crate) struct SignalGuard {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalGuard {
    /// Starts cancelling the scope on termination signals.
    pub(crate) fn install(root: Scope) -> Result<Self, Error> {
        acquire()?;
        let mut signals = match Signals::new(TERM_SIGNALS) {
            Ok(signals) => signals,
            Err(e) => {
                release();
                return Err(e);
            }
        };
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("appctx-signals".to_owned())
            .spawn(move || {
                debug!("Starting signal processing");
                for signal in signals.forever() {
                    debug!("Received signal {}", signal);
                    root.cancel();
                }
                debug!("Terminating the signal thread");
            });
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                handle.close();
                release();
                return Err(e);
            }
        };
        Ok(SignalGuard {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            // The thread only cancels a scope, it has nothing to panic about.
            let _ = thread.join();
        }
        release();
    }
}
