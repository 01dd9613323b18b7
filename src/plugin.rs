//! Plugins.
//!
//! A plugin is an independently developed component that takes part in the lifecycle of the
//! [`App`]. It always has a name and it can hook into three points of the lifecycle:
//!
//! * [`Instantiate`][Hook::Instantiate]: before the command line is parsed. This is the place to
//!   register the plugin's own options and to fill in configuration defaults.
//! * [`Start`][Hook::Start]: once options, configuration and logging are ready and before the
//!   application callback runs.
//! * [`Stop`][Hook::Stop]: on the way out.
//!
//! Which hooks a plugin takes part in is declared by [`Plugin::hooks`]; the methods of the
//! undeclared ones are never called.
//!
//! The plugins are called in the order of registration, except for stopping which goes in the
//! reverse order. Only plugins that got through the start phase are stopped ‒ either their start
//! hook succeeded, or they don't have one.
//!
//! Instantiation stops at the first failure. Starting doesn't ‒ all the plugins are attempted and
//! the failures are reported together as [`PluginErrors`]. A hook that panics counts as a failed
//! one.
//!
//! # Examples
//!
//! ```rust
//! use appctx::{AnyError, App, Empty, Hook, LogOutput, Plugin};
//! use log::info;
//!
//! struct Announce;
//!
//! impl<C, P> Plugin<C, P> for Announce {
//!     fn name(&self) -> &str {
//!         "announce"
//!     }
//!
//!     fn hooks(&self) -> &'static [Hook] {
//!         &[Hook::Start, Hook::Stop]
//!     }
//!
//!     fn start(&mut self, _: &App<C, P>) -> Result<(), AnyError> {
//!         info!("Hello");
//!         Ok(())
//!     }
//!
//!     fn stop(&mut self, _: &App<C, P>) {
//!         info!("Bye");
//!     }
//! }
//!
//! let mut app = App::<Empty, Empty>::new("Example", "1.0.0")
//!     .args(Vec::<String>::new())
//!     .log_output(LogOutput::Off)
//!     .with_plugin(Announce);
//! app.disable_config();
//! app.run(|_| Ok(()));
//! assert!(!app.has_error());
//! ```

use std::mem;
use std::panic::{self, AssertUnwindSafe};

use log::{debug, error};
use parking_lot::Mutex;

use crate::app::App;
use crate::error::{panic_message, AnyError, LifecycleError, PluginErrors};

/// A lifecycle point a plugin can hook into.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Hook {
    /// [`Plugin::instantiate`], before the options are parsed.
    Instantiate,

    /// [`Plugin::start`], before the application callback runs.
    Start,

    /// [`Plugin::stop`], after the application callback.
    Stop,
}

/// The capabilities of a plugin.
///
/// Only [`name`][Plugin::name] is mandatory. The hooks have empty default implementations and are
/// called only if listed in [`hooks`][Plugin::hooks].
pub trait Plugin<C, P>: Send {
    /// The name of the plugin, used in logs and error messages.
    fn name(&self) -> &str;

    /// The hooks the plugin takes part in.
    fn hooks(&self) -> &'static [Hook] {
        &[]
    }

    /// Prepares the plugin, before the command line is parsed.
    ///
    /// A failure aborts the lifecycle right away, the later plugins are not instantiated.
    fn instantiate(&mut self, _app: &App<C, P>) -> Result<(), AnyError> {
        Ok(())
    }

    /// Starts the plugin.
    ///
    /// Configuration and logging are ready at this point. Long-running work should be moved to a
    /// background thread, the hook is expected to return quickly.
    fn start(&mut self, _app: &App<C, P>) -> Result<(), AnyError> {
        Ok(())
    }

    /// Stops the plugin.
    ///
    /// Any problems must be handled (logged) by the plugin itself.
    fn stop(&mut self, _app: &App<C, P>) {}
}

fn has_hook<C, P>(plugin: &dyn Plugin<C, P>, hook: Hook) -> bool {
    plugin.hooks().contains(&hook)
}

/// Calls a hook, turning its panic into an error.
fn call_hook<F>(hook: F) -> Result<(), AnyError>
where
    F: FnOnce() -> Result<(), AnyError>,
{
    panic::catch_unwind(AssertUnwindSafe(hook))
        .unwrap_or_else(|payload| Err(format!("panicked: {}", panic_message(payload)).into()))
}

struct Entry<C, P> {
    plugin: Box<dyn Plugin<C, P>>,
    started: bool,
}

/// The ordered list of registered plugins.
pub(crate) struct Plugins<C, P> {
    entries: Mutex<Vec<Entry<C, P>>>,
}

impl<C, P> Default for Plugins<C, P> {
    fn default() -> Self {
        Plugins {
            entries: Mutex::new(Vec::new()),
        }
    }
}

/// The entries taken out of the list for the duration of a dispatch.
///
/// The hooks get the whole [`App`] and may register more plugins in the meantime. These land in
/// the (temporarily empty) list and are appended behind the taken ones when this is dropped.
struct Taken<'a, C, P> {
    plugins: &'a Plugins<C, P>,
    entries: Vec<Entry<C, P>>,
}

impl<C, P> Drop for Taken<'_, C, P> {
    fn drop(&mut self) {
        let mut lock = self.plugins.entries.lock();
        let added = mem::replace(&mut *lock, mem::take(&mut self.entries));
        lock.extend(added);
    }
}

impl<C, P> Plugins<C, P> {
    pub(crate) fn register(&self, plugin: Box<dyn Plugin<C, P>>) {
        debug!(name = plugin.name(); "registering plugin");
        self.entries.lock().push(Entry {
            plugin,
            started: false,
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn take(&self) -> Taken<'_, C, P> {
        Taken {
            plugins: self,
            entries: mem::take(&mut *self.entries.lock()),
        }
    }

    pub(crate) fn instantiate(&self, app: &App<C, P>) -> Result<(), LifecycleError> {
        let mut taken = self.take();
        for entry in &mut taken.entries {
            if !has_hook(&*entry.plugin, Hook::Instantiate) {
                continue;
            }
            let name = entry.plugin.name().to_owned();
            debug!(name = name.as_str(); "instantiating plugin");
            let plugin = &mut entry.plugin;
            call_hook(|| plugin.instantiate(app)).map_err(|source| LifecycleError::Instantiate {
                plugin: name,
                source,
            })?;
        }
        Ok(())
    }

    pub(crate) fn start(&self, app: &App<C, P>) -> Result<(), PluginErrors> {
        let mut errors = PluginErrors::new();
        let mut taken = self.take();
        for entry in &mut taken.entries {
            if entry.started {
                continue;
            }
            if !has_hook(&*entry.plugin, Hook::Start) {
                entry.started = true;
                continue;
            }
            let name = entry.plugin.name().to_owned();
            debug!(name = name.as_str(); "starting plugin");
            let plugin = &mut entry.plugin;
            match call_hook(|| plugin.start(app)) {
                Ok(()) => entry.started = true,
                Err(e) => errors.push(name, e),
            }
        }
        errors.into_result()
    }

    pub(crate) fn stop(&self, app: &App<C, P>) {
        let mut taken = self.take();
        for entry in taken.entries.iter_mut().rev() {
            if !entry.started {
                continue;
            }
            entry.started = false;
            if !has_hook(&*entry.plugin, Hook::Stop) {
                continue;
            }
            let name = entry.plugin.name().to_owned();
            debug!(name = name.as_str(); "stopping plugin");
            let plugin = &mut entry.plugin;
            let stopped = call_hook(|| {
                plugin.stop(app);
                Ok(())
            });
            if let Err(e) = stopped {
                error!(name = name.as_str(); "stopping plugin: {}", e);
            }
        }
    }
}
