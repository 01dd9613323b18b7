//! The application context.
//!
//! The [`App`] is the handle threaded through the whole run of the application. It owns the
//! configuration (the application's own schema `C` and the plugins' schema `P`), the registered
//! options and plugins and the cancellation [`Scope`] of the run.
//!
//! The handle is cheap to clone and clones share everything. Derived contexts
//! ([`with_timeout`][App::with_timeout], [`with_cancel`][App::with_cancel],
//! [`with_value`][App::with_value]) share the configuration and the registries too, but wrap a
//! new scope. The original context is never modified by a derivation.

use std::ffi::OsString;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::cfg_loader::AppConfig;
use crate::error::AnyError;
use crate::lifecycle::Phase;
use crate::logging::LogOutput;
use crate::opts::{Opt, OptDescriptor, OptError, OptTarget, OptValue, Registry};
use crate::plugin::{Plugin, Plugins};
use crate::scope::{CancelGuard, Cancelled, Scope};

pub(crate) struct Settings {
    pub(crate) no_config: bool,
    pub(crate) no_flags: bool,
    pub(crate) args: Option<Vec<OsString>>,
    pub(crate) log_output: LogOutput,
}

/// The part shared between all the clones and derivations of one [`App`].
pub(crate) struct Shared<C, P> {
    pub(crate) cfg: RwLock<AppConfig<C, P>>,
    pub(crate) options: Mutex<Registry>,
    pub(crate) plugins: Plugins<C, P>,
    /// The root scope, armed (reachable by [`App::stop`]) once the run starts.
    pub(crate) root: Mutex<Option<Scope>>,
    pub(crate) root_scope: Scope,
    pub(crate) root_guard: Mutex<Option<CancelGuard>>,
    pub(crate) phase: Mutex<Phase>,
    pub(crate) has_logger: AtomicBool,
    pub(crate) has_error: AtomicBool,
    pub(crate) error: Mutex<Option<AnyError>>,
    pub(crate) title: Mutex<String>,
    pub(crate) version: Mutex<String>,
    pub(crate) debug: Opt<bool>,
    pub(crate) config_file: Opt<String>,
    pub(crate) settings: Mutex<Settings>,
}

/// The application context.
///
/// See the [module documentation](index.html) and [`run`][App::run].
pub struct App<C, P> {
    pub(crate) scope: Scope,
    pub(crate) shared: Arc<Shared<C, P>>,
}

/// Clones share everything, including the scope.
///
/// A clone taken before [`run`][App::run] already holds the root scope of the run, so it sees
/// [`stop`][App::stop] and the termination signals the same way the original does.
impl<C, P> Clone for App<C, P> {
    fn clone(&self) -> Self {
        App {
            scope: self.scope.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C, P> Debug for App<C, P> {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.debug_struct("App")
            .field("title", &*self.shared.title.lock())
            .field("version", &*self.shared.version.lock())
            .field("phase", &self.phase())
            .field("scope", &self.scope)
            .finish()
    }
}

impl<C: Default, P: Default> App<C, P> {
    /// Creates the context.
    ///
    /// Empty title and version are replaced by `App` and `0.0.1` once the application runs.
    pub fn new<T: Into<String>, V: Into<String>>(title: T, version: V) -> Self {
        let (root_scope, root_guard) = Scope::background().with_cancel();
        let shared = Shared {
            cfg: RwLock::new(AppConfig::default()),
            options: Mutex::new(Registry::default()),
            plugins: Plugins::default(),
            root: Mutex::new(None),
            root_scope: root_scope.clone(),
            root_guard: Mutex::new(Some(root_guard)),
            phase: Mutex::new(Phase::Created),
            has_logger: AtomicBool::new(false),
            has_error: AtomicBool::new(false),
            error: Mutex::new(None),
            title: Mutex::new(title.into()),
            version: Mutex::new(version.into()),
            debug: Opt::new(false),
            config_file: Opt::new(String::new()),
            settings: Mutex::new(Settings {
                no_config: false,
                no_flags: false,
                args: None,
                log_output: LogOutput::default(),
            }),
        };
        App {
            scope: root_scope,
            shared: Arc::new(shared),
        }
    }
}

impl<C, P> App<C, P> {
    /// Uses these command line arguments instead of the ones of the process.
    ///
    /// The program name is *not* part of the arguments.
    pub fn args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.shared.settings.lock().args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Chooses where the logs go.
    pub fn log_output(self, output: LogOutput) -> Self {
        self.shared.settings.lock().log_output = output;
        self
    }

    /// Skips loading of the configuration file.
    ///
    /// The configuration keeps whatever was put into it before running.
    pub fn disable_config(&mut self) {
        self.shared.settings.lock().no_config = true;
    }

    /// Skips parsing of the command line.
    ///
    /// The options still get their default values.
    pub fn disable_flags(&mut self) {
        self.shared.settings.lock().no_flags = true;
    }

    /// Registers a plugin.
    ///
    /// Plugins should be registered before the application runs (or from an instantiate hook of
    /// another plugin).
    pub fn register_plugin<T: Plugin<C, P> + 'static>(&self, plugin: T) {
        if self.phase() >= Phase::OptionsParsed {
            warn!("Registering plugin {} too late, it won't take part in all phases", plugin.name());
        }
        self.shared.plugins.register(Box::new(plugin));
    }

    /// Registers a plugin, builder style.
    pub fn with_plugin<T: Plugin<C, P> + 'static>(self, plugin: T) -> Self {
        self.register_plugin(plugin);
        self
    }

    /// Registers a command line option.
    ///
    /// The `names` are the aliases, one-letter ones being short options. The `target` is where the
    /// value ends up and its type has to match the one of the `default`.
    pub fn option<T, D>(
        &self,
        names: &[&str],
        target: T,
        default: D,
        description: &str,
    ) -> Result<(), OptError>
    where
        T: Into<OptTarget>,
        D: Into<OptValue>,
    {
        self.shared
            .options
            .lock()
            .register(names, target.into(), default.into(), description)
    }

    /// The registered options.
    pub fn options(&self) -> Vec<OptDescriptor> {
        self.shared.options.lock().descriptors().to_vec()
    }

    /// The help text, as shown for `--help`.
    pub fn usage(&self) -> String {
        self.shared
            .options
            .lock()
            .usage(&self.title(), &self.version())
    }

    /// The application's configuration.
    pub fn config(&self) -> MappedRwLockReadGuard<'_, C> {
        RwLockReadGuard::map(self.shared.cfg.read(), |cfg| &cfg.config)
    }

    /// The plugins' configuration.
    pub fn plugins(&self) -> MappedRwLockReadGuard<'_, P> {
        RwLockReadGuard::map(self.shared.cfg.read(), |cfg| &cfg.plugins)
    }

    /// Short for [`config`][App::config].
    pub fn c(&self) -> MappedRwLockReadGuard<'_, C> {
        self.config()
    }

    /// Short for [`plugins`][App::plugins].
    pub fn p(&self) -> MappedRwLockReadGuard<'_, P> {
        self.plugins()
    }

    fn check_mutation(&self) {
        if self.phase() >= Phase::ConfigLoaded {
            warn!("Configuration modified after it has been loaded");
        }
    }

    /// Modifies the application's configuration.
    ///
    /// This is meant for setting defaults before the application runs (or from an instantiate
    /// hook). Once the configuration is loaded it should be treated as read only.
    pub fn config_mut(&self) -> MappedRwLockWriteGuard<'_, C> {
        self.check_mutation();
        RwLockWriteGuard::map(self.shared.cfg.write(), |cfg| &mut cfg.config)
    }

    /// Modifies the plugins' configuration.
    ///
    /// The same rules as for [`config_mut`][App::config_mut] apply.
    pub fn plugins_mut(&self) -> MappedRwLockWriteGuard<'_, P> {
        self.check_mutation();
        RwLockWriteGuard::map(self.shared.cfg.write(), |cfg| &mut cfg.plugins)
    }

    /// Is the debug output enabled?
    ///
    /// Resolved from the command line and the configuration.
    pub fn debug(&self) -> bool {
        self.shared.debug.get()
    }

    /// The path of the configuration file.
    pub fn config_file(&self) -> String {
        self.shared.config_file.get()
    }

    /// The title of the application, `App` if it was created with an empty one.
    pub fn title(&self) -> String {
        self.shared.title.lock().clone()
    }

    /// The version, `0.0.1` if it was created with an empty one.
    pub fn version(&self) -> String {
        self.shared.version.lock().clone()
    }

    /// Where in the lifecycle the application is.
    pub fn phase(&self) -> Phase {
        *self.shared.phase.lock()
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        trace!("Entering phase {:?}", phase);
        *self.shared.phase.lock() = phase;
    }

    /// Did the run fail?
    pub fn has_error(&self) -> bool {
        self.shared.has_error.load(Ordering::Acquire)
    }

    /// Takes the error the run failed with, if any.
    ///
    /// [`has_error`][App::has_error] keeps reporting the failure.
    pub fn take_error(&self) -> Option<AnyError> {
        self.shared.error.lock().take()
    }

    /// Requests the application to stop.
    ///
    /// This cancels the root scope of the run, which is seen by every scope derived from it. It
    /// can be called from any thread, any number of times. Before the application runs, it does
    /// nothing.
    pub fn stop(&self) {
        debug!("app stop requested");
        if let Some(root) = self.shared.root.lock().as_ref() {
            root.cancel();
        }
    }

    /// The cancellation scope of this context.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Has the scope of this context been cancelled?
    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }

    /// The reason of cancellation, if any.
    pub fn cause(&self) -> Option<Cancelled> {
        self.scope.cause()
    }

    /// Blocks until the scope of this context is cancelled.
    pub fn wait(&self) -> Cancelled {
        self.scope.wait()
    }

    /// A context sharing everything with this one except for the scope.
    pub fn with_scope(&self, scope: Scope) -> Self {
        App {
            scope,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Derives a context carrying an additional value.
    ///
    /// See [`Scope::with_value`].
    pub fn with_value<V>(&self, key: &'static str, value: V) -> Self
    where
        V: std::any::Any + Send + Sync,
    {
        self.with_scope(self.scope.with_value(key, value))
    }

    /// Derives a context cancelled after the timeout.
    ///
    /// The guard must be kept alive for as long as the context is used, dropping it releases
    /// (cancels) the context.
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelGuard) {
        let (scope, guard) = self.scope.with_timeout(timeout);
        (self.with_scope(scope), guard)
    }

    /// Derives a context cancelled by the returned guard.
    pub fn with_cancel(&self) -> (Self, CancelGuard) {
        let (scope, guard) = self.scope.with_cancel();
        (self.with_scope(scope), guard)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::Empty;

    #[derive(Clone, Debug, Default, Deserialize, Serialize)]
    struct Cfg {
        test_str: String,
    }

    #[test]
    fn stop_before_run_is_noop() {
        let app = App::<Empty, Empty>::new("Test App", "1.0.0");
        app.stop();
        app.stop();
        assert!(!app.is_cancelled());
        assert!(!app.has_error());
        assert_eq!(Phase::Created, app.phase());
    }

    #[test]
    fn derivation_keeps_original() {
        let app = App::<Cfg, Empty>::new("Test App", "1.0.0");
        let (derived, guard) = app.with_cancel();
        let valued = derived.with_value("request", 42u32);
        guard.cancel();
        assert!(derived.is_cancelled());
        assert!(valued.is_cancelled());
        assert!(!app.is_cancelled());
        assert_eq!(Some(&42), valued.scope().value::<u32>("request"));
        assert_eq!(None, app.scope().value::<u32>("request"));

        // The configuration is shared though.
        derived.config_mut().test_str = "shared".to_owned();
        assert_eq!("shared", app.c().test_str);
    }

    #[test]
    fn timeout_derivation() {
        let app = App::<Empty, Empty>::new("Test App", "1.0.0");
        let (derived, _guard) = app.with_timeout(Duration::from_millis(10));
        assert_eq!(Cancelled::DeadlineExceeded, derived.wait());
        assert!(!app.is_cancelled());
    }

    #[test]
    fn option_registration() {
        let app = App::<Empty, Empty>::new("Test App", "1.0.0");
        let name = Opt::new(String::new());
        app.option(&["n", "name"], name.clone(), "joe", "who to greet")
            .unwrap();
        match app.option(&["name"], name.clone(), "bob", "again") {
            Err(OptError::Duplicate(dup)) => assert_eq!("name", dup),
            other => panic!("Unexpected result {:?}", other),
        }
        match app.option(&["count"], name, 3, "wrong type") {
            Err(OptError::DefaultMismatch { .. }) => (),
            other => panic!("Unexpected result {:?}", other),
        }
        assert_eq!(1, app.options().len());
        assert!(app.usage().contains("-n, --name: who to greet"));
    }
}
