//! The lifecycle of the application.
//!
//! [`App::run`] drives the application through a fixed sequence of [`Phase`]s:
//!
//! 1. The root scope is created and tied to the termination signals (`SIGINT`, `SIGTERM`).
//! 2. The built-in options are registered: `-d`/`--debug` and `-c`/`--config-file`.
//! 3. Plugins are instantiated (and may register their own options).
//! 4. The command line is parsed.
//! 5. The configuration file is loaded, unless [disabled][App::disable_config].
//! 6. The logger is installed.
//! 7. Plugins are started.
//! 8. The application callback runs.
//! 9. The started plugins are stopped (always, whatever happened before).
//!
//! A failure in any of the phases skips right to stopping the plugins. The error is then
//! reported (logged, or printed if the logger isn't installed yet) and remembered;
//! [`exit_code`][App::exit_code] and [`exit`][App::exit] turn it into the process exit status.
//! The lifecycle itself never terminates the process.

use std::env;
use std::ffi::OsString;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process;
use std::sync::atomic::Ordering;

use err_context::prelude::*;
use log::{error, info};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::app::App;
use crate::cfg_loader;
use crate::error::{panic_message, AnyError, LifecycleError};
use crate::logging;
use crate::opts::OptError;
use crate::signals::SignalGuard;

/// A phase of the lifecycle.
///
/// The phases are ordered, the lifecycle only ever moves forward.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Phase {
    /// Not run yet.
    Created,
    /// Plugins are instantiated.
    Instantiated,
    /// All the options are registered.
    OptionsRegistered,
    /// The command line is parsed.
    OptionsParsed,
    /// The configuration is loaded.
    ConfigLoaded,
    /// The logger is installed.
    LoggingReady,
    /// Plugins are started.
    PluginsStarted,
    /// The application callback runs.
    Running,
    /// Plugins are stopped.
    PluginsStopped,
    /// All done.
    Terminated,
}

/// Outcome of the phases before the callback.
enum Setup {
    Ready,
    Help(String),
}

fn set_default(value: &mut String, default: &str) {
    if value.is_empty() {
        *value = default.to_owned();
    }
}

impl<C, P> App<C, P>
where
    C: Serialize + DeserializeOwned,
    P: Serialize + DeserializeOwned,
{
    /// Runs the application.
    ///
    /// Goes through the whole lifecycle (see the [module documentation][crate::lifecycle]),
    /// calling the `body` once everything is set up. The `body` gets the live context; it should
    /// return once the application is supposed to terminate, usually after the context gets
    /// cancelled ([`wait`][App::wait]).
    ///
    /// Failures are not returned, they are reported and remembered (see
    /// [`has_error`][App::has_error], [`take_error`][App::take_error]). An application can be
    /// run only once.
    pub fn run<B>(&mut self, body: B) -> &mut Self
    where
        B: FnOnce(&App<C, P>) -> Result<(), AnyError>,
    {
        if self.phase() != Phase::Created {
            self.report(Err(LifecycleError::AlreadyRun));
            return self;
        }
        {
            set_default(&mut self.shared.title.lock(), "App");
            set_default(&mut self.shared.version.lock(), "0.0.1");
        }

        let root = self.shared.root_scope.clone();
        let root_guard = self.shared.root_guard.lock().take();
        *self.shared.root.lock() = Some(root.clone());
        self.scope = root.clone();

        let (signals, result) = match SignalGuard::install(root) {
            Ok(signals) => (Some(signals), self.phases(body)),
            Err(e) => (None, Err(LifecycleError::Signals(e))),
        };

        self.shared.plugins.stop(self);
        self.set_phase(Phase::PluginsStopped);
        drop(root_guard);
        drop(signals);

        self.report(result);
        self.set_phase(Phase::Terminated);
        self
    }

    fn phases<B>(&self, body: B) -> Result<(), LifecycleError>
    where
        B: FnOnce(&App<C, P>) -> Result<(), AnyError>,
    {
        match self.setup()? {
            Setup::Help(help) => {
                println!("{}", help);
                Ok(())
            }
            Setup::Ready => {
                self.shared
                    .plugins
                    .start(self)
                    .map_err(LifecycleError::Start)?;
                self.set_phase(Phase::PluginsStarted);

                let (title, version) = (self.title(), self.version());
                info!(title = title.as_str(), version = version.as_str(); "app: running");
                self.set_phase(Phase::Running);
                match panic::catch_unwind(AssertUnwindSafe(|| body(self))) {
                    Ok(result) => result.map_err(LifecycleError::Callback),
                    Err(payload) => {
                        let msg = format!("callback panicked: {}", panic_message(payload));
                        Err(LifecycleError::Callback(msg.into()))
                    }
                }
            }
        }
    }

    fn setup(&self) -> Result<Setup, LifecycleError> {
        self.option(
            &["d", "debug"],
            self.shared.debug.clone(),
            false,
            "enable debug output",
        )
        .map_err(LifecycleError::Options)?;
        self.option(
            &["c", "config-file"],
            self.shared.config_file.clone(),
            "config.yml",
            "path to config file",
        )
        .map_err(LifecycleError::Options)?;

        self.shared.plugins.instantiate(self)?;
        self.set_phase(Phase::Instantiated);
        self.set_phase(Phase::OptionsRegistered);

        let (no_flags, no_config, args, output) = {
            let settings = self.shared.settings.lock();
            (
                settings.no_flags,
                settings.no_config,
                settings.args.clone(),
                settings.log_output.clone(),
            )
        };

        {
            let options = self.shared.options.lock();
            if no_flags {
                options.apply_defaults();
            } else {
                let args = args.unwrap_or_else(|| env::args_os().skip(1).collect::<Vec<OsString>>());
                match options.resolve(&self.title(), &self.version(), args) {
                    Ok(()) => (),
                    Err(OptError::Help(help)) => return Ok(Setup::Help(help)),
                    Err(e) => return Err(LifecycleError::ParseOptions(e)),
                }
            }
        }
        self.set_phase(Phase::OptionsParsed);

        let debug = self.shared.debug.get();
        if no_config {
            self.shared.cfg.write().debug = debug;
        } else {
            let path = self.shared.config_file.get();
            let loaded = {
                let mut cfg = self.shared.cfg.write();
                cfg.debug = debug;
                cfg_loader::load(Path::new(&path), &*cfg).map_err(LifecycleError::Config)?
            };
            self.shared.debug.set(loaded.debug);
            *self.shared.cfg.write() = loaded;
        }
        self.set_phase(Phase::ConfigLoaded);

        logging::install(self.shared.debug.get(), &output);
        self.shared.has_logger.store(true, Ordering::Release);
        self.set_phase(Phase::LoggingReady);

        Ok(Setup::Ready)
    }

    fn report(&self, result: Result<(), LifecycleError>) {
        let has_logger = self.shared.has_logger.load(Ordering::Acquire);
        match result {
            Ok(()) => {
                if has_logger {
                    info!("shutting down");
                }
            }
            Err(e) => {
                let e: AnyError = e.into();
                if has_logger {
                    let msg = e.display(": ").to_string();
                    error!(error = msg.as_str(); "shutting down");
                } else {
                    eprintln!("ERROR: {}", e.display(": "));
                }
                self.shared.has_error.store(true, Ordering::Release);
                *self.shared.error.lock() = Some(e);
            }
        }
    }
}

impl<C, P> App<C, P> {
    /// The exit status matching the outcome of the run.
    ///
    /// 0 on success (or if the application hasn't run), 1 on failure.
    pub fn exit_code(&self) -> i32 {
        if self.has_error() {
            1
        } else {
            0
        }
    }

    /// Terminates the process with the [exit status][App::exit_code] of the run.
    pub fn exit(&self) -> ! {
        process::exit(self.exit_code())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Error, ErrorKind, Write};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde::Deserialize;
    use tempfile::NamedTempFile;

    use super::*;
    use crate::logging::LogOutput;
    use crate::opts::Opt;
    use crate::plugin::{Hook, Plugin};
    use crate::scope::Cancelled;
    use crate::Empty;

    fn app<C: Default, P: Default>() -> App<C, P> {
        App::new("Test App", "1.0.0")
            .args(Vec::<String>::new())
            .log_output(LogOutput::Off)
    }

    #[test]
    fn simple_app() {
        let mut app = app::<Empty, Empty>();
        app.disable_config();
        let mut called = false;
        app.run(|_| {
            called = true;
            Ok(())
        });
        assert!(called);
        assert_eq!("Test App", app.title());
        assert_eq!("1.0.0", app.version());
        assert!(!app.has_error());
        assert_eq!(0, app.exit_code());
        assert_eq!(Phase::Terminated, app.phase());
    }

    #[test]
    fn default_title_and_version() {
        let mut app = App::<Empty, Empty>::new("", "")
            .args(Vec::<String>::new())
            .log_output(LogOutput::Off);
        app.disable_config();
        app.run(|_| Ok(()));
        assert_eq!("App", app.title());
        assert_eq!("0.0.1", app.version());
    }

    #[test]
    fn error_handling() {
        let mut app = app::<Empty, Empty>();
        app.disable_config();
        app.run(|_| Err(Error::new(ErrorKind::Other, "boom").into()));
        assert!(app.has_error());
        assert_eq!(1, app.exit_code());
        let e = app.take_error().unwrap();
        assert_eq!("running app: boom", e.display(": ").to_string());
        assert!(app.has_error());
    }

    #[test]
    fn panic_in_callback() {
        let mut app = app::<Empty, Empty>();
        app.disable_config();
        app.run(|_| panic!("oops"));
        assert!(app.has_error());
        assert!(app
            .take_error()
            .unwrap()
            .display(": ")
            .to_string()
            .contains("oops"));
    }

    #[test]
    fn stop_then_wait() {
        let mut app = app::<Empty, Empty>();
        app.disable_config();
        app.run(|app| {
            app.stop();
            let cause = app.wait();
            assert_eq!(Cancelled::Canceled, cause);
            Err(cause.into())
        });
        assert!(app.has_error());
        assert!(app.is_cancelled());
    }

    #[test]
    fn stop_from_another_thread() {
        let mut app = app::<Empty, Empty>();
        app.disable_config();
        app.run(|app| {
            let remote = app.clone();
            let handle = std::thread::spawn(move || remote.stop());
            app.wait();
            handle.join().unwrap();
            Ok(())
        });
        assert!(!app.has_error());
    }

    #[derive(Clone, Debug, Default, Deserialize, Serialize)]
    struct Cfg {
        test_str: String,
    }

    #[test]
    fn config_set_before_run() {
        let mut app = app::<Cfg, Empty>();
        app.config_mut().test_str = "1".to_owned();
        app.disable_config();
        app.run(|app| {
            assert_eq!("1", app.config().test_str);
            Ok(())
        });
        assert!(!app.has_error());
    }

    #[test]
    fn string_option_without_config() {
        let mut app = app::<Empty, Empty>();
        let target = Opt::new(String::new());
        app.option(&["t"], target.clone(), "test.yml", "test option")
            .unwrap();
        app.disable_config();
        app.run(|_| Ok(()));
        assert!(!app.has_error());
        assert_eq!("test.yml", target.get());
        assert_eq!("config.yml", app.config_file());
    }

    #[test]
    fn disabled_flags_apply_defaults() {
        let mut app = App::<Empty, Empty>::new("Test App", "1.0.0")
            .args(vec!["--unknown"])
            .log_output(LogOutput::Off);
        let target = Opt::new(0);
        app.option(&["w", "workers"], target.clone(), 4, "workers")
            .unwrap();
        app.disable_flags();
        app.disable_config();
        app.run(|_| Ok(()));
        assert!(!app.has_error());
        assert_eq!(4, target.get());
    }

    #[test]
    fn bad_flag() {
        let mut app = App::<Empty, Empty>::new("Test App", "1.0.0")
            .args(vec!["--unknown"])
            .log_output(LogOutput::Off);
        app.disable_config();
        let mut called = false;
        app.run(|_| {
            called = true;
            Ok(())
        });
        assert!(!called);
        assert!(app.has_error());
        match app.take_error().unwrap().downcast::<LifecycleError>() {
            Ok(e) => match *e {
                LifecycleError::ParseOptions(_) => (),
                other => panic!("Unexpected error {:?}", other),
            },
            Err(e) => panic!("Unexpected error {}", e),
        }
    }

    #[test]
    fn help_is_not_an_error() {
        let mut app = App::<Empty, Empty>::new("Test App", "1.0.0")
            .args(vec!["--help"])
            .log_output(LogOutput::Off);
        app.disable_config();
        let mut called = false;
        app.run(|_| {
            called = true;
            Ok(())
        });
        assert!(!called);
        assert!(!app.has_error());
        assert_eq!(Phase::Terminated, app.phase());
    }

    #[test]
    fn missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.yml");
        let mut app = App::<Cfg, Empty>::new("Test App", "1.0.0")
            .args(vec![OsString::from("-c"), path.into_os_string()])
            .log_output(LogOutput::Off);
        app.run(|_| Ok(()));
        assert!(app.has_error());
        let e = app.take_error().unwrap();
        assert!(e.to_string().starts_with("loading config"));
    }

    #[test]
    fn config_file_from_flag() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"debug: true\ntest_str: from file\n").unwrap();
        let mut app = App::<Cfg, Empty>::new("Test App", "1.0.0")
            .args(vec![OsString::from("--config-file"), file.path().into()])
            .log_output(LogOutput::Off);
        app.config_mut().test_str = "default".to_owned();
        app.run(|app| {
            assert_eq!("from file", app.config().test_str);
            assert!(app.debug());
            Ok(())
        });
        assert!(!app.has_error());
    }

    #[test]
    fn run_only_once() {
        let mut app = app::<Empty, Empty>();
        app.disable_config();
        app.run(|_| Ok(()));
        assert!(!app.has_error());
        let mut called = false;
        app.run(|_| {
            called = true;
            Ok(())
        });
        assert!(!called);
        assert!(app.has_error());
    }

    #[derive(Default)]
    struct State {
        started: bool,
        stopped: bool,
    }

    struct Tester {
        name: &'static str,
        fail: bool,
        state: Arc<Mutex<State>>,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin<Empty, Empty> for Tester {
        fn name(&self) -> &str {
            self.name
        }

        fn hooks(&self) -> &'static [Hook] {
            &[Hook::Start, Hook::Stop]
        }

        fn start(&mut self, _: &App<Empty, Empty>) -> Result<(), AnyError> {
            self.journal.lock().push(format!("start {}", self.name));
            if self.fail {
                return Err(Error::new(ErrorKind::Other, "can't start").into());
            }
            self.state.lock().started = true;
            Ok(())
        }

        fn stop(&mut self, _: &App<Empty, Empty>) {
            self.journal.lock().push(format!("stop {}", self.name));
            self.state.lock().stopped = true;
        }
    }

    fn tester(name: &'static str, fail: bool, journal: &Arc<Mutex<Vec<String>>>) -> Tester {
        Tester {
            name,
            fail,
            state: Arc::default(),
            journal: Arc::clone(journal),
        }
    }

    #[test]
    fn plugin_started_and_stopped() {
        let journal = Arc::default();
        let plugin = tester("testing", false, &journal);
        let state = Arc::clone(&plugin.state);
        let mut app = app::<Empty, Empty>().with_plugin(plugin);
        app.disable_config();
        app.run(|_| {
            assert!(state.lock().started);
            assert!(!state.lock().stopped);
            Ok(())
        });
        assert!(state.lock().started);
        assert!(state.lock().stopped);
        assert!(!app.has_error());
    }

    #[test]
    fn partial_start_failure_is_torn_down() {
        let journal = Arc::default();
        let mut app = app::<Empty, Empty>()
            .with_plugin(tester("A", false, &journal))
            .with_plugin(tester("B", true, &journal));
        app.disable_config();
        let mut called = false;
        app.run(|_| {
            called = true;
            Ok(())
        });
        assert!(!called);
        assert!(app.has_error());
        assert_eq!(vec!["start A", "start B", "stop A"], *journal.lock());
        let e = app.take_error().unwrap();
        assert_eq!(
            "starting plugins: starting plugin \"B\": can't start",
            e.display(": ").to_string()
        );
    }

    struct Explosive;

    impl Plugin<Empty, Empty> for Explosive {
        fn name(&self) -> &str {
            "explosive"
        }

        fn hooks(&self) -> &'static [Hook] {
            &[Hook::Start]
        }

        fn start(&mut self, _: &App<Empty, Empty>) -> Result<(), AnyError> {
            panic!("kaboom");
        }
    }

    #[test]
    fn panicking_plugin_is_torn_down() {
        let journal = Arc::default();
        let mut app = app::<Empty, Empty>()
            .with_plugin(tester("A", false, &journal))
            .with_plugin(Explosive);
        app.disable_config();
        app.run(|_| Ok(()));
        assert!(app.has_error());
        assert_eq!(vec!["start A", "stop A"], *journal.lock());
        assert_eq!(Phase::Terminated, app.phase());
        let e = app.take_error().unwrap();
        assert_eq!(
            "starting plugins: starting plugin \"explosive\": panicked: kaboom",
            e.display(": ").to_string()
        );
    }

    #[cfg(unix)]
    #[test]
    fn invalid_utf8_argument() {
        use std::os::unix::ffi::OsStringExt;

        let mut app = App::<Empty, Empty>::new("Test App", "1.0.0")
            .args(vec![OsString::from("-c"), OsString::from_vec(vec![0xff])])
            .log_output(LogOutput::Off);
        app.run(|_| Ok(()));
        assert!(app.has_error());
        let e = app.take_error().unwrap();
        assert!(e.to_string().starts_with("initializing options"));
    }

    #[test]
    fn clone_before_run_sees_stop() {
        let mut app = app::<Empty, Empty>();
        app.disable_config();
        let early = app.clone();
        let waiter = early.clone();
        let waiter = std::thread::spawn(move || waiter.wait());
        app.run(|app| {
            app.stop();
            assert!(early.is_cancelled());
            Ok(())
        });
        assert_eq!(Cancelled::Canceled, waiter.join().unwrap());
        assert_eq!(Some(Cancelled::Canceled), early.cause());
    }

    #[test]
    fn exit_code_before_run() {
        let app = app::<Empty, Empty>();
        assert_eq!(0, app.exit_code());
    }
}
