#![forbid(unsafe_code)]

//! A barebone plugin, to show how plugins are written.
//!
//! The plugin takes part in all three lifecycle hooks:
//!
//! * While instantiating, it registers the `-g`/`--greeting` command line option.
//! * When started, it logs a message. If the `greeting_interval` is configured, it also starts a
//!   background thread logging the greeting periodically until the application stops.
//! * When stopped, it stops the thread and logs a message.
//!
//! Its configuration ([`ExampleCfg`]) is meant to be flattened into the plugins' configuration
//! structure of the application, so the keys land at the top level of the configuration file.
//!
//! # Examples
//!
//! ```rust
//! use appctx::prelude::*;
//! use appctx_example::{ExampleCfg, ExamplePlugin};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Default, Deserialize, Serialize)]
//! struct Plugins {
//!     #[serde(flatten)]
//!     example: ExampleCfg,
//! }
//!
//! fn example(p: &Plugins) -> &ExampleCfg {
//!     &p.example
//! }
//!
//! let plugin = ExamplePlugin::<Empty, Plugins>::new(example);
//! let greeting = plugin.greeting();
//! let mut app = App::<Empty, Plugins>::new("Example", "1.0.0")
//!     .args(vec!["--greeting", "Ahoy"])
//!     .log_output(LogOutput::Off)
//!     .with_plugin(plugin);
//! app.disable_config();
//! app.run(|app| {
//!     assert_eq!("Ahoy", greeting.get());
//!     println!("{}", app.plugins().example.describe());
//!     Ok(())
//! });
//! assert!(!app.has_error());
//! ```

use std::marker::PhantomData;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use appctx::{AnyError, App, CancelGuard, Hook, Opt, Plugin};
use err_context::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};

/// Configuration of the example plugin.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExampleCfg {
    /// An arbitrary string, shown by [`describe`][ExampleCfg::describe].
    #[serde(default)]
    pub plugin_config_item: String,

    /// How often to log the greeting.
    ///
    /// Nothing is logged periodically if not set.
    #[serde(
        default,
        serialize_with = "appctx::utils::serialize_opt_duration",
        deserialize_with = "appctx::utils::deserialize_opt_duration"
    )]
    pub greeting_interval: Option<Duration>,
}

impl ExampleCfg {
    /// A function the application can call through the configuration.
    pub fn describe(&self) -> String {
        format!(
            "Example plugin: value of plugin_config_item is \"{}\"",
            self.plugin_config_item
        )
    }
}

struct Greeter {
    guard: CancelGuard,
    thread: JoinHandle<()>,
}

/// The example plugin.
///
/// The plugin finds its [`ExampleCfg`] inside the plugins' configuration `P` with the extractor
/// passed to [`new`][ExamplePlugin::new].
pub struct ExamplePlugin<C, P> {
    extract: for<'a> fn(&'a P) -> &'a ExampleCfg,
    greeting: Opt<String>,
    greeter: Option<Greeter>,
    _cfg: PhantomData<fn() -> C>,
}

impl<C, P> ExamplePlugin<C, P> {
    /// Creates the plugin, `extract` finds its configuration in `P`.
    pub fn new(extract: for<'a> fn(&'a P) -> &'a ExampleCfg) -> Self {
        ExamplePlugin {
            extract,
            greeting: Opt::new(String::new()),
            greeter: None,
            _cfg: PhantomData,
        }
    }

    /// The value of the `--greeting` option.
    ///
    /// Available once the options are parsed.
    pub fn greeting(&self) -> Opt<String> {
        self.greeting.clone()
    }
}

impl<C, P> Plugin<C, P> for ExamplePlugin<C, P> {
    fn name(&self) -> &str {
        "example"
    }

    fn hooks(&self) -> &'static [Hook] {
        &[Hook::Instantiate, Hook::Start, Hook::Stop]
    }

    fn instantiate(&mut self, app: &App<C, P>) -> Result<(), AnyError> {
        app.option(
            &["g", "greeting"],
            self.greeting.clone(),
            "Hello",
            "greeting logged by the example plugin",
        )?;
        Ok(())
    }

    fn start(&mut self, app: &App<C, P>) -> Result<(), AnyError> {
        info!("example: running start");
        let interval = (self.extract)(&*app.plugins()).greeting_interval;
        if let Some(interval) = interval {
            let (scope, guard) = app.scope().with_cancel();
            let greeting = self.greeting.clone();
            let thread = thread::Builder::new()
                .name("example-greeter".to_owned())
                .spawn(move || {
                    while scope.wait_timeout(interval).is_none() {
                        info!(greeting = greeting.get().as_str(); "example: greeting");
                    }
                })
                .context("Failed to start the greeter thread")?;
            self.greeter = Some(Greeter { guard, thread });
        }
        Ok(())
    }

    fn stop(&mut self, _app: &App<C, P>) {
        if let Some(greeter) = self.greeter.take() {
            greeter.guard.cancel();
            if greeter.thread.join().is_err() {
                appctx::log_error!(Warn, AnyError::from("The greeter thread panicked"));
            }
        }
        info!("example: running stop");
    }
}
