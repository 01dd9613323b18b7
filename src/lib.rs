#![doc(
    html_root_url = "https://docs.rs/appctx/0.1.0/appctx/",
    test(attr(deny(warnings)))
)]
#![allow(clippy::type_complexity)]
#![forbid(unsafe_code)]

//! An application context for long-running processes.
//!
//! Every service has the same boring part around its actual functionality. It needs to parse the
//! command line, load a configuration file, set up logging, react to termination signals and shut
//! down in an orderly fashion. This crate does that part, driving the application through a fixed
//! lifecycle, and lets independently developed [plugins][Plugin] take part in it.
//!
//! # What the crate does and how
//!
//! Everything revolves around the [`App`], created with [`App::new`]. It is parametrized by two
//! configuration structures, `C` for the application itself and `P` for the plugins (usually a
//! struct composed of the configuration structures of the used plugins). Both are loaded from the
//! same configuration file, next to each other. If one of them is not needed, it can be plugged
//! with [`Empty`].
//!
//! Calling [`App::run`] then:
//!
//! * Ties the cancellation of the application to `SIGINT` and `SIGTERM`.
//! * Registers the built-in command line options (`-d`/`--debug` and `-c`/`--config-file`) and
//!   lets the plugins register theirs (see the [`opts`] module).
//! * Parses the command line.
//! * Loads the configuration file (`config.yml` by default; see [`cfg_loader`]).
//! * Installs a logger, through the [`log`] facade. With debug output enabled the logs are
//!   formatted for humans, otherwise they are JSON lines (see [`logging`]).
//! * Starts the plugins.
//! * Runs the provided callback.
//! * Stops the plugins again.
//!
//! The phases are described in detail in the [`lifecycle`] module.
//!
//! The context carries a cancellation [`Scope`]. The callback is expected to run until the scope
//! is cancelled, which happens on a termination signal or when someone calls [`App::stop`].
//! Derived contexts with their own scopes (eg. with a timeout) can be created from it.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//!
//! use appctx::prelude::*;
//! use log::info;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Deserialize, Serialize)]
//! struct Cfg {
//!     message: String,
//!     #[serde(
//!         serialize_with = "appctx::utils::serialize_duration",
//!         deserialize_with = "appctx::utils::deserialize_duration",
//!     )]
//!     sleep: Duration,
//! }
//!
//! let mut app = App::<Cfg, Empty>::new("Hello", "1.0.0")
//!     # .args(Vec::<String>::new())
//!     # .log_output(LogOutput::Off)
//!     ;
//! app.config_mut().message = "Hello world".to_owned();
//! app.config_mut().sleep = Duration::from_millis(10);
//! # app.disable_config();
//! app.run(|app| {
//!     // Request a deadline for this piece of work
//!     let (work, _guard) = app.with_timeout(app.config().sleep);
//!     info!("{}", app.config().message);
//!     work.wait();
//!     # app.stop();
//!     Ok(())
//! });
//! app.exit_code();
//! ```
//!
//! The real application would end with [`app.exit()`][App::exit] instead, to propagate the
//! outcome to the exit status of the process.
//!
//! # Configuration
//!
//! The configuration file is YAML. Apart from the keys of `C` and `P`, it contains a `debug`
//! switch:
//!
//! ```yaml
//! debug: true
//! message: Hello world
//! sleep: 2s
//! ```
//!
//! Anything the file doesn't mention keeps the value it had before loading. That way defaults can
//! be set by the application (before running) and by the plugins (while instantiating).

pub mod app;
pub mod cfg_loader;
mod empty;
pub mod error;
pub mod lifecycle;
pub mod logging;
#[doc(hidden)]
pub mod macro_support;
pub mod opts;
pub mod plugin;
pub mod scope;
mod signals;
pub mod utils;

pub use crate::app::App;
pub use crate::cfg_loader::AppConfig;
pub use crate::empty::Empty;
pub use crate::error::AnyError;
pub use crate::lifecycle::Phase;
pub use crate::logging::LogOutput;
pub use crate::opts::Opt;
pub use crate::plugin::{Hook, Plugin};
pub use crate::scope::{CancelGuard, Cancelled, Scope};

/// The most commonly used items, for a glob import.
pub mod prelude {
    pub use super::{AnyError, App, Empty, Hook, LogOutput, Opt, Plugin};
}
