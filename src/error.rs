//! Error handling.
//!
//! Plugin hooks and the application callback return the catch-all [`AnyError`]. The lifecycle
//! wraps whatever fails into a [`LifecycleError`] naming the phase (and the plugin, where it
//! makes sense), so the one consolidated message reported at the end of the run tells what went
//! wrong and where.
//!
//! Stop hooks can't return errors. They are expected to report their problems themselves, the
//! [`log_error`][macro@log_error] macro and the [`log_errors`] function help with that.

use std::any::Any;
use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};

use err_context::prelude::*;
use log::{log, Level};

use crate::cfg_loader::ConfigError;
use crate::opts::OptError;

/// A wrapper type for any error.
///
/// This is just a type alias for boxed standard error. Any errors go and this is guaranteed to be
/// fully compatible.
pub type AnyError = Box<dyn Error + Send + Sync>;

/// How to format errors in logs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ErrorLogFormat {
    /// Multi-cause error will span multiple log messages.
    MultiLine,

    /// The error is formatted on a single line.
    ///
    /// The causes are separated by semicolons.
    SingleLine,
}

/// Log one error on given log level.
///
/// It is printed to the log with all the causes.
///
/// This is the low-level version with full customization. You might also be interested in
/// [`log_errors`] or the convenience macro ([`log_error`][macro@log_error]).
pub fn log_error(level: Level, target: &str, e: &AnyError, format: ErrorLogFormat) {
    match format {
        ErrorLogFormat::MultiLine => {
            for cause in e.chain() {
                log!(target: target, level, "{}", cause);
            }
        }
        ErrorLogFormat::SingleLine => {
            log!(target: target, level, "{}", e.display("; "));
        }
    }
}

/// A convenience macro to log an [`AnyError`].
///
/// This logs an [`AnyError`] on given log level as a single line. Removes some boilerplate from
/// the [`log_error`] function. Meant mostly for stop hooks, which have no other way to report
/// their failures.
///
/// # Examples
///
/// ```rust
/// use std::io::{Error, ErrorKind};
///
/// use appctx::log_error;
///
/// let e = Error::new(ErrorKind::Other, "Connection pool didn't close");
/// log_error!(Warn, e.into());
/// ```
///
/// [`log_error`]: fn@crate::error::log_error
#[macro_export]
macro_rules! log_error {
    ($level: ident, $descr: expr => $err: expr) => {
        $crate::log_error!(@SingleLine, $level, $err.context($descr).into());
    };
    ($level: ident, $err: expr) => {
        $crate::log_error!(@SingleLine, $level, $err);
    };
    (multi $level: ident, $descr: expr => $err: expr) => {
        $crate::log_error!(@MultiLine, $level, $err.context($descr).into());
    };
    (multi $level: ident, $err: expr) => {
        $crate::log_error!(@MultiLine, $level, $err);
    };
    (@$format: ident, $level: ident, $err: expr) => {
        $crate::error::log_error(
            $crate::macro_support::Level::$level,
            module_path!(),
            &$err,
            $crate::error::ErrorLogFormat::$format,
        );
    };
}

/// A wrapper around a fallible function, logging any returned errors.
///
/// The errors will be logged in the provided target. You may want to provide `module_path!` as the
/// target.
///
/// If the error has multiple levels (causes), they are printed in multi-line fashion, as multiple
/// separate log messages.
///
/// # Examples
///
/// ```rust
/// use err_context::prelude::*;
/// use appctx::error;
/// # fn flush_buffers() -> Result<(), std::io::Error> { Ok(()) }
///
/// let result = error::log_errors(module_path!(), || {
///     flush_buffers().context("Didn't manage to flush on shutdown")?;
///     Ok(())
/// });
/// # let _result = result;
/// ```
pub fn log_errors<R, F>(target: &str, f: F) -> Result<R, AnyError>
where
    F: FnOnce() -> Result<R, AnyError>,
{
    let result = f();
    if let Err(ref e) = result {
        log_error(Level::Error, target, e, ErrorLogFormat::MultiLine);
    }
    result
}

/// Extracts the message of a caught panic.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Failures of the start phase, one entry for each plugin that failed to start.
///
/// The start phase doesn't stop at the first failure, all the plugins are attempted. This
/// collects what went wrong with each of them.
#[derive(Debug)]
pub struct PluginErrors {
    errors: Vec<(String, AnyError)>,
}

impl PluginErrors {
    pub(crate) fn new() -> Self {
        PluginErrors { errors: Vec::new() }
    }

    pub(crate) fn push(&mut self, name: String, error: AnyError) {
        self.errors.push((name, error));
    }

    pub(crate) fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Names of the plugins that failed, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|(name, _)| name.as_str())
    }

    /// The individual failures.
    pub fn errors(&self) -> &[(String, AnyError)] {
        &self.errors
    }
}

impl Display for PluginErrors {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        for (i, (name, e)) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(fmt, "; ")?;
            }
            write!(fmt, "starting plugin \"{}\": {}", name, e.display(": "))?;
        }
        Ok(())
    }
}

// The failures are all part of the message, there's no single cause to point to.
impl Error for PluginErrors {}

/// An error terminating the lifecycle, naming the phase that failed.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The application was already run once.
    #[error("the app has already been run")]
    AlreadyRun,

    /// Registering the built-in options failed.
    #[error("registering options")]
    Options(#[source] OptError),

    /// Installing the signal handlers failed.
    #[error("installing signal handlers")]
    Signals(#[source] std::io::Error),

    /// A plugin failed to instantiate.
    #[error("instantiating plugin \"{plugin}\"")]
    Instantiate {
        plugin: String,
        #[source]
        source: AnyError,
    },

    /// The command line couldn't be parsed.
    #[error("initializing options")]
    ParseOptions(#[source] OptError),

    /// The configuration couldn't be loaded.
    #[error("loading config")]
    Config(#[source] ConfigError),

    /// Some plugins failed to start.
    #[error("starting plugins")]
    Start(#[source] PluginErrors),

    /// The application callback returned an error (or panicked).
    #[error("running app")]
    Callback(#[source] AnyError),
}

impl LifecycleError {
    /// The failures of the start phase, if that's what failed.
    pub fn plugin_errors(&self) -> Option<&PluginErrors> {
        match self {
            LifecycleError::Start(errors) => Some(errors),
            _ => None,
        }
    }
}
