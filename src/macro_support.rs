//! Reexports for the [`log_error`][macro@crate::log_error] macro.
//!
//! The macro reaches the log levels through the `$crate` path. This is not considered part of the
//! public API and its contents is not to be used directly in user code.

pub use log::Level;
