//! Command line options.
//!
//! Options are not described by a static structure. Instead, anyone holding the
//! [`App`][crate::App] (the application itself and the plugins during their instantiation)
//! registers them at runtime. Each registration is an [`OptDescriptor`]: a set of aliases, a
//! default value, a destination slot and a description. Once everything is registered, the
//! lifecycle builds the parser from the descriptors, applies the defaults and parses the command
//! line into the destinations.
//!
//! Only three destination types are supported, [`String`], [`i64`] and [`bool`]. The
//! destinations are [`Opt`] slots ‒ shared cells that can be cloned into a plugin or a
//! configuration structure and read once the options are resolved.
//!
//! One-letter aliases are short options (`-d`), longer ones are long options (`--debug`).
//!
//! # Examples
//!
//! ```rust
//! use appctx::opts::Opt;
//! use appctx::{App, Empty};
//!
//! let port = Opt::<i64>::default();
//! let mut app = App::<Empty, Empty>::new("Example", "1.0.0")
//!     .args(vec!["--port", "8080"]);
//! app.option(&["p", "port"], port.clone(), 80, "port to listen on").unwrap();
//! app.disable_config();
//! app.run(|_app| Ok(()));
//! assert_eq!(8080, port.get());
//! ```

use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::iter;
use std::num::ParseIntError;
use std::sync::Arc;

use arc_swap::ArcSwap;
use log::trace;
use structopt::clap::{App as Parser, AppSettings, Arg, ArgMatches, Error as ClapError, ErrorKind};

/// A shared destination of an option value.
///
/// Clones point to the same value. Reading is lock-free.
#[derive(Debug)]
pub struct Opt<T>(Arc<ArcSwap<T>>);

impl<T> Opt<T> {
    /// Creates a slot holding the value.
    ///
    /// The value is overwritten by the option default once options are resolved.
    pub fn new(value: T) -> Self {
        Opt(Arc::new(ArcSwap::from_pointee(value)))
    }

    /// Stores a new value.
    pub fn set(&self, value: T) {
        self.0.store(Arc::new(value));
    }
}

impl<T: Clone> Opt<T> {
    /// The current value.
    pub fn get(&self) -> T {
        T::clone(&self.0.load())
    }
}

impl<T> Clone for Opt<T> {
    fn clone(&self) -> Self {
        Opt(Arc::clone(&self.0))
    }
}

impl<T: Default> Default for Opt<T> {
    fn default() -> Self {
        Opt::new(T::default())
    }
}

/// A kind of value an option can hold.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OptKind {
    /// [`String`].
    Str,
    /// [`i64`].
    Int,
    /// [`bool`], a switch without an argument.
    Bool,
}

impl Display for OptKind {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        let name = match self {
            OptKind::Str => "string",
            OptKind::Int => "integer",
            OptKind::Bool => "boolean",
        };
        write!(fmt, "{}", name)
    }
}

/// A default value of an option.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OptValue {
    /// A string default.
    Str(String),
    /// An integer default.
    Int(i64),
    /// A switch default.
    Bool(bool),
}

impl OptValue {
    /// The kind of the value.
    pub fn kind(&self) -> OptKind {
        match self {
            OptValue::Str(_) => OptKind::Str,
            OptValue::Int(_) => OptKind::Int,
            OptValue::Bool(_) => OptKind::Bool,
        }
    }
}

impl From<&str> for OptValue {
    fn from(val: &str) -> Self {
        OptValue::Str(val.to_owned())
    }
}

impl From<String> for OptValue {
    fn from(val: String) -> Self {
        OptValue::Str(val)
    }
}

impl From<i64> for OptValue {
    fn from(val: i64) -> Self {
        OptValue::Int(val)
    }
}

impl From<i32> for OptValue {
    fn from(val: i32) -> Self {
        OptValue::Int(val.into())
    }
}

impl From<bool> for OptValue {
    fn from(val: bool) -> Self {
        OptValue::Bool(val)
    }
}

/// The destination an option is parsed into.
#[derive(Clone, Debug)]
pub enum OptTarget {
    /// Takes a string argument.
    Str(Opt<String>),
    /// Takes an integer argument.
    Int(Opt<i64>),
    /// A switch, set to `true` when present.
    Bool(Opt<bool>),
}

impl OptTarget {
    /// The kind of values this destination accepts.
    pub fn kind(&self) -> OptKind {
        match self {
            OptTarget::Str(_) => OptKind::Str,
            OptTarget::Int(_) => OptKind::Int,
            OptTarget::Bool(_) => OptKind::Bool,
        }
    }

    fn store(&self, value: &OptValue) {
        match (self, value) {
            (OptTarget::Str(slot), OptValue::Str(v)) => slot.set(v.clone()),
            (OptTarget::Int(slot), OptValue::Int(v)) => slot.set(*v),
            (OptTarget::Bool(slot), OptValue::Bool(v)) => slot.set(*v),
            // Ruled out at registration.
            _ => unreachable!("Option value of a wrong kind"),
        }
    }
}

impl From<Opt<String>> for OptTarget {
    fn from(slot: Opt<String>) -> Self {
        OptTarget::Str(slot)
    }
}

impl From<Opt<i64>> for OptTarget {
    fn from(slot: Opt<i64>) -> Self {
        OptTarget::Int(slot)
    }
}

impl From<Opt<bool>> for OptTarget {
    fn from(slot: Opt<bool>) -> Self {
        OptTarget::Bool(slot)
    }
}

/// Errors around registering and resolving options.
#[derive(Debug, thiserror::Error)]
pub enum OptError {
    /// An option with no aliases.
    #[error("option without a name")]
    NoName,

    /// The alias is empty or starts with a dash.
    #[error("invalid option name {0:?}")]
    InvalidName(String),

    /// The default doesn't fit the destination.
    #[error("invalid default value type of option {name}: {found} (should be {expected})")]
    DefaultMismatch {
        name: String,
        expected: OptKind,
        found: OptKind,
    },

    /// The alias is already taken by another option.
    #[error("option {0} is already registered")]
    Duplicate(String),

    /// The value given on the command line can't be converted to the option type.
    #[error("invalid value {value:?} of option {name}")]
    InvalidValue {
        name: String,
        value: String,
        #[source]
        source: ParseIntError,
    },

    /// The command line is malformed (unknown option, missing value...).
    #[error("parsing options: {0}")]
    Parse(#[source] ClapError),

    /// Help was requested, contains the rendered help.
    #[error("help requested")]
    Help(String),
}

/// A registered option.
#[derive(Clone, Debug)]
pub struct OptDescriptor {
    names: Vec<String>,
    description: String,
    default: OptValue,
    target: OptTarget,
}

impl OptDescriptor {
    /// All the aliases of the option.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The default value.
    pub fn default_value(&self) -> &OptValue {
        &self.default
    }

    fn display_names(&self) -> String {
        self.names
            .iter()
            .map(|name| {
                let prefix = if name.chars().count() > 1 { "--" } else { "-" };
                format!("{}{}", prefix, name)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The flat, ordered list of registered options.
#[derive(Clone, Debug, Default)]
pub(crate) struct Registry {
    opts: Vec<OptDescriptor>,
}

impl Registry {
    pub(crate) fn register(
        &mut self,
        names: &[&str],
        target: OptTarget,
        default: OptValue,
        description: &str,
    ) -> Result<(), OptError> {
        if names.is_empty() {
            return Err(OptError::NoName);
        }
        if let Some(bad) = names.iter().find(|n| n.is_empty() || n.starts_with('-')) {
            return Err(OptError::InvalidName((*bad).to_owned()));
        }
        if target.kind() != default.kind() {
            return Err(OptError::DefaultMismatch {
                name: names.join(", "),
                expected: target.kind(),
                found: default.kind(),
            });
        }
        let taken = self
            .opts
            .iter()
            .flat_map(|o| o.names.iter())
            .map(String::as_str)
            .collect::<HashSet<_>>();
        if let Some(dup) = names.iter().find(|n| taken.contains(*n)) {
            return Err(OptError::Duplicate((*dup).to_owned()));
        }
        trace!("Registering option {}", names.join(", "));
        self.opts.push(OptDescriptor {
            names: names.iter().map(|n| (*n).to_owned()).collect(),
            description: description.to_owned(),
            default,
            target,
        });
        Ok(())
    }

    pub(crate) fn descriptors(&self) -> &[OptDescriptor] {
        &self.opts
    }

    /// Renders the help, one line per option.
    pub(crate) fn usage(&self, title: &str, version: &str) -> String {
        let mut usage = format!("{} v{}\nUsage:\n", title, version);
        for opt in &self.opts {
            usage.push_str(&format!("\n\t{}: {}", opt.display_names(), opt.description));
        }
        usage
    }

    /// Stores the defaults into the destinations.
    pub(crate) fn apply_defaults(&self) {
        for opt in &self.opts {
            opt.target.store(&opt.default);
        }
    }

    /// Applies the defaults, then parses the arguments (without the program name) over them.
    pub(crate) fn resolve<I>(&self, title: &str, version: &str, args: I) -> Result<(), OptError>
    where
        I: IntoIterator<Item = OsString>,
    {
        self.apply_defaults();
        let usage = self.usage(title, version);
        let mut parser = Parser::new(title)
            .version(version)
            .setting(AppSettings::DisableVersion)
            .setting(AppSettings::StrictUtf8)
            .help(usage.as_str());
        for opt in &self.opts {
            for name in &opt.names {
                let mut arg = Arg::with_name(name.as_str()).multiple(true);
                arg = if name.chars().count() > 1 {
                    arg.long(name.as_str())
                } else {
                    arg.short(name.as_str())
                };
                if opt.target.kind() != OptKind::Bool {
                    arg = arg.takes_value(true).number_of_values(1);
                }
                parser = parser.arg(arg);
            }
        }
        let argv = iter::once(OsString::from(title)).chain(args);
        let matches = parser.get_matches_from_safe(argv).map_err(|e| match e.kind {
            ErrorKind::HelpDisplayed => OptError::Help(e.message),
            _ => OptError::Parse(e),
        })?;
        for opt in &self.opts {
            if let Some((name, value)) = last_given(opt, &matches) {
                let value = match (opt.target.kind(), value) {
                    (OptKind::Bool, _) => OptValue::Bool(true),
                    (OptKind::Str, value) => OptValue::Str(value.unwrap_or_default().to_owned()),
                    (OptKind::Int, value) => {
                        let value = value.unwrap_or_default();
                        let parsed = value.parse().map_err(|e| OptError::InvalidValue {
                            name: name.to_owned(),
                            value: value.to_owned(),
                            source: e,
                        })?;
                        OptValue::Int(parsed)
                    }
                };
                trace!("Option {} set to {:?}", name, value);
                opt.target.store(&value);
            }
        }
        Ok(())
    }
}

/// Finds the alias given last on the command line, together with its (last) value.
fn last_given<'a>(
    opt: &'a OptDescriptor,
    matches: &'a ArgMatches<'a>,
) -> Option<(&'a str, Option<&'a str>)> {
    opt.names
        .iter()
        .filter_map(|name| {
            let index = matches.indices_of(name.as_str())?.last()?;
            let value = matches.values_of(name.as_str()).and_then(Iterator::last);
            Some((index, name.as_str(), value))
        })
        .max_by_key(|(index, _, _)| *index)
        .map(|(_, name, value)| (name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    struct Fixture {
        registry: Registry,
        config: Opt<String>,
        debug: Opt<bool>,
        workers: Opt<i64>,
    }

    fn fixture() -> Fixture {
        let config = Opt::new("unset".to_owned());
        let debug = Opt::new(true);
        let workers = Opt::new(0);
        let mut registry = Registry::default();
        registry
            .register(&["d", "debug"], debug.clone().into(), false.into(), "enable debug output")
            .unwrap();
        registry
            .register(
                &["c", "config-file"],
                config.clone().into(),
                "config.yml".into(),
                "path to config file",
            )
            .unwrap();
        registry
            .register(&["workers"], workers.clone().into(), 4.into(), "number of workers")
            .unwrap();
        Fixture {
            registry,
            config,
            debug,
            workers,
        }
    }

    #[test]
    fn no_args_gives_defaults() {
        let f = fixture();
        f.registry.resolve("Test", "1.0.0", args(&[])).unwrap();
        assert_eq!("config.yml", f.config.get());
        assert!(!f.debug.get());
        assert_eq!(4, f.workers.get());
    }

    #[test]
    fn parse_short_and_long() {
        let f = fixture();
        f.registry
            .resolve("Test", "1.0.0", args(&["-d", "--config-file", "other.yml", "--workers", "8"]))
            .unwrap();
        assert_eq!("other.yml", f.config.get());
        assert!(f.debug.get());
        assert_eq!(8, f.workers.get());
    }

    #[test]
    fn last_alias_wins() {
        let f = fixture();
        f.registry
            .resolve("Test", "1.0.0", args(&["--config-file", "a.yml", "-c", "b.yml"]))
            .unwrap();
        assert_eq!("b.yml", f.config.get());

        f.registry
            .resolve("Test", "1.0.0", args(&["-c", "b.yml", "--config-file", "a.yml"]))
            .unwrap();
        assert_eq!("a.yml", f.config.get());
    }

    #[test]
    fn unknown_option_is_an_error() {
        let f = fixture();
        match f.registry.resolve("Test", "1.0.0", args(&["--nope"])) {
            Err(OptError::Parse(_)) => (),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn invalid_int() {
        let f = fixture();
        match f.registry.resolve("Test", "1.0.0", args(&["--workers", "many"])) {
            Err(OptError::InvalidValue { name, value, .. }) => {
                assert_eq!("workers", name);
                assert_eq!("many", value);
            }
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn help_is_rendered_from_descriptors() {
        let f = fixture();
        let usage = f.registry.usage("Test", "1.0.0");
        assert_eq!(
            "Test v1.0.0\nUsage:\n\n\t-d, --debug: enable debug output\
             \n\t-c, --config-file: path to config file\n\t--workers: number of workers",
            usage
        );
        match f.registry.resolve("Test", "1.0.0", args(&["--help"])) {
            Err(OptError::Help(help)) => assert!(help.contains("--config-file")),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn mismatched_default() {
        let mut registry = Registry::default();
        let err = registry
            .register(&["n"], Opt::<i64>::default().into(), "ten".into(), "a number")
            .unwrap_err();
        match err {
            OptError::DefaultMismatch {
                name,
                expected,
                found,
            } => {
                assert_eq!("n", name);
                assert_eq!(OptKind::Int, expected);
                assert_eq!(OptKind::Str, found);
            }
            other => panic!("Unexpected error {:?}", other),
        }
        assert!(registry.descriptors().is_empty());
    }

    #[test]
    fn duplicate_rejected() {
        let mut f = fixture();
        let err = f
            .registry
            .register(&["x", "debug"], Opt::new(false).into(), false.into(), "again")
            .unwrap_err();
        assert!(matches!(err, OptError::Duplicate(ref name) if name == "debug"));
        assert_eq!(3, f.registry.descriptors().len());
    }

    #[test]
    fn invalid_names() {
        let mut registry = Registry::default();
        for name in &["", "-x", "--long"] {
            let err = registry
                .register(&["ok", *name], Opt::new(false).into(), false.into(), "bad")
                .unwrap_err();
            assert!(matches!(err, OptError::InvalidName(ref n) if n == name));
        }
        assert!(registry.descriptors().is_empty());
    }

    #[test]
    fn stray_argument_is_an_error() {
        let f = fixture();
        match f.registry.resolve("Test", "1.0.0", args(&["stray"])) {
            Err(OptError::Parse(_)) => (),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn invalid_utf8_is_an_error() {
        use std::os::unix::ffi::OsStringExt;

        let f = fixture();
        let argv = vec![OsString::from("-c"), OsString::from_vec(vec![0xff])];
        match f.registry.resolve("Test", "1.0.0", argv) {
            Err(OptError::Parse(e)) => assert_eq!(ErrorKind::InvalidUtf8, e.kind),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn no_names() {
        let mut registry = Registry::default();
        let err = registry
            .register(&[], Opt::new(false).into(), false.into(), "nameless")
            .unwrap_err();
        assert!(matches!(err, OptError::NoName));
    }
}
