//! The logger factory.
//!
//! The logging goes through the [`log`] facade. The process-wide logger is a [`log_reroute`]
//! one, so every run of the lifecycle can (re)install its own dispatch ‒ this is built by
//! [`fern`] from the resolved debug flag:
//!
//! * Debug on: everything from the `Debug` level up, rendered for humans on one line (time,
//!   level, target, message and then the structured fields as `key=value`).
//! * Debug off: `Info` level and up, one JSON object per line.
//!
//! Structured fields are the key-values of the [`log`] macros:
//!
//! ```rust
//! log::info!(plugin = "db", pool = 4; "connected");
//! ```

use std::fmt::Arguments;
use std::io;
use std::sync::mpsc::Sender;

use chrono::{Local, SecondsFormat};
use fern::{Dispatch, FormatCallback};
use log::kv::{self, Key, Source, Value, VisitSource};
use log::{debug, LevelFilter, Record};
use serde_json::{Map, Value as Json};

/// Where the log lines go.
#[derive(Clone, Debug)]
pub enum LogOutput {
    /// The standard output (the default).
    Stdout,

    /// The standard error output.
    Stderr,

    /// Send each formatted line into the channel.
    ///
    /// Useful for capturing logs in tests.
    Channel(Sender<String>),

    /// Drop everything.
    ///
    /// The logger is still built and installed, it just doesn't output anything.
    Off,
}

impl Default for LogOutput {
    fn default() -> Self {
        LogOutput::Stdout
    }
}

#[derive(Default)]
struct Fields(Vec<(String, Json)>);

impl<'kvs> VisitSource<'kvs> for Fields {
    fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), kv::Error> {
        let json = if let Some(b) = value.to_bool() {
            Json::from(b)
        } else if let Some(i) = value.to_i64() {
            Json::from(i)
        } else if let Some(u) = value.to_u64() {
            Json::from(u)
        } else {
            Json::from(value.to_string())
        };
        self.0.push((key.to_string(), json));
        Ok(())
    }
}

fn fields(record: &Record) -> Fields {
    let mut fields = Fields::default();
    // The visitor never fails.
    let _ = record.key_values().visit(&mut fields);
    fields
}

fn format_console(out: FormatCallback, message: &Arguments, record: &Record) {
    let mut line = format!(
        "{} {:5} {:30} {}",
        Local::now().format("%d.%m.%Y %H:%M:%S%.6f"),
        record.level(),
        record.target(),
        message,
    );
    for (key, value) in fields(record).0 {
        match value {
            Json::String(s) => line.push_str(&format!(" {}={}", key, s)),
            other => line.push_str(&format!(" {}={}", key, other)),
        }
    }
    out.finish(format_args!("{}", line))
}

fn format_json(out: FormatCallback, message: &Arguments, record: &Record) {
    let mut line = Map::new();
    line.insert(
        "time".to_owned(),
        Json::from(Local::now().to_rfc3339_opts(SecondsFormat::Nanos, false)),
    );
    line.insert(
        "level".to_owned(),
        Json::from(record.level().as_str().to_lowercase()),
    );
    line.insert("target".to_owned(), Json::from(record.target()));
    line.insert("message".to_owned(), Json::from(message.to_string()));
    for (key, value) in fields(record).0 {
        let key = if line.contains_key(&key) {
            format!("fields.{}", key)
        } else {
            key
        };
        line.insert(key, value);
    }
    out.finish(format_args!("{}", Json::Object(line)))
}

/// Builds the dispatch for the given debug mode and output.
pub(crate) fn create(debug: bool, output: &LogOutput) -> Dispatch {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let logger = Dispatch::new().level(level);
    let logger = if debug {
        logger.format(format_console)
    } else {
        logger.format(format_json)
    };
    match output {
        LogOutput::Stdout => logger.chain(io::stdout()),
        LogOutput::Stderr => logger.chain(io::stderr()),
        LogOutput::Channel(sender) => logger.chain(sender.clone()),
        LogOutput::Off => logger.level(LevelFilter::Off),
    }
}

/// Builds and installs the process-wide logger.
pub(crate) fn install(debug: bool, output: &LogOutput) {
    // Fails if something is already installed, which is fine for a second run (it is us).
    let _ = log_reroute::init();
    let (max_level, logger) = create(debug, output).into_log();
    log_reroute::reroute_boxed(logger);
    log::set_max_level(max_level);
    debug!("logger: initialized");
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use log::{Level, Log};

    use super::*;

    fn emit(debug: bool, level: Level, kvs: &dyn Source) -> Option<String> {
        let (send, recv) = mpsc::channel();
        let (_, logger) = create(debug, &LogOutput::Channel(send)).into_log();
        logger.log(
            &Record::builder()
                .args(format_args!("connected"))
                .level(level)
                .target("appctx::test")
                .key_values(kvs)
                .build(),
        );
        recv.try_recv().ok()
    }

    #[test]
    fn json_line() {
        let line = emit(false, Level::Info, &("pool", 4)).unwrap();
        let parsed: Json = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!("info", parsed["level"]);
        assert_eq!("connected", parsed["message"]);
        assert_eq!(4, parsed["pool"]);
        assert!(parsed["time"].is_string());
    }

    #[test]
    fn json_fields_keep_builtin_keys() {
        let kvs: &[(&str, &str)] = &[("level", "custom"), ("user", "joe")];
        let line = emit(false, Level::Warn, &kvs).unwrap();
        let parsed: Json = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!("warn", parsed["level"]);
        assert_eq!("custom", parsed["fields.level"]);
        assert_eq!("joe", parsed["user"]);
        assert_eq!("appctx::test", parsed["target"]);
    }

    #[test]
    fn debug_filtered_without_debug_flag() {
        assert_eq!(None, emit(false, Level::Debug, &("pool", 4)));
    }

    #[test]
    fn console_line() {
        let line = emit(true, Level::Debug, &("plugin", "db")).unwrap();
        assert!(line.contains("DEBUG"));
        assert!(line.contains("connected"));
        assert!(line.contains("plugin=db"));
    }

    #[test]
    fn off_is_silent() {
        let (level, _) = create(true, &LogOutput::Off).into_log();
        assert_eq!(LevelFilter::Off, level);
    }
}
