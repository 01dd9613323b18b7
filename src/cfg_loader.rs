//! Configuration loading.
//!
//! The configuration lives in a single YAML file (`config.yml` unless the `-c`/`--config-file`
//! option says otherwise). The document holds two sibling schemas next to each other ‒ the one of
//! the application (`C`) and the one aggregating the configuration of all the plugins (`P`) ‒
//! plus the `debug` switch.
//!
//! The loading works like decoding *into* the existing values: whatever is already in `C` and
//! `P` before the load (set by the application or by the plugins while instantiating) is used as
//! a default, so keys missing from the file keep their previous values. Therefore the schemas
//! need to be both serializable and deserializable.
//!
//! Keys are matched case-insensitively (the decoder lowercases them), so it is best to stick to
//! `snake_case` field names.
//!
//! # Examples
//!
//! ```rust
//! use std::io::Write;
//!
//! use appctx::cfg_loader::{self, AppConfig};
//! use appctx::Empty;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Default, Deserialize, Serialize)]
//! struct Cfg {
//!     message: String,
//!     retries: u32,
//! }
//!
//! # fn main() -> Result<(), appctx::AnyError> {
//! let mut file = tempfile::NamedTempFile::new()?;
//! writeln!(file, "message: hello")?;
//!
//! let mut seed = AppConfig::<Cfg, Empty>::default();
//! seed.config.retries = 3;
//! let loaded = cfg_loader::load(file.path(), &seed)?;
//! assert_eq!("hello", loaded.config.message);
//! assert_eq!(3, loaded.config.retries);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat, Source};
use log::{debug, trace};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The whole configuration document.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AppConfig<C, P> {
    /// Enable debug output (can also be switched on from the command line).
    #[serde(default)]
    pub debug: bool,

    /// The application's own configuration.
    #[serde(flatten)]
    pub config: C,

    /// The configuration of the plugins.
    #[serde(flatten)]
    pub plugins: P,
}

/// Errors when loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration path doesn't exist.
    #[error("configuration path {0:?} does not exist")]
    MissingFile(PathBuf),

    /// The path exists but it is something else than a file.
    #[error("configuration path {0:?} is not a file")]
    InvalidFileType(PathBuf),

    /// The file can't be read or its content doesn't fit the schema.
    #[error("decoding configuration file {path:?}")]
    Decode {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    /// The values present before the load can't be used as defaults.
    #[error("preparing configuration defaults")]
    Defaults(#[source] config::ConfigError),
}

/// Loads the configuration file, using the `seed` for anything the file doesn't mention.
pub fn load<C, P>(path: &Path, seed: &AppConfig<C, P>) -> Result<AppConfig<C, P>, ConfigError>
where
    C: Serialize + DeserializeOwned,
    P: Serialize + DeserializeOwned,
{
    debug!("Loading configuration from {:?}", path);
    if !path.exists() {
        return Err(ConfigError::MissingFile(path.to_owned()));
    }
    if !path.is_file() {
        return Err(ConfigError::InvalidFileType(path.to_owned()));
    }
    let defaults = Config::try_from(seed)
        .and_then(|c| c.collect())
        .map_err(ConfigError::Defaults)?;
    let mut config = Config::new();
    for (key, value) in defaults {
        trace!("Config default {}", key);
        config.set_default(&key, value).map_err(ConfigError::Defaults)?;
    }
    let decode = |source| ConfigError::Decode {
        path: path.to_owned(),
        source,
    };
    config
        .merge(File::from(path).format(FileFormat::Yaml))
        .map_err(decode)?;
    config.try_into().map_err(decode)
}
