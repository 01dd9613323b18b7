//! Serde helpers for configuration structures.
//!
//! Durations in configuration files are written the human way (`30s`, `1h 15m`, `5days`) and are
//! parsed and rendered by the [`humantime`] crate.
//!
//! Note that the configuration is serialized too while loading (the values already present are
//! used as defaults), so the helpers always come in serialize/deserialize pairs.

use std::time::Duration;

use serde::de::{Deserializer, Error as DeError, Unexpected};
use serde::ser::Serializer;
use serde::Deserialize;

/// Serialize a duration.
///
/// The default serialization produces human unreadable values, this one produces the same format
/// as is accepted by [`deserialize_duration`].
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
///
/// use serde::{Deserialize, Serialize};
///
/// # #[allow(dead_code)]
/// #[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
/// struct Cfg {
///     #[serde(
///         serialize_with = "appctx::utils::serialize_duration",
///         deserialize_with = "appctx::utils::deserialize_duration",
///     )]
///     how_long: Duration,
/// }
/// ```
pub fn serialize_duration<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&humantime::format_duration(*dur).to_string())
}

/// Deserialize a human readable duration.
pub fn deserialize_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let dur = String::deserialize(d)?;
    humantime::parse_duration(&dur)
        .map_err(|_| DeError::invalid_value(Unexpected::Str(&dur), &"Human readable duration"))
}

/// Deserialize an `Option<Duration>` using the [`humantime`] crate.
///
/// It should be paired with [`serialize_opt_duration`]. Also, to act like [`Option`] does when
/// deserializing by default, the `#[serde(default)]` is recommended.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
///
/// use serde::{Deserialize, Serialize};
///
/// # #[allow(dead_code)]
/// #[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
/// struct Cfg {
///     #[serde(
///         serialize_with = "appctx::utils::serialize_opt_duration",
///         deserialize_with = "appctx::utils::deserialize_opt_duration",
///         default,
///     )]
///     how_long: Option<Duration>,
/// }
/// ```
pub fn deserialize_opt_duration<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<Duration>, D::Error> {
    if let Some(dur) = Option::<String>::deserialize(d)? {
        humantime::parse_duration(&dur)
            .map_err(|_| DeError::invalid_value(Unexpected::Str(&dur), &"Human readable duration"))
            .map(Some)
    } else {
        Ok(None)
    }
}

/// Serialize an `Option<Duration>` in a human friendly form.
///
/// See the [`deserialize_opt_duration`] for more details and an example.
pub fn serialize_opt_duration<S: Serializer>(
    dur: &Option<Duration>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match dur {
        Some(d) => serialize_duration(d, s),
        None => s.serialize_none(),
    }
}
