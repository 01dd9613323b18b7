use serde::{Deserialize, Serialize};

/// A struct that may be used when either the application or the plugins have no configuration.
///
/// Used to plug the `C` or `P` type parameter of the [`App`][crate::App]. It takes no keys of the
/// configuration file.
#[derive(
    Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize,
)]
pub struct Empty {}
