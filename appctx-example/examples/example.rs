//! A small application using the example plugin.
//!
//! Run it from this directory with the provided configuration and stop it with ctrl+C:
//!
//! ```sh
//! cargo run --example example -- -c examples/config.yml --greeting Ahoy
//! ```

use appctx::prelude::*;
use appctx_example::{ExampleCfg, ExamplePlugin};
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize, Serialize)]
struct Config {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct Plugins {
    #[serde(flatten)]
    example: ExampleCfg,
}

fn example(plugins: &Plugins) -> &ExampleCfg {
    &plugins.example
}

fn main() {
    let mut app = App::<Config, Plugins>::new("Example App", "1.0.0")
        .with_plugin(ExamplePlugin::new(example));
    app.config_mut().message = "Nothing configured".to_owned();
    app.run(|app| {
        let message = app.config().message.clone();
        info!(config_message = message.as_str(); "running app callback");
        let described = app.plugins().example.describe();
        info!(string = described.as_str(); "calling plugin function");
        app.wait();
        Ok(())
    });
    app.exit();
}
