use std::path::Path;

use anyhow::Result;
use config::Config;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Zone applied to rotations that do not name one.
    pub default_time_zone: String,
    /// Window length when `--end` is not given.
    pub window_days: u32,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Settings {
    /// Defaults, then the optional TOML file, then `ONCALL_*` environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value has the wrong
    /// type.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("default_time_zone", "UTC")?
            .set_default("window_days", 7)?
            .set_default("log_filter", "warn")?;
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(true));
        }
        Ok(builder
            .add_source(
                config::Environment::with_prefix("ONCALL")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Settings>()?)
    }
}

/// Load `.env` (if any) into the environment, then the settings.
///
/// # Errors
///
/// See [`Settings::load`].
pub fn load_settings(file: Option<&Path>) -> Result<Settings> {
    dotenvy::dotenv().ok();

    Settings::load(file)
}
