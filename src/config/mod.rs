//! Configuration loading.
//!
//! Sources, lowest precedence first:
//! 1. `Settings::default()`
//! 2. `config/default.{toml,json,yaml}` relative to the working directory (optional)
//! 3. environment variables prefixed `EVENTGATE_`, sections split by `__`
//!    (for example `EVENTGATE_SESSION__HEARTBEAT_INTERVAL_MS=5000`)

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    HistoryBackend, HistorySettings, LogSettings, ServerSettings, SessionSettings, Settings,
    TopicSettings,
};

const ENV_PREFIX: &str = "EVENTGATE";

/// Loads the configuration from the default file and environment variables
/// and merges it over the built-in defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = partial.merge_into(Settings::default());
    settings.validate()?;
    Ok(settings)
}
