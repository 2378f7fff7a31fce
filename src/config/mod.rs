mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, LogSettings, PartialSettings, Protocol, ServerSettings, Settings,
};

/// Prefix of environment overrides, e.g. `STOMP__SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "STOMP";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a validated `Settings` struct
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Like `load_config`, reading the (optional) file at `path` instead.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("broker.heartbeat"),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;
    let settings = Settings::merge(partial);
    settings.validate()?;
    Ok(settings)
}
