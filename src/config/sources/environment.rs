//! Environment variable source: BUILDTRACK_* prefix with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// Prefix for environment overrides, e.g. `BUILDTRACK__GC__EXPIRATION_DAYS=14`.
pub const ENV_PREFIX: &str = "BUILDTRACK";

/// Add environment variable overlay to builder.
/// Uses BUILDTRACK_ prefix and __ as separator for nested keys.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );
    Ok(builder)
}
