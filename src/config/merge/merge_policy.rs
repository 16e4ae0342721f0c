//! Built-in defaults, the lowest layer of every merge.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};

use crate::config::{
    DEFAULT_EXPIRATION_DAYS, DEFAULT_GARBAGE_DIRECTORY, DEFAULT_MAPPING_DIRECTORY,
};

pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    config::Config::builder()
        .set_default("layout.mapping_directory", DEFAULT_MAPPING_DIRECTORY)?
        .set_default("layout.garbage_directory", DEFAULT_GARBAGE_DIRECTORY)?
        .set_default("gc.expiration_days", DEFAULT_EXPIRATION_DAYS as i64)
}
