use anyhow::{Context, Result};
use ::config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Loads configuration into a struct from an optional file and the environment.
///
/// The file format (TOML, YAML, JSON, ...) follows its extension. Environment
/// variables named `<PREFIX>_<FIELD>` override file values; nested fields use
/// `__` (`FAUCET_LOCK_STORE__URL`). Environment values stay strings until
/// deserialization, so hex keys made of digits keep their leading zeros.
/// Missing fields fall back to the target type's serde defaults.
pub fn load_config<T: DeserializeOwned>(path: Option<&Path>, env_prefix: &str) -> Result<T> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        let path_str = path.to_str().context("Invalid config path")?;
        builder = builder.add_source(File::with_name(path_str));
    }

    let env = Environment::with_prefix(env_prefix)
        .prefix_separator("_")
        .separator("__");

    let settings = builder
        .add_source(env)
        .build()
        .context("Failed to build configuration")?;

    settings.try_deserialize::<T>().context("Failed to deserialize configuration")
}
