//! File + environment configuration loading shared by server and client.

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::de::DeserializeOwned;

use crate::error::{McpError, McpResult};

/// Load `T` from a TOML, YAML or JSON file with environment overrides
///
/// The format is picked from the file extension. Variables named
/// `{env_prefix}__FIELD` (nested fields joined with `__`) override values
/// from the file.
///
/// # Errors
///
/// Returns a [`crate::ErrorKind::Configuration`] error if the file is missing,
/// has an unsupported extension, or does not deserialize into `T`.
pub fn load<T: DeserializeOwned>(path: &Path, env_prefix: &str) -> McpResult<T> {
    if !path.exists() {
        return Err(McpError::configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let format = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => FileFormat::Toml,
        Some("yaml" | "yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        _ => {
            return Err(McpError::configuration(
                "Unsupported configuration file format. Use .toml, .yaml, .yml, or .json",
            ));
        }
    };

    let name = path
        .to_str()
        .ok_or_else(|| McpError::configuration("Configuration path is not valid UTF-8"))?;

    Config::builder()
        .add_source(File::new(name, format))
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .and_then(Config::try_deserialize)
        .map_err(|e| McpError::configuration(format!("Failed to parse configuration: {e}")))
}
