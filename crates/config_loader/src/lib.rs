//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate ranges and cross-field rules
//! - Resolve credential secrets from the environment
//! - Generate `DispatchBlueprint`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("dispatch.toml")).unwrap();
//! let blueprint = ConfigLoader::resolve_secrets(blueprint).unwrap();
//! println!("Credentials: {}", blueprint.credentials.len());
//! ```

mod parser;
mod validator;

pub use contracts::DispatchBlueprint;
pub use parser::ConfigFormat;

use contracts::{ContractError, SecretHandle};
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<DispatchBlueprint, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<DispatchBlueprint, ContractError> {
        Self::parse_and_validate(content, format)
    }

    /// Fill `secret` from the variable named by `secret_env`
    ///
    /// # Errors
    /// A referenced variable is unset.
    pub fn resolve_secrets(blueprint: DispatchBlueprint) -> Result<DispatchBlueprint, ContractError> {
        Self::resolve_secrets_with(blueprint, |name| std::env::var(name).ok())
    }

    /// Like [`ConfigLoader::resolve_secrets`] with a custom variable lookup
    pub fn resolve_secrets_with<F>(
        mut blueprint: DispatchBlueprint,
        lookup: F,
    ) -> Result<DispatchBlueprint, ContractError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for cred in &mut blueprint.credentials {
            if cred.secret.is_some() {
                continue;
            }
            let Some(var) = cred.secret_env.as_deref() else {
                continue;
            };
            let value = lookup(var).filter(|v| !v.is_empty()).ok_or_else(|| {
                ContractError::config_validation(
                    format!("credentials[{}].secret_env", cred.id),
                    format!("environment variable '{var}' is not set"),
                )
            })?;
            cred.secret = Some(SecretHandle::new(value));
        }
        Ok(blueprint)
    }

    /// Serialize DispatchBlueprint to TOML string
    pub fn to_toml(blueprint: &DispatchBlueprint) -> Result<String, ContractError> {
        toml::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize DispatchBlueprint to JSON string
    pub fn to_json(blueprint: &DispatchBlueprint) -> Result<String, ContractError> {
        serde_json::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }

    /// Parse and validate configuration content
    fn parse_and_validate(
        content: &str,
        format: ConfigFormat,
    ) -> Result<DispatchBlueprint, ContractError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL_TOML: &str = r#"
[[credentials]]
id = "primary"
secret_env = "TOKEN_PRIMARY"

[[credentials]]
id = "backup"
secret = "ghp_backup"

[cache]
ttl_ms = 60000

[[notifications.channels]]
name = "ops-log"
channel_type = "log"
"#;

    #[test]
    fn test_load_from_str_toml() {
        let result = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let bp = result.unwrap();
        assert_eq!(bp.credentials.len(), 2);
        assert_eq!(bp.cache.ttl_ms, 60_000);
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(MINIMAL_TOML.as_bytes()).unwrap();
        let bp = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(bp.notifications.channels[0].name, "ops-log");

        let unknown = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ConfigLoader::load_from_path(unknown.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn test_round_trip_toml() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(bp.credentials.len(), bp2.credentials.len());
        assert_eq!(bp.credentials[0].id, bp2.credentials[0].id);
        assert_eq!(bp.queue.max_concurrent, bp2.queue.max_concurrent);
    }

    #[test]
    fn test_round_trip_json() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(bp.cache.ttl_ms, bp2.cache.ttl_ms);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = r#"
[[credentials]]
id = "a"
secret = "x"

[[credentials]]
id = "a"
secret = "y"
"#;
        let result = ConfigLoader::load_from_str(content, ConfigFormat::Toml);
        assert!(result.unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_resolve_secrets() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let resolved = ConfigLoader::resolve_secrets_with(bp.clone(), |name| {
            (name == "TOKEN_PRIMARY").then(|| "ghp_primary".to_string())
        })
        .unwrap();
        assert_eq!(resolved.credentials[0].secret.as_ref().unwrap().expose(), "ghp_primary");
        assert_eq!(resolved.credentials[1].secret.as_ref().unwrap().expose(), "ghp_backup");

        let err = ConfigLoader::resolve_secrets_with(bp, |_| None).unwrap_err();
        assert!(err.to_string().contains("TOKEN_PRIMARY"), "got: {err}");
    }
}
