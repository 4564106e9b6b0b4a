//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::DispatchBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    credential_count: usize,
    max_concurrent: usize,
    max_retries: u32,
    cache_ttl_ms: u64,
    channel_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint, |name| std::env::var_os(name).is_some());
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    credential_count: blueprint.credentials.len(),
                    max_concurrent: blueprint.queue.max_concurrent,
                    max_retries: blueprint.queue.max_retries,
                    cache_ttl_ms: blueprint.cache.ttl_ms,
                    channel_count: blueprint.notifications.channels.len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings<F>(blueprint: &DispatchBlueprint, env_is_set: F) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    let mut warnings = Vec::new();

    if blueprint.credentials.len() == 1 {
        warnings.push("Only one credential configured - no failover on quota exhaustion".to_string());
    }

    for cred in &blueprint.credentials {
        if let Some(var) = &cred.secret_env {
            if !env_is_set(var) {
                warnings.push(format!(
                    "Credential '{}' reads '{}', which is not set in this environment",
                    cred.id, var
                ));
            }
        }
    }

    if blueprint.notifications.channels.is_empty() {
        warnings.push("No notification channels configured - alerts are only kept in history".to_string());
    }

    if blueprint.queue.max_retries == 0 {
        warnings.push("queue.max_retries is 0 - transient failures are not retried".to_string());
    }

    if blueprint.cache.dedup_window_ms > blueprint.cache.ttl_ms {
        warnings.push(
            "cache.dedup_window_ms exceeds cache.ttl_ms - expired entries may be rejected as duplicates"
                .to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Credentials: {}", summary.credential_count);
            println!("  Max concurrent: {}", summary.max_concurrent);
            println!("  Max retries: {}", summary.max_retries);
            println!("  Cache TTL: {}ms", summary.cache_ttl_ms);
            println!("  Channels: {}", summary.channel_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::CredentialConfig;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn test_warnings() {
        let mut bp = DispatchBlueprint {
            credentials: vec![CredentialConfig::inline("a", "x")],
            ..DispatchBlueprint::default()
        };
        bp.credentials[0].secret = None;
        bp.credentials[0].secret_env = Some("TOKEN_A".to_string());

        let warnings = collect_warnings(&bp, |_| false);
        assert_eq!(warnings.len(), 3);
        assert!(warnings[1].contains("TOKEN_A"));

        let warnings = collect_warnings(&bp, |_| true);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_validate_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[[credentials]]\nid = \"a\"\nsecret = \"x\"").unwrap();

        let args = ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        };
        let result = validate_config(&args);
        assert!(result.valid, "{:?}", result.error);
        assert_eq!(result.summary.unwrap().credential_count, 1);

        let missing = ValidateArgs {
            config: PathBuf::from("/nonexistent/dispatch.toml"),
            json: false,
        };
        assert!(!validate_config(&missing).valid);
    }
}
