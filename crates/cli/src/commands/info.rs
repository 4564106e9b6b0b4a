//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{CredentialConfig, DispatchBlueprint};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    credentials: Vec<CredentialInfo>,
    credential_count: usize,
    queue: QueueInfo,
    cache: CacheInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    channels: Vec<ChannelInfo>,
    monitor_interval_ms: u64,
}

#[derive(Serialize)]
struct CredentialInfo {
    id: String,
    /// `inline` or `env:<VAR>`
    secret_source: String,
    initial_limit: u64,
}

#[derive(Serialize)]
struct QueueInfo {
    max_concurrent: usize,
    max_retries: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
    max_queue_length: usize,
}

#[derive(Serialize)]
struct CacheInfo {
    ttl_ms: u64,
    max_size: usize,
    dedup_window_ms: u64,
}

#[derive(Serialize)]
struct ChannelInfo {
    name: String,
    channel_type: String,
    queue_capacity: usize,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty")]
    params: std::collections::HashMap<String, String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn secret_source(cred: &CredentialConfig) -> String {
    match &cred.secret_env {
        Some(var) => format!("env:{var}"),
        None => "inline".to_string(),
    }
}

fn build_config_info(blueprint: &DispatchBlueprint, args: &InfoArgs) -> ConfigInfo {
    let credentials = if args.credentials {
        blueprint
            .credentials
            .iter()
            .map(|c| CredentialInfo {
                id: c.id.clone(),
                secret_source: secret_source(c),
                initial_limit: c.initial_limit,
            })
            .collect()
    } else {
        Vec::new()
    };

    let channels = if args.channels {
        blueprint
            .notifications
            .channels
            .iter()
            .map(|c| ChannelInfo {
                name: c.name.clone(),
                channel_type: format!("{:?}", c.channel_type),
                queue_capacity: c.queue_capacity,
                params: c.params.clone(),
            })
            .collect()
    } else {
        Vec::new()
    };

    let queue = &blueprint.queue;
    let cache = &blueprint.cache;
    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        credentials,
        credential_count: blueprint.credentials.len(),
        queue: QueueInfo {
            max_concurrent: queue.max_concurrent,
            max_retries: queue.max_retries,
            base_backoff_ms: queue.base_backoff_ms,
            max_backoff_ms: queue.max_backoff_ms,
            max_queue_length: queue.max_queue_length,
        },
        cache: CacheInfo {
            ttl_ms: cache.ttl_ms,
            max_size: cache.max_size,
            dedup_window_ms: cache.dedup_window_ms,
        },
        channels,
        monitor_interval_ms: blueprint.monitor.interval_ms,
    }
}

fn print_config_info(blueprint: &DispatchBlueprint, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               Quota Dispatch Configuration                   ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    // Credentials
    println!("🔑 Credentials ({})", blueprint.credentials.len());
    let pool = &blueprint.pool;
    println!(
        "   ├─ Recovery below {} errors, selection above {:.0} health",
        pool.recovery_error_threshold, pool.min_health
    );
    if args.credentials {
        for (i, cred) in blueprint.credentials.iter().enumerate() {
            let prefix = if i == blueprint.credentials.len() - 1 { "└─" } else { "├─" };
            println!(
                "   {} {} ({}, limit {})",
                prefix,
                cred.id,
                secret_source(cred),
                cred.initial_limit
            );
        }
    } else {
        println!("   └─ (use --credentials for details)");
    }

    // Queue
    let queue = &blueprint.queue;
    println!("\n📥 Queue");
    println!("   ├─ Max concurrent: {}", queue.max_concurrent);
    println!("   ├─ Max length: {}", queue.max_queue_length);
    println!(
        "   └─ Retries: {} (backoff {}ms..{}ms)",
        queue.max_retries, queue.base_backoff_ms, queue.max_backoff_ms
    );

    // Cache
    let cache = &blueprint.cache;
    println!("\n🗄️  Cache");
    println!("   ├─ TTL: {}ms", cache.ttl_ms);
    println!("   ├─ Max size: {}", cache.max_size);
    println!("   └─ Dedup window: {}ms", cache.dedup_window_ms);

    // Notifications
    let notifications = &blueprint.notifications;
    println!("\n🔔 Notifications ({} channels)", notifications.channels.len());
    println!("   ├─ Dedup window: {}ms", notifications.dedup_window_ms);
    if args.channels && !notifications.channels.is_empty() {
        println!("   └─ Channels:");
        for (i, channel) in notifications.channels.iter().enumerate() {
            let prefix = if i == notifications.channels.len() - 1 { "└─" } else { "├─" };
            println!(
                "        {} {} ({:?}, queue {})",
                prefix, channel.name, channel.channel_type, channel.queue_capacity
            );
        }
    } else {
        println!("   └─ Max history: {}", notifications.max_history);
    }

    println!("\n⏱  Maintenance every {}ms", blueprint.monitor.interval_ms);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_secret_source_never_shows_secret() {
        let mut bp = DispatchBlueprint {
            credentials: vec![
                CredentialConfig::inline("a", "ghp_do_not_print"),
                CredentialConfig::inline("b", "unused"),
            ],
            ..DispatchBlueprint::default()
        };
        bp.credentials[1].secret = None;
        bp.credentials[1].secret_env = Some("TOKEN_B".to_string());

        let args = InfoArgs {
            config: PathBuf::from("dispatch.toml"),
            json: true,
            credentials: true,
            channels: false,
        };
        let info = build_config_info(&bp, &args);
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("ghp_do_not_print"));
        assert!(json.contains("env:TOKEN_B"));
        assert!(!json.contains("\"channels\""));
    }
}
