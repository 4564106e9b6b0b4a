//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{error, info};

use contracts::DispatchBlueprint;
use dispatcher::MockConfig;

use crate::cli::RunArgs;
use crate::simulation::{Simulation, SimulationConfig};

/// Execute the `run` command
pub async fn run_simulation(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let blueprint = config_loader::ConfigLoader::resolve_secrets(blueprint)
        .context("Failed to resolve credential secrets")?;

    info!(
        credentials = blueprint.credentials.len(),
        max_concurrent = blueprint.queue.max_concurrent,
        channels = blueprint.notifications.channels.len(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
        info!("Metrics endpoint available on port {}", args.metrics_port);
    }

    let config = SimulationConfig {
        blueprint,
        requests: (args.requests != 0).then_some(args.requests),
        rate: args.rate,
        endpoints: args.endpoints,
        post_ratio: args.post_ratio,
        seed: args.seed,
        mock: MockConfig {
            limit: args.quota,
            latency: Duration::from_millis(args.latency_ms),
            failure_rate: args.failure_rate,
            seed: args.seed,
            ..MockConfig::default()
        },
        timeout: (args.timeout != 0).then(|| Duration::from_secs(args.timeout)),
    };

    info!("Starting simulation...");
    let stats = Simulation::new(config)
        .run(shutdown_signal())
        .await
        .context("Simulation failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&stats.status)
            .context("Failed to serialize dispatcher status")?;
        println!("{}", json);
    } else {
        stats.print_summary();
    }

    info!("Quota Dispatch finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &DispatchBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Credentials ({}):", blueprint.credentials.len());
    for cred in &blueprint.credentials {
        println!("  - {} (initial limit {})", cred.id, cred.initial_limit);
    }

    let queue = &blueprint.queue;
    println!("\nQueue:");
    println!("  Max concurrent: {}", queue.max_concurrent);
    println!(
        "  Retries: {} ({}ms..{}ms backoff)",
        queue.max_retries, queue.base_backoff_ms, queue.max_backoff_ms
    );

    let cache = &blueprint.cache;
    println!("\nCache:");
    println!("  TTL: {}ms, size: {}", cache.ttl_ms, cache.max_size);
    println!("  Dedup window: {}ms", cache.dedup_window_ms);

    if !blueprint.notifications.channels.is_empty() {
        println!("\nChannels ({}):", blueprint.notifications.channels.len());
        for channel in &blueprint.notifications.channels {
            println!("  - {} ({:?})", channel.name, channel.channel_type);
        }
    }

    println!();
}
