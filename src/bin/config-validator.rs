//! # Verdant Configuration Validator
//!
//! Command-line tool for checking an identification core configuration
//! file before deploying it. Loads the file exactly as the runtime does
//! (base file, environment overlay, `VERDANT__*` overrides) and reports
//! per-section results.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use verdant_core::config::{ConfigManager, ProviderConfig, VerdantConfig};

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate Verdant identification core configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (default: $VERDANT_CONFIG_PATH, else built-in defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment whose overlay file is applied
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate every configuration section
    All,

    /// Validate one configuration section
    Component {
        /// cache, lock, worker_pool, circuit_breakers, providers or merger
        name: String,
    },

    /// Print the resolved configuration as JSON with secrets masked
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all_config(&cli),
        Some(Commands::Component { name }) => validate_component(&cli, name),
        Some(Commands::Show) => show_config(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<std::sync::Arc<ConfigManager>> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var(verdant_core::config::loader::CONFIG_PATH_ENV).ok().map(PathBuf::from));

    ConfigManager::load_with_env(path, &cli.environment, None)
        .context("failed to load configuration")
}

fn validate_all_config(cli: &Cli) -> anyhow::Result<()> {
    println!("🔧 Validating Verdant Configuration");
    println!("Environment: {}", cli.environment);

    let manager = load(cli)?;
    match manager.source_path() {
        Some(path) => println!("Source: {}", path.display()),
        None => println!("Source: built-in defaults"),
    }
    println!();

    let config = manager.config();
    validate_cache_config(config);
    validate_lock_config(config);
    validate_worker_pool_config(config);
    validate_circuit_breakers_config(config);
    validate_providers_config(config)?;
    validate_merger_config(config);

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn validate_component(cli: &Cli, component_name: &str) -> anyhow::Result<()> {
    println!("🔧 Validating Component: {component_name}");

    let manager = load(cli)?;
    let config = manager.config();

    match component_name.to_lowercase().replace('-', "_").as_str() {
        "cache" => validate_cache_config(config),
        "lock" => validate_lock_config(config),
        "worker_pool" => validate_worker_pool_config(config),
        "circuit_breakers" => validate_circuit_breakers_config(config),
        "providers" => validate_providers_config(config)?,
        "merger" => validate_merger_config(config),
        other => bail!("Unknown component: {other}"),
    }

    println!("✅ Component '{component_name}' validation passed!");
    Ok(())
}

fn show_config(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli)?;
    let rendered = serde_json::to_string_pretty(&manager.debug_config())
        .context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

// Section reports. Loading already ran full validation, so these only
// describe what was resolved.

fn validate_cache_config(config: &VerdantConfig) {
    println!("🗄️  Cache");
    if !config.cache.enabled {
        println!("   ℹ️  Caching disabled, every request reaches the providers");
        return;
    }
    println!("   ✅ Backend: {}", config.cache.backend);
    println!("   ✅ TTL: {}s", config.cache.ttl_seconds);
    if let Some(redis) = &config.cache.redis {
        println!(
            "   ✅ Redis connection timeout: {}s",
            redis.connection_timeout_seconds
        );
    }
}

fn validate_lock_config(config: &VerdantConfig) {
    println!("🔒 Lock");
    println!(
        "   ✅ Wait timeout: {}ms, expiry: {}ms",
        config.lock.timeout_ms, config.lock.expiry_ms
    );
    println!(
        "   ✅ Auto-renew: {} (every {}ms)",
        config.lock.auto_renew,
        config.lock.expiry_ms / 3
    );
}

fn validate_worker_pool_config(config: &VerdantConfig) {
    println!("👷 Worker pool");
    println!("   ✅ Max workers: {}", config.worker_pool.max_workers);
    println!("   ✅ Call timeout: {}ms", config.worker_pool.call_timeout_ms);
    println!("   ✅ Shutdown grace: {}ms", config.worker_pool.shutdown_grace_ms);
}

fn validate_circuit_breakers_config(config: &VerdantConfig) {
    println!("🛡️  Circuit breakers");
    if !config.circuit_breakers.enabled {
        println!("   ℹ️  Circuit breakers disabled");
        return;
    }
    let defaults = &config.circuit_breakers.default_config;
    println!(
        "   ✅ Default: open after {} failures, cool down {}s, close after {} successes",
        defaults.open_threshold, defaults.cool_down_seconds, defaults.close_threshold
    );

    let mut components: Vec<_> = config.circuit_breakers.component_configs.keys().collect();
    components.sort();
    for name in components {
        let component = config.circuit_breakers.config_for_component(name);
        println!(
            "   ✅ {name}: open after {}, cool down {}s, close after {}",
            component.open_threshold, component.cool_down_seconds, component.close_threshold
        );
    }
}

fn validate_providers_config(config: &VerdantConfig) -> anyhow::Result<()> {
    println!("🌿 Providers");
    let providers = [
        ("plant_id", &config.providers.plant_id),
        ("plantnet", &config.providers.plantnet),
    ];

    let enabled = providers.iter().filter(|(_, p)| p.enabled).count();
    for (name, provider) in providers {
        describe_provider(name, provider);
    }

    if enabled == 0 {
        bail!("no recognition provider is enabled");
    }
    Ok(())
}

fn describe_provider(name: &str, provider: &ProviderConfig) {
    if !provider.enabled {
        println!("   ℹ️  {name}: disabled");
        return;
    }
    println!(
        "   ✅ {name}: {} (timeout {}ms, weight {})",
        provider.base_url, provider.timeout_ms, provider.weight
    );
}

fn validate_merger_config(config: &VerdantConfig) {
    println!("🔀 Merger");
    println!("   ✅ Max results: {}", config.merger.max_results);
}
