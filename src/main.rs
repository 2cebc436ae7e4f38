use anyhow::{Context, Result};
use clap::Parser;
use seed_orchestrator::config::{CliOverrides, Config};
use seed_orchestrator::diagnostics;
use seed_orchestrator::kernel::{HashKernelFactory, KernelFactory};
use seed_orchestrator::search::{Deck, SearchEvent, SearchRegistry, Stake};
use seed_orchestrator::telemetry;
use seed_orchestrator::terminal::{format_results_table, top_results, TerminalSurface};
use seed_orchestrator::web;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

/// Seed Orchestrator - runs and streams multi-threaded seed searches
#[derive(Parser, Debug)]
#[command(name = "seed_orchestrator")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// API listen address (overrides config file)
    #[arg(short, long, value_name = "ADDR")]
    address: Option<String>,

    /// Run a single search with this filter in the terminal, then exit
    #[arg(short, long, value_name = "FILE")]
    filter: Option<String>,

    /// Worker threads per search (0 = CPU count)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Seeds per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Discard results scoring below this
    #[arg(long)]
    min_score: Option<i64>,

    /// Stop after this many seeds
    #[arg(long)]
    max_seeds: Option<u64>,

    #[arg(long, value_enum)]
    deck: Option<Deck>,

    #[arg(long, value_enum)]
    stake: Option<Stake>,

    /// Results printed at the end of a --filter run
    #[arg(long, default_value_t = 20)]
    top: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Generate a template configuration file and exit
    #[arg(long, value_name = "FILE")]
    init: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --init flag: generate template config and exit
    if let Some(init_path) = args.init.clone() {
        let path = if init_path.as_os_str().is_empty() {
            PathBuf::from("seed_orchestrator.toml")
        } else {
            init_path
        };

        if path.exists() {
            anyhow::bail!(
                "Config file already exists: {}\nRemove it first or choose a different path.",
                path.display()
            );
        }

        Config::write_template(&path)?;
        println!("✓ Generated config file: {}", path.display());
        println!("\nStart the server with:");
        println!("  seed_orchestrator --config {}", path.display());
        return Ok(());
    }

    let (config, config_source) = load_config(&args)?;
    let telemetry_config = config.telemetry.clone().with_env_overrides();
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_telemetry(&telemetry_config, log_level)?;
    diagnostics::init_server_start_time();

    match &config_source {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("No config file found, using defaults"),
    }

    let factory: Arc<dyn KernelFactory> =
        Arc::new(HashKernelFactory::new(config.search.filters_dir()));
    let registry = Arc::new(
        SearchRegistry::with_throttle(factory, config.throttle.to_throttle_config())
            .with_message_log_capacity(config.throttle.message_log_capacity),
    );

    let outcome = match args.filter.clone() {
        Some(filter) => run_headless(&config, &registry, filter, args.top).await,
        None => serve(&config, registry.clone()).await,
    };

    registry.stop_all();
    telemetry::shutdown_telemetry(&telemetry_config);
    outcome
}

/// Serve the API until Ctrl-C.
async fn serve(config: &Config, registry: Arc<SearchRegistry>) -> Result<()> {
    if !config.server.enable_web_ui {
        warn!("Web API disabled in config; waiting for Ctrl-C");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    let address = config.server.address.clone();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind API server to {address}"))?;
    info!(address = %address, "API available at http://{}", address);

    let router = web::create_router(registry, config.search.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl-C received, shutting down");
        })
        .await
        .context("API server failed")?;
    Ok(())
}

/// Run one search with the terminal surface and print the best results.
async fn run_headless(
    config: &Config,
    registry: &SearchRegistry,
    filter: String,
    top: usize,
) -> Result<()> {
    let summary = registry
        .factory()
        .load_config(&filter)
        .with_context(|| format!("Filter {filter} is not usable"))?;
    info!(filter = %summary.name, path = %summary.path, "Filter loaded");

    let criteria = config.search.criteria_for(filter);
    let instance = registry.create_search();
    let mut surface = TerminalSurface::new(criteria.max_seeds);
    let mut subscription = instance.subscribe();
    instance.start(criteria)?;

    let finished = tokio::select! {
        finished = surface.follow(&mut subscription) => finished,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, stopping search");
            instance.stop();
            surface.follow(&mut subscription).await
        }
    };

    let results = top_results(&instance, top);
    if !results.is_empty() {
        println!("{}", format_results_table(&results, &summary.labels));
    }

    match finished {
        Some(SearchEvent::Finished {
            message: Some(message),
            ..
        }) => anyhow::bail!(message),
        Some(_) => Ok(()),
        None => anyhow::bail!("search ended without a final status"),
    }
}

/// The merged configuration and the file it came from, if any.
fn load_config(args: &Args) -> Result<(Config, Option<PathBuf>)> {
    let (base_config, source) = if let Some(ref config_path) = args.config {
        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found: {}\nUse --init {} to generate a template.",
                config_path.display(),
                config_path.display()
            );
        }
        (Config::from_file(config_path)?, Some(config_path.clone()))
    } else {
        match Config::from_default_locations()? {
            Some((config, path)) => (config, Some(path)),
            None => (Config::default(), None),
        }
    };

    let config = base_config.with_overrides(CliOverrides {
        address: args.address.clone(),
        thread_count: args.threads,
        batch_size: args.batch_size,
        min_score: args.min_score,
        max_seeds: args.max_seeds,
        deck: args.deck,
        stake: args.stake,
    });
    Ok((config, source))
}
