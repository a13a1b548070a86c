use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use phonebook::{Client, Engine, Provider};
use phonebook_bootstrap::{init_logging, wait_for_shutdown, AppConfig, CliArgs};

use std::path::{Path, PathBuf};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Phonebook Server - serves `compute_sum` through pluggable backends
#[derive(Parser)]
#[command(name = "phonebook-server")]
#[command(about = "Phonebook Server - serves compute_sum through pluggable backends")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for the listening engine (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine and the configured providers
    Run,
    /// Validate configuration and exit
    Check,
    /// Call compute_sum on a remote provider and print the result
    Sum {
        /// Address of the serving engine, e.g. tcp://127.0.0.1:7120
        #[arg(long)]
        address: String,

        #[arg(long)]
        provider_id: u16,

        /// Skip the provider identity check
        #[arg(long)]
        no_check: bool,

        #[arg(allow_negative_numbers = true)]
        x: i32,

        #[arg(allow_negative_numbers = true)]
        y: i32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // defaults -> YAML (if provided) -> env (APP__*) -> CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let logging_config = config.logging.clone().unwrap_or_default();
    init_logging(&logging_config, Path::new(&config.server.home_dir));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config),
        Commands::Check => check_config(&config),
        Commands::Sum {
            address,
            provider_id,
            no_check,
            x,
            y,
        } => call_sum(&config, &address, provider_id, !no_check, x, y),
    }
}

fn run_server(config: AppConfig) -> Result<()> {
    config.validate()?;

    let listen = config.server.listen_address();
    let mut builder = Engine::builder().listen(listen.as_str());
    if let Some(threads) = config.server.worker_threads {
        builder = builder.worker_threads(threads);
    }
    let engine = builder
        .build()
        .with_context(|| format!("failed to start engine on {listen}"))?;
    let address = engine.self_addr()?;
    tracing::info!(%address, "Phonebook Server listening");

    let mut providers = Vec::with_capacity(config.providers.len());
    for entry in &config.providers {
        let provider = Provider::new(&engine, entry.provider_id, &entry.config_json(), None)
            .with_context(|| format!("failed to start provider {}", entry.provider_id))?;
        tracing::info!(
            provider_id = entry.provider_id,
            backend = provider.backend_name().as_deref().unwrap_or("none"),
            config = %provider.get_config(),
            "provider started"
        );
        providers.push(provider);
    }

    let waited = engine.block_on(wait_for_shutdown());
    tracing::info!("shutting down");

    drop(providers);
    engine.finalize();
    waited??;
    Ok(())
}

fn check_config(config: &AppConfig) -> Result<()> {
    config.validate()?;
    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);
    Ok(())
}

fn call_sum(
    config: &AppConfig,
    address: &str,
    provider_id: u16,
    check_identity: bool,
    x: i32,
    y: i32,
) -> Result<()> {
    let mut builder = Engine::builder();
    if let Some(threads) = config.server.worker_threads {
        builder = builder.worker_threads(threads);
    }
    let engine = builder.build().context("failed to start client engine")?;

    let outcome = (|| -> Result<i32> {
        let client = Client::new(&engine);
        let handle = client.make_phonebook_handle(address, provider_id, check_identity)?;
        Ok(handle.compute_sum(x, y)?.wait()?)
    })();

    engine.finalize();
    let sum = outcome.with_context(|| format!("compute_sum on {address} provider {provider_id}"))?;
    println!("{sum}");
    Ok(())
}
