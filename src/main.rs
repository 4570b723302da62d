//! APC Agent CLI
//!
//! Serves the presence control surface.

use apc_agent::{config::parse_origins, platform, server, Config, ServerConfig, VERSION};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apc-agent")]
#[command(version = VERSION)]
#[command(about = "Supervised presence simulation with a local control surface", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the control API
    Serve {
        /// Address to bind (overrides config and APC_BIND)
        #[arg(long)]
        bind: Option<String>,

        /// Bearer token required by the API (overrides APC_PAIRING_TOKEN)
        #[arg(long)]
        token: Option<String>,

        /// Comma-separated CORS origins (overrides APC_ALLOWED_ORIGINS)
        #[arg(long)]
        allowed_origins: Option<String>,

        /// Never touch the host pointer or power state
        #[arg(long)]
        cloud_mode: bool,

        /// Drive an in-memory virtual cursor instead of the OS
        #[arg(long = "virtual")]
        use_virtual: bool,
    },

    /// Show configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("apc_agent=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            token,
            allowed_origins,
            cloud_mode,
            use_virtual,
        } => {
            let mut config = Config::load()?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(token) = token {
                config.pairing_token = Some(token);
            }
            if let Some(origins) = allowed_origins {
                config.allowed_origins = parse_origins(&origins);
            }
            config.cloud_mode |= cloud_mode;
            cmd_serve(config, use_virtual).await
        }
        Commands::Config { init } => cmd_config(init),
    }
}

async fn cmd_serve(config: Config, use_virtual: bool) -> anyhow::Result<()> {
    let platform = platform::select(config.cloud_mode, use_virtual);
    let server_config = ServerConfig::from_config(&config)?;

    tracing::info!(
        "APC Agent v{} (platform: {})",
        VERSION,
        if platform.is_some() { "present" } else { "headless" }
    );

    let running = server::run(server_config, platform).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown requested; draining...");
    running.shutdown().await;
    Ok(())
}

fn cmd_config(init: bool) -> anyhow::Result<()> {
    let config = Config::load()?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);

    if init {
        let path = config.save()?;
        println!();
        println!("Wrote {path:?}");
    }
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
