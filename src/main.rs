use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod classifier;
mod config;
mod core;
mod server;
mod store;

#[derive(Parser)]
#[command(name = "sentiscore")]
#[command(version, about = "Sentiment prediction service with resilient audit logging", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP prediction service
    Serve {
        /// Address to listen on (overrides config)
        #[arg(long)]
        listen: Option<String>,
    },

    /// One-shot audit store readiness check
    Probe,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Choose runtime based on mode:
    // - serve: multi_thread for concurrent request handling
    // - probe: current_thread is sufficient for a one-shot check
    let is_serve = matches!(cli.command, Commands::Serve { .. });

    let runtime = if is_serve {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
    } else {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
    };

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { listen } => {
            let listen = listen.unwrap_or_else(|| config.server.listen.clone());
            let core = core::Core::new(config).await?;

            let shutdown_core = core.clone();
            tokio::select! {
                result = server::run_server(core, &listen) => result,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                    shutdown_core.close();
                    Ok(())
                }
            }
        }
        Commands::Probe => {
            let store = store::StoreManager::new(config.store.clone());
            store.initialize().await;
            let ready = store.is_ready().await;
            store.close();

            if ready {
                println!("store: ready");
                Ok(())
            } else {
                println!("store: not ready");
                std::process::exit(1);
            }
        }
    }
}
