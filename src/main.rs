use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use vidmesh::{Config, NoMedia, RelayServer, SessionOrchestrator};

#[derive(Parser)]
#[command(name = "vidmesh")]
#[command(about = "Mesh video-call signaling relay and client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling relay
    Relay {
        /// Listen address, e.g. 127.0.0.1:13008
        #[arg(long)]
        addr: Option<String>,
    },
    /// Join the mesh as a receive-only participant
    Join {
        /// Relay WebSocket URL, e.g. ws://127.0.0.1:13008
        #[arg(long)]
        relay_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Relay { addr } => {
            let addr = addr.unwrap_or(config.relay.bind_address);
            let server = RelayServer::new(addr);

            tokio::select! {
                result = server.run() => result?,
                _ = tokio::signal::ctrl_c() => {
                    println!("shutting down");
                }
            }
        }
        Commands::Join { relay_url } => {
            let mut session_config = config.session.clone();
            if let Some(url) = relay_url {
                session_config.relay_url = url;
            }

            let mut orchestrator = SessionOrchestrator::new(session_config, Arc::new(NoMedia));
            let directory = orchestrator.directory();
            let stop = orchestrator.stop_handle();

            let run_task = tokio::spawn(async move { orchestrator.run().await });

            let mut ticker = tokio::time::interval(Duration::from_secs(2));
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        println!("leaving");
                        break;
                    }
                    _ = ticker.tick() => {
                        let views = directory.snapshot().await;
                        println!("peers: {}", views.len());
                        for view in views {
                            let media = if view.remote_track.is_some() { "video" } else { "no media" };
                            println!("  {} [{}] {} ({})", view.peer_id.short(), view.direction, view.state, media);
                        }
                    }
                }
            }

            stop.stop();
            run_task.await??;
        }
    }

    Ok(())
}
