mod cli;
mod gateway;
mod voice;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hiqty_core::{
    bootstrap::{init_services, load_config},
    logging, queue,
    store::purge_guild,
    Config,
};
use hiqty_player::PlayerController;

use cli::{Cli, Command, EnqueueArgs};
use voice::DryRunVoice;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let mut config = load_config(cli.config.as_deref())?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Enqueue(args) => enqueue(&config, args).await,
        Command::Stop(args) => {
            let services = init_services(&config).await?;
            queue::stop(services.store.as_ref(), &services.keys, &args.guild).await?;
            println!("Stop requested for guild {}", args.guild);
            Ok(())
        }
        Command::Purge(args) => {
            let services = init_services(&config).await?;
            let removed = purge_guild(
                services.store.as_ref(),
                &services.keys,
                &args.guild,
                config.redis.scan_batch,
            )
            .await?;
            println!("Removed {removed} key(s) of guild {}", args.guild);
            Ok(())
        }
        Command::Status(args) => {
            let services = init_services(&config).await?;
            let status = queue::status(services.store.as_ref(), &services.keys, &args.guild).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let node_id = config.node_id();
    info!(node_id = %node_id, "hiqty starting...");

    // 3. Initialize services
    let services = init_services(&config).await?;

    // 4. Start the controller
    let controller = Arc::new(
        PlayerController::new(
            &services,
            Arc::new(DryRunVoice),
            node_id,
            config.player.clone(),
        )
        .with_scan_batch(config.redis.scan_batch),
    );
    let shutdown = CancellationToken::new();
    let events = gateway::static_guilds(&config.guilds);
    let mut controller_task = tokio::spawn(controller.clone().run(shutdown.clone(), events));

    // 5. Wait for a shutdown signal, or a startup failure
    tokio::select! {
        joined = &mut controller_task => {
            return match joined? {
                Ok(()) => Ok(()),
                Err(e) => {
                    error!(error = %e, "Controller failed");
                    Err(e.into())
                }
            };
        }
        () = shutdown_signal() => {}
    }

    info!(sessions = controller.session_count(), "Shutdown signal received, draining sessions...");
    shutdown.cancel();

    // a second signal skips the drain
    tokio::select! {
        joined = &mut controller_task => joined??,
        () = shutdown_signal() => {
            warn!(sessions = controller.session_count(), "Second signal received, exiting without drain");
        }
    }

    info!("hiqty stopped");
    Ok(())
}

async fn enqueue(config: &Config, args: EnqueueArgs) -> Result<()> {
    let services = init_services(config).await?;
    let report = queue::enqueue_tracks(
        services.store.as_ref(),
        &services.keys,
        &services.backends,
        &args.guild,
        &args.channel,
        &args.urls,
    )
    .await?;

    for track in &report.queued {
        println!("queued   {track}");
    }
    for (track, reason) in &report.skipped {
        println!("skipped  {track} ({reason})");
    }
    println!("queue length: {}", report.queue_length);
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
