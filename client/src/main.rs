use clap::Parser;
use client::Client;
use log::{error, info, warn};
use shared::console::{print_events, read_commands};
use shared::{Dispatcher, Role, SyncConfig};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DISPATCHER_DRAIN: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:3000")]
    server: String,

    /// Seconds between liveness probes
    #[arg(long, default_value = "5")]
    ping_interval_secs: u64,

    /// Unanswered probes tolerated before the server is considered gone
    #[arg(long, default_value = "3")]
    missed_pings_max: u32,

    /// Log every message exchanged
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = SyncConfig::for_client()
        .with_ping_interval(Duration::from_secs(args.ping_interval_secs.max(1)))
        .with_missed_pings_max(args.missed_pings_max);

    info!("Connecting to: {}", args.server);
    let client = Client::connect(&args.server, config.clone()).await?;
    info!("Commands: ready, Pause, Start, y <position>, say <text>");

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (app_tx, app_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let dispatcher = Dispatcher::new(
        Role::Client,
        client.clone(),
        env!("CARGO_PKG_VERSION"),
        &config,
        events_tx,
    );
    let mut dispatcher_handle = tokio::spawn(dispatcher.run(inbound_rx, app_rx, cancel.clone()));
    tokio::spawn(print_events(events_rx));
    std::thread::spawn(move || read_commands(std::io::stdin().lock(), app_tx));

    let serve_handle = {
        let client = client.clone();
        tokio::spawn(async move { client.listen_and_serve(inbound_tx).await })
    };

    let mut result = Ok(());
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, disconnecting...");
        }
        joined = serve_handle => {
            match joined {
                Ok(served) => result = served,
                Err(e) => error!("Network task panicked: {}", e),
            }
        }
    }

    client.shutdown().await;
    // The dispatcher stops on its own once the connection's tasks let go of
    // the inbound channel
    let joined = match tokio::time::timeout(DISPATCHER_DRAIN, &mut dispatcher_handle).await {
        Ok(joined) => joined,
        Err(_) => {
            warn!("Dispatcher still busy after {:?}, cancelling", DISPATCHER_DRAIN);
            cancel.cancel();
            dispatcher_handle.await
        }
    };
    if let Err(e) = joined {
        error!("Dispatcher task panicked: {}", e);
    }

    result?;
    Ok(())
}
