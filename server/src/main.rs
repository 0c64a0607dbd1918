use clap::Parser;
use log::{error, info, warn};
use server::Server;
use shared::console::{print_events, read_commands};
use shared::{Dispatcher, Role, SyncConfig};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DISPATCHER_DRAIN: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    bind: String,

    /// Seconds between liveness probes
    #[arg(long, default_value = "15")]
    ping_interval_secs: u64,

    /// Unanswered probes tolerated before the peer is dropped
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

    let config = SyncConfig::for_server()
        .with_ping_interval(Duration::from_secs(args.ping_interval_secs.max(1)))
        .with_missed_pings_max(args.missed_pings_max);

    let server = Server::bind(&args.bind, config.clone()).await?;
    info!("Hosting a match on udp://{}", server.local_addr());
    info!("Commands: start, <state name>, say <text>");

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (app_tx, app_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let dispatcher = Dispatcher::new(
        Role::Server,
        server.clone(),
        env!("CARGO_PKG_VERSION"),
        &config,
        events_tx,
    );
    let mut dispatcher_handle = tokio::spawn(dispatcher.run(inbound_rx, app_rx, cancel.clone()));
    tokio::spawn(print_events(events_rx));
    std::thread::spawn(move || read_commands(std::io::stdin().lock(), app_tx));

    let serve_handle = {
        let server = server.clone();
        tokio::spawn(async move { server.listen_and_serve(inbound_tx).await })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
        result = serve_handle => {
            match result {
                Ok(Err(e)) => error!("Server stopped: {}", e),
                Err(e) => error!("Network task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    server.shutdown().await;
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

    Ok(())
}
