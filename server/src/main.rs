use clap::Parser;
use log::{error, info, warn};
use server::manager::WorldManager;
use server::network::{AcceptAll, StaticToken, TokenValidator, Transport};
use server::snapshot::{self, SnapshotStore};
use server::world::WorldConfig;
use std::sync::Arc;
use tokio::time::Duration;

/// Parses command-line arguments, brings up the default world
/// (restoring it from a durable snapshot when one exists), and runs the
/// UDP transport until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Tick rate (updates per second)
        #[clap(short, long, default_value = "30")]
        tick_rate: u32,
        /// Arena width
        #[clap(long, default_value = "1000")]
        width: f32,
        /// Arena height
        #[clap(long, default_value = "1000")]
        height: f32,
        /// Pellets kept in each world
        #[clap(long, default_value = "200")]
        pellet_count: usize,
        /// Seconds between durable snapshot flushes
        #[clap(long, default_value = "10")]
        snapshot_interval: u64,
        /// Directory for durable world snapshots
        #[clap(long, default_value = "data/snapshots")]
        snapshot_dir: String,
        /// Name of the world created at startup
        #[clap(long, default_value = "lobby")]
        default_world: String,
        /// Restore the default world from its durable snapshot instead
        /// of creating it fresh
        #[clap(long)]
        restore: bool,
        /// Shared secret required in requests; empty accepts everything
        #[clap(long, default_value = "")]
        token: String,
    }

    let args = Args::parse();

    let mut defaults = WorldConfig::new("");
    defaults.width = args.width;
    defaults.height = args.height;
    defaults.tick_rate = args.tick_rate;
    defaults.pellet_count = args.pellet_count;
    defaults.snapshot_interval = Duration::from_secs(args.snapshot_interval.max(1));

    let store = SnapshotStore::new(&args.snapshot_dir)?;

    // Reload is an explicit operator action, never automatic. World id
    // 1 is the first generated id, so it is where the default world's
    // snapshot lives.
    let previous = if args.restore {
        Some(store.load(1).await?)
    } else {
        None
    };

    let manager = Arc::new(WorldManager::new(store, defaults));

    let lobby = match previous {
        Some(old) => {
            info!(
                "restoring world {} ('{}') at tick {} with {} player(s)",
                old.world_id,
                old.name,
                old.tick,
                old.players.len()
            );
            manager.adopt_world(snapshot::restore(&old)).await
        }
        None => manager.create_world(&args.default_world).await,
    };
    info!("default world '{}' ready as id {}", lobby.name, lobby.id);

    let validator: Arc<dyn TokenValidator> = if args.token.is_empty() {
        warn!("no token configured, accepting all requests");
        Arc::new(AcceptAll)
    } else {
        Arc::new(StaticToken(args.token.clone()))
    };

    let address = format!("{}:{}", args.host, args.port);
    let transport = Arc::new(Transport::bind(&address, Arc::clone(&manager), validator).await?);

    let transport_handle = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move { transport.run().await })
    };

    tokio::select! {
        result = transport_handle => {
            if let Err(e) = result {
                error!("transport task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
        }
    }

    // Stop every world so each runs its final snapshot flush
    for summary in manager.list_worlds().await {
        manager.destroy_world(summary.id).await;
    }
    // Give the final flushes a moment before the process exits
    tokio::time::sleep(Duration::from_millis(200)).await;

    Ok(())
}
