//! Run a DHT node, optionally searching (and announcing) an info_hash.
//!
//! ```sh
//! RUST_LOG=peerdht=debug cargo run --example node -- --bootstrap-default \
//!     --info-hash f919bc3c68eed436c485a564c51984a35af9151c
//! ```

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use peerdht::{
    resolve_bootstrap, AddressFamily, Config, Dht, Event, Id, DEFAULT_BOOTSTRAP_NODES,
};

/// Longest time to sleep between polls of the sockets.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on, 6881 or a random port if unset.
    #[arg(short, long)]
    port: Option<u16>,

    /// Also bind an IPv6 socket.
    #[arg(long)]
    ipv6: bool,

    /// Bootstrap nodes as `host:port`.
    #[arg(short, long)]
    bootstrap: Vec<String>,

    /// Bootstrap from the well known public routers.
    #[arg(long)]
    bootstrap_default: bool,

    /// Search peers for this info_hash (hex) once the node is up.
    #[arg(long)]
    info_hash: Option<Id>,

    /// Announce ourselves as a peer for the searched info_hash.
    #[arg(long)]
    announce: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("peerdht=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut bootstrap = resolve_bootstrap(&cli.bootstrap);
    if cli.bootstrap_default {
        bootstrap.extend(resolve_bootstrap(&DEFAULT_BOOTSTRAP_NODES));
    }

    let config = Config {
        port: cli.port,
        ipv6: cli.ipv6,
        bootstrap,
        ..Default::default()
    };

    let (sender, receiver) = flume::unbounded();
    let mut dht = Dht::bind(config)
        .expect("Failed to bind sockets")
        .with_events(sender);

    info!(
        id = %dht.id(),
        address = ?dht.transport().local_addr(),
        "Node is listening"
    );

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .expect("Error setting Ctrl-C handler");
    }

    let families: Vec<AddressFamily> = if cli.ipv6 {
        vec![AddressFamily::Ipv4, AddressFamily::Ipv6]
    } else {
        vec![AddressFamily::Ipv4]
    };

    // Give the bootstrap a few seconds before searching.
    let search_at = Instant::now() + Duration::from_secs(5);
    let mut info_hash = cli.info_hash;
    let mut buf = [0_u8; peerdht::rpc::transport::MTU];
    let mut next_tick = Instant::now();

    while running.load(Ordering::SeqCst) {
        loop {
            match dht.transport().recv_from(&mut buf) {
                Ok(Some((size, from))) => {
                    if let Err(error) = dht.on_datagram(&buf[..size], from) {
                        tracing::debug!(?error, ?from, "Dropped datagram");
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    warn!(?error, "Socket error");
                    break;
                }
            }
        }

        if Instant::now() >= search_at {
            if let Some(info_hash) = info_hash.take() {
                for family in &families {
                    info!(%info_hash, ?family, "Searching peers");
                    dht.search(info_hash, *family, cli.announce);
                }
            }
        }

        for event in receiver.try_iter() {
            match event {
                Event::Values {
                    info_hash,
                    family,
                    peers,
                } => {
                    for peer in peers {
                        println!("{info_hash} {family:?} peer {peer}");
                    }
                }
                Event::SearchDone { info_hash, family } => {
                    println!("{info_hash} {family:?} search done");
                }
            }
        }

        if Instant::now() >= next_tick {
            next_tick = Instant::now() + dht.tick();

            let counts = dht.node_counts(AddressFamily::Ipv4);
            tracing::trace!(good = counts.good, dubious = counts.dubious, bad = counts.bad);
        }

        thread::sleep(POLL_INTERVAL.min(next_tick.saturating_duration_since(Instant::now())));
    }

    info!("Shutting down");
}
