//! Signaling relay binary entry point.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port
//! cargo run --bin relay_server
//!
//! # Custom bind address and registration timeout
//! cargo run --bin relay_server -- \
//!   --bind 127.0.0.1:9443 \
//!   --hello-timeout-secs 5
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use peercall_relay::{RelayConfig, RelayServer};

/// Peercall signaling relay
///
/// Forwards call signals between connected peers and tracks voice-room
/// presence. Carries no media and holds no call state.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen address for websocket connections
    #[arg(long, default_value = "0.0.0.0:9443", env = "RELAY_BIND")]
    bind: String,

    /// Outbound queue capacity per connected peer
    #[arg(long, default_value_t = 128, env = "RELAY_CHANNEL_CAPACITY")]
    channel_capacity: usize,

    /// Seconds a new connection may take to register before being dropped
    #[arg(long, default_value_t = 10, env = "RELAY_HELLO_TIMEOUT_SECS")]
    hello_timeout_secs: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Set up Ctrl+C handler at the very start
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, initiating shutdown...");

        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }

        // Watchdog: if graceful shutdown stalls, force exit
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(3));
            eprintln!("Graceful shutdown timeout (3s), forcing exit");
            std::process::exit(0);
        });
    })
    .expect("Failed to set Ctrl+C handler");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("relay-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %args.bind,
        "signaling relay starting"
    );

    let config = RelayConfig::default()
        .with_bind_addr(args.bind)
        .with_channel_capacity(args.channel_capacity)
        .with_hello_timeout(Duration::from_secs(args.hello_timeout_secs));

    let server = RelayServer::bind(config).await?;
    let addr = server.local_addr()?;
    let handle = server.handle();
    let server_task = tokio::spawn(server.run());

    info!(%addr, "relay running, press Ctrl+C to stop");

    while !shutdown_flag.load(Ordering::SeqCst) {
        if server_task.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!("shutdown signal received, stopping relay");
    handle.shutdown();
    server_task.await??;

    info!("relay stopped");
    Ok(())
}

fn init_tracing() {
    // Initialize tracing with EnvFilter for RUST_LOG support
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
