pub mod channels;        // Inter-component communication channels
pub mod config;          // Configuration management
pub mod error;           // Typed protocol and listener errors
pub mod options;         // Command line options parsing
pub mod prelude;         // Common imports and types
pub mod snapshot;        // Latest-snapshot store
pub mod snapshot_writer; // Optional JSON-lines snapshot sink
pub mod solis;           // Solis/Ginlong protocol implementation

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use crate::snapshot::SnapshotStore;
use crate::solis::listener::Listener;
use std::error::Error;
use std::sync::Arc;

/// Holds the running components so shutdown happens in one place.
#[derive(Clone)]
pub struct Components {
    pub listener: Arc<Listener>,
    pub store: Arc<SnapshotStore>,
    pub channels: Channels,
}

impl Components {
    /// Stops the listener first so no new sessions appear, then the store.
    /// Open sessions drain on peer disconnect; the caller awaits the listener
    /// task to know the socket is fully released.
    pub fn stop(&self) {
        info!("Stopping all components...");
        self.listener.stop();
        self.store.stop();
    }
}

/// Install the logger with the given default level filter. RUST_LOG still
/// overrides it; a no-op if a logger is already installed.
pub fn init_logging(loglevel: &str) {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(loglevel.to_string()),
    )
    .format(|buf, record| {
        writeln!(
            buf,
            "[{} {} {}] {}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            record.level(),
            record.module_path().unwrap_or(""),
            record.args()
        )
    })
    .write_style(env_logger::WriteStyle::Never)
    .try_init();
}

/// Main application loop: wires channels, snapshot store and listener, then
/// waits for a shutdown signal.
pub async fn app(
    shutdown: broadcast::Sender<()>,
    config: Arc<ConfigWrapper>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    init_logging(&config.loglevel());

    info!("Starting solis-bridge {}", CARGO_PKG_VERSION);

    let channels = Channels::new();

    let writer = match config.snapshot_file() {
        Some(path) => Some(Arc::new(SnapshotWriter::new(&path)?)),
        None => None,
    };

    info!("  Creating SnapshotStore...");
    let store = SnapshotStore::new(channels.clone(), writer);
    let store_clone = store.clone();
    let store_handle = tokio::spawn(async move {
        if let Err(e) = store_clone.start().await {
            error!("SnapshotStore task failed: {}", e);
        }
    });

    // Subscribe before the listener task can fail and signal shutdown.
    let mut shutdown_rx = shutdown.subscribe();

    info!("  Creating Listener...");
    let listener = Listener::new((*config).clone(), channels.clone());
    let listener_clone = listener.clone();
    let shutdown_on_failure = shutdown.clone();
    let listener_handle = tokio::spawn(async move {
        if let Err(e) = listener_clone.start().await {
            // A bind failure is fatal to startup; take the whole app down.
            error!("Listener task failed: {}", e);
            let _ = shutdown_on_failure.send(());
        }
    });

    let components = Components {
        listener: Arc::new(listener),
        store: Arc::new(store),
        channels: channels.clone(),
    };

    info!("Waiting for shutdown signal...");
    let _ = shutdown_rx.recv().await;

    info!("Shutdown signal received, stopping components...");
    components.stop();

    if let Err(e) = listener_handle.await {
        error!("Error waiting for listener task: {}", e);
    }
    if let Err(e) = store_handle.await {
        error!("Error waiting for snapshot store task: {}", e);
    }

    if let Ok(stats) = components.listener.stats.lock() {
        stats.print_summary();
    }

    info!("Shutdown complete");
    Ok(())
}

/// Entry point used by the binary: installs the ctrl-c handler and runs the
/// application until it is signalled.
pub async fn run(config: Config) -> Result<()> {
    init_logging(&config.loglevel);

    let (shutdown_tx, _) = broadcast::channel(1);
    let config = Arc::new(ConfigWrapper::from_config(config));

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", e);
        }
        let _ = shutdown_tx_clone.send(());
    });

    app(shutdown_tx, config)
        .await
        .map_err(|e| anyhow!("{}", e))?;

    Ok(())
}
