//! RCS - in-memory key-value cache server
//!
//! Serves the RCSP native protocol and, optionally, an HTTP/JSON gateway over one
//! shared store.

// Use jemalloc for better multi-threaded performance
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use rcs::prelude::*;
use rcs::server::load_acceptor;
use std::path::Path;
use std::time::Duration;
use tokio::runtime::Builder;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Grace period for open connections once shutdown starts
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type InterfaceResult = (&'static str, rcs::Result<()>);

fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::args_os().nth(1);
    let config = match &config_path {
        Some(path) => Config::from_file(Path::new(path))?,
        None => Config::from_env(),
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.verbosity.filter())),
        )
        .init();

    info!("Starting RCS");
    match &config_path {
        Some(path) => info!("Loaded configuration from {}", Path::new(path).display()),
        None => info!("Using default configuration (set RCS_* env vars to customize)"),
    }
    config.validate()?;
    debug!("Configuration: {:?}", config);

    // Build tokio runtime with configured worker threads
    let mut runtime_builder = Builder::new_multi_thread();
    if config.worker_threads > 0 {
        runtime_builder.worker_threads(config.worker_threads);
        info!("Using {} worker threads", config.worker_threads);
    } else {
        info!("Using default worker threads (auto-detected)");
    }
    let runtime = runtime_builder.enable_all().build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(Store::new());
    let metrics = Arc::new(Metrics::new());

    let sweeper = config.storage.sweep_interval().map(|interval| {
        info!("Expiry sweep every {:?}", interval);
        ExpirySweeper::start(Arc::clone(&store), interval, Some(Arc::clone(&metrics)))
    });

    let native = Arc::new(
        Server::new(Arc::clone(&store), Arc::clone(&metrics))
            .with_max_message_size(config.native.max_message_size),
    );
    let gateway_cancel = CancellationToken::new();
    let mut interfaces: JoinSet<InterfaceResult> = JoinSet::new();

    if config.native.activate {
        let server = Arc::clone(&native);
        let native_config = config.native.clone();
        interfaces.spawn(async move {
            let addr = native_config.listen_addr();
            let result = if native_config.tls {
                server
                    .listen_and_serve_tls(&addr, &native_config.cert_file, &native_config.key_file)
                    .await
            } else {
                server.listen_and_serve(&addr).await
            };
            ("native", result)
        });
    }

    if config.http.activate {
        let http_config = config.http.clone();
        let tls = if http_config.tls {
            Some(load_acceptor(&http_config.cert_file, &http_config.key_file)?)
        } else {
            None
        };
        let gateway = Arc::new(HttpGateway::new(Arc::clone(&store), Arc::clone(&metrics)));
        let cancel = gateway_cancel.clone();
        interfaces.spawn(async move {
            let addr = http_config.listen_addr();
            ("http", gateway.listen_and_serve(&addr, tls, cancel).await)
        });
    }

    info!("RCS is ready");

    // Run until a signal arrives or an interface stops on its own
    let mut failed = false;
    tokio::select! {
        () = shutdown_signal() => {}
        Some(joined) = interfaces.join_next() => {
            failed |= report(joined);
        }
    }

    info!("Shutting down...");
    // The gateway drains its in-flight requests while the native server drains
    gateway_cancel.cancel();
    let deadline = CancellationToken::new();
    let timer = {
        let deadline = deadline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SHUTDOWN_TIMEOUT).await;
            deadline.cancel();
        })
    };
    if let Err(e) = native.shutdown(&deadline).await {
        warn!("Graceful shutdown failed: {}", e);
        native.close();
    }
    timer.abort();

    if let Some(sweeper) = sweeper {
        sweeper.stop();
    }

    while let Some(joined) = interfaces.join_next().await {
        failed |= report(joined);
    }

    info!("RCS stopped");
    if failed {
        anyhow::bail!("an interface failed");
    }
    Ok(())
}

/// Log how an interface task ended; returns true if it failed
fn report(joined: std::result::Result<InterfaceResult, JoinError>) -> bool {
    match joined {
        Ok((name, Ok(()))) => {
            info!("{} interface stopped", name);
            false
        }
        Ok((name, Err(e))) => {
            error!("{} interface failed: {}", name, e);
            true
        }
        Err(e) => {
            error!("Interface task panicked: {}", e);
            true
        }
    }
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        () = interrupt => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}
