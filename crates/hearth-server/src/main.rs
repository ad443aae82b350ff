use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hearth_server::config::ServerConfig;
use hearth_server::otp::HttpOtpSender;
use hearth_server::registry::SharedState;
use hearth_server::session;
use hearth_store::{DataLayout, DomainRegistryFile, LocalInfoFile, UserRegistryFile};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hearth_server=debug")),
        )
        .init();

    info!("Starting hearth server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration and the persisted registries
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config.listen_addr, data_dir = %config.data_dir.display(), "Loaded configuration");

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let layout = DataLayout::new(&config.data_dir);

    // A failed integrity check or decryption must prevent startup; serving
    // from a partially trusted registry is worse than not serving.
    let user_registry = UserRegistryFile::open(layout.clone(), &config.registry_secret)
        .context("opening user registry")?;
    let users = user_registry.load().context("loading user registry")?;

    let domain_registry = DomainRegistryFile::new(layout.clone(), &config.registry_secret);
    let domains = domain_registry.load().context("loading domain registry")?;

    let localinfo = LocalInfoFile::new(&layout, &config.registry_secret);
    if layout.localinfo_file().exists() {
        localinfo
            .seal_if_needed()
            .context("sealing reference-integrity record")?;
    } else if let Some(reference) = &config.reference_exec {
        localinfo
            .create(reference)
            .context("creating reference-integrity record")?;
        info!(path = %reference, "reference-integrity record created");
    } else {
        warn!("no reference-integrity record; executable attestation will reject every client");
    }

    let state = Arc::new(SharedState::new(users, domains));
    let otp = Arc::new(HttpOtpSender::new(
        config.otp_endpoint.clone(),
        config.otp_api_key.clone(),
    ));
    let localinfo = Arc::new(localinfo);

    // -----------------------------------------------------------------------
    // 3. Accept loop, one task per connection
    // -----------------------------------------------------------------------
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Server running");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                info!(peer = %peer, "connection accepted");

                let state = Arc::clone(&state);
                let otp = Arc::clone(&otp);
                let localinfo = Arc::clone(&localinfo);
                let mut shutdown = shutdown_rx.clone();
                connections.spawn(async move {
                    tokio::select! {
                        () = session::handle_connection(stream, state, otp, localinfo) => {}
                        _ = shutdown.changed() => {
                            info!(peer = %peer, "connection cancelled for shutdown");
                        }
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    // -----------------------------------------------------------------------
    // 4. Drain connections, then flush the registries
    // -----------------------------------------------------------------------
    drop(listener);
    let _ = shutdown_tx.send(true);
    while connections.join_next().await.is_some() {}

    let (users, domains) = state.snapshot();
    user_registry.backup(&users).context("backing up user registry")?;
    domain_registry
        .backup(&domains)
        .context("backing up domain registry")?;
    info!(users = users.len(), domains = domains.len(), "registries flushed");

    Ok(())
}
