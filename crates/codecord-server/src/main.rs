//! code-cord server binary
//!
//! Wires the resolved configuration into the stream service, runs the public
//! and admin HTTP listeners, and tears everything down in order on
//! SIGINT/SIGTERM: stop accepting HTTP, kill all registered streams, close
//! the stores, exit.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use codecord_server::admin::{create_admin_router, AdminState};
use codecord_server::api::{create_router, AppState};
use codecord_server::avatar::AvatarService;
use codecord_server::config::{Cli, ServerConfig};
use codecord_server::launcher::{ContainerWorker, DefaultWorkerFactory};
use codecord_server::lifecycle::StreamService;
use codecord_server::registry::StreamRegistry;
use codecord_server::storage::Stores;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::resolve(cli).context("could not init server")?;

    if config.operator_public_key.is_none() {
        warn!(
            "server security is disabled! please don't use this server in prod, \
             or specify the `--with-security-check` flag"
        );
    }

    let stores =
        Arc::new(Stores::open(&config.data_folder).context("could not connect to storage")?);

    let registry = Arc::new(StreamRegistry::new());
    let factory = Arc::new(DefaultWorkerFactory {
        bin_path: config.bin_path.clone(),
        container_prefix: config.container_prefix.clone(),
        stream_image: config.stream_image.clone(),
    });
    let streams = StreamService::new(registry, Arc::clone(&stores), factory);

    streams
        .reconcile()
        .await
        .context("could not reconcile stream storage")?;

    if config.pull_image_on_startup {
        info!(image = %config.stream_image, "pulling stream image");
        ContainerWorker::pull_image(&config.stream_image, config.registry_auth.as_deref())
            .await
            .context("could not pull stream image")?;
    }

    let state = Arc::new(AppState {
        streams: Arc::clone(&streams),
        avatars: AvatarService::new(Arc::clone(&stores), config.max_avatar_size),
        info: config.info.clone(),
        operator_key: config.operator_public_key.clone(),
    });
    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();

    let admin_state = Arc::new(AdminState {
        streams: Arc::clone(&streams),
        stores: Arc::clone(&stores),
        info: config.info.clone(),
        signing_key: config.operator_private_key.clone(),
    });
    let admin_app = create_admin_router(admin_state).into_make_service();

    let handle = axum_server::Handle::new();
    let admin_handle = axum_server::Handle::new();

    {
        let handle = handle.clone();
        let admin_handle = admin_handle.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            warn!("server is shutting down...");
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            admin_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });
    }

    let admin_address = config.admin_address;
    let admin_server = tokio::spawn(async move {
        info!(address = %admin_address, "starting API server");
        axum_server::bind(admin_address)
            .handle(admin_handle)
            .serve(admin_app)
            .await
    });

    info!(address = %config.address, "starting server");
    match &config.tls {
        Some(tls) => {
            let rustls = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .context("could not load TLS material")?;
            axum_server::bind_rustls(config.address, rustls)
                .handle(handle)
                .serve(app)
                .await
                .context("server exited with error")?;
        }
        None => {
            axum_server::bind(config.address)
                .handle(handle)
                .serve(app)
                .await
                .context("server exited with error")?;
        }
    }

    admin_server
        .await
        .context("API server task failed")?
        .context("API server exited with error")?;

    streams.shutdown().await;
    drop(stores);

    info!("server stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).expect("could not install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
