//! The HTTP tracker launcher.
//!
//! It binds the configured listeners eagerly, so a port conflict aborts
//! startup instead of surfacing on the first request, then serves the router
//! until the process shuts down. TLS uses `axum-server`'s rustls integration
//! with the configured certificate and key files.
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use super::routes::router;
use crate::config::HttpTracker;
use crate::core::Tracker;

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not bind http listener on {addr}: {source}")]
    Bind { addr: SocketAddr, source: std::io::Error },
    #[error("could not load TLS material: {source}")]
    Tls { source: std::io::Error },
    #[error("https requires both ssl_cert_path and ssl_key_path")]
    MissingTlsMaterial,
}

/// It starts the configured HTTP listeners and returns their join handles
/// together with the bound addresses.
///
/// # Errors
///
/// Will return an [`enum@Error`] if a listener cannot bind or the TLS
/// material cannot be loaded. These are fatal at startup.
pub async fn start(config: &HttpTracker, tracker: Arc<Tracker>) -> Result<Vec<(SocketAddr, JoinHandle<()>)>, Error> {
    let mut listeners = Vec::new();

    if !config.https_only {
        let addr = SocketAddr::new(config.bind_ip, config.http_port);
        let listener = bind(addr)?;
        let bound_addr = listener.local_addr().map_err(|source| Error::Bind { addr, source })?;

        let app = router(tracker.clone());
        let handle = tokio::spawn(async move {
            if let Err(err) = axum_server::from_tcp(listener)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
            {
                tracing::error!("http tracker stopped: {err}");
            }
        });

        info!("http tracker listening on http://{bound_addr}");
        listeners.push((bound_addr, handle));
    }

    if let Some(https_port) = config.https_port {
        let (cert_path, key_path) = match (&config.ssl_cert_path, &config.ssl_key_path) {
            (Some(cert), Some(key)) => (cert.clone(), key.clone()),
            _ => return Err(Error::MissingTlsMaterial),
        };

        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .map_err(|source| Error::Tls { source })?;

        let addr = SocketAddr::new(config.bind_ip, https_port);
        let listener = bind(addr)?;
        let bound_addr = listener.local_addr().map_err(|source| Error::Bind { addr, source })?;

        let app = router(tracker);
        let handle = tokio::spawn(async move {
            if let Err(err) = axum_server::from_tcp_rustls(listener, tls_config)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
            {
                tracing::error!("https tracker stopped: {err}");
            }
        });

        info!("http tracker listening on https://{bound_addr}");
        listeners.push((bound_addr, handle));
    }

    Ok(listeners)
}

fn bind(addr: SocketAddr) -> Result<TcpListener, Error> {
    let listener = TcpListener::bind(addr).map_err(|source| Error::Bind { addr, source })?;
    listener.set_nonblocking(true).map_err(|source| Error::Bind { addr, source })?;
    Ok(listener)
}
