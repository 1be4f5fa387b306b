//! Admission webhook endpoints for the overcommit operator
//!
//! Two endpoints are served, each by its own managed workload:
//! - `POST /validate-overcommitclass` / `POST /validate-overcommit` - policy
//!   object validation ([`class_validator`])
//! - `POST /mutate-pod` - pod request rewriting ([`pod_mutator`])
//!
//! Both routers also expose `GET /healthz`. Traffic is TLS-terminated with
//! the cert-manager-issued key pair mounted into the pod; on shutdown the
//! listener stops accepting and in-flight reviews drain within a bounded
//! deadline.

pub mod class_validator;
pub mod pod_mutator;

use std::fs;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as HttpBuilder;
use hyper_util::service::TowerToHyperService;
use kube::api::Api;
use kube::runtime::reflector::Store;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::Client;
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

use crate::crd::OvercommitClass;
use crate::Error;

/// How long in-flight reviews may drain after shutdown is signalled
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Shared state for the class validator
pub struct ValidatorState {
    /// Kubernetes client for freshness reads
    pub client: Client,
}

/// Shared state for the pod mutator
pub struct MutatorState {
    /// Effective policy-attachment label key
    pub label: String,
    /// Watch-populated class cache; reads are lock-free snapshots
    pub store: Store<OvercommitClass>,
}

/// Router for the class validator workload
pub fn validator_router(state: Arc<ValidatorState>) -> Router {
    Router::new()
        .route(
            crate::resources::VALIDATE_CLASS_PATH,
            post(class_validator::validate_class_handler),
        )
        .route(
            crate::resources::VALIDATE_OVERCOMMIT_PATH,
            post(class_validator::validate_overcommit_handler),
        )
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Router for the pod mutator workload
pub fn mutator_router(state: Arc<MutatorState>) -> Router {
    Router::new()
        .route(
            crate::resources::MUTATE_POD_PATH,
            post(pod_mutator::mutate_pod_handler),
        )
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Start a watch-backed class cache and wait for the first sync.
pub async fn class_store(client: Client) -> Result<Store<OvercommitClass>, Error> {
    let api: Api<OvercommitClass> = Api::all(client);
    let (reader, writer) = reflector::store();

    let stream = reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff()
        .touched_objects()
        .for_each(|_| futures::future::ready(()));
    tokio::spawn(stream);

    reader
        .wait_until_ready()
        .await
        .map_err(|e| Error::internal(format!("class cache failed to sync: {e}"), "webhook"))?;
    Ok(reader)
}

/// Load the rustls server configuration from PEM cert/key files.
pub fn load_tls_config(cert_path: &str, key_path: &str) -> Result<Arc<ServerConfig>, Error> {
    let cert_data = fs::read(cert_path)
        .map_err(|e| Error::internal(format!("failed to read cert file '{cert_path}': {e}"), "tls"))?;
    let key_data = fs::read(key_path)
        .map_err(|e| Error::internal(format!("failed to read key file '{key_path}': {e}"), "tls"))?;

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(cert_data.as_slice()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::internal(format!("invalid certificates in '{cert_path}': {e}"), "tls"))?;
    if certs.is_empty() {
        return Err(Error::internal(
            format!("no valid certificates found in '{cert_path}'"),
            "tls",
        ));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(key_data.as_slice()))
        .map_err(|e| Error::internal(format!("invalid key in '{key_path}': {e}"), "tls"))?
        .ok_or_else(|| Error::internal(format!("no valid private key found in '{key_path}'"), "tls"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::internal(format!("failed to build TLS config: {e}"), "tls"))?;

    Ok(Arc::new(config))
}

/// Serve `router` over TLS until shutdown is signalled, then drain in-flight
/// reviews up to [`DRAIN_DEADLINE`].
pub async fn serve_tls(
    addr: SocketAddr,
    tls_config: Arc<ServerConfig>,
    router: Router,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), Error> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::internal(format!("failed to bind {addr}: {e}"), "webhook"))?;
    let tls_acceptor = TlsAcceptor::from(tls_config);

    info!(%addr, "admission webhook listening");

    let mut connections = JoinSet::new();

    loop {
        let (tcp_stream, remote_addr) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("failed to accept TCP connection: {e}");
                        continue;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                info!("webhook server shutting down");
                break;
            }
        };

        let tls_acceptor = tls_acceptor.clone();
        let router = router.clone();

        connections.spawn(async move {
            let tls_stream = match tls_acceptor.accept(tcp_stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(%remote_addr, "TLS handshake failed: {e}");
                    return;
                }
            };

            let io = TokioIo::new(tls_stream);
            let service = TowerToHyperService::new(router.into_service());

            if let Err(e) = HttpBuilder::new(hyper_util::rt::TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                error!(%remote_addr, "error serving connection: {e}");
            }
        });
    }

    if tokio::time::timeout(DRAIN_DEADLINE, async {
        while connections.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        info!("drain deadline reached, aborting remaining connections");
        connections.abort_all();
    }

    Ok(())
}
