//! bb-storage: the process wiring storage, action cache and execution
//! routing behind one gRPC listener, plus a metrics endpoint.

mod options;
mod web;

use std::future::{Future, IntoFuture};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bb_blob::{create_blob_access_objects_from_config, BlobAccessActionCache};
use bb_builder::{BuildQueue, InstanceRouter};
use bb_core::{RpcMetrics, ServerOptions};
use bb_grpc::StorageServer;
use prometheus::Registry;
use tokio::net::TcpListener;
use tracing::{error, info};

pub use options::Options;
pub use web::web_router;

/// Start serving and run until `shutdown` resolves.
///
/// Configuration problems (storage configuration, scheduler endpoints,
/// listen addresses) are returned before anything is served. If either the
/// gRPC or the metrics server fails later on, the other is stopped and the
/// failure is returned.
pub async fn run<F>(options: ServerOptions, registry: &Registry, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    info!(?options, "starting bb-storage");

    let blob_access = create_blob_access_objects_from_config(&options.blobstore_config, registry)
        .await
        .with_context(|| {
            format!(
                "Failed to create blob access from {}",
                options.blobstore_config.display()
            )
        })?;
    let action_cache = Arc::new(BlobAccessActionCache::new(blob_access.action_cache));

    let client_metrics =
        RpcMetrics::client(registry).context("Failed to register RPC client metrics")?;
    // Let GetCapabilities() work for instances that only accept action
    // cache uploads; real schedulers take precedence.
    let router = InstanceRouter::from_config(
        &options.schedulers,
        &options.allow_ac_updates_for_instances,
        client_metrics,
    )
    .context("Failed to create scheduler RPC clients")?;
    let allow_ac_updates = router.action_cache_update_allow_list().clone();
    let build_queue: Arc<dyn BuildQueue> = Arc::new(Arc::new(router).into_build_queue());

    let web_listener = TcpListener::bind(options.web_listen_address)
        .await
        .with_context(|| format!("Failed to listen on {}", options.web_listen_address))?;
    let grpc_listener = TcpListener::bind(options.grpc_listen_address)
        .await
        .with_context(|| format!("Failed to listen on {}", options.grpc_listen_address))?;

    let server_metrics =
        RpcMetrics::server(registry).context("Failed to register RPC server metrics")?;
    let grpc = StorageServer::new(
        blob_access.content_addressable_storage,
        action_cache,
        build_queue,
    )
    .allow_ac_updates_for_instances(allow_ac_updates)
    .rpc_metrics(server_metrics)
    .listen(grpc_listener, shutdown);
    let web = axum::serve(web_listener, web_router(registry.clone())).into_future();
    serve_until_first_exit(grpc, web).await
}

/// Drive both servers. The gRPC server ending (on shutdown or failure) ends
/// the process; the web server has no shutdown of its own, so it ending at
/// all is an error.
async fn serve_until_first_exit<G, W>(grpc: G, web: W) -> Result<()>
where
    G: Future<Output = Result<()>>,
    W: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        result = grpc => result.context("Failed to serve RPC server"),
        result = web => match result {
            Ok(()) => Err(anyhow!("Web server stopped unexpectedly")),
            Err(e) => Err(e).context("Failed to serve web server"),
        },
    }
}

/// Resolve once `signal` fires. If the signal handler could not be
/// installed, log it and never resolve, so the process keeps serving.
pub async fn shutdown_on<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("shutting down"),
        Err(e) => {
            error!("Failed to install shutdown signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
