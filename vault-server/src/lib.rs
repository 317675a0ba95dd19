//! # Vault Server
//!
//! Assembles the two transports over one [`vault_core::VaultService`]:
//! a binary RPC surface for worker relays (large-message capable) and
//! a JSON tool-call surface for agent clients, plus `GET /health` and
//! `GET /metrics`.
//!
//! Startup order matters: both listeners come up while the service is
//! still INITIALIZING (early requests get `NotReady`), then keys are
//! loaded or generated on the blocking pool, a self-test decrypt must
//! pass, and only then does the state flip to READY.

pub mod rpc;
pub mod tools;

pub mod proto {
    tonic::include_proto!("vault.v1");
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;

use vault_core::{spawn_resource_sampler, Config, Metrics, ServiceState, VaultService};
use vault_keystore::KeyStore;

use crate::proto::health_server::HealthServer;
use crate::proto::vault_server::VaultServer as VaultRpcServer;
use crate::rpc::{HealthService, VaultRpc};
use crate::tools::ToolRegistry;

/// In-flight requests get this long to finish once STOPPING begins.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct RunningVault {
    pub rpc_addr: SocketAddr,
    pub tool_addr: SocketAddr,
    service: Arc<VaultService>,
    shutdown_tx: watch::Sender<bool>,
    server_tasks: Vec<JoinHandle<()>>,
    housekeeping: Vec<JoinHandle<()>>,
}

impl RunningVault {
    pub fn service(&self) -> &Arc<VaultService> {
        &self.service
    }

    /// STOPPING → drain (bounded by [`SHUTDOWN_GRACE`]) → stop
    /// listeners → STOPPED.
    pub async fn shutdown(self) {
        self.service.transition(ServiceState::Stopping);
        self.service.drain(SHUTDOWN_GRACE).await;
        let _ = self.shutdown_tx.send(true);
        for task in self.server_tasks {
            let _ = task.await;
        }
        for task in self.housekeeping {
            task.abort();
        }
        self.service.transition(ServiceState::Stopped);
    }
}

/// Bind both transports, load or generate key material, self-test,
/// and flip READY.
pub async fn start(config: Config) -> anyhow::Result<RunningVault> {
    let metrics = Arc::new(Metrics::new());
    let service = Arc::new(VaultService::new(&config, metrics.clone())?);

    let rpc_listener = TcpListener::bind(config.bind_rpc).await?;
    let tool_listener = TcpListener::bind(config.bind_tool).await?;
    let rpc_addr = rpc_listener.local_addr()?;
    let tool_addr = tool_listener.local_addr()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let vault_rpc = VaultRpcServer::new(VaultRpc::new(service.clone()))
        .max_decoding_message_size(config.max_frame_bytes)
        .max_encoding_message_size(config.max_frame_bytes);
    let health_rpc = HealthServer::new(HealthService::new(service.clone()));
    let mut rpc_shutdown = shutdown_rx.clone();
    let rpc_task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = rpc_shutdown.changed().await;
        };
        if let Err(e) = tonic::transport::Server::builder()
            .add_service(vault_rpc)
            .add_service(health_rpc)
            .serve_with_incoming_shutdown(TcpListenerStream::new(rpc_listener), shutdown)
            .await
        {
            tracing::error!(error = %e, "rpc server exited");
        }
    });

    let registry = Arc::new(ToolRegistry::new(config.score_shape));
    let app = tools::router(service.clone(), registry, config.max_frame_bytes);
    let mut tool_shutdown = shutdown_rx.clone();
    let tool_task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = tool_shutdown.changed().await;
        };
        if let Err(e) = axum::serve(tool_listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "tool server exited");
        }
    });

    let sampler = spawn_resource_sampler(metrics);
    let sweeper = tokio::spawn({
        let service = service.clone();
        async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                service.sweep_rate_limiter().await;
            }
        }
    });

    // Key load/generation is seconds of CPU at the production
    // dimension; keep it off the reactor.
    let bootstrap = {
        let key_dir = config.key_dir.clone();
        let dim = config.fhe_dim;
        let index_name = config.index_name.clone();
        tokio::task::spawn_blocking(move || KeyStore::load_or_init(&key_dir, dim, index_name))
            .await
    };

    let ready = match bootstrap {
        Ok(Ok(store)) => {
            let install = service.install_keys(Arc::new(store));
            match install {
                Ok(()) => service.self_test().await.map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            }
        }
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = ready {
        let _ = shutdown_tx.send(true);
        let _ = rpc_task.await;
        let _ = tool_task.await;
        sampler.abort();
        sweeper.abort();
        return Err(e);
    }

    service.mark_ready();
    tracing::info!(rpc = %rpc_addr, tool = %tool_addr, "vault ready");

    Ok(RunningVault {
        rpc_addr,
        tool_addr,
        service,
        shutdown_tx,
        server_tasks: vec![rpc_task, tool_task],
        housekeeping: vec![sampler, sweeper],
    })
}
