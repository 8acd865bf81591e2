//! Accept loop feeding worker connections into a [`Coordinator`]

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nagpool::{Coordinator, LineTransport};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::transport::TcpTransport;

/// Registers one accepted stream as a session and serves it until it closes.
pub async fn serve_connection(coordinator: Arc<Coordinator>, stream: TcpStream) -> io::Result<()> {
    let (transport, read_half) = TcpTransport::new(stream)?;
    let session = coordinator.admit(transport.clone());
    log::info!("accepted {} as {}", transport.peer(), session.id());
    transport.run(read_half, session).await;
    Ok(())
}

/// Accepts until `shutdown` turns true, then waits for the open connections
/// to close.
pub async fn serve(
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let coordinator = Arc::clone(&coordinator);
                    connections.spawn(async move {
                        if let Err(e) = serve_connection(coordinator, stream).await {
                            log::warn!("could not admit {addr}: {e}");
                        }
                    });
                }
                Err(e) => log::warn!("accept failed: {e}"),
            },
            Some(done) = connections.join_next() => {
                if let Err(e) = done {
                    log::error!("connection task failed: {e}");
                }
            }
        }
    }
    drop(listener);

    log::debug!("accept loop stopped, {} connection(s) open", connections.len());
    while let Some(done) = connections.join_next().await {
        if let Err(e) = done {
            log::error!("connection task failed: {e}");
        }
    }
}

/// Accept loop on its own tokio runtime
pub struct Server {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept: Option<JoinHandle<()>>,
    runtime: Option<Runtime>,
}

impl Server {
    pub fn spawn(addr: SocketAddr, coordinator: Arc<Coordinator>) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("nagpool-net")
            .enable_all()
            .build()
            .context("building the network runtime")?;
        let listener = runtime
            .block_on(TcpListener::bind(addr))
            .with_context(|| format!("binding {addr}"))?;
        let local_addr = listener.local_addr().context("local_addr")?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept = runtime.spawn(serve(listener, coordinator, shutdown_rx));
        log::info!("listening on {local_addr}");
        Ok(Self {
            local_addr,
            shutdown,
            accept: Some(accept),
            runtime: Some(runtime),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting new workers. Open connections keep running.
    pub fn stop_accepting(&self) {
        self.shutdown.send_replace(true);
    }

    /// Stops accepting and waits up to `linger` for the open connections to
    /// close. Whatever is still open afterwards is dropped with the runtime.
    pub fn stop(mut self, linger: Duration) -> anyhow::Result<()> {
        self.stop_accepting();
        let (Some(runtime), Some(accept)) = (self.runtime.take(), self.accept.take()) else {
            return Ok(());
        };
        let drained = runtime.block_on(async { tokio::time::timeout(linger, accept).await });
        runtime.shutdown_background();
        match drained {
            Ok(joined) => joined.context("accept task failed"),
            Err(_) => {
                log::warn!("connections still open after {linger:?}, dropping them");
                Ok(())
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
