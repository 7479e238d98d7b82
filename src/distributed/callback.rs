//! Per-group callback server
//!
//! Publishes a dispatch session's callback surface on a TCP endpoint for the
//! lifetime of the group. Each connection may carry any number of sequential
//! requests; an EnterBarrier request parks only its own connection.
//!
//! A parked caller that closes its end of the connection leaves the barrier's
//! cohort. The server cannot tell a half-close (`shutdown(Write)`) from a full
//! hangup, so callers must keep their write side open until the reply arrives.

use crate::coordinator::DispatchSession;
use crate::distributed::protocol::*;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Running callback server of one group
pub struct CallbackServer {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    accept_task: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind `bind_addr` and start serving `session`
    pub async fn bind(bind_addr: &str, session: Arc<DispatchSession>) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr).await
            .with_context(|| format!("Failed to bind callback server on {}", bind_addr))?;
        let local_addr = listener.local_addr()
            .context("Failed to read callback server address")?;

        info!(group = session.group(), %local_addr, "Callback surface published");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let accept_task = tokio::spawn(accept_loop(listener, session, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and drop every open connection
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.accept_task).await {
            warn!("Callback accept loop ended abnormally: {}", e);
        }
        info!(local_addr = %self.local_addr, "Callback surface unpublished");
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    session: Arc<DispatchSession>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    // Dropping the set at the end aborts connections still parked on a barrier
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(group = session.group(), %peer, "Callback connection accepted");
                    connections.spawn(serve_connection(stream, peer, session.clone()));
                }
                Err(e) => warn!(group = session.group(), "Failed to accept callback connection: {}", e),
            },

            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    let open = connections.len();
    if open > 0 {
        debug!(group = session.group(), open, "Closing callback connections");
    }
}

async fn serve_connection(mut stream: TcpStream, peer: SocketAddr, session: Arc<DispatchSession>) {
    loop {
        let msg = match try_read_message(&mut stream).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(e) => {
                warn!(group = session.group(), %peer, "Bad callback request: {:#}", e);
                let _ = write_message(&mut stream, &Message::error(format!("{:#}", e))).await;
                break;
            }
        };

        // A caller that hangs up while parked on a barrier leaves its cohort
        let reply = tokio::select! {
            biased;
            reply = session.handle(msg) => reply,
            _ = peer_closed(&stream) => {
                debug!(group = session.group(), %peer, "Callback caller hung up mid-request");
                break;
            }
        };
        if let Err(e) = write_message(&mut stream, &reply).await {
            debug!(group = session.group(), %peer, "Callback caller went away: {:#}", e);
            break;
        }
    }
}

/// Resolves once the peer has closed its end
async fn peer_closed(stream: &TcpStream) {
    let mut buf = [0u8; 1];
    match stream.peek(&mut buf).await {
        Ok(0) | Err(_) => {}
        // Pipelined request bytes; only EOF counts
        Ok(_) => std::future::pending::<()>().await,
    }
}
