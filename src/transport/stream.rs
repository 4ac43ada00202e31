//! # Stream Transport
//!
//! Full-duplex carrier: newline-delimited JSON over any async byte stream. Each
//! line is one protocol message in either direction. Status replies are written
//! right after the inbound line that caused them; aggregated responses are
//! written as soon as their batch completes.
//!
//! A line longer than `max_message_size` cannot be resynchronised and ends the
//! connection. Every other malformed line is dropped and the connection stays open.
//!
//! ## Shutdown
//! `start_server_with_shutdown` stops accepting on the first message from its
//! shutdown channel, then waits up to `SHUTDOWN_GRACE` for open connections.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::connection::Connection;
use crate::protocol::dispatcher::Dispatch;
use crate::protocol::session::SessionId;
use crate::utils::metrics::global_metrics;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn codec_error(err: LinesCodecError) -> ProtocolError {
    match err {
        LinesCodecError::Io(e) => ProtocolError::Io(e),
        LinesCodecError::MaxLineLengthExceeded => {
            ProtocolError::DeserializeError(crate::error::constants::ERR_OVERSIZED_MESSAGE.into())
        }
    }
}

fn to_line(payload: Bytes) -> Result<String> {
    String::from_utf8(payload.to_vec()).map_err(|e| ProtocolError::SerializeError(e.to_string()))
}

/// Run the protocol over one stream until the peer disconnects
#[instrument(skip(stream, config, dispatcher), fields(session = %id))]
pub async fn serve_connection<S>(
    stream: S,
    id: SessionId,
    config: Arc<ServerConfig>,
    dispatcher: Arc<dyn Dispatch>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let max_line = config.max_message_size;
    let (connection, mut outbound) = Connection::with_channel(id, config, dispatcher);
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(max_line));

    let result = loop {
        tokio::select! {
            inbound = framed.next() => match inbound {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let outcome = match connection.on_inbound_message(line.as_bytes()) {
                        Ok(outcome) => outcome,
                        Err(ProtocolError::OverlappingBatch) => {
                            warn!("Batch received while the previous one is open, dropped");
                            continue;
                        }
                        Err(e) => break Err(e),
                    };
                    let mut failed = None;
                    for reply in outcome.encode_replies()? {
                        if let Err(e) = framed.send(to_line(reply)?).await {
                            failed = Some(codec_error(e));
                            break;
                        }
                    }
                    if let Some(e) = failed {
                        break Err(e);
                    }
                }
                Some(Err(e)) => {
                    // The framed stream ends after any codec error
                    global_metrics().decode_error();
                    warn!(limit = max_line, error = %e, "Unreadable line, closing connection");
                    break Err(codec_error(e));
                }
                None => break Ok(()),
            },
            Some(payload) = outbound.recv() => {
                if let Err(e) = framed.send(to_line(payload)?).await {
                    break Err(codec_error(e));
                }
            }
        }
    };

    connection.close();
    debug!("Stream connection finished");
    result
}

/// Bind `config.address` and serve until CTRL+C
pub async fn start_server(config: Arc<ServerConfig>, dispatcher: Arc<dyn Dispatch>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    start_server_with_shutdown(config, dispatcher, shutdown_rx).await
}

/// Bind `config.address` and serve until `shutdown_rx` fires
pub async fn start_server_with_shutdown(
    config: Arc<ServerConfig>,
    dispatcher: Arc<dyn Dispatch>,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(&config.address).await?;
    serve_listener(listener, config, dispatcher, shutdown_rx).await
}

/// Accept loop over an already bound listener
#[instrument(skip_all, fields(address = ?listener.local_addr().ok()))]
pub async fn serve_listener(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    dispatcher: Arc<dyn Dispatch>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    info!("Listening");
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!(connections = connections.len(), "Shutting down server. Waiting for connections to close...");
                let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
                    while connections.join_next().await.is_some() {}
                })
                .await;
                if drained.is_err() {
                    warn!("Shutdown timeout reached, forcing exit");
                    connections.abort_all();
                }
                return Ok(());
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        let id = SessionId::generate();
                        debug!(%peer, session = %id, "New connection established");
                        let config = Arc::clone(&config);
                        let dispatcher = Arc::clone(&dispatcher);
                        connections.spawn(async move {
                            if let Err(e) = serve_connection(stream, id, config, dispatcher).await {
                                warn!(%peer, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }

            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Connection task failed");
                }
            }
        }
    }
}
