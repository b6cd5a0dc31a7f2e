// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket server and connection handling.
//!
//! Every connected worker becomes an endpoint of the daemon's [`LocalHub`].
//! Frames from the socket are routed through the hub, and whatever the hub
//! delivers to the endpoint is written back. When the socket closes the
//! endpoint is disconnected, which tells the coordinator to clean the worker.

use rwgate_core::transport::Subscription;
use rwgate_core::{LocalHub, LocalTransport, Transport, TransportError, WorkerId};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::protocol::{self, Frame, ProtocolError, DEFAULT_TIMEOUT, PROTOCOL_VERSION};

/// Accept connections forever, one task per connection
pub async fn serve(listener: &UnixListener, hub: &LocalHub, clean_topic: &str) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let hub = hub.clone();
                let clean_topic = clean_topic.to_string();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(hub, &clean_topic, stream).await {
                        error!("Error handling connection: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
            }
        }
    }
}

/// Serve one worker connection until it closes
pub async fn handle_connection(
    hub: LocalHub,
    clean_topic: &str,
    stream: UnixStream,
) -> Result<(), ServerError> {
    let (mut reader, mut writer) = stream.into_split();

    let worker = match protocol::read_frame_timeout(&mut reader, DEFAULT_TIMEOUT).await {
        Ok(Frame::Hello { worker, version }) => {
            if version != PROTOCOL_VERSION {
                warn!(worker = %worker, version, "worker protocol version differs");
            }
            worker
        }
        Ok(other) => {
            reject(&mut writer, "expected Hello").await;
            return Err(ServerError::Protocol(ProtocolError::Unexpected(format!(
                "{:?}",
                other
            ))));
        }
        Err(ProtocolError::ConnectionClosed) => {
            debug!("Client disconnected before handshake");
            return Ok(());
        }
        Err(ProtocolError::Timeout) => {
            error!("Handshake timeout");
            return Err(ServerError::Timeout);
        }
        Err(e) => return Err(ServerError::Protocol(e)),
    };

    let endpoint = match hub.try_endpoint(worker.clone()) {
        Ok(endpoint) => endpoint,
        Err(_) => {
            reject(&mut writer, &format!("worker {} is already connected", worker)).await;
            return Err(ServerError::WorkerInUse(worker));
        }
    };
    let mut inbox = endpoint.subscribe(Subscription::new(
        "socket",
        vec!["**".into()],
        "relay to worker socket",
    ));
    protocol::write_frame(
        &mut writer,
        &Frame::Welcome {
            version: PROTOCOL_VERSION.to_string(),
        },
    )
    .await?;
    info!(worker = %worker, "worker connected");

    let relay = tokio::spawn(async move {
        while let Some(delivery) = inbox.recv().await {
            let frame = Frame::Deliver {
                origin: delivery.origin,
                topic: delivery.topic,
                payload: delivery.payload,
            };
            if let Err(e) = protocol::write_frame(&mut writer, &frame).await {
                debug!("relay to worker stopped: {}", e);
                break;
            }
        }
    });

    let result = forward_frames(&mut reader, &endpoint).await;

    relay.abort();
    if let Err(e) = hub.disconnect(&worker, clean_topic) {
        warn!(worker = %worker, "disconnect: {}", e);
    }
    info!(worker = %worker, "worker disconnected");

    match result {
        Err(ProtocolError::ConnectionClosed) => Ok(()),
        other => other.map_err(ServerError::Protocol),
    }
}

/// Route frames read from the worker through its hub endpoint
async fn forward_frames(
    reader: &mut OwnedReadHalf,
    endpoint: &LocalTransport,
) -> Result<(), ProtocolError> {
    loop {
        let frame = protocol::read_frame(reader).await?;
        let sent = match frame {
            Frame::Send {
                target,
                topic,
                payload,
            } => endpoint.send(&target, &topic, payload),
            Frame::Broadcast { topic, payload } => endpoint.broadcast(&topic, payload),
            other => {
                warn!(worker = %endpoint.id(), "ignoring frame: {:?}", other);
                continue;
            }
        };
        match sent {
            Ok(()) => {}
            Err(TransportError::UnknownTarget(target)) => {
                warn!(worker = %endpoint.id(), target = %target, "message for unknown endpoint dropped");
            }
            Err(e) => return Err(ProtocolError::Unexpected(e.to_string())),
        }
    }
}

async fn reject(writer: &mut tokio::net::unix::OwnedWriteHalf, reason: &str) {
    let frame = Frame::Rejected {
        reason: reason.to_string(),
    };
    if let Err(e) = protocol::write_frame(writer, &frame).await {
        debug!("failed to send rejection: {}", e);
    }
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Handshake timeout")]
    Timeout,

    #[error("Worker already connected: {0}")]
    WorkerInUse(WorkerId),
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
