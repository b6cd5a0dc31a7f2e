// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker side of the daemon socket

use std::path::Path;
use std::sync::{Arc, RwLock};

use rwgate_core::transport::{Inbox, Outbox, SubscriberId, Subscription};
use rwgate_core::{Delivery, Transport, TransportError, WorkerId};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::protocol::{self, Frame, ProtocolError, DEFAULT_TIMEOUT, PROTOCOL_VERSION};

type Subscribers = Arc<RwLock<Vec<(Subscription, Outbox)>>>;

/// [`Transport`] for a worker connected to the daemon
///
/// Messages go out through a writer task; frames delivered by the daemon
/// are routed to local subscriptions. A send to an endpoint the daemon does
/// not know is dropped by the daemon, not reported here.
pub struct SocketTransport {
    id: WorkerId,
    outgoing: mpsc::UnboundedSender<Frame>,
    subscribers: Subscribers,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SocketTransport {
    /// Connect to the daemon socket and introduce ourselves as `worker`
    pub async fn connect(path: &Path, worker: impl Into<WorkerId>) -> Result<Self, ProtocolError> {
        let worker = worker.into();
        let stream = UnixStream::connect(path).await?;
        let (mut reader, mut writer) = stream.into_split();

        protocol::write_frame(
            &mut writer,
            &Frame::Hello {
                worker: worker.clone(),
                version: PROTOCOL_VERSION.to_string(),
            },
        )
        .await?;
        match protocol::read_frame_timeout(&mut reader, DEFAULT_TIMEOUT).await? {
            Frame::Welcome { .. } => {}
            Frame::Rejected { reason } => return Err(ProtocolError::Unexpected(reason)),
            other => return Err(ProtocolError::Unexpected(format!("{:?}", other))),
        }
        debug!(worker = %worker, "connected to daemon");

        let subscribers: Subscribers = Arc::default();
        let (outgoing, mut queue) = mpsc::unbounded_channel::<Frame>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = queue.recv().await {
                if let Err(e) = protocol::write_frame(&mut writer, &frame).await {
                    debug!("daemon socket write failed: {}", e);
                    break;
                }
            }
        });

        let reader = tokio::spawn({
            let subscribers = Arc::clone(&subscribers);
            async move {
                loop {
                    match protocol::read_frame(&mut reader).await {
                        Ok(Frame::Deliver {
                            origin,
                            topic,
                            payload,
                        }) => route(&subscribers, origin, topic, payload),
                        Ok(other) => debug!("ignoring frame from daemon: {:?}", other),
                        Err(e) => {
                            debug!("daemon socket closed: {}", e);
                            break;
                        }
                    }
                }
                // Closing the outboxes ends every inbox
                subscribers.write().unwrap_or_else(|e| e.into_inner()).clear();
            }
        });

        Ok(Self {
            id: worker,
            outgoing,
            subscribers,
            reader,
            writer,
        })
    }

    /// Whether the daemon connection is still up
    pub fn is_connected(&self) -> bool {
        !self.reader.is_finished() && !self.writer.is_finished()
    }

    fn push(&self, frame: Frame) -> Result<(), TransportError> {
        self.outgoing
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }
}

fn route(subscribers: &Subscribers, origin: WorkerId, topic: String, payload: serde_json::Value) {
    let subscribers = subscribers.read().unwrap_or_else(|e| e.into_inner());
    for (subscription, tx) in subscribers.iter() {
        if subscription.matches(&topic) {
            let _ = tx.send(Delivery {
                origin: origin.clone(),
                topic: topic.clone(),
                payload: payload.clone(),
            });
        }
    }
    trace!(topic, "routed");
}

impl Transport for SocketTransport {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    fn send(
        &self,
        target: &WorkerId,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        self.push(Frame::Send {
            target: target.clone(),
            topic: topic.to_string(),
            payload,
        })
    }

    fn broadcast(&self, topic: &str, payload: serde_json::Value) -> Result<(), TransportError> {
        self.push(Frame::Broadcast {
            topic: topic.to_string(),
            payload,
        })
    }

    fn subscribe(&self, subscription: Subscription) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|(s, _)| s.id != subscription.id);
        subscribers.push((subscription, tx));
        rx
    }

    fn unsubscribe(&self, id: &SubscriberId) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(s, _)| &s.id != id);
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
