//! ---
//! pp_section: "02-messaging-ipc-data-model"
//! pp_subsection: "module"
//! pp_type: "source"
//! pp_scope: "code"
//! pp_description: "Broadcast transports and protocol codecs."
//! pp_version: "v0.0.0-prealpha"
//! pp_owner: "tbd"
//! ---
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use procpair_common::NetworkConfig;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::transport::Counters;
use crate::{BroadcastTransport, Result, Topic, TransportError, TransportMetrics};

/// Largest datagram a receiver accepts; anything longer is truncated by the kernel.
const RECV_BUFFER_LEN: usize = 1024;

/// Pause after a failed receive so a persistently failing socket cannot spin.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct TopicSocket {
    socket: UdpSocket,
    target: SocketAddr,
}

/// UDP broadcast transport with one socket per topic.
///
/// Sockets are bound with `SO_REUSEADDR` so that a primary and its backup on
/// the same host can share the well-known ports, and with `SO_BROADCAST` so
/// that sends to the segment broadcast address are permitted.
#[derive(Debug)]
pub struct UdpBroadcastTransport {
    heartbeat: TopicSocket,
    checkpoint: TopicSocket,
    counters: Counters,
}

impl UdpBroadcastTransport {
    /// Bind both topic sockets. Must run inside a Tokio runtime.
    pub fn bind(config: &NetworkConfig) -> Result<Self> {
        let heartbeat = bind_topic(
            Topic::Heartbeat,
            config.bind_addr,
            config.broadcast_addr,
            config.heartbeat_port,
        )?;
        let checkpoint = bind_topic(
            Topic::Checkpoint,
            config.bind_addr,
            config.broadcast_addr,
            config.checkpoint_port,
        )?;
        debug!(
            bind = %config.bind_addr,
            broadcast = %config.broadcast_addr,
            heartbeat_port = config.heartbeat_port,
            checkpoint_port = config.checkpoint_port,
            "udp broadcast transport bound"
        );
        Ok(Self {
            heartbeat,
            checkpoint,
            counters: Counters::default(),
        })
    }

    async fn absorb_recv_error(&self, topic: Topic, err: std::io::Error) {
        self.counters.dropped(1);
        warn!(%topic, error = %err, "receive failed");
        tokio::time::sleep(RECV_ERROR_BACKOFF).await;
    }

    fn topic(&self, topic: Topic) -> &TopicSocket {
        match topic {
            Topic::Heartbeat => &self.heartbeat,
            Topic::Checkpoint => &self.checkpoint,
        }
    }
}

fn bind_topic(
    topic: Topic,
    bind_addr: IpAddr,
    broadcast_addr: IpAddr,
    port: u16,
) -> Result<TopicSocket> {
    let bind_err = |source| TransportError::Bind {
        topic,
        port,
        source,
    };
    let socket =
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_broadcast(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket
        .bind(&SocketAddr::new(bind_addr, port).into())
        .map_err(bind_err)?;
    let socket = UdpSocket::from_std(socket.into()).map_err(bind_err)?;
    Ok(TopicSocket {
        socket,
        target: SocketAddr::new(broadcast_addr, port),
    })
}

#[async_trait]
impl BroadcastTransport for UdpBroadcastTransport {
    async fn send(&self, topic: Topic, payload: Bytes) -> Result<()> {
        let entry = self.topic(topic);
        match entry.socket.send_to(&payload, entry.target).await {
            Ok(_) => {
                self.counters.sent();
                trace!(%topic, bytes = payload.len(), "datagram sent");
                Ok(())
            }
            Err(source) => {
                self.counters.send_failed();
                Err(TransportError::Send { topic, source })
            }
        }
    }

    async fn recv(&self, topic: Topic) -> Result<Bytes> {
        let entry = self.topic(topic);
        let mut buf = [0u8; RECV_BUFFER_LEN];
        loop {
            match entry.socket.recv_from(&mut buf).await {
                Ok((len, peer)) => {
                    self.counters.received();
                    trace!(%topic, %peer, bytes = len, "datagram received");
                    return Ok(Bytes::copy_from_slice(&buf[..len]));
                }
                // The datagram is gone either way; keep listening.
                Err(err) => self.absorb_recv_error(topic, err).await,
            }
        }
    }

    fn metrics(&self) -> TransportMetrics {
        self.counters.snapshot()
    }

    fn name(&self) -> &'static str {
        "udp_broadcast"
    }
}
