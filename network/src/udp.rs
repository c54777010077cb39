use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Binds a non-blocking UDP socket usable from the current runtime.
pub(crate) fn bind(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = std::net::UdpSocket::bind(addr)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket)
}

/// Handle for queueing outbound datagrams without blocking.
///
/// Packet handlers push here while holding no locks; a detached sender
/// task drains the queue onto the socket.
#[derive(Clone)]
pub(crate) struct OutboundQueue {
    tx: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
}

impl OutboundQueue {
    pub fn send(&self, datagram: Bytes, to: SocketAddr) {
        if self.tx.send((datagram, to)).is_err() {
            tracing::trace!(%to, "outbound queue is closed, dropping datagram");
        }
    }
}

/// Spawns the task draining queued datagrams onto the socket. The task
/// exits once every queue handle is gone.
pub(crate) fn spawn_sender(socket: Arc<UdpSocket>) -> OutboundQueue {
    let (tx, mut rx) = mpsc::unbounded_channel::<(Bytes, SocketAddr)>();

    tokio::spawn(async move {
        while let Some((datagram, to)) = rx.recv().await {
            if let Err(e) = socket.send_to(&datagram, to).await {
                tracing::debug!(%to, "failed to send datagram: {e}");
            }
        }
    });

    OutboundQueue { tx }
}
