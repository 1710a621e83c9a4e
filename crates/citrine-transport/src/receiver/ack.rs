//! The receiver's acknowledgement channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, info};
use tokio::net::UdpSocket;

use crate::error::Result;
use crate::protocol::ack::AckFrame;
use crate::util::unspecified_for;

/// Emits cumulative acknowledgements towards the port the sender announced.
///
/// The value actually put on the wire is a high-water mark: `send(n)`
/// transmits `max(n, latest)`, so the emitted sequence never regresses even
/// if the receive loop observes transiently stale state during reordering.
/// Cloning shares the socket and the mark, so acknowledgements can be
/// emitted without holding any buffer lock.
#[derive(Clone)]
pub struct AckSender {
    socket: Arc<UdpSocket>,
    latest: Arc<AtomicU32>,
}

impl AckSender {
    /// Opens a fresh endpoint connected to the sender's ACK port.
    pub async fn connect(peer: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(unspecified_for(peer)).await?;
        socket.connect(peer).await?;
        Ok(Self {
            socket: Arc::new(socket),
            latest: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Transmits the triple-copy record of `max(ack, latest)`. Send errors
    /// are transient and only logged.
    pub async fn send(&self, ack: u32) {
        let previous = self.latest.fetch_max(ack, Ordering::AcqRel);
        let value = previous.max(ack);
        let frame = AckFrame { value }.encode();
        match self.socket.send(&frame).await {
            Ok(_) => info!("[send ack] {value}"),
            Err(e) => debug!("ack send failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn emitted_values_never_regress() {
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sender = AckSender::connect(sink.local_addr().unwrap()).await.unwrap();

        sender.send(3).await;
        sender.send(1).await;
        sender.send(4).await;

        let mut buf = [0u8; 16];
        let mut seen = Vec::new();
        for _ in 0..3 {
            let (len, _) = timeout(Duration::from_secs(1), sink.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            seen.push(AckFrame::decode(&buf[..len]).unwrap().value);
        }
        assert_eq!(seen, vec![3, 3, 4]);
    }
}
