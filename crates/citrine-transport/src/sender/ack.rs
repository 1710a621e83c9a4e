//! The sender's acknowledgement channel: shared cumulative-ACK state and the
//! listener loop feeding the send buffer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::protocol::ack::AckFrame;
use crate::sender::buffer::SendBuffer;
use crate::util;

/// The highest cumulative acknowledgement seen so far, starting at −1.
///
/// Backed by a `watch` channel so waiters observe every advance; the
/// predicate re-check in [`AckState::wait_for`] makes spurious wakeups
/// harmless.
pub struct AckState {
    last_ack: watch::Sender<i64>,
}

impl AckState {
    pub fn new() -> Self {
        let (last_ack, _) = watch::channel(-1);
        Self { last_ack }
    }

    pub fn last_ack(&self) -> i64 {
        *self.last_ack.borrow()
    }

    /// Advances the cumulative value monotonically; stale values are ignored.
    pub fn observe(&self, value: i64) {
        self.last_ack.send_if_modified(|current| {
            if value > *current {
                *current = value;
                true
            } else {
                false
            }
        });
    }

    /// Blocks until `last_ack ≥ sequence` or the timeout elapses, returning
    /// whether the acknowledgement arrived in time.
    pub async fn wait_for(&self, sequence: u32, wait: Duration) -> bool {
        let mut updates = self.last_ack.subscribe();
        let wanted = i64::from(sequence);
        matches!(
            tokio::time::timeout(wait, updates.wait_for(|ack| *ack >= wanted)).await,
            Ok(Ok(_))
        )
    }
}

impl Default for AckState {
    fn default() -> Self {
        Self::new()
    }
}

/// Listens on a freshly bound datagram endpoint for cumulative ACK records.
pub struct AckListener {
    socket: Arc<UdpSocket>,
    port: u16,
    state: Arc<AckState>,
    stopped: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl AckListener {
    /// Binds an OS-assigned port in the same address family as the receiver.
    pub async fn bind(peer: std::net::SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(util::unspecified_for(peer)).await?;
        let port = socket.local_addr()?.port();
        Ok(Self {
            socket: Arc::new(socket),
            port,
            state: Arc::new(AckState::new()),
            stopped: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// The bound port, announced to the receiver in the transfer header.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> Arc<AckState> {
        Arc::clone(&self.state)
    }

    /// Spawns the receive loop: validates triple-copy records, advances the
    /// shared state, shrinks the send buffer, and fires fast retransmit on
    /// duplicate ACKs.
    pub fn spawn(&self, buffer: Arc<SendBuffer>) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let state = Arc::clone(&self.state);
        let stopped = Arc::clone(&self.stopped);
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            let mut previous_ack: i64 = -1;
            let mut buf = [0u8; 64];
            loop {
                if stopped.load(Ordering::Acquire) {
                    break;
                }
                let len = tokio::select! {
                    _ = shutdown.notified() => break,
                    received = socket.recv_from(&mut buf) => match received {
                        Ok((len, _)) => len,
                        Err(e) => {
                            debug!("ack receive failed: {e}");
                            continue;
                        }
                    },
                };

                let value = match AckFrame::decode(&buf[..len]) {
                    Ok(frame) => i64::from(frame.value),
                    Err(_) => {
                        warn!("[recv corrupt ack]");
                        continue;
                    }
                };
                info!("[recv ack] {value}");

                state.observe(value);
                buffer.note_cumulative_ack(value as u32).await;
                if value == previous_ack {
                    // Two identical cumulative ACKs in a row: the packet
                    // right after the acknowledged prefix is presumed lost.
                    buffer.force_resend((value as u32).wrapping_add(1)).await;
                }
                previous_ack = value;
            }
        })
    }

    /// Unblocks and terminates the receive loop.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use bytes::Bytes;
    use std::net::SocketAddr;
    use tokio::time::{sleep, timeout};

    #[tokio::test]
    async fn state_is_monotonic() {
        let state = AckState::new();
        assert_eq!(state.last_ack(), -1);
        state.observe(4);
        state.observe(2);
        assert_eq!(state.last_ack(), 4);
    }

    #[tokio::test]
    async fn wait_for_times_out_and_succeeds() {
        let state = Arc::new(AckState::new());
        assert!(!state.wait_for(3, Duration::from_millis(20)).await);

        let waiter = Arc::clone(&state);
        let handle = tokio::spawn(async move { waiter.wait_for(3, Duration::from_secs(1)).await });
        sleep(Duration::from_millis(10)).await;
        state.observe(3);
        assert!(handle.await.unwrap());
    }

    async fn listener_fixture() -> (AckListener, Arc<SendBuffer>, UdpSocket, SocketAddr) {
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let listener = AckListener::bind(peer).await.unwrap();

        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let data_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        data_socket.connect(sink.local_addr().unwrap()).await.unwrap();
        let config = TransferConfig {
            min_window: 8,
            ..TransferConfig::default()
        };
        let buffer = SendBuffer::new(data_socket, listener.state(), config);

        let ack_target: SocketAddr = ("127.0.0.1".parse::<std::net::IpAddr>().unwrap(), listener.port()).into();
        (listener, buffer, sink, ack_target)
    }

    #[tokio::test]
    async fn listener_advances_state_and_shrinks_buffer() {
        let (listener, buffer, _sink, target) = listener_fixture().await;
        for _ in 0..8 {
            buffer.enqueue(0, Bytes::from_static(b"x")).await.unwrap();
        }
        let task = listener.spawn(Arc::clone(&buffer));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&AckFrame { value: 5 }.encode(), target).await.unwrap();

        assert!(listener.state().wait_for(5, Duration::from_secs(1)).await);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(buffer.entry_sequences().await, vec![6, 7]);

        listener.stop();
        let _ = timeout(Duration::from_secs(1), task).await;
    }

    #[tokio::test]
    async fn corrupt_record_is_dropped() {
        let (listener, buffer, _sink, target) = listener_fixture().await;
        let task = listener.spawn(Arc::clone(&buffer));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut corrupt = AckFrame { value: 3 }.encode().to_vec();
        corrupt[11] ^= 0xFF;
        client.send_to(&corrupt, target).await.unwrap();

        sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.state().last_ack(), -1);

        listener.stop();
        let _ = timeout(Duration::from_secs(1), task).await;
    }

    #[tokio::test]
    async fn duplicate_ack_triggers_fast_retransmit() {
        let (listener, buffer, _sink, target) = listener_fixture().await;
        for _ in 0..8 {
            buffer.enqueue(0, Bytes::from_static(b"x")).await.unwrap();
        }
        buffer.mark_all_sent().await;
        let task = listener.spawn(Arc::clone(&buffer));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let frame = AckFrame { value: 5 }.encode();
        client.send_to(&frame, target).await.unwrap();
        client.send_to(&frame, target).await.unwrap();

        sleep(Duration::from_millis(100)).await;
        // Entries 6 and 7 are back in the fresh bucket.
        assert_eq!(buffer.send_counts().await, vec![(6, 0), (7, 0)]);

        listener.stop();
        let _ = timeout(Duration::from_secs(1), task).await;
    }
}
