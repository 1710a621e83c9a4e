//! The sliding send window: sequence assignment, retransmission and the
//! send loop that drains it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;

use crate::config::TransferConfig;
use crate::error::{Result, TransportError};
use crate::protocol::packet::{DataPacket, HEADER_LEN, offset_label};
use crate::sender::ack::AckState;

/// How long the send loop naps when the buffer is completely empty.
const IDLE_POLL: Duration = Duration::from_millis(1);

/// A buffered packet, kept in its serialized form so retransmissions never
/// re-encode.
struct Entry {
    sequence: u32,
    frame: Bytes,
    /// 0 = never transmitted, 1 = already on the wire at least once. Set to
    /// 1 after every transmission, not incremented: the selection policy
    /// only distinguishes fresh from in-flight.
    send_count: u8,
    flags: u8,
}

struct BufferState {
    /// Entries in sequence order; acknowledged ones are removed from the front.
    entries: Vec<Entry>,
    /// Next sequence number to hand out. Never reused.
    next_sequence: u32,
    /// Current inflight window capacity backing the semaphore.
    window: usize,
    /// Framed bytes handed to the socket, retransmissions included.
    total_bytes_sent: u64,
}

/// Sliding window of unacknowledged packets and the loop transmitting them.
///
/// Admission is a counting semaphore sized to the adaptive window: `enqueue`
/// consumes one permit per packet and every acknowledged removal returns
/// one, so the number of buffered entries can never exceed the window.
pub struct SendBuffer {
    socket: UdpSocket,
    state: Mutex<BufferState>,
    permits: Semaphore,
    acks: Arc<AckState>,
    stopped: AtomicBool,
    wakeup: Notify,
    config: TransferConfig,
}

/// Snapshot the send loop works on outside the state lock.
struct Selected {
    sequence: u32,
    frame: Bytes,
    send_count: u8,
    flags: u8,
}

impl SendBuffer {
    /// Wraps a socket already connected to the receiver's data port.
    pub fn new(socket: UdpSocket, acks: Arc<AckState>, config: TransferConfig) -> Arc<Self> {
        Arc::new(Self {
            socket,
            state: Mutex::new(BufferState {
                entries: Vec::new(),
                next_sequence: 0,
                window: config.min_window,
                total_bytes_sent: 0,
            }),
            permits: Semaphore::new(config.min_window),
            acks,
            stopped: AtomicBool::new(false),
            wakeup: Notify::new(),
            config,
        })
    }

    /// Admits one packet: waits for an inflight permit, assigns the next
    /// sequence number, serializes once and appends the entry. Returns the
    /// assigned sequence number.
    pub async fn enqueue(&self, flags: u8, payload: Bytes) -> Result<u32> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TransportError::Closed)?;
        // The permit travels with the entry; note_cumulative_ack returns it.
        permit.forget();

        let mut state = self.state.lock().await;
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let frame = DataPacket { sequence, flags, payload }.encode();
        state.entries.push(Entry { sequence, frame, send_count: 0, flags });
        drop(state);

        self.wakeup.notify_one();
        Ok(sequence)
    }

    /// Drops every entry with sequence number ≤ `ack` and returns their
    /// permits. Applying the same cumulative value twice is a no-op.
    pub async fn note_cumulative_ack(&self, ack: u32) {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|entry| entry.sequence > ack);
        let removed = before - state.entries.len();
        drop(state);

        if removed > 0 {
            self.permits.add_permits(removed);
        }
    }

    /// Re-elevates `sequence` and `sequence + 1` to the fresh bucket so the
    /// next selection transmits them first (duplicate-ACK fast retransmit).
    pub async fn force_resend(&self, sequence: u32) {
        let mut state = self.state.lock().await;
        for entry in state
            .entries
            .iter_mut()
            .filter(|e| e.sequence == sequence || e.sequence == sequence.wrapping_add(1))
        {
            entry.send_count = 0;
        }
    }

    /// Signals the send loop to exit.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.wakeup.notify_one();
    }

    pub async fn total_bytes_sent(&self) -> u64 {
        self.state.lock().await.total_bytes_sent
    }

    /// Spawns the send loop.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let buffer = Arc::clone(self);
        tokio::spawn(buffer.run())
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::Acquire) {
                break;
            }

            let Some(selected) = self.select_next().await else {
                tokio::select! {
                    _ = self.wakeup.notified() => {}
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                }
                continue;
            };

            if selected.send_count > 0 {
                // Every buffered packet is already on the wire. Give its ACK
                // one timeout interval to land; only a miss costs a
                // retransmission.
                if self
                    .acks
                    .wait_for(selected.sequence, self.config.ack_wait)
                    .await
                {
                    self.grow_window().await;
                    continue;
                }
            }

            self.transmit(&selected).await;
        }
    }

    /// Selection policy: smallest `send_count`, then smallest sequence
    /// number. Entries are stored in sequence order, so the first minimum is
    /// also the earliest inserted.
    async fn select_next(&self) -> Option<Selected> {
        let state = self.state.lock().await;
        state
            .entries
            .iter()
            .min_by_key(|entry| (entry.send_count, entry.sequence))
            .map(|entry| Selected {
                sequence: entry.sequence,
                frame: entry.frame.clone(),
                send_count: entry.send_count,
                flags: entry.flags,
            })
    }

    /// Additive window growth, capped at the configured maximum. Never
    /// contracts.
    async fn grow_window(&self) {
        let mut state = self.state.lock().await;
        let grow = self
            .config
            .window_step
            .min(self.config.max_window.saturating_sub(state.window));
        if grow > 0 {
            state.window += grow;
            drop(state);
            self.permits.add_permits(grow);
        }
    }

    async fn transmit(&self, selected: &Selected) {
        match self.socket.send(&selected.frame).await {
            Ok(sent) => {
                info!(
                    "[send data] {} ({})",
                    offset_label(selected.sequence, selected.flags, self.config.segment_size),
                    selected.frame.len() - HEADER_LEN
                );
                let mut state = self.state.lock().await;
                state.total_bytes_sent += sent as u64;
                // The entry may have been acknowledged while we were sending.
                if let Some(entry) = state
                    .entries
                    .iter_mut()
                    .find(|e| e.sequence == selected.sequence)
                {
                    entry.send_count = 1;
                }
            }
            Err(e) => debug!("data send failed, will retry: {e}"),
        }
    }
}

#[cfg(test)]
impl SendBuffer {
    pub(crate) async fn entry_sequences(&self) -> Vec<u32> {
        self.state.lock().await.entries.iter().map(|e| e.sequence).collect()
    }

    pub(crate) async fn send_counts(&self) -> Vec<(u32, u8)> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .map(|e| (e.sequence, e.send_count))
            .collect()
    }

    pub(crate) async fn mark_all_sent(&self) {
        for entry in self.state.lock().await.entries.iter_mut() {
            entry.send_count = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::{FLAG_FIRST, FLAG_LAST};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn test_buffer(config: TransferConfig) -> (Arc<SendBuffer>, UdpSocket) {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(peer.local_addr().unwrap()).await.unwrap();
        let acks = Arc::new(AckState::new());
        (SendBuffer::new(socket, acks, config), peer)
    }

    fn wide_config(window: usize) -> TransferConfig {
        TransferConfig {
            min_window: window,
            ..TransferConfig::default()
        }
    }

    #[tokio::test]
    async fn sequence_numbers_are_consecutive() {
        let (buffer, _peer) = test_buffer(wide_config(8)).await;
        assert_eq!(buffer.enqueue(FLAG_FIRST, Bytes::from_static(&[0; 4])).await.unwrap(), 0);
        assert_eq!(buffer.enqueue(0, Bytes::from_static(b"a")).await.unwrap(), 1);
        assert_eq!(buffer.enqueue(FLAG_LAST, Bytes::new()).await.unwrap(), 2);
        assert_eq!(buffer.entry_sequences().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn enqueue_blocks_when_window_is_full() {
        let (buffer, _peer) = test_buffer(TransferConfig::default()).await; // window 2
        buffer.enqueue(0, Bytes::from_static(b"a")).await.unwrap();
        buffer.enqueue(0, Bytes::from_static(b"b")).await.unwrap();

        let blocked = timeout(Duration::from_millis(50), buffer.enqueue(0, Bytes::new())).await;
        assert!(blocked.is_err(), "third enqueue must block on permits");

        buffer.note_cumulative_ack(0).await;
        let seq = timeout(Duration::from_millis(50), buffer.enqueue(0, Bytes::new()))
            .await
            .expect("permit released by the ACK")
            .unwrap();
        assert_eq!(seq, 2);
    }

    #[tokio::test]
    async fn cumulative_ack_removes_prefix_and_is_idempotent() {
        let (buffer, _peer) = test_buffer(wide_config(4)).await;
        for _ in 0..4 {
            buffer.enqueue(0, Bytes::from_static(b"x")).await.unwrap();
        }
        assert_eq!(buffer.permits.available_permits(), 0);

        buffer.note_cumulative_ack(1).await;
        assert_eq!(buffer.entry_sequences().await, vec![2, 3]);
        assert_eq!(buffer.permits.available_permits(), 2);

        // Same value again: nothing removed, no extra permits.
        buffer.note_cumulative_ack(1).await;
        assert_eq!(buffer.entry_sequences().await, vec![2, 3]);
        assert_eq!(buffer.permits.available_permits(), 2);
    }

    #[tokio::test]
    async fn selection_prefers_fresh_then_smallest_sequence() {
        let (buffer, _peer) = test_buffer(wide_config(4)).await;
        for _ in 0..4 {
            buffer.enqueue(0, Bytes::from_static(b"x")).await.unwrap();
        }
        buffer.mark_all_sent().await;
        buffer.force_resend(1).await; // seqs 1 and 2 fresh again

        let selected = buffer.select_next().await.unwrap();
        assert_eq!(selected.sequence, 1);
        assert_eq!(selected.send_count, 0);
    }

    #[tokio::test]
    async fn duplicate_ack_resend_order() {
        // ACK 5 arrived twice while 6 and 7 are still buffered: 6 must be
        // transmitted before any other in-flight entry.
        let (buffer, _peer) = test_buffer(wide_config(8)).await;
        for _ in 0..8 {
            buffer.enqueue(0, Bytes::from_static(b"x")).await.unwrap();
        }
        buffer.mark_all_sent().await;
        buffer.note_cumulative_ack(5).await;
        buffer.force_resend(6).await;

        assert_eq!(buffer.send_counts().await, vec![(6, 0), (7, 0)]);
        let first = buffer.select_next().await.unwrap();
        assert_eq!(first.sequence, 6);
    }

    #[tokio::test]
    async fn all_sent_entries_fall_back_to_smallest_sequence() {
        let (buffer, _peer) = test_buffer(wide_config(3)).await;
        for _ in 0..3 {
            buffer.enqueue(0, Bytes::from_static(b"x")).await.unwrap();
        }
        buffer.mark_all_sent().await;

        let selected = buffer.select_next().await.unwrap();
        assert_eq!(selected.sequence, 0);
        assert_eq!(selected.send_count, 1);
    }

    #[tokio::test]
    async fn send_loop_transmits_and_retransmits_unacked() {
        let (buffer, peer) = test_buffer(TransferConfig::default()).await;
        let task = buffer.spawn();

        buffer.enqueue(0, Bytes::from_static(b"hello")).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = timeout(Duration::from_secs(1), peer.recv_from(&mut buf))
            .await
            .expect("first transmission")
            .unwrap();
        let first = DataPacket::decode(&buf[..len]).unwrap();
        assert_eq!(first.payload, Bytes::from_static(b"hello"));

        // No ACK arrives, so the loop must retransmit after ack_wait.
        let (len, _) = timeout(Duration::from_secs(1), peer.recv_from(&mut buf))
            .await
            .expect("retransmission")
            .unwrap();
        let second = DataPacket::decode(&buf[..len]).unwrap();
        assert_eq!(second, first);
        assert!(buffer.total_bytes_sent().await >= 2 * (HEADER_LEN as u64 + 5));

        buffer.stop();
        let _ = timeout(Duration::from_secs(1), task).await;
    }
}
