//! The reorder buffer: ingests datagrams, tracks contiguous progress and
//! hands packets to the consumer in sequence order.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::config::TransferConfig;
use crate::error::Result;
use crate::protocol::packet::{DataPacket, offset_label};
use crate::receiver::ack::AckSender;

/// Room for the largest frame plus some slack.
const RECV_BUF_LEN: usize = 2048;

struct ReorderState {
    /// Buffered packets keyed by sequence number, delivered ones removed.
    packets: BTreeMap<u32, DataPacket>,
    /// Sequence number the consumer gets next.
    next_to_deliver: u32,
    /// Highest sequence number received contiguously from 0; −1 until the
    /// first packet lands. This is the value acknowledged to the sender.
    last_consecutive: i64,
}

/// Receives datagrams, reorders them within a bounded window ahead of the
/// consumer, and acknowledges cumulative progress once per datagram.
pub struct ReceiveBuffer {
    socket: Arc<UdpSocket>,
    state: Mutex<ReorderState>,
    /// Constructed when the transfer header announces the ACK port.
    ack: Mutex<Option<AckSender>>,
    available: Notify,
    stopped: AtomicBool,
    shutdown: Notify,
    config: TransferConfig,
}

impl ReceiveBuffer {
    pub async fn bind(addr: SocketAddr, config: TransferConfig) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            state: Mutex::new(ReorderState {
                packets: BTreeMap::new(),
                next_to_deliver: 0,
                last_consecutive: -1,
            }),
            ack: Mutex::new(None),
            available: Notify::new(),
            stopped: AtomicBool::new(false),
            shutdown: Notify::new(),
            config,
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Spawns the receive loop.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let buffer = Arc::clone(self);
        tokio::spawn(buffer.run())
    }

    async fn run(self: Arc<Self>) {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            if self.stopped.load(Ordering::Acquire) {
                break;
            }
            let (len, source) = tokio::select! {
                _ = self.shutdown.notified() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        debug!("datagram receive failed: {e}");
                        continue;
                    }
                },
            };

            let packet = match DataPacket::decode(&buf[..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("[recv corrupt packet]");
                    debug!("undecodable datagram from {source}: {e}");
                    // The current cumulative position is still worth
                    // repeating; a duplicate ACK can trigger fast retransmit.
                    self.emit_ack().await;
                    continue;
                }
            };

            if packet.is_first() {
                self.open_ack_channel(&packet, source).await;
            }

            self.update_buffer(packet).await;
            self.emit_ack().await;
        }
    }

    /// Constructs the ACK sender towards (sender IP, announced port) on the
    /// first transfer header seen; replayed headers keep the existing one.
    async fn open_ack_channel(&self, packet: &DataPacket, source: SocketAddr) {
        let Some((port, _)) = packet.init_info() else {
            return;
        };
        let mut ack = self.ack.lock().await;
        if ack.is_none() {
            let peer = SocketAddr::new(source.ip(), port);
            match AckSender::connect(peer).await {
                Ok(sender) => *ack = Some(sender),
                Err(e) => warn!("cannot open ack channel to {peer}: {e}"),
            }
        }
    }

    /// Sends one cumulative acknowledgement, if the channel exists and any
    /// packet has landed. The sender handle is cloned out so no lock is held
    /// across the socket write.
    async fn emit_ack(&self) {
        let Some(sender) = self.ack.lock().await.clone() else {
            return;
        };
        let last_consecutive = self.state.lock().await.last_consecutive;
        if last_consecutive >= 0 {
            sender.send(last_consecutive as u32).await;
        }
    }

    /// Files one decoded packet into the reorder buffer.
    ///
    /// Packets behind the consumer, beyond the window, or already buffered
    /// are ignored. An accepted packet that extends the contiguous prefix
    /// advances `last_consecutive` across everything already buffered.
    async fn update_buffer(&self, packet: DataPacket) {
        let mut state = self.state.lock().await;
        let sequence = packet.sequence;
        let label = offset_label(sequence, packet.flags, self.config.segment_size);
        let len = packet.payload.len();

        let window_end = u64::from(state.next_to_deliver) + u64::from(self.config.reorder_capacity);
        let in_window = sequence >= state.next_to_deliver && u64::from(sequence) < window_end;
        if !in_window || state.packets.contains_key(&sequence) {
            info!("[recv data] {label} ({len}) IGNORED");
            return;
        }

        let in_order = i64::from(sequence) == state.last_consecutive + 1;
        info!(
            "[recv data] {label} ({len}) ACCEPTED({})",
            if in_order { "in-order" } else { "out-of-order" }
        );
        state.packets.insert(sequence, packet);

        if sequence == state.next_to_deliver {
            self.available.notify_one();
        }
        if in_order {
            // Walk forward over everything already buffered.
            while state.packets.contains_key(&((state.last_consecutive + 1) as u32)) {
                state.last_consecutive += 1;
            }
        }
    }

    /// Removes and returns the packet with the next sequence number,
    /// suspending until it has arrived.
    pub async fn next_in_order(&self) -> DataPacket {
        loop {
            let notified = self.available.notified();
            {
                let mut state = self.state.lock().await;
                let wanted = state.next_to_deliver;
                if let Some(packet) = state.packets.remove(&wanted) {
                    state.next_to_deliver += 1;
                    return packet;
                }
            }
            notified.await;
        }
    }

    /// Emits `count` duplicate acknowledgements of the final cumulative
    /// position, compensating for loss of the last ACK.
    pub async fn send_trailing_acks(&self, count: u32) {
        for _ in 0..count {
            self.emit_ack().await;
        }
    }

    /// Signals the receive loop to exit.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
impl ReceiveBuffer {
    pub(crate) async fn last_consecutive(&self) -> i64 {
        self.state.lock().await.last_consecutive
    }

    pub(crate) async fn buffered_sequences(&self) -> Vec<u32> {
        self.state.lock().await.packets.keys().copied().collect()
    }
}
