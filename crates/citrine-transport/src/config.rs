use std::time::Duration;

/// Tuning knobs for a transfer. The defaults are the protocol constants both
/// peers are expected to run with; only tests deviate from them.
#[derive(Clone, Debug)]
pub struct TransferConfig {
    /// Payload bytes carried per data packet.
    pub segment_size: usize,
    /// Inflight window floor: the window the sender starts with.
    pub min_window: usize,
    /// Inflight window ceiling.
    pub max_window: usize,
    /// Packets added to the window per successful in-window acknowledgement.
    pub window_step: usize,
    /// How long the send loop waits for an ACK once every buffered packet
    /// has been transmitted, before falling back to retransmission.
    pub ack_wait: Duration,
    /// How long the sender waits for the terminal packet's acknowledgement
    /// before tearing down regardless.
    pub final_ack_wait: Duration,
    /// Reorder window of the receiver, in packets ahead of the next delivery.
    pub reorder_capacity: u32,
    /// Duplicate ACKs emitted after the transfer completes, compensating for
    /// loss of the final acknowledgement.
    pub trailing_acks: u32,
    /// Teardown budget for the sender's background tasks.
    pub sender_join_wait: Duration,
    /// Teardown budget for the receiver's background task.
    pub receiver_join_wait: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            segment_size: 1000,
            min_window: 2,
            max_window: 100,
            window_step: 2,
            ack_wait: Duration::from_millis(100),
            final_ack_wait: Duration::from_secs(30),
            reorder_capacity: 1000,
            trailing_acks: 10,
            sender_join_wait: Duration::from_secs(1),
            receiver_join_wait: Duration::from_secs(10),
        }
    }
}
