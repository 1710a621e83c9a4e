use std::time::Duration;

/// Link-level accounting for one completed transfer.
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// Wall-clock duration of the whole transfer.
    pub elapsed: Duration,
    /// Payload bytes read from the source.
    pub file_size: u64,
    /// Framed bytes handed to the socket, retransmissions included.
    pub total_bytes_sent: u64,
}

impl TransferStats {
    /// Useful payload per byte put on the wire, as a percentage.
    pub fn efficiency(&self) -> f64 {
        if self.total_bytes_sent == 0 {
            return 0.0;
        }
        self.file_size as f64 / self.total_bytes_sent as f64 * 100.0
    }
}
