//! Receiver side: the driver that pulls in-order packets from the reorder
//! buffer and writes them to the sink named by the transfer header.

pub mod ack;
pub mod buffer;

pub use ack::AckSender;
pub use buffer::ReceiveBuffer;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::config::TransferConfig;
use crate::error::{Result, TransportError};
use crate::util::join_with_timeout;

/// A bound receiver, ready to accept one transfer.
pub struct Receiver {
    buffer: Arc<ReceiveBuffer>,
    config: TransferConfig,
}

impl Receiver {
    pub async fn bind(addr: std::net::SocketAddr, config: TransferConfig) -> Result<Self> {
        let buffer = ReceiveBuffer::bind(addr, config.clone()).await?;
        Ok(Self { buffer, config })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.buffer.local_addr()
    }

    /// Runs one transfer to completion and returns the path written.
    ///
    /// The first in-order packet must be the transfer header; it names the
    /// sink. Data payloads are appended until the terminal packet arrives,
    /// then the receive loop is stopped and the trailing ACK burst emitted.
    pub async fn run(self, output_dir: &Path) -> Result<PathBuf> {
        let pump = self.buffer.spawn();

        let header = self.buffer.next_in_order().await;
        let (_, name) = header.init_info().ok_or_else(|| {
            TransportError::Protocol("transfer did not begin with a header packet".to_string())
        })?;

        let path = sink_path(output_dir, &name)?;
        let mut sink = BufWriter::new(File::create(&path).await?);

        loop {
            let packet = self.buffer.next_in_order().await;
            if packet.is_last() {
                break;
            }
            if packet.is_first() {
                continue; // replayed transfer header
            }
            sink.write_all(&packet.payload).await?;
        }
        sink.flush().await?;

        self.buffer.stop();
        self.buffer
            .send_trailing_acks(self.config.trailing_acks)
            .await;
        join_with_timeout("receive loop", pump, self.config.receiver_join_wait).await;
        info!("[completed]");

        Ok(path)
    }
}

/// `<announced name>.xml` under `output_dir`, reduced to its final path
/// component: the wire name is peer-controlled input.
fn sink_path(output_dir: &Path, name: &str) -> Result<PathBuf> {
    let stored = format!("{name}.xml");
    let file_name = Path::new(&stored)
        .file_name()
        .ok_or_else(|| TransportError::Protocol(format!("unusable file name '{name}'")))?;
    Ok(output_dir.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_path_appends_xml() {
        let path = sink_path(Path::new("out"), "report.bin.recv").unwrap();
        assert_eq!(path, Path::new("out").join("report.bin.recv.xml"));
    }

    #[test]
    fn sink_path_strips_directories_from_wire_name() {
        let path = sink_path(Path::new("out"), "../../etc/evil.recv").unwrap();
        assert_eq!(path, Path::new("out").join("evil.recv.xml"));
    }
}
