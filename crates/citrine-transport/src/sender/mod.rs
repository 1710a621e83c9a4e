//! Sender side: the driver that streams a byte source through the send
//! buffer and tears the transfer down once the terminal packet is
//! acknowledged.

pub mod ack;
pub mod buffer;

pub use ack::{AckListener, AckState};
pub use buffer::SendBuffer;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use citrine_binary::BinaryWriter;
use log::{info, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;

use crate::config::TransferConfig;
use crate::error::{Result, TransportError};
use crate::protocol::packet::{FLAG_FIRST, FLAG_LAST};
use crate::stats::TransferStats;
use crate::util::{join_with_timeout, unspecified_for};

/// Suffix appended to the announced file name. The receiver adds `.xml` on
/// top, yielding `<name>.recv.xml` on disk. Existing peers expect this exact
/// naming.
const RECV_SUFFIX: &str = ".recv";

/// Resolves the `<host>:<port>` endpoint given on the command line to the
/// first address it maps to.
pub async fn resolve_receiver(endpoint: &str) -> Result<std::net::SocketAddr> {
    let mut addrs = tokio::net::lookup_host(endpoint)
        .await
        .map_err(|e| TransportError::Resolve(format!("{endpoint}: {e}")))?;
    addrs
        .next()
        .ok_or_else(|| TransportError::Resolve(format!("no address found for '{endpoint}'")))
}

/// Transfers a regular file to the receiver at `receiver`.
pub async fn send_file(
    path: &Path,
    receiver: std::net::SocketAddr,
    config: &TransferConfig,
) -> Result<TransferStats> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(TransportError::NotAFile(path.to_path_buf()));
    }
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransportError::InvalidFileName(path.to_path_buf()))?;

    let source = tokio::fs::File::open(path).await?;
    send_stream(source, name, receiver, config).await
}

/// Transfers an arbitrary byte source, announced under `name`.
pub async fn send_stream<R>(
    mut source: R,
    name: &str,
    receiver: std::net::SocketAddr,
    config: &TransferConfig,
) -> Result<TransferStats>
where
    R: AsyncRead + Unpin,
{
    let started = Instant::now();

    let socket = UdpSocket::bind(unspecified_for(receiver)).await?;
    socket.connect(receiver).await?;

    let listener = AckListener::bind(receiver).await?;
    let acks = listener.state();
    let buffer = SendBuffer::new(socket, Arc::clone(&acks), config.clone());
    let send_task = buffer.spawn();
    let ack_task = listener.spawn(Arc::clone(&buffer));

    // The transfer header announces where ACKs should go and what name the
    // receiver stores the file under.
    let mut header = BytesMut::with_capacity(4 + name.len() + RECV_SUFFIX.len());
    header.write_u32_be(u32::from(listener.port()));
    header.write_bytes(name.as_bytes());
    header.write_bytes(RECV_SUFFIX.as_bytes());
    buffer.enqueue(FLAG_FIRST, header.freeze()).await?;

    let mut file_size: u64 = 0;
    let mut segment = vec![0u8; config.segment_size];
    loop {
        let filled = read_segment(&mut source, &mut segment).await?;
        if filled == 0 {
            break;
        }
        file_size += filled as u64;
        buffer
            .enqueue(0, Bytes::copy_from_slice(&segment[..filled]))
            .await?;
        if filled < segment.len() {
            break; // short fill means the source hit EOF
        }
    }

    let last = buffer.enqueue(FLAG_LAST, Bytes::new()).await?;
    if !acks.wait_for(last, config.final_ack_wait).await {
        warn!(
            "final packet unacknowledged after {:?}, tearing down anyway",
            config.final_ack_wait
        );
    }

    listener.stop();
    buffer.stop();
    join_with_timeout("ack listener", ack_task, config.sender_join_wait).await;
    join_with_timeout("send loop", send_task, config.sender_join_wait).await;
    info!("[completed]");

    Ok(TransferStats {
        elapsed: started.elapsed(),
        file_size,
        total_bytes_sent: buffer.total_bytes_sent().await,
    })
}

/// Fills `segment` from the source, looping over short reads; a return
/// below the segment length means EOF.
async fn read_segment<R>(source: &mut R, segment: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < segment.len() {
        let read = source.read(&mut segment[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}
