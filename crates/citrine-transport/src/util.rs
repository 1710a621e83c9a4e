use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use log::warn;
use tokio::task::JoinHandle;

/// Waits up to `budget` for a background task to finish, aborting it when the
/// budget runs out. Join overruns are logged but never fatal.
pub(crate) async fn join_with_timeout(name: &str, mut task: JoinHandle<()>, budget: Duration) {
    match tokio::time::timeout(budget, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("{name} task failed: {e}"),
        Err(_) => {
            warn!("{name} did not stop within {budget:?}, aborting");
            task.abort();
        }
    }
}

/// Unspecified local address of the same family as `peer`, for binding an
/// OS-assigned port that can reach it.
pub(crate) fn unspecified_for(peer: SocketAddr) -> SocketAddr {
    match peer {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    }
}
