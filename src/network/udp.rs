//! UDP socket setup for the control and video channels

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::LinkError;

/// Bind a UDP socket with an OS-level receive timeout.
///
/// The port is bound exclusively (no `SO_REUSEADDR`), so a second session on
/// the same ports fails here instead of silently sharing traffic.
pub fn create_socket(bind_addr: SocketAddr, read_timeout: Duration) -> Result<UdpSocket, LinkError> {
    let socket = Socket::new(Domain::for_address(bind_addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| LinkError::BindFailed(format!("{}: {}", bind_addr, e)))?;

    socket
        .set_reuse_address(false)
        .map_err(|e| LinkError::BindFailed(e.to_string()))?;
    socket
        .bind(&bind_addr.into())
        .map_err(|e| LinkError::BindFailed(format!("{}: {}", bind_addr, e)))?;
    socket
        .set_read_timeout(Some(read_timeout))
        .map_err(|e| LinkError::BindFailed(e.to_string()))?;

    Ok(socket.into())
}

/// Receive timeouts (`WouldBlock` on unix, `TimedOut` on windows) and EINTR are retried
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
