//! One reader thread per configured port: binds a UDP socket, pulls one
//! packet-sized buffer from the pool per datagram, and hands it to the
//! writer via the ready queue.
//!
//! Grounded on `Bind`/`ReadCISCOFlow`/`ReadThread` in the reference daemon.
//! The reader does no parsing; that stays the writer's job so a slow or
//! malformed packet never stalls the hot socket-draining path.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use log::{error, info};

use crate::netflow5::MAX_DATAGRAM_SIZE;
use crate::pool::BufferPool;

pub struct PortConfig {
    pub port: u16,
    pub drop_detection: bool,
}

/// Binds a UDP socket to `0.0.0.0:port` and tunes `SO_RCVBUF` to the
/// largest power-of-two value the kernel accepts, from 2 MiB down to 2 KiB.
fn bind(port: u16) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port)))?;

    let mut n: libc::c_int = 1 << 21;
    loop {
        let rc = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                &n as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };

        if rc == 0 {
            info!("set SO_RCVBUF on port {} to {} bytes.", port, n);
            break;
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOBUFS) && n > 1 << 11 {
            n /= 2;
        } else {
            return Err(err);
        }
    }

    Ok(socket)
}

/// Runs the reader loop for one port. Never returns under normal operation;
/// exits the process on any unrecoverable socket error.
pub fn run(port_config: PortConfig, pool: Arc<BufferPool>) {
    let port = port_config.port;

    info!(
        "starting read thread for port {}{}.",
        port,
        if port_config.drop_detection {
            ""
        } else {
            " (skipping dropped flows checks)"
        }
    );

    let socket = match bind(port) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to bind UDP socket on port {}: {}", port, e);
            std::process::exit(1);
        }
    };

    loop {
        let mut buffer = pool.acquire_free(true);
        debug_assert!(buffer.data.len() >= MAX_DATAGRAM_SIZE);

        let (len, from) = loop {
            match socket.recv_from(&mut buffer.data) {
                Ok(result) => break result,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("recvmsg() failed on port {}: {}", port, e);
                    std::process::exit(1);
                }
            }
        };

        buffer.len = len;
        buffer.router = match from.ip() {
            IpAddr::V4(addr) => addr,
            IpAddr::V6(addr) => addr.to_ipv4().unwrap_or(std::net::Ipv4Addr::UNSPECIFIED),
        };
        buffer.drop_detection = port_config.drop_detection;

        pool.submit(buffer);
    }
}
