//! UDP socket layer decoding datagrams off the wire.

use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::thread;
use std::time::Duration;

use flume::Sender;
use tracing::{debug, trace};

use crate::messages::Message;
use crate::rpc::config::Config;
use crate::Result;

pub(crate) const VERSION: [u8; 4] = [87, 82, 0, 1]; // "WR" version 01
const MTU: usize = 2048;
const UDP_SOCKET_BUFFER_SIZE: i32 = 2 * 1024 * 1024; // 2MB

pub const DEFAULT_PORT: u16 = 6881;
/// Default request timeout before abandoning an inflight request to a
/// non-responding node.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);

/// How many decoded datagrams may sit between the reader and the correlator.
///
/// The reader blocks once the channel is full, so a flood backs up into the
/// OS socket buffer instead of into memory.
pub const UDP_MAILBOX_SIZE: usize = 16;

/// How often a blocked reader rechecks whether the correlator went away.
const READER_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A UdpSocket wrapper speaking bencoded KRPC messages.
#[derive(Debug)]
pub(crate) struct KrpcSocket {
    socket: UdpSocket,
    local_addr: SocketAddrV4,
}

impl KrpcSocket {
    pub fn bind(config: &Config) -> Result<Self> {
        let socket = if let Some(port) = config.port {
            UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port)))?
        } else {
            match UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))) {
                Ok(socket) => Ok(socket),
                Err(_) => UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))),
            }?
        };

        // The default OS buffers (~128KB) drop packets under DHT load.
        set_socket_buffers(&socket, UDP_SOCKET_BUFFER_SIZE)?;

        let local_addr = match socket.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unimplemented!("KrpcSocket does not support Ipv6"),
        };

        Ok(Self { socket, local_addr })
    }

    // === Getters ===

    /// Returns the address the socket is bound to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    // === Public Methods ===

    /// An independently usable handle to the same socket, for response
    /// sub-tasks.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            socket: self.socket.try_clone()?,
            local_addr: self.local_addr,
        })
    }

    /// Encode and send one message.
    pub fn send(&self, address: SocketAddrV4, message: &Message) -> Result<()> {
        self.socket.send_to(&message.to_bytes()?, address)?;
        trace!(context = "socket_message_sending", ?message, ?address);

        Ok(())
    }

    /// Spawn the reader thread feeding decoded datagrams into `inbound`.
    ///
    /// Garbage that does not decode is dropped here and never reaches the
    /// correlator. The reader stops once the receiving side is gone.
    pub fn spawn_reader(&self, inbound: Sender<(Message, SocketAddrV4)>) -> Result<()> {
        let socket = self.socket.try_clone()?;
        socket.set_read_timeout(Some(READER_POLL_INTERVAL))?;

        thread::Builder::new()
            .name("krpc-reader".into())
            .spawn(move || reader_loop(socket, inbound))?;

        Ok(())
    }
}

fn reader_loop(socket: UdpSocket, inbound: Sender<(Message, SocketAddrV4)>) {
    let mut buf = [0_u8; MTU];

    loop {
        match socket.recv_from(&mut buf) {
            Ok((amount, SocketAddr::V4(from))) => {
                if from.port() == 0 {
                    trace!(context = "socket_validation", message = "Datagram from port 0");
                    continue;
                }

                let bytes = &buf[..amount];
                match Message::from_bytes(bytes) {
                    Ok(message) => {
                        trace!(context = "socket_message_receiving", ?message, ?from);
                        if inbound.send((message, from)).is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        trace!(
                            context = "socket_error",
                            ?error,
                            ?from,
                            message = ?String::from_utf8_lossy(bytes),
                            "Received invalid bencode message."
                        );
                    }
                }
            }
            Ok((_, SocketAddr::V6(_))) => {
                trace!(context = "socket_validation", message = "Received IPv6 packet");
            }
            Err(ref error)
                if error.kind() == std::io::ErrorKind::WouldBlock
                    || error.kind() == std::io::ErrorKind::TimedOut =>
            {
                if inbound.is_disconnected() {
                    return;
                }
            }
            Err(error) => {
                debug!(context = "socket_error", ?error, "recv_from failed unexpectedly");
            }
        }
    }
}

#[cfg(unix)]
fn set_socket_buffers(socket: &UdpSocket, size: i32) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    fn set(fd: i32, option: i32, size: i32) -> std::io::Result<()> {
        let result = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                option,
                &size as *const _ as *const _,
                std::mem::size_of_val(&size) as u32,
            )
        };

        if result != 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(())
    }

    let fd = socket.as_raw_fd();
    set(fd, libc::SO_RCVBUF, size)?;
    set(fd, libc::SO_SNDBUF, size)
}

#[cfg(not(unix))]
fn set_socket_buffers(_socket: &UdpSocket, _size: i32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::common::Id;
    use crate::messages::{MessageType, RequestSpecific, RequestTypeSpecific};

    use super::*;

    fn bound() -> KrpcSocket {
        KrpcSocket::bind(&Config {
            port: Some(0),
            ..Default::default()
        })
        .unwrap()
    }

    fn ping(transaction_id: u16) -> Message {
        Message {
            transaction_id,
            version: Some(VERSION),
            message_type: MessageType::Request(RequestSpecific {
                requester_id: Id::random(),
                request_type: RequestTypeSpecific::Ping,
            }),
        }
    }

    #[test]
    fn reader_delivers_decoded_messages() {
        let server = bound();
        let client = bound();

        let (tx, rx) = flume::bounded(UDP_MAILBOX_SIZE);
        server.spawn_reader(tx).unwrap();

        let message = ping(120);
        client.send(server.local_addr(), &message).unwrap();

        let (received, from) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received, message);
        assert_eq!(from.port(), client.local_addr().port());
    }

    #[test]
    fn reader_drops_garbage() {
        let server = bound();
        let client = UdpSocket::bind("0.0.0.0:0").unwrap();

        let (tx, rx) = flume::bounded(UDP_MAILBOX_SIZE);
        server.spawn_reader(tx).unwrap();

        client
            .send_to(b"definitely not bencode", server.local_addr())
            .unwrap();

        let socket = bound();
        socket.send(server.local_addr(), &ping(7)).unwrap();

        // Only the valid message comes through.
        let (received, _) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received.transaction_id, 7);
        assert!(rx.try_recv().is_err());
    }
}
