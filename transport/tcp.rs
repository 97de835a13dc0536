// TCP transport implementation: client stream, server listener and accepted connections
use crate::traits::{Transport, TransportListener};
use std::io::{Error, ErrorKind, Read, Result, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, OwnedFd};

use nix::sys::socket::{
    bind, listen, setsockopt, socket, sockopt, AddressFamily, Backlog, SockFlag, SockType,
    SockaddrStorage,
};

pub struct TcpTransport {
    address: String,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(address: &str) -> Self {
        TcpTransport {
            address: address.to_string(),
            stream: None,
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(not_connected)
    }
}

fn not_connected() -> Error {
    Error::new(ErrorKind::NotConnected, "Not connected")
}

impl Transport for TcpTransport {
    fn send(&mut self, data: &[u8]) -> Result<usize> {
        self.stream()?.write(data)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream()?.read(buf)
    }

    fn connect(&mut self) -> Result<()> {
        self.stream = Some(TcpStream::connect(&self.address)?);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        Ok(())
    }
}

/// Listening socket created with an explicit backlog and SO_REUSEADDR.
pub struct TcpServer {
    address: SocketAddr,
    backlog: i32,
    listener: Option<TcpListener>,
}

impl TcpServer {
    pub fn new(address: SocketAddr, backlog: i32) -> Self {
        TcpServer {
            address,
            backlog,
            listener: None,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match self.listener {
            Some(ref listener) => listener.local_addr(),
            None => Err(not_connected()),
        }
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        match self.listener {
            Some(ref listener) => listener.set_nonblocking(nonblocking),
            None => Err(not_connected()),
        }
    }
}

fn listen_socket(address: SocketAddr, backlog: i32) -> nix::Result<OwnedFd> {
    let family = if address.is_ipv4() {
        AddressFamily::Inet
    } else {
        AddressFamily::Inet6
    };
    let fd = socket(family, SockType::Stream, SockFlag::SOCK_CLOEXEC, None)?;
    setsockopt(&fd, sockopt::ReuseAddr, &true)?;
    bind(fd.as_raw_fd(), &SockaddrStorage::from(address))?;
    listen(&fd, Backlog::new(backlog)?)?;
    Ok(fd)
}

impl TransportListener for TcpServer {
    type Connection = TcpConnection;

    fn bind(&mut self) -> Result<()> {
        let fd = listen_socket(self.address, self.backlog).map_err(Error::from)?;
        self.listener = Some(TcpListener::from(fd));
        Ok(())
    }

    fn accept(&mut self) -> Result<TcpConnection> {
        let listener = self.listener.as_ref().ok_or_else(not_connected)?;
        let (stream, peer) = listener.accept()?;
        // accepted sockets must block even when the listener polls
        stream.set_nonblocking(false)?;
        Ok(TcpConnection { stream, peer })
    }
}

/// Server side of one accepted client.
pub struct TcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpConnection {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Second handle on the same socket, used to force it closed from another thread.
    pub fn closer(&self) -> Result<ConnectionCloser> {
        Ok(ConnectionCloser {
            stream: self.stream.try_clone()?,
        })
    }
}

impl Transport for TcpConnection {
    fn send(&mut self, data: &[u8]) -> Result<usize> {
        self.stream.write(data)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf)
    }

    fn disconnect(&mut self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

pub struct ConnectionCloser {
    stream: TcpStream,
}

impl ConnectionCloser {
    /// Unblocks any pending read or write on the connection.
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
