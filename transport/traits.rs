// Transport abstraction - lets sessions run over sockets or scripted test doubles
use std::io::{Error, ErrorKind, Result};

pub trait Transport: Send {
    fn send(&mut self, data: &[u8]) -> Result<usize>;
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;
    /// Establish the connection. Server-side connections arrive connected and
    /// keep this default.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }
    /// Shut down both directions; further I/O fails or reads EOF.
    fn disconnect(&mut self) -> Result<()>;

    /// Keep sending until every byte is accepted by the peer.
    fn send_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            match self.send(data) {
                Ok(0) => {
                    return Err(Error::new(
                        ErrorKind::WriteZero,
                        "peer stopped accepting data",
                    ))
                }
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

pub trait TransportListener: Send {
    type Connection: Transport;

    fn bind(&mut self) -> Result<()>;
    /// Returns `WouldBlock` when the listener is non-blocking and nobody is waiting.
    fn accept(&mut self) -> Result<Self::Connection>;
}
