// client: ringlog client library for sending commands and positioning requests
use ringlog_core::{Error, ErrorKind, LogicalCommand, COMMAND_TERMINATOR};
use ringlog_transport::{TcpTransport, Transport};

/// One client session per request: the server answers a single exchange and
/// then closes the connection.
pub struct RinglogClient {
    transport: Box<dyn Transport>,
    buffer: Vec<u8>,
}

impl RinglogClient {
    pub fn connect(address: &str) -> Result<Self, Error> {
        let mut transport = TcpTransport::new(address);
        transport.connect().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message(format!("cannot connect to {address}"))
                .with_source(err)
        })?;
        Ok(Self::with_transport(Box::new(transport)))
    }

    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        RinglogClient {
            transport,
            buffer: vec![0u8; 4096],
        }
    }

    /// Append `line` to the log and return the log contents sent back.
    pub fn send_command(self, line: &[u8]) -> Result<Vec<u8>, Error> {
        let mut bytes = line.to_vec();
        if bytes.last() != Some(&COMMAND_TERMINATOR) {
            bytes.push(COMMAND_TERMINATOR);
        }
        self.exchange(&bytes)
    }

    /// Read the log starting `offset` bytes into the entry numbered `seq`.
    pub fn seek(self, seq: u64, offset: u64) -> Result<Vec<u8>, Error> {
        self.exchange(&LogicalCommand::Seek { seq, offset }.to_bytes())
    }

    fn exchange(mut self, request: &[u8]) -> Result<Vec<u8>, Error> {
        self.transport.send_all(request).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("send failed")
                .with_source(err)
        })?;

        let mut reply = Vec::new();
        loop {
            match self.transport.receive(&mut self.buffer) {
                Ok(0) => break, // server closed
                Ok(n) => reply.extend_from_slice(&self.buffer[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(Error::new(ErrorKind::Io)
                        .with_message("receive failed")
                        .with_source(err))
                }
            }
        }
        let _ = self.transport.disconnect();
        Ok(reply)
    }
}
