// ConnectionWorker: drives one client session from first byte to close
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ringlog_buffer::SharedLog;
use ringlog_core::{CommandAssembler, Cursor, Error, ErrorKind, LogicalCommand};
use ringlog_transport::Transport;
use tracing::{debug, info, warn};

/// Bytes requested from the socket per receive call.
pub const RECV_CHUNK: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Receiving,
    Dispatching,
    Responding,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Commands dispatched and the log streamed back.
    Completed { commands: usize, bytes_sent: usize },
    /// Peer hung up before finishing a command; nothing was sent.
    PeerClosed,
    /// Shutdown asked the worker to stop.
    Cancelled,
}

pub struct ConnectionWorker<T: Transport> {
    id: u64,
    transport: T,
    log: SharedLog,
    assembler: CommandAssembler,
    cursor: Option<Cursor>,
    cancel: Arc<AtomicBool>,
    state: SessionState,
}

impl<T: Transport> ConnectionWorker<T> {
    pub fn new(
        id: u64,
        transport: T,
        log: SharedLog,
        max_command_bytes: usize,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        ConnectionWorker {
            id,
            transport,
            log,
            assembler: CommandAssembler::new(max_command_bytes),
            cursor: None,
            cancel,
            state: SessionState::Receiving,
        }
    }

    /// Run the session to completion. Session resources are released the same
    /// way whether it ends cleanly or fails.
    pub fn run(mut self) -> Result<Outcome, Error> {
        let result = self.drive();
        let failed_in = self.state;
        self.transition(if result.is_ok() {
            SessionState::Closed
        } else {
            SessionState::Failed
        });
        self.assembler.clear();
        if let Err(err) = self.transport.disconnect() {
            debug!(worker = self.id, error = %err, "socket already gone");
        }
        result.map_err(|err| {
            if err.message().is_some() {
                err
            } else {
                err.with_message(format!("session failed while {failed_in:?}"))
            }
        })
    }

    fn transition(&mut self, next: SessionState) {
        debug!(worker = self.id, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn drive(&mut self) -> Result<Outcome, Error> {
        self.transition(SessionState::Receiving);
        let mut line = match self.receive()? {
            Some(line) => Some(line),
            None if self.cancelled() => return Ok(Outcome::Cancelled),
            None => return Ok(Outcome::PeerClosed),
        };

        self.transition(SessionState::Dispatching);
        let mut commands = 0;
        while let Some(bytes) = line {
            if self.cancelled() {
                return Ok(Outcome::Cancelled);
            }
            self.dispatch(bytes)?;
            commands += 1;
            line = self.assembler.next_line();
        }

        if self.cancelled() {
            return Ok(Outcome::Cancelled);
        }
        self.transition(SessionState::Responding);
        let bytes_sent = self.respond()?;
        Ok(Outcome::Completed {
            commands,
            bytes_sent,
        })
    }

    /// Block on the socket until one complete line is assembled. `None` means
    /// the peer closed (or shutdown closed the socket under us).
    fn receive(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let mut buf = [0u8; RECV_CHUNK];
        loop {
            if self.cancelled() {
                return Ok(None);
            }
            let n = match self.transport.receive(&mut buf) {
                Ok(0) => {
                    if !self.assembler.pending().is_empty() {
                        debug!(
                            worker = self.id,
                            pending = self.assembler.pending().len(),
                            "peer closed mid-command"
                        );
                    }
                    return Ok(None);
                }
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) if self.cancelled() => return Ok(None),
                Err(err) => {
                    return Err(Error::new(ErrorKind::Io)
                        .with_message("receive failed")
                        .with_source(err))
                }
            };
            if let Some(line) = self.assembler.feed(&buf[..n])? {
                return Ok(Some(line));
            }
        }
    }

    fn dispatch(&mut self, line: Vec<u8>) -> Result<(), Error> {
        match LogicalCommand::parse(line) {
            Ok(LogicalCommand::Write(bytes)) => {
                let seq = self.log.append(&bytes)?;
                self.cursor = None;
                info!(worker = self.id, seq, bytes = bytes.len(), "appended command");
            }
            Ok(LogicalCommand::Seek { seq, offset }) => {
                let cursor = Cursor::Entry { seq, offset };
                match self.log.resolve(cursor) {
                    Ok(position) => {
                        info!(worker = self.id, seq, offset, slot = position.slot, "positioned cursor");
                        self.cursor = Some(cursor);
                    }
                    Err(err) if err.kind().is_addressing() => {
                        warn!(worker = self.id, error = %err, "dropping unresolvable seek request");
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(err) => {
                warn!(worker = self.id, error = %err, "dropping malformed seek request");
            }
        }
        Ok(())
    }

    fn respond(&mut self) -> Result<usize, Error> {
        let cursor = self.cursor.take().unwrap_or(Cursor::START);
        let snapshot = self.log.read_from(cursor)?;
        self.transport.send_all(&snapshot).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("send failed")
                .with_source(err)
        })?;
        debug!(worker = self.id, bytes = snapshot.len(), "sent log contents");
        Ok(snapshot.len())
    }
}
