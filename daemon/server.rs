// Server: owns the listener, the shared log and every connection worker
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use ringlog_buffer::SharedLog;
use ringlog_core::{Error, ErrorKind};
use ringlog_transport::{TcpServer, TransportListener};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::registry::ConnectionRegistry;
use crate::ticker::TimestampTask;

/// How long the accept loop sleeps when nobody is waiting to connect.
const ACCEPT_POLL: Duration = Duration::from_millis(100);
/// Pause after accept fails for lack of descriptors or memory.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
    pub accepted: u64,
    pub workers_joined: usize,
    pub entries_released: usize,
    pub bytes_released: usize,
    pub timestamps_written: usize,
}

pub struct Server {
    config: ServerConfig,
    listener: TcpServer,
    log: SharedLog,
    shutdown: Arc<AtomicBool>,
}

fn init_error(message: impl Into<String>, err: io::Error) -> Error {
    Error::new(ErrorKind::Init).with_message(message).with_source(err)
}

impl Server {
    /// Open the storage backing and bind the listening socket.
    pub fn bind(config: ServerConfig) -> Result<Self, Error> {
        let backing = config.open_backing().map_err(|err| {
            Error::new(ErrorKind::Init)
                .with_message("cannot open storage backing")
                .with_source(err)
        })?;
        let log = SharedLog::new(config.capacity, backing);

        let mut listener = TcpServer::new(config.listen, config.backlog);
        listener
            .bind()
            .map_err(|err| init_error(format!("cannot listen on {}", config.listen), err))?;
        listener
            .set_nonblocking(true)
            .map_err(|err| init_error("cannot make listener non-blocking", err))?;

        Ok(Server {
            config,
            listener,
            log,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.listener.local_addr().map_err(Error::from)
    }

    /// Flag that stops the accept loop once set; signal handlers write it.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn log(&self) -> &SharedLog {
        &self.log
    }

    /// Serve until the shutdown flag is raised, then tear everything down.
    pub fn run(mut self) -> Result<ShutdownSummary, Error> {
        let backing = self.log.describe_backing()?;
        info!(
            addr = %self.local_addr()?,
            capacity = self.config.capacity.get(),
            backing = %backing,
            "serving"
        );

        let ticker = if self.log.is_control_capable() {
            None
        } else {
            Some(TimestampTask::start(
                self.log.clone(),
                self.config.timestamp_interval,
            )?)
        };

        let mut registry = ConnectionRegistry::new();
        let mut summary = ShutdownSummary::default();
        self.accept_loop(&mut registry, &mut summary);

        if let Some(ticker) = ticker {
            summary.timestamps_written = ticker.stop();
        }
        let report = registry.shutdown_all();
        summary.workers_joined = report.joined;
        let released = self.log.close()?;
        summary.entries_released = released.entries;
        summary.bytes_released = released.bytes;
        info!(
            accepted = summary.accepted,
            workers = summary.workers_joined,
            entries = summary.entries_released,
            bytes = summary.bytes_released,
            "caught signal, exiting"
        );

        Ok(summary)
    }

    /// Accept failures only cost the pending connection; the loop keeps going.
    fn accept_loop(&mut self, registry: &mut ConnectionRegistry, summary: &mut ShutdownSummary) {
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok(conn) => {
                    summary.accepted += 1;
                    if let Err(err) =
                        registry.spawn(conn, self.log.clone(), self.config.max_command_bytes)
                    {
                        warn!(error = %err, "dropping connection");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::ConnectionAborted => {
                    debug!(error = %err, "client went away before accept");
                }
                Err(err) => {
                    warn!(error = %err, live = registry.len(), "accept failed");
                    if exhausts_descriptors(&err) {
                        thread::sleep(ACCEPT_BACKOFF);
                    }
                }
            }
            let reaped = registry.reap();
            if reaped > 0 {
                debug!(reaped, live = registry.len(), "reaped workers");
            }
        }
    }
}

/// Errors that clear up once workers exit and release their sockets.
fn exhausts_descriptors(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error().map(Errno::from_raw),
        Some(Errno::EMFILE | Errno::ENFILE | Errno::ENOBUFS | Errno::ENOMEM)
    )
}
