// Connection registry: tracks live workers so they can be reaped or torn down
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ringlog_buffer::SharedLog;
use ringlog_core::{Error, ErrorKind};
use ringlog_transport::{ConnectionCloser, TcpConnection};
use tracing::{debug, info, warn};

use crate::worker::{ConnectionWorker, Outcome};

struct WorkerHandle {
    peer: SocketAddr,
    cancel: Arc<AtomicBool>,
    closer: ConnectionCloser,
    thread: JoinHandle<Result<Outcome, Error>>,
}

/// Owned by the accept loop only; workers never touch it.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: u64,
    workers: HashMap<u64, WorkerHandle>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub joined: usize,
    pub failed: usize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Start a worker thread for an accepted connection.
    pub fn spawn(
        &mut self,
        conn: TcpConnection,
        log: SharedLog,
        max_command_bytes: usize,
    ) -> Result<u64, Error> {
        self.next_id += 1;
        let id = self.next_id;
        let peer = conn.peer();
        let closer = conn.closer().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message(format!("cannot clone socket for {peer}"))
                .with_source(err)
        })?;
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = ConnectionWorker::new(id, conn, log, max_command_bytes, cancel.clone());
        let thread = thread::Builder::new()
            .name(format!("conn-{id}"))
            .spawn(move || worker.run())
            .map_err(|err| {
                Error::new(ErrorKind::ResourceExhausted)
                    .with_message(format!("cannot spawn worker for {peer}"))
                    .with_source(err)
            })?;

        info!(worker = id, %peer, "accepted connection");
        self.workers.insert(
            id,
            WorkerHandle {
                peer,
                cancel,
                closer,
                thread,
            },
        );
        Ok(id)
    }

    /// Join every worker that already finished. Never blocks on a running one.
    pub fn reap(&mut self) -> usize {
        let finished: Vec<u64> = self
            .workers
            .iter()
            .filter(|(_, handle)| handle.thread.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in &finished {
            if let Some(handle) = self.workers.remove(id) {
                join_worker(*id, handle);
            }
        }
        finished.len()
    }

    /// Cancel, unblock and join every live worker.
    pub fn shutdown_all(&mut self) -> TeardownReport {
        for handle in self.workers.values() {
            handle.cancel.store(true, Ordering::Relaxed);
            handle.closer.close();
        }
        let mut report = TeardownReport::default();
        for (id, handle) in self.workers.drain() {
            if join_worker(id, handle) {
                report.joined += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }
}

fn join_worker(id: u64, handle: WorkerHandle) -> bool {
    let peer = handle.peer;
    match handle.thread.join() {
        Ok(Ok(outcome)) => {
            match outcome {
                Outcome::Completed {
                    commands,
                    bytes_sent,
                } => info!(worker = id, %peer, commands, bytes_sent, "closed connection"),
                Outcome::PeerClosed => info!(worker = id, %peer, "peer closed connection"),
                Outcome::Cancelled => debug!(worker = id, %peer, "worker cancelled"),
            }
            true
        }
        Ok(Err(err)) => {
            warn!(worker = id, %peer, error = %err, "session failed");
            true
        }
        Err(_) => {
            warn!(worker = id, %peer, "worker thread panicked");
            false
        }
    }
}
