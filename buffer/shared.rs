// SharedLog: the one exclusion guard around the CommandLog and its backing handle
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use ringlog_core::{CommandLog, Cursor, Entry, Error, ErrorKind, Position};
use tracing::{debug, warn};

use crate::backing::Backing;

struct Guarded {
    log: CommandLog,
    backing: Box<dyn Backing>,
}

/// Cheap-to-clone handle; every clone shares the same log and guard.
///
/// The guard is only ever held for one log operation. Callers must never keep
/// it across socket I/O, which is why reads hand back an owned snapshot.
#[derive(Clone)]
pub struct SharedLog {
    inner: Arc<Mutex<Guarded>>,
    control_capable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogStats {
    pub entries: usize,
    pub capacity: usize,
    pub total_bytes: usize,
    pub oldest_seq: u64,
    pub next_seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released {
    pub entries: usize,
    pub bytes: usize,
}

impl SharedLog {
    pub fn new(capacity: NonZeroUsize, backing: Box<dyn Backing>) -> Self {
        let control_capable = backing.is_control_capable();
        SharedLog {
            inner: Arc::new(Mutex::new(Guarded {
                log: CommandLog::new(capacity),
                backing,
            })),
            control_capable,
        }
    }

    pub fn is_control_capable(&self) -> bool {
        self.control_capable
    }

    fn lock(&self) -> Result<MutexGuard<'_, Guarded>, Error> {
        self.inner
            .lock()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("log guard poisoned"))
    }

    /// Append one command. The entry is allocated before the guard is taken, so
    /// an allocation failure leaves both the ring and the backing untouched.
    pub fn append(&self, bytes: &[u8]) -> Result<u64, Error> {
        let entry = Entry::try_copy(bytes)?;
        let appended = {
            let mut guard = self.lock()?;
            guard.backing.write(bytes)?;
            guard.log.push(entry)
        };
        if let Some(evicted) = appended.evicted {
            debug!(seq = evicted.seq(), bytes = evicted.len(), "evicted oldest entry");
        }
        Ok(appended.seq)
    }

    /// Check that `cursor` points into the live window right now.
    pub fn resolve(&self, cursor: Cursor) -> Result<Position, Error> {
        self.lock()?.log.resolve(cursor)
    }

    /// Copy every byte from `cursor` to the end of the log.
    ///
    /// An empty log yields nothing. A cursor that stopped resolving since it
    /// was stored (its entry got evicted) falls back to the start of the log.
    pub fn read_from(&self, cursor: Cursor) -> Result<Vec<u8>, Error> {
        let guard = self.lock()?;
        let log = &guard.log;
        if log.is_empty() {
            return Ok(Vec::new());
        }

        let position = match log.resolve(cursor) {
            Ok(position) => position,
            Err(err) if err.kind().is_addressing() && cursor != Cursor::START => {
                warn!(error = %err, "stored cursor no longer resolves, reading from start");
                log.resolve(Cursor::START)?
            }
            Err(err) => return Err(err),
        };

        let mut out = Vec::new();
        out.try_reserve(log.total_bytes()).map_err(|err| {
            Error::new(ErrorKind::ResourceExhausted)
                .with_message("cannot allocate response buffer")
                .with_source(err)
        })?;
        for chunk in log.read_from(position) {
            out.extend_from_slice(chunk);
        }
        Ok(out)
    }

    /// Run `f` against the log under the guard.
    pub fn with_log<R>(&self, f: impl FnOnce(&CommandLog) -> R) -> Result<R, Error> {
        let guard = self.lock()?;
        Ok(f(&guard.log))
    }

    pub fn stats(&self) -> Result<LogStats, Error> {
        self.with_log(|log| LogStats {
            entries: log.len(),
            capacity: log.capacity(),
            total_bytes: log.total_bytes(),
            oldest_seq: log.oldest_seq(),
            next_seq: log.next_seq(),
        })
    }

    pub fn describe_backing(&self) -> Result<String, Error> {
        Ok(self.lock()?.backing.describe())
    }

    /// Release every entry and the backing handle.
    pub fn close(&self) -> Result<Released, Error> {
        let mut guard = self.lock()?;
        let drained = guard.log.drain();
        let released = Released {
            entries: drained.len(),
            bytes: drained.iter().map(Entry::len).sum(),
        };
        guard.backing.close()?;
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::SharedLog;
    use crate::backing::{Backing, FileBacking, MemoryBacking};
    use ringlog_core::{Cursor, Error, ErrorKind};
    use std::num::NonZeroUsize;
    use std::thread;

    fn memory_log(capacity: usize) -> SharedLog {
        SharedLog::new(
            NonZeroUsize::new(capacity).expect("capacity"),
            Box::new(MemoryBacking),
        )
    }

    struct FailingBacking;

    impl Backing for FailingBacking {
        fn write(&mut self, _bytes: &[u8]) -> Result<(), Error> {
            Err(Error::new(ErrorKind::Io).with_message("disk gone"))
        }

        fn is_control_capable(&self) -> bool {
            false
        }

        fn close(&mut self) -> Result<(), Error> {
            Ok(())
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    #[test]
    fn read_from_start_after_eviction() {
        let log = memory_log(2);
        for cmd in ["aaa\n", "bbb\n", "ccc\n"] {
            log.append(cmd.as_bytes()).expect("append");
        }
        assert_eq!(log.read_from(Cursor::START).expect("read"), b"bbb\nccc\n");
        assert_eq!(
            log.read_from(Cursor::Entry { seq: 2, offset: 1 }).expect("read"),
            b"bb\nccc\n"
        );
    }

    #[test]
    fn stale_cursor_falls_back_to_start() {
        let log = memory_log(1);
        log.append(b"old\n").expect("append");
        let cursor = Cursor::Entry { seq: 1, offset: 2 };
        log.resolve(cursor).expect("live");
        log.append(b"new\n").expect("append");
        assert_eq!(log.read_from(cursor).expect("read"), b"new\n");
    }

    #[test]
    fn empty_log_reads_nothing() {
        let log = memory_log(3);
        assert!(log.read_from(Cursor::START).expect("read").is_empty());
    }

    #[test]
    fn concurrent_appends_never_interleave() {
        let log = memory_log(64);
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let log = log.clone();
                thread::spawn(move || {
                    for i in 0..8 {
                        let line = format!("worker-{worker}-line-{i}-{}\n", "x".repeat(worker * 7));
                        log.append(line.as_bytes()).expect("append");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        let stats = log.stats().expect("stats");
        assert_eq!(stats.entries, 64);
        let entries = log
            .with_log(|l| l.iter().map(|e| e.bytes().to_vec()).collect::<Vec<_>>())
            .expect("entries");
        for bytes in &entries {
            let text = String::from_utf8(bytes.clone()).expect("utf8");
            assert!(text.starts_with("worker-"));
            assert_eq!(text.matches('\n').count(), 1);
            assert!(text.ends_with('\n'));
        }
        let total: usize = entries.iter().map(Vec::len).sum();
        assert_eq!(stats.total_bytes, total);
    }

    #[test]
    fn backing_failure_leaves_log_unchanged() {
        let log = SharedLog::new(NonZeroUsize::new(2).expect("capacity"), Box::new(FailingBacking));
        let err = log.append(b"lost\n").expect_err("backing fails");
        assert_eq!(err.kind(), ErrorKind::Io);
        let stats = log.stats().expect("stats");
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.next_seq, 1);
    }

    #[test]
    fn file_backed_log_mirrors_and_releases() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data");
        let log = SharedLog::new(
            NonZeroUsize::new(2).expect("capacity"),
            Box::new(FileBacking::open(&path).expect("open")),
        );
        assert!(!log.is_control_capable());
        for cmd in ["a\n", "b\n", "c\n"] {
            log.append(cmd.as_bytes()).expect("append");
        }
        assert_eq!(std::fs::read(&path).expect("read"), b"a\nb\nc\n");

        let released = log.close().expect("close");
        assert_eq!(released.entries, 2);
        assert_eq!(released.bytes, 4);
        assert!(!path.exists());
    }
}
