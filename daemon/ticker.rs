// Timestamp task: appends a wall-clock line to the log at a fixed interval
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use crossbeam::channel::{self, Sender};
use ringlog_buffer::SharedLog;
use ringlog_core::{Error, ErrorKind};
use tracing::{debug, warn};

/// RFC 2822 style, e.g. `timestamp:Tue, 05 Mar 2024 14:07:09 +0100`.
pub const TIMESTAMP_FORMAT: &str = "%a, %d %b %Y %T %z";

pub fn timestamp_line<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("timestamp:{}\n", now.format(TIMESTAMP_FORMAT))
}

pub struct TimestampTask {
    stop: Sender<()>,
    thread: JoinHandle<usize>,
}

impl TimestampTask {
    pub fn start(log: SharedLog, interval: Duration) -> Result<Self, Error> {
        let (stop, stopped) = channel::bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("timestamp".into())
            .spawn(move || {
                let ticker = channel::tick(interval);
                let mut written = 0;
                loop {
                    channel::select! {
                        recv(ticker) -> _ => {
                            let line = timestamp_line(&Local::now());
                            match log.append(line.as_bytes()) {
                                Ok(seq) => {
                                    written += 1;
                                    debug!(seq, "appended timestamp");
                                }
                                Err(err) => warn!(error = %err, "cannot append timestamp"),
                            }
                        }
                        recv(stopped) -> _ => break,
                    }
                }
                written
            })
            .map_err(|err| {
                Error::new(ErrorKind::Init)
                    .with_message("cannot start timestamp task")
                    .with_source(err)
            })?;
        Ok(TimestampTask { stop, thread })
    }

    /// Stop the task and wait for it. Returns how many lines it appended.
    pub fn stop(self) -> usize {
        // a disconnected channel also wakes the select
        let _ = self.stop.send(());
        match self.thread.join() {
            Ok(written) => written,
            Err(_) => {
                warn!("timestamp task panicked");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{timestamp_line, TimestampTask};
    use chrono::{FixedOffset, TimeZone};
    use ringlog_buffer::{MemoryBacking, SharedLog};
    use std::num::NonZeroUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn line_uses_rfc2822_layout() {
        let tz = FixedOffset::east_opt(3600).expect("offset");
        let at = tz
            .with_ymd_and_hms(2024, 3, 5, 14, 7, 9)
            .single()
            .expect("valid time");
        assert_eq!(
            timestamp_line(&at),
            "timestamp:Tue, 05 Mar 2024 14:07:09 +0100\n"
        );
    }

    #[test]
    fn task_appends_until_stopped() {
        let log = SharedLog::new(NonZeroUsize::new(64).expect("cap"), Box::new(MemoryBacking));
        let task = TimestampTask::start(log.clone(), Duration::from_millis(20)).expect("start");
        thread::sleep(Duration::from_millis(150));
        let written = task.stop();
        assert!(written >= 1);

        let entries = log.stats().expect("stats").entries;
        assert_eq!(entries, written);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(log.stats().expect("stats").entries, entries);

        let contents = log.read_from(ringlog_core::Cursor::START).expect("read");
        assert!(contents.starts_with(b"timestamp:"));
    }
}
