// CommandLog: fixed-capacity ring of variable-length entries with overwrite-on-full
use std::num::NonZeroUsize;

use crate::error::{Error, ErrorKind};
use crate::types::{Cursor, Entry, Position};

/// Sequence number handed to the first entry ever appended.
pub const FIRST_SEQ: u64 = 1;

/// Outcome of storing one entry.
#[derive(Debug)]
pub struct Appended {
    pub seq: u64,
    /// Entry pushed out of the ring to make room, if the ring was full.
    pub evicted: Option<Entry>,
}

/// Bounded log of commands.
///
/// Slots are addressed by index; `write_index` is the next slot to fill and,
/// once the ring is full, also the oldest occupied slot. Sequence numbers keep
/// increasing across evictions, so the live window is always
/// `[next_seq - count, next_seq)`.
#[derive(Debug)]
pub struct CommandLog {
    slots: Vec<Option<Entry>>,
    write_index: usize,
    count: usize,
    total_bytes: usize,
    next_seq: u64,
}

impl CommandLog {
    pub fn new(capacity: NonZeroUsize) -> Self {
        CommandLog {
            slots: (0..capacity.get()).map(|_| None).collect(),
            write_index: 0,
            count: 0,
            total_bytes: 0,
            next_seq: FIRST_SEQ,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Sequence number of the oldest live entry (equals `next_seq` when empty).
    pub fn oldest_seq(&self) -> u64 {
        self.next_seq - self.count as u64
    }

    fn oldest_slot(&self) -> usize {
        (self.write_index + self.capacity() - self.count) % self.capacity()
    }

    /// Copy `bytes` into a new entry. On allocation failure the log is untouched.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64, Error> {
        let entry = Entry::try_copy(bytes)?;
        Ok(self.push(entry).seq)
    }

    /// Store an already allocated entry, stamping it with the next sequence number.
    pub fn push(&mut self, mut entry: Entry) -> Appended {
        let evicted = if self.count == self.capacity() {
            let old = self.slots[self.write_index].take();
            if let Some(old) = &old {
                self.total_bytes -= old.len();
            }
            self.count -= 1;
            old
        } else {
            None
        };

        let seq = self.next_seq;
        entry.stamp(seq);
        self.total_bytes += entry.len();
        self.slots[self.write_index] = Some(entry);
        self.write_index = (self.write_index + 1) % self.capacity();
        self.count += 1;
        self.next_seq += 1;

        Appended { seq, evicted }
    }

    /// Slot indices of live entries, oldest first.
    fn live_slots(&self) -> impl Iterator<Item = (usize, &Entry)> + '_ {
        let oldest = self.oldest_slot();
        let cap = self.capacity();
        (0..self.count).filter_map(move |i| {
            let slot = (oldest + i) % cap;
            self.slots[slot].as_ref().map(|entry| (slot, entry))
        })
    }

    pub fn resolve_global_offset(&self, offset: u64) -> Result<Position, Error> {
        if offset >= self.total_bytes as u64 {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message("offset beyond end of log")
                .with_offset(offset));
        }

        let mut remaining = offset as usize;
        for (slot, entry) in self.live_slots() {
            if remaining < entry.len() {
                return Ok(Position {
                    slot,
                    offset: remaining,
                });
            }
            remaining -= entry.len();
        }

        Err(Error::new(ErrorKind::Internal)
            .with_message("total_bytes disagrees with live entries")
            .with_offset(offset))
    }

    pub fn resolve_sequence_offset(&self, seq: u64, offset: u64) -> Result<Position, Error> {
        let oldest = self.oldest_seq();
        if seq < oldest || seq >= self.next_seq {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message(format!(
                    "sequence outside live window [{oldest}, {})",
                    self.next_seq
                ))
                .with_seq(seq)
                .with_offset(offset));
        }

        let slot = (self.oldest_slot() + (seq - oldest) as usize) % self.capacity();
        let entry = self.slots[slot].as_ref().ok_or_else(|| {
            Error::new(ErrorKind::Internal)
                .with_message("live slot is empty")
                .with_seq(seq)
        })?;
        if offset >= entry.len() as u64 {
            return Err(Error::new(ErrorKind::OutOfRange)
                .with_message(format!("entry holds {} bytes", entry.len()))
                .with_seq(seq)
                .with_offset(offset));
        }

        Ok(Position {
            slot,
            offset: offset as usize,
        })
    }

    pub fn resolve(&self, cursor: Cursor) -> Result<Position, Error> {
        match cursor {
            Cursor::Global(offset) => self.resolve_global_offset(offset),
            Cursor::Entry { seq, offset } => self.resolve_sequence_offset(seq, offset),
        }
    }

    /// Remaining bytes of the entry at `position`, then every newer entry in full.
    pub fn read_from(&self, position: Position) -> LogReader<'_> {
        let cap = self.capacity();
        let index = (position.slot % cap + cap - self.oldest_slot()) % cap;
        let remaining = self.count.saturating_sub(index);
        LogReader {
            log: self,
            slot: position.slot % cap,
            offset: position.offset,
            remaining,
        }
    }

    /// Live entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.live_slots().map(|(_, entry)| entry)
    }

    /// Release every live entry, oldest first. Sequence numbering carries on.
    pub fn drain(&mut self) -> Vec<Entry> {
        let oldest = self.oldest_slot();
        let cap = self.capacity();
        let mut released = Vec::with_capacity(self.count);
        for i in 0..self.count {
            if let Some(entry) = self.slots[(oldest + i) % cap].take() {
                released.push(entry);
            }
        }
        self.count = 0;
        self.total_bytes = 0;
        released
    }
}

/// Lazy chunked read over the log; yields one slice per entry.
pub struct LogReader<'a> {
    log: &'a CommandLog,
    slot: usize,
    offset: usize,
    remaining: usize,
}

impl<'a> Iterator for LogReader<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let entry = self.log.slots[self.slot].as_ref()?;
        let start = self.offset.min(entry.len());
        self.slot = (self.slot + 1) % self.log.capacity();
        self.offset = 0;
        self.remaining -= 1;
        Some(&entry.bytes()[start..])
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandLog, FIRST_SEQ};
    use crate::error::ErrorKind;
    use crate::types::{Cursor, Position};
    use std::num::NonZeroUsize;

    fn log_with(capacity: usize, commands: &[&str]) -> CommandLog {
        let mut log = CommandLog::new(NonZeroUsize::new(capacity).expect("capacity"));
        for cmd in commands {
            log.append(cmd.as_bytes()).expect("append");
        }
        log
    }

    fn read_all(log: &CommandLog, cursor: Cursor) -> Vec<u8> {
        let position = log.resolve(cursor).expect("resolve");
        log.read_from(position).flatten().copied().collect()
    }

    #[test]
    fn overflow_keeps_most_recent_entries() {
        let log = log_with(2, &["aaa\n", "bbb\n", "ccc\n"]);
        let live: Vec<&[u8]> = log.iter().map(|e| e.bytes()).collect();
        assert_eq!(live, vec![b"bbb\n".as_slice(), b"ccc\n".as_slice()]);
        assert_eq!(log.len(), 2);
        assert_eq!(log.total_bytes(), 8);
        assert_eq!(read_all(&log, Cursor::START), b"bbb\nccc\n");
    }

    #[test]
    fn retains_last_n_across_many_wraps() {
        let commands: Vec<String> = (0..37).map(|i| format!("cmd-{i}\n")).collect();
        let refs: Vec<&str> = commands.iter().map(String::as_str).collect();
        let log = log_with(10, &refs);

        let live: Vec<String> = log
            .iter()
            .map(|e| String::from_utf8(e.bytes().to_vec()).expect("utf8"))
            .collect();
        assert_eq!(live, commands[27..].to_vec());
        let expected_bytes: usize = commands[27..].iter().map(String::len).sum();
        assert_eq!(log.total_bytes(), expected_bytes);
        assert_eq!(log.oldest_seq(), FIRST_SEQ + 27);
    }

    #[test]
    fn sequence_numbers_are_never_reused() {
        let mut log = log_with(3, &[]);
        let mut seen = Vec::new();
        for i in 0..8 {
            seen.push(log.append(format!("{i}\n").as_bytes()).expect("append"));
        }
        assert_eq!(seen, (FIRST_SEQ..FIRST_SEQ + 8).collect::<Vec<_>>());

        log.drain();
        assert_eq!(log.append(b"again\n").expect("append"), FIRST_SEQ + 8);
    }

    #[test]
    fn evicted_entry_is_returned_from_push() {
        let mut log = log_with(1, &["first\n"]);
        let entry = crate::types::Entry::try_copy(b"second\n").expect("entry");
        let appended = log.push(entry);
        let evicted = appended.evicted.expect("evicted");
        assert_eq!(evicted.bytes(), b"first\n");
        assert_eq!(evicted.seq(), FIRST_SEQ);
        assert_eq!(appended.seq, FIRST_SEQ + 1);
        assert_eq!(log.total_bytes(), 7);
    }

    #[test]
    fn seek_into_live_entry_reads_its_tail_then_newer_entries() {
        let log = log_with(2, &["aaa\n", "bbb\n", "ccc\n"]);
        let out = read_all(&log, Cursor::Entry { seq: 2, offset: 1 });
        assert_eq!(out, b"bb\nccc\n");
    }

    #[test]
    fn evicted_or_unissued_sequence_is_not_found() {
        let log = log_with(2, &["aaa\n", "bbb\n", "ccc\n"]);
        for seq in [0, 1, 4, 100] {
            let err = log.resolve_sequence_offset(seq, 0).expect_err("should fail");
            assert_eq!(err.kind(), ErrorKind::NotFound, "seq {seq}");
            assert_eq!(err.seq(), Some(seq));
        }
    }

    #[test]
    fn offset_at_entry_size_is_out_of_range() {
        let log = log_with(2, &["aaa\n", "bbb\n"]);
        let err = log.resolve_sequence_offset(1, 4).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        assert!(log.resolve_sequence_offset(1, 3).is_ok());
    }

    #[test]
    fn global_offset_maps_to_slot_and_intra_offset() {
        let log = log_with(3, &["ab\n", "cdef\n", "g\n", "hi\n"]);
        // live: "cdef\n" "g\n" "hi\n"
        let pos = log.resolve_global_offset(6).expect("resolve");
        let entry_pos = log.resolve_sequence_offset(3, 1).expect("resolve");
        assert_eq!(pos, entry_pos);
        assert_eq!(read_all(&log, Cursor::Global(6)), b"\nhi\n");

        let err = log.resolve_global_offset(10).expect_err("past end");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn empty_log_resolves_nothing() {
        let log = log_with(4, &[]);
        let err = log.resolve(Cursor::START).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(log.read_from(Position { slot: 0, offset: 0 }).count(), 0);
    }

    #[test]
    fn round_trip_from_start_returns_appended_bytes() {
        let log = log_with(5, &["hello world\n"]);
        assert_eq!(read_all(&log, Cursor::START), b"hello world\n");
    }

    #[test]
    fn read_does_not_mutate_and_is_restartable() {
        let log = log_with(2, &["x\n", "y\n"]);
        let pos = log.resolve(Cursor::START).expect("resolve");
        let first: Vec<u8> = log.read_from(pos).flatten().copied().collect();
        let second: Vec<u8> = log.read_from(pos).flatten().copied().collect();
        assert_eq!(first, second);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn drain_releases_oldest_first() {
        let mut log = log_with(2, &["1\n", "2\n", "3\n"]);
        let drained: Vec<u64> = log.drain().iter().map(|e| e.seq()).collect();
        assert_eq!(drained, vec![2, 3]);
        assert!(log.is_empty());
        assert_eq!(log.total_bytes(), 0);
    }
}
