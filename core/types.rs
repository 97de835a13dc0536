// Core types used across all ringlog components
use std::fmt;

use crate::error::{Error, ErrorKind};

/// One completed command, owned by the log slot that holds it.
#[derive(Clone, PartialEq, Eq)]
pub struct Entry {
    seq: u64,
    bytes: Box<[u8]>,
}

impl Entry {
    /// Copy `bytes` into a freshly allocated entry, reporting allocation failure
    /// instead of aborting. The sequence number is assigned when the log stores it.
    pub fn try_copy(bytes: &[u8]) -> Result<Self, Error> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(bytes.len()).map_err(|err| {
            Error::new(ErrorKind::ResourceExhausted)
                .with_message(format!("cannot allocate {} byte entry", bytes.len()))
                .with_source(err)
        })?;
        buf.extend_from_slice(bytes);
        Ok(Entry {
            seq: 0,
            bytes: buf.into_boxed_slice(),
        })
    }

    pub(crate) fn stamp(&mut self, seq: u64) {
        self.seq = seq;
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("seq", &self.seq)
            .field("bytes", &String::from_utf8_lossy(&self.bytes))
            .finish()
    }
}

// Read position requested by a session, not yet bound to a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Byte offset over the concatenation of all live entries.
    Global(u64),
    /// Byte offset inside the entry carrying `seq`.
    Entry { seq: u64, offset: u64 },
}

impl Cursor {
    pub const START: Cursor = Cursor::Global(0);
}

// Concrete slot/offset pair a Cursor resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub slot: usize,
    pub offset: usize,
}
