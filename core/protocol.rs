// Wire protocol: newline-terminated commands and the positioning control form
use crate::error::{Error, ErrorKind};

/// Keyword opening a positioning request: `AESDCHAR_IOCSEEKTO:<seq>,<offset>\n`.
pub const SEEK_KEYWORD: &[u8] = b"AESDCHAR_IOCSEEKTO";

pub const COMMAND_TERMINATOR: u8 = b'\n';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalCommand {
    /// Raw bytes, trailing newline included, appended verbatim.
    Write(Vec<u8>),
    /// Reposition the next response; never mutates the log.
    Seek { seq: u64, offset: u64 },
}

impl LogicalCommand {
    /// Classify one complete line. A line carrying the seek keyword with bad
    /// operands is `Malformed`; the caller drops it and keeps the session.
    pub fn parse(line: Vec<u8>) -> Result<Self, Error> {
        if !line.starts_with(SEEK_KEYWORD) {
            return Ok(LogicalCommand::Write(line));
        }

        let operands = &line[SEEK_KEYWORD.len()..];
        let text = std::str::from_utf8(operands).map_err(|err| {
            Error::new(ErrorKind::Malformed)
                .with_message("seek operands are not utf-8")
                .with_source(err)
        })?;
        let text = text.trim_end_matches(['\n', '\r']);
        let args = text.strip_prefix(':').ok_or_else(|| {
            Error::new(ErrorKind::Malformed).with_message("colon not found in seek request")
        })?;
        let (seq, offset) = args.split_once(',').ok_or_else(|| {
            Error::new(ErrorKind::Malformed).with_message("comma not found in seek request")
        })?;

        Ok(LogicalCommand::Seek {
            seq: parse_flexible_u64(seq)?,
            offset: parse_flexible_u64(offset)?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            LogicalCommand::Write(bytes) => bytes.clone(),
            LogicalCommand::Seek { seq, offset } => {
                let mut bytes = SEEK_KEYWORD.to_vec();
                bytes.extend_from_slice(format!(":{seq},{offset}\n").as_bytes());
                bytes
            }
        }
    }
}

/// Unsigned integer in decimal, `0x` hex or leading-zero octal.
pub fn parse_flexible_u64(text: &str) -> Result<u64, Error> {
    let trimmed = text.trim();
    let (digits, radix) = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        (hex, 16)
    } else if trimmed.len() > 1 && trimmed.starts_with('0') {
        (&trimmed[1..], 8)
    } else {
        (trimmed, 10)
    };

    u64::from_str_radix(digits, radix).map_err(|err| {
        Error::new(ErrorKind::Malformed)
            .with_message(format!("invalid integer {trimmed:?}"))
            .with_source(err)
    })
}

/// Per-connection accumulator turning raw chunks into complete lines.
///
/// Bytes after the first newline of a chunk stay buffered and are handed out by
/// later calls, so a chunk carrying several lines yields them one at a time.
#[derive(Debug)]
pub struct CommandAssembler {
    pending: Vec<u8>,
    max_len: usize,
}

impl CommandAssembler {
    pub fn new(max_len: usize) -> Self {
        CommandAssembler {
            pending: Vec::new(),
            max_len,
        }
    }

    /// Append a chunk and return the first complete line, if any.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        if self.pending.len() + chunk.len() > self.max_len
            && !chunk.contains(&COMMAND_TERMINATOR)
        {
            return Err(Error::new(ErrorKind::ResourceExhausted).with_message(format!(
                "command exceeds {} bytes without a newline",
                self.max_len
            )));
        }
        self.pending.try_reserve(chunk.len()).map_err(|err| {
            Error::new(ErrorKind::ResourceExhausted)
                .with_message("cannot grow command buffer")
                .with_source(err)
        })?;
        self.pending.extend_from_slice(chunk);
        Ok(self.next_line())
    }

    /// Next complete line already buffered, without reading more input.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self
            .pending
            .iter()
            .position(|&b| b == COMMAND_TERMINATOR)?;
        let rest = self.pending.split_off(end + 1);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    /// Bytes received that do not yet form a complete line.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
