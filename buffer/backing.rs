// Log backing handle: where appended entries are recorded besides the in-process ring
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ringlog_core::{Error, ErrorKind};
use tracing::{debug, info, warn};

pub trait Backing: Send {
    /// Record one appended entry.
    fn write(&mut self, bytes: &[u8]) -> Result<(), Error>;
    /// Control-capable handles answer positioning requests themselves and
    /// take no synthetic timestamp entries.
    fn is_control_capable(&self) -> bool;
    /// Release the handle at shutdown.
    fn close(&mut self) -> Result<(), Error>;
    fn describe(&self) -> String;
}

/// Ring kept in process memory only, the equivalent of a device-resident buffer.
#[derive(Debug, Default)]
pub struct MemoryBacking;

impl Backing for MemoryBacking {
    fn write(&mut self, _bytes: &[u8]) -> Result<(), Error> {
        Ok(())
    }

    fn is_control_capable(&self) -> bool {
        true
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Flat file receiving every appended entry in order. Truncated on open and
/// removed on close, so it never outlives the server.
#[derive(Debug)]
pub struct FileBacking {
    path: PathBuf,
    file: Option<File>,
    /// Bytes of whole entries written so far.
    len: u64,
}

impl FileBacking {
    /// Relative paths are pinned to the current directory now, so a later
    /// chdir (daemonizing) still removes the right file on close.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = std::path::absolute(path.as_ref())
            .map_err(|err| io_error(err, path.as_ref(), "cannot resolve data file path"))?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|err| io_error(err, &path, "cannot open data file"))?;
        info!(path = %path.display(), "opened data file");
        Ok(FileBacking {
            path,
            file: Some(file),
            len: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backing for FileBacking {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let file = self.file.as_mut().ok_or_else(|| {
            Error::new(ErrorKind::Io)
                .with_message("data file already closed")
                .with_path(&self.path)
        })?;
        append_entry(file, self.len, bytes)
            .map_err(|err| io_error(err, &self.path, "cannot write data file"))?;
        self.len += bytes.len() as u64;
        Ok(())
    }

    fn is_control_capable(&self) -> bool {
        false
    }

    fn close(&mut self) -> Result<(), Error> {
        if self.file.take().is_none() {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed data file");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(err, &self.path, "cannot remove data file")),
        }
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

impl Drop for FileBacking {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Sink that can drop a torn tail after a failed write.
trait Truncate: Write {
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;
        Ok(())
    }
}

/// Write one entry whole or not at all: a short write is cut back to `len`
/// so later entries stay aligned with the ring.
fn append_entry<W: Truncate>(out: &mut W, len: u64, bytes: &[u8]) -> io::Result<()> {
    if let Err(err) = out.write_all(bytes) {
        if let Err(cut) = out.truncate_to(len) {
            warn!(error = %cut, len, "cannot drop partial entry from data file");
        }
        return Err(err);
    }
    Ok(())
}

fn io_error(err: io::Error, path: &Path, message: &str) -> Error {
    Error::new(storage_error_kind(&err))
        .with_message(message)
        .with_path(path)
        .with_source(err)
}

pub(crate) fn storage_error_kind(err: &io::Error) -> ErrorKind {
    match err.raw_os_error() {
        Some(libc::ENOMEM) | Some(libc::ENOSPC) | Some(libc::EDQUOT) => {
            ErrorKind::ResourceExhausted
        }
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::{append_entry, storage_error_kind, Backing, FileBacking, MemoryBacking, Truncate};
    use ringlog_core::ErrorKind;
    use std::io::{self, Write};

    /// Accepts `budget` bytes, then fails like a full disk.
    struct FillingDisk {
        data: Vec<u8>,
        budget: usize,
    }

    impl Write for FillingDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::from_raw_os_error(libc::ENOSPC));
            }
            let n = buf.len().min(self.budget);
            self.data.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Truncate for FillingDisk {
        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn file_backing_mirrors_writes_and_removes_on_close() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ringlog.data");
        let mut backing = FileBacking::open(&path).expect("open");
        assert!(!backing.is_control_capable());

        backing.write(b"one\n").expect("write");
        backing.write(b"two\n").expect("write");
        assert_eq!(std::fs::read(&path).expect("read"), b"one\ntwo\n");

        backing.close().expect("close");
        assert!(!path.exists());
        let err = backing.write(b"late\n").expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn file_backing_truncates_stale_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ringlog.data");
        std::fs::write(&path, b"left over\n").expect("seed");
        let _backing = FileBacking::open(&path).expect("open");
        assert_eq!(std::fs::read(&path).expect("read"), b"");
    }

    #[test]
    fn memory_backing_is_control_capable() {
        let mut backing = MemoryBacking;
        assert!(backing.is_control_capable());
        backing.write(b"ignored\n").expect("write");
        backing.close().expect("close");
    }

    #[test]
    fn storage_errors_map_to_expected_kinds() {
        let err = std::io::Error::from_raw_os_error(libc::ENOSPC);
        assert_eq!(storage_error_kind(&err), ErrorKind::ResourceExhausted);

        let err = std::io::Error::from_raw_os_error(libc::ENOMEM);
        assert_eq!(storage_error_kind(&err), ErrorKind::ResourceExhausted);

        let err = std::io::Error::from_raw_os_error(libc::EIO);
        assert_eq!(storage_error_kind(&err), ErrorKind::Io);
    }

    #[test]
    fn short_write_leaves_no_partial_entry() {
        let mut disk = FillingDisk {
            data: Vec::new(),
            budget: 6,
        };
        append_entry(&mut disk, 0, b"one\n").expect("fits");
        let err = append_entry(&mut disk, 4, b"two\n").expect_err("disk full");
        assert_eq!(storage_error_kind(&err), ErrorKind::ResourceExhausted);
        assert_eq!(disk.data, b"one\n");

        disk.budget = 16;
        append_entry(&mut disk, 4, b"three\n").expect("space again");
        assert_eq!(disk.data, b"one\nthree\n");
    }

    #[test]
    fn relative_path_survives_directory_change() {
        let start = std::env::current_dir().expect("cwd");
        let home = tempfile::tempdir().expect("tempdir");
        let elsewhere = tempfile::tempdir().expect("tempdir");

        std::env::set_current_dir(home.path()).expect("chdir");
        let mut backing = FileBacking::open("data.bin").expect("open");
        std::env::set_current_dir(elsewhere.path()).expect("chdir");
        backing.write(b"kept\n").expect("write");
        backing.close().expect("close");
        std::env::set_current_dir(&start).expect("chdir back");

        assert!(backing.path().is_absolute());
        assert!(!home.path().join("data.bin").exists());
        assert!(!elsewhere.path().join("data.bin").exists());
    }
}
