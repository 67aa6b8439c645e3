//! Shared I/O utilities: counting readers, SHA-256 hashing writers, atomic
//! file replacement, and the cooperative cancellation token checked between
//! object boundaries by long-running operations.

use std::{
    fs,
    io,
    io::{BufRead, Read, Write},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use sha2::{Digest, Sha256};

use crate::errors::MemError;
use crate::hash::ObjectHash;

pub fn read_bytes(file: &mut impl Read, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_hash(file: &mut impl Read) -> io::Result<ObjectHash> {
    ObjectHash::from_stream(file)
}

/// A lightweight wrapper that counts bytes read from the underlying reader.
/// Lets the pack reader know where a zlib stream ended inside a larger file.
pub struct CountingReader<R> {
    pub inner: R,
    pub bytes_read: u64,
}

impl<R> CountingReader<R> {
    /// Creates a new `CountingReader` wrapping the given reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            bytes_read: 0,
        }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for CountingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.bytes_read += amt as u64;
        self.inner.consume(amt);
    }
}

/// SHA-256 state exposed through `std::io::Write`, used to hash pack and
/// index bytes while they stream to disk.
#[derive(Clone, Default)]
pub struct HashingWriter {
    hasher: Sha256,
}

impl HashingWriter {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Update hash with data.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Finalize and return the digest as an `ObjectHash`.
    pub fn finalize(self) -> ObjectHash {
        let digest = self.hasher.finalize();
        ObjectHash::from_bytes(digest.as_ref()).unwrap()
    }
}

impl Write for HashingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Write `bytes` to `path` atomically: a temp file in the same directory is
/// fully written, synced, then renamed over the target. Readers never observe
/// a partially written file.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Cooperative cancellation signal for long-running operations (fetch, gc,
/// fsck, repack). Checked between object boundaries; never preemptive.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next checkpoint.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Checkpoint: return `Cancelled` once the signal is raised.
    pub fn check(&self) -> Result<(), MemError> {
        if self.is_cancelled() {
            Err(MemError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    /// CountingReader tracks consumed bytes across reads.
    #[test]
    fn test_counting_reader() {
        let data = vec![1u8; 100];
        let mut reader = CountingReader::new(std::io::Cursor::new(data));
        let mut buf = [0u8; 60];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(reader.bytes_read, 60);
        reader.read_to_end(&mut Vec::new()).unwrap();
        assert_eq!(reader.bytes_read, 100);
    }

    /// HashingWriter produces the same digest as one-shot hashing.
    #[test]
    fn test_hashing_writer() {
        let mut w = HashingWriter::new();
        std::io::Write::write_all(&mut w, b"Hello, ").unwrap();
        std::io::Write::write_all(&mut w, b"world!").unwrap();
        assert_eq!(w.finalize(), ObjectHash::new(b"Hello, world!"));
    }

    /// atomic_write replaces the target in one step and creates parents.
    #[test]
    fn test_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/target");
        atomic_write(&path, b"one").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"one");
        atomic_write(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
    }

    /// The token trips exactly once cancelled.
    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(matches!(token.check(), Err(MemError::Cancelled)));
    }
}
