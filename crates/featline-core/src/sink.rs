//! Output files written under a tmp name and renamed into place on commit

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Buffer size for output files (256KB)
const WRITE_BUF_SIZE: usize = 256 * 1024;

/// Tmp path used while `final_path` is being written
pub fn tmp_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    final_path.with_file_name(name)
}

/// Buffered file writer with atomic tmp→rename.
///
/// Until [`commit`](AtomicFile::commit) succeeds the final path is never
/// touched. Dropping an uncommitted file removes the tmp file, so an
/// aborted or cancelled job leaves no partial artifact behind.
pub struct AtomicFile {
    writer: Option<BufWriter<File>>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

impl std::fmt::Debug for AtomicFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicFile")
            .field("final_path", &self.final_path)
            .field("bytes_written", &self.bytes_written)
            .finish_non_exhaustive()
    }
}

impl AtomicFile {
    /// Create the tmp file next to `final_path`, creating parent directories.
    pub fn create(final_path: &Path) -> io::Result<Self> {
        if let Some(parent) = final_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = tmp_path_for(final_path);

        // Clean up stale tmp file
        if tmp_path.exists() {
            log::warn!("Removing stale tmp file: {}", tmp_path.display());
            fs::remove_file(&tmp_path)?;
        }

        let file = File::create(&tmp_path)?;
        Ok(Self {
            writer: Some(BufWriter::with_capacity(WRITE_BUF_SIZE, file)),
            tmp_path,
            final_path: final_path.to_path_buf(),
            bytes_written: 0,
        })
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush, fsync and rename tmp → final. Returns bytes written.
    pub fn commit(mut self) -> io::Result<u64> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| io::Error::other("file already closed"))?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(self.bytes_written)
    }

    /// Drop the tmp file without publishing anything.
    pub fn discard(mut self) -> io::Result<()> {
        self.writer.take();
        match fs::remove_file(&self.tmp_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::other("file already closed"))?;
        let n = writer.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = fs::remove_file(&self.tmp_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    log::warn!("Failed to remove {}: {e}", self.tmp_path.display());
                }
            }
        }
    }
}
