use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::SinkResult;

/// A temporary file next to its destination, renamed into place only on success.
///
/// Dropping a `StagedFile` without calling [`StagedFile::persist`] deletes the temporary file, so
/// a failed or cancelled job never leaves output under the final name.
#[derive(Debug)]
pub(crate) struct StagedFile {
    temp: NamedTempFile,
    destination: PathBuf,
}

impl StagedFile {
    pub(crate) fn create(destination: &Path) -> SinkResult<Self> {
        let dir = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let temp = tempfile::Builder::new()
            .prefix(".report-")
            .suffix(".part")
            .tempfile_in(&dir)?;
        tracing::debug!(staged = %temp.path().display(), destination = %destination.display(), "staging report");
        Ok(Self {
            temp,
            destination: destination.to_path_buf(),
        })
    }

    /// Atomically move the staged file to its destination, replacing any existing file.
    pub(crate) fn persist(mut self) -> SinkResult<PathBuf> {
        self.temp.as_file_mut().sync_all()?;
        self.temp.persist(&self.destination)?;
        tracing::debug!(destination = %self.destination.display(), "report published");
        Ok(self.destination)
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::StagedFile;

    #[test]
    fn persist_publishes_and_drop_discards() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("out.txt");

        let mut staged = StagedFile::create(&dest).unwrap();
        staged.write_all(b"hello").unwrap();
        assert!(!dest.exists());
        let path = staged.persist().unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hello");

        let mut staged = StagedFile::create(&dest).unwrap();
        staged.write_all(b"partial").unwrap();
        drop(staged);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "hello");
        assert_eq!(std::fs::read_dir(dest.parent().unwrap()).unwrap().count(), 1);
    }
}
