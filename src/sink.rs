//! File-writing reduce collaborator.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::pipeline::Reduce;

/// A reduce collaborator that appends each reduced byte buffer to a file.
///
/// Writes are buffered; the file is flushed on [`finish`](FileSink::finish)
/// or on drop. Because the pipeline joins the reducer thread before `close`
/// returns, the file is complete once `close` has returned.
///
/// # Example
///
/// ```no_run
/// use ordpipe::FileSink;
/// use ordpipe::Reduce;
///
/// # fn main() -> anyhow::Result<()> {
/// let mut sink = FileSink::create("out.bin")?;
/// sink.reduce(vec![0xde, 0xad])?;
/// sink.finish()?;
/// # Ok(())
/// # }
/// ```
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    /// Open `path` for binary write, truncating any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self { writer: BufWriter::new(file) })
    }

    /// Flush buffered data and close the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn finish(mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Reduce<Vec<u8>> for FileSink {
    fn reduce(&mut self, item: Vec<u8>) -> anyhow::Result<()> {
        self.writer.write_all(&item)?;
        Ok(())
    }
}
