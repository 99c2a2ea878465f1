//! Log fan-out.
//!
//! Provider operations write progress (image pulls, container output, clone
//! output) into a single [`LogSink`]. The sink forwards every write to each
//! attached writer: the internal [`TracingWriter`], an optional per-entity
//! log file, and whatever the caller supplied.

mod file;

pub use file::LoggerFactory;

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tracing::info;

type SharedWriters = Arc<Mutex<Vec<Box<dyn Write + Send>>>>;

/// One `Write` that duplicates into many.
///
/// Clones share the same writer list, so a clone handed to a background
/// log follower keeps writing to every sink added later.
#[derive(Clone, Default)]
pub struct LogSink {
    writers: SharedWriters,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that starts with the internal tracing writer attached.
    pub fn with_tracing(source: impl Into<String>) -> Self {
        let sink = Self::new();
        sink.attach(TracingWriter::new(source));
        sink
    }

    pub fn attach(&self, writer: impl Write + Send + 'static) {
        if let Ok(mut writers) = self.writers.lock() {
            writers.push(Box::new(writer));
        }
    }

    pub fn len(&self) -> usize {
        self.writers.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write one line, appending a newline.
    pub fn line(&mut self, message: impl AsRef<str>) -> io::Result<()> {
        let mut buf = message.as_ref().as_bytes().to_vec();
        buf.push(b'\n');
        self.write_all(&buf)
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut writers = self
            .writers
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log sink lock poisoned"))?;
        for writer in writers.iter_mut() {
            writer.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut writers = self
            .writers
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log sink lock poisoned"))?;
        for writer in writers.iter_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Forwards each complete line to `tracing` at INFO.
pub struct TracingWriter {
    source: String,
    pending: Vec<u8>,
}

impl TracingWriter {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            pending: Vec::new(),
        }
    }

    fn emit(&self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            info!(target: "logs", source = %self.source, "{}", line);
        }
    }
}

impl Write for TracingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line[..line.len() - 1]);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit(&rest);
        }
        Ok(())
    }
}

impl Drop for TracingWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
