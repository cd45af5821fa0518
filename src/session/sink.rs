//! Write sinks used by the output session.
//!
//! A [`FanOut`] forwards every write to an ordered list of sinks. A
//! [`Decorated`] sink wraps another one and frames each write with fixed
//! bytes, which is how console highlighting is done.

use std::fs::File;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

pub type BoxedSink = Box<dyn Write + Send>;

const HIGHLIGHT_ON: &[u8] = b"\x1b[31m";
const HIGHLIGHT_OFF: &[u8] = b"\x1b[0m";

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "sink lock poisoned")
}

/// File handle shared by several fan-outs
#[derive(Debug, Clone)]
pub struct SharedFile {
    file: Arc<Mutex<File>>,
}

impl SharedFile {
    pub fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, File>> {
        self.file.lock().map_err(|_| poisoned())
    }
}

impl Write for SharedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.lock()?.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

/// In-memory sink; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .map(|buffer| String::from_utf8_lossy(&buffer).into_owned())
            .unwrap_or_default()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().map_err(|_| poisoned())?.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Where console-bound output goes
#[derive(Debug, Clone, Default)]
pub enum ConsoleTarget {
    #[default]
    Stderr,
    Memory(MemorySink),
}

impl ConsoleTarget {
    pub fn sink(&self) -> BoxedSink {
        match self {
            Self::Stderr => Box::new(io::stderr()),
            Self::Memory(sink) => Box::new(sink.clone()),
        }
    }
}

/// Wraps a sink and frames every write with `prefix` and `suffix`
pub struct Decorated<W> {
    inner: W,
    prefix: &'static [u8],
    suffix: &'static [u8],
}

impl<W: Write> Decorated<W> {
    pub fn new(inner: W, prefix: &'static [u8], suffix: &'static [u8]) -> Self {
        Self {
            inner,
            prefix,
            suffix,
        }
    }

    /// Red console highlighting
    pub fn highlight(inner: W) -> Self {
        Self::new(inner, HIGHLIGHT_ON, HIGHLIGHT_OFF)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for Decorated<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write_all(self.prefix)?;
        self.inner.write_all(buf)?;
        self.inner.write_all(self.suffix)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Forwards each write to every sink, in order.
///
/// A failing sink does not stop the others; the first error is reported
/// after all sinks have been tried.
#[derive(Default)]
pub struct FanOut {
    sinks: Vec<BoxedSink>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl Write + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: BoxedSink) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn for_each_sink(
        &mut self,
        mut op: impl FnMut(&mut BoxedSink) -> io::Result<()>,
    ) -> io::Result<()> {
        let mut first_error = None;
        for sink in &mut self.sinks {
            if let Err(e) = op(sink) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Write for FanOut {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.for_each_sink(|sink| sink.write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.for_each_sink(|sink| sink.flush())
    }
}
