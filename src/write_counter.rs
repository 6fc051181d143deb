//! A Write wrapper that counts bytes written.
//!
//! READDIR replies are budgeted by encoded size rather than entry count;
//! the encoder wraps its output in a [`WriteCounter`] and stops before the
//! client's `maxcount` budget is exceeded.

use std::io::Write;

/// A wrapper around a writer that counts the number of bytes successfully
/// written through it.
pub struct WriteCounter<W> {
    inner: W,
    count: usize,
}

impl<W> WriteCounter<W>
where
    W: Write,
{
    pub fn new(inner: W) -> Self {
        WriteCounter { inner, count: 0 }
    }

    /// Consumes the counter and returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> usize {
        self.count
    }
}

impl<W> Write for WriteCounter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
