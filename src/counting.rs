//! Byte-counting reader (C1): wraps any byte source, atomically counts bytes
//! consumed, and invokes a debounced progress callback.

use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Wraps a `Read` and counts bytes consumed **from the source**, not bytes
/// handed downstream after decompression (spec §4.1) — this is the correct
/// denominator for a download progress UI.
pub struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
    on_read: Option<Box<dyn FnMut(u64) + Send>>,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, count: Arc::new(AtomicU64::new(0)), on_read: None }
    }

    /// Install a callback invoked at most once per successful read, with the
    /// number of bytes just consumed. The Orchestrator is responsible for
    /// debouncing calls it finds too frequent; this reader never skips one.
    pub fn with_callback(mut self, cb: impl FnMut(u64) + Send + 'static) -> Self {
        self.on_read = Some(Box::new(cb));
        self
    }

    /// A cheap, shareable handle to the running byte count, for sampling
    /// from another thread without synchronizing with reads.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.count)
    }

    pub fn bytes_read(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // Errors propagate unchanged; partial reads are still counted
        // before the error (or success) is returned to the caller.
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.count.fetch_add(n as u64, Ordering::Relaxed);
            if let Some(cb) = self.on_read.as_mut() {
                cb(n as u64);
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn counts_bytes_consumed() {
        let data = vec![0u8; 4096];
        let mut r = CountingReader::new(Cursor::new(data));
        let mut buf = [0u8; 1024];
        let mut total = 0;
        loop {
            let n = r.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total as u64, r.bytes_read());
        assert_eq!(r.bytes_read(), 4096);
    }

    #[test]
    fn callback_fires_per_read() {
        let data = vec![0u8; 10];
        let seen = Arc::new(AtomicU64::new(0));
        let seen2 = Arc::clone(&seen);
        let mut r = CountingReader::new(Cursor::new(data)).with_callback(move |n| {
            seen2.fetch_add(n, Ordering::Relaxed);
        });
        let mut buf = [0u8; 4];
        while r.read(&mut buf).unwrap() > 0 {}
        assert_eq!(seen.load(Ordering::Relaxed), 10);
    }
}
