use std::fs::{File, OpenOptions};
use std::io::{self, Write};

use crate::TraceRecord;

/// Producer side of the trace channel.
///
/// Every record is written as one line and flushed immediately. A failure to
/// write is never returned to the caller: the writer logs it once, becomes
/// broken and silently ignores the records that follow.
pub struct RecordWriter<W> {
    inner: Option<W>,
}

impl<W: Write> RecordWriter<W> {
    /// Wraps a writer (usually the opened trace channel).
    pub const fn new(inner: W) -> Self {
        Self { inner: Some(inner) }
    }

    /// Emits a record.
    ///
    /// Returns whether the record was written.
    pub fn emit(&mut self, record: &TraceRecord) -> bool {
        let Some(inner) = self.inner.as_mut() else {
            return false;
        };

        let res = record
            .to_line()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            .and_then(|line| {
                inner.write_all(line.as_bytes())?;
                inner.write_all(b"\n")?;
                inner.flush()
            });

        match res {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, kind = record.kind(), "trace channel broken");
                self.inner = None;
                false
            }
        }
    }

    /// Returns whether a previous write failed.
    pub const fn is_broken(&self) -> bool {
        self.inner.is_none()
    }

    /// Returns the inner writer, unless the writer is broken.
    pub fn into_inner(self) -> Option<W> {
        self.inner
    }
}

impl RecordWriter<File> {
    /// Opens the trace channel advertised by the supervisor through the
    /// process environment.
    ///
    /// Returns `None` when tracing is disabled or the channel cannot be opened.
    pub fn from_env() -> Option<Self> {
        if std::env::var(crate::TRACE_ENABLED_ENV).ok()? != "1" {
            return None;
        }

        let path = std::env::var_os(crate::TRACE_PATH_ENV)?;

        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(Self::new(file)),
            Err(e) => {
                tracing::warn!(error = %e, path = ?path, "cannot open trace channel");
                None
            }
        }
    }
}
