//! Chunked, deferred log emission.
//!
//! Log records are buffered and emitted through `tracing` in a background
//! worker rather than inline on the hot path, following the same
//! "deferred, coalesced" scheduling model as the storage flush worker: a
//! second `push` while a flush is already pending is a no-op, and `flush`
//! keeps draining in chunks while the buffer is non-empty.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub ts: i64,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>, ts: i64) -> Self {
        Self {
            level,
            message: message.into(),
            ts,
        }
    }
}

pub struct LogCollector {
    buffer: Mutex<VecDeque<LogRecord>>,
    chunk_size: usize,
    flush_pending: AtomicBool,
}

impl LogCollector {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            chunk_size: chunk_size.max(1),
            flush_pending: AtomicBool::new(false),
        }
    }

    /// Buffer a record. Returns `true` the first time a flush needs to be
    /// scheduled; a `false` return means one is already pending and the
    /// caller should do nothing further.
    pub fn push(&self, record: LogRecord) -> bool {
        self.buffer.lock().push_back(record);
        self.flush_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Drain up to `chunk_size` records and emit them through `tracing`.
    /// Returns `true` if the buffer still has more records, meaning the
    /// caller should reschedule another flush; otherwise clears the
    /// pending flag.
    pub fn flush(&self) -> bool {
        let drained: Vec<LogRecord> = {
            let mut buffer = self.buffer.lock();
            let take = self.chunk_size.min(buffer.len());
            buffer.drain(..take).collect()
        };

        for record in &drained {
            match record.level {
                LogLevel::Info => tracing::info!(ts = record.ts, "{}", record.message),
                LogLevel::Warn => tracing::warn!(ts = record.ts, "{}", record.message),
                LogLevel::Error => tracing::error!(ts = record.ts, "{}", record.message),
            }
        }

        let more_remain = !self.is_empty();
        if !more_remain {
            self.flush_pending.store(false, Ordering::Release);
        }
        more_remain
    }
}
