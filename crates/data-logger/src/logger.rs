//! Logger Implementation

use crate::row::{self, ColumnValue, LogColumn, PeriodicRow};
use crate::{LogConfig, LogError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Rows between flushes
const FLUSH_EVERY: u64 = 10;

struct Inner {
    queue: Mutex<VecDeque<PeriodicRow>>,
    ready: Condvar,
    active: AtomicBool,
    stopping: AtomicBool,
    logged: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Inner {
    fn record_error(&self, message: String) {
        error!("Data log write failed: {}", message);
        *self.last_error.lock() = Some(message);
    }
}

/// Session state owned by the writer thread
struct Session {
    writer: csv::Writer<File>,
    columns: usize,
    config: LogConfig,
}

/// Background CSV writer for poll snapshots
pub struct DataLogger {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    path: Mutex<Option<PathBuf>>,
}

impl DataLogger {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                ready: Condvar::new(),
                active: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                logged: AtomicU64::new(0),
                last_error: Mutex::new(None),
            }),
            worker: Mutex::new(None),
            path: Mutex::new(None),
        }
    }

    /// Create (or truncate) `path`, write the header and start the writer.
    ///
    /// An active session is stopped first.
    pub fn start(
        &self,
        path: impl AsRef<Path>,
        columns: Vec<LogColumn>,
        config: LogConfig,
    ) -> Result<(), LogError> {
        self.stop();

        let path = path.as_ref();
        self.inner.logged.store(0, Ordering::SeqCst);
        if columns.is_empty() {
            *self.inner.last_error.lock() = Some(LogError::NoColumns.to_string());
            return Err(LogError::NoColumns);
        }

        let session = match open(path, &columns, config) {
            Ok(session) => session,
            Err(e) => {
                *self.inner.last_error.lock() = Some(format!("{}: {}", path.display(), e));
                return Err(e);
            }
        };

        *self.inner.last_error.lock() = None;
        {
            let mut queue = self.inner.queue.lock();
            let stale = queue.len();
            queue.clear();
            if stale > 0 {
                debug!("Discarded {} rows left from the previous session", stale);
            }
            self.inner.stopping.store(false, Ordering::SeqCst);
            self.inner.active.store(true, Ordering::SeqCst);
        }

        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("data-logger".to_string())
            .spawn(move || write_loop(inner, session));
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                self.inner.active.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        info!("Data log started: {} ({} columns)", path.display(), columns.len());
        *self.worker.lock() = Some(handle);
        *self.path.lock() = Some(path.to_path_buf());
        Ok(())
    }

    /// Write every queued row, then close the file
    pub fn stop(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        {
            let _queue = self.inner.queue.lock();
            self.inner.stopping.store(true, Ordering::SeqCst);
            self.inner.ready.notify_all();
        }
        if handle.join().is_err() {
            error!("Data log writer panicked");
        }
        self.inner.active.store(false, Ordering::SeqCst);

        if let Some(path) = self.path.lock().take() {
            info!(
                "Data log stopped: {} ({} rows)",
                path.display(),
                self.logged_count()
            );
        }
    }

    /// Queue a snapshot stamped with the current local time.
    ///
    /// Never blocks on I/O; ignored while no session is active or the
    /// writer is draining for a stop.
    pub fn log_row(&self, values: Vec<ColumnValue>) {
        let row = PeriodicRow::now(values);
        {
            let mut queue = self.inner.queue.lock();
            if !self.is_active() || self.inner.stopping.load(Ordering::SeqCst) {
                return;
            }
            queue.push_back(row);
        }
        self.inner.ready.notify_one();
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Rows written in the current or last session
    pub fn logged_count(&self) -> u64 {
        self.inner.logged.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.path.lock().clone()
    }
}

impl Default for DataLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DataLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open(path: &Path, columns: &[LogColumn], config: LogConfig) -> Result<Session, LogError> {
    let mut file = File::create(path)?;
    file.write_all(UTF8_BOM)?;

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(file);
    writer.write_record(row::header(columns, &config))?;
    writer.flush()?;

    Ok(Session {
        writer,
        columns: columns.len(),
        config,
    })
}

fn write_loop(inner: Arc<Inner>, mut session: Session) {
    debug!("Data log writer started");

    loop {
        let batch = {
            let mut queue = inner.queue.lock();
            while queue.is_empty() && !inner.stopping.load(Ordering::SeqCst) {
                inner.ready.wait(&mut queue);
            }
            std::mem::take(&mut *queue)
        };

        if batch.is_empty() {
            // Stop requested and nothing left to drain
            break;
        }

        for row in &batch {
            let fields = row::record(row, session.columns, &session.config);
            if let Err(e) = session.writer.write_record(&fields) {
                inner.record_error(e.to_string());
                continue;
            }
            let logged = inner.logged.fetch_add(1, Ordering::SeqCst) + 1;
            if logged % FLUSH_EVERY == 0 {
                if let Err(e) = session.writer.flush() {
                    inner.record_error(e.to_string());
                }
            }
        }
    }

    if let Err(e) = session.writer.flush() {
        inner.record_error(e.to_string());
    }
    debug!("Data log writer stopped");
}
