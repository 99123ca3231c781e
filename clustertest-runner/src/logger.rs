// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-test log sinks.
//!
//! Each test run writes a main log (`test.log`) with one line per status change or failure, plus
//! one child log per failure holding its fully detailed rendering. [`TestLogger`] is the interface
//! the test state writes through; [`FileLogger`] is the on-disk implementation and
//! [`MemoryLogger`] keeps everything in memory.

use crate::errors::LoggerError;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use std::{
    collections::BTreeMap,
    fmt,
    io::{self, BufWriter, Write},
    panic::Location,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{debug, warn};

/// A sink for a test's log output.
pub trait TestLogger: fmt::Debug + Send + Sync {
    /// Writes a single line, attributed to `location`.
    ///
    /// Lines written after the logger is closed are dropped.
    fn log_line(&self, location: &'static Location<'static>, line: &str);

    /// Creates a child log called `name`, with its own destination.
    fn child_writer(&self, name: &str) -> Result<Box<dyn Write + Send>, LoggerError>;

    /// Returns true if the logger has been closed.
    fn is_closed(&self) -> bool;
}

/// Logs a line to `logger` and writes it to `out`.
///
/// A trailing newline is added to the copy written to `out` if `msg` doesn't already end with one.
#[track_caller]
pub fn shout(logger: &dyn TestLogger, out: &mut dyn Write, msg: impl fmt::Display) -> io::Result<()> {
    let mut msg = msg.to_string();
    if !msg.ends_with('\n') {
        msg.push('\n');
    }
    logger.log_line(Location::caller(), msg.trim_end_matches('\n'));
    out.write_all(msg.as_bytes())
}

/// A logger that writes `test.log` into a test's artifacts directory.
///
/// Child logs are created next to it as `<name>.log`. Every line is also emitted as a `tracing`
/// event.
#[derive(Debug)]
pub struct FileLogger {
    dir: Utf8PathBuf,
    path: Utf8PathBuf,
    file: Mutex<Option<BufWriter<fs_err::File>>>,
}

impl FileLogger {
    /// The file name of the main log.
    pub const FILE_NAME: &'static str = "test.log";

    /// Creates `dir` if necessary, and opens the main log inside it.
    pub fn create(dir: impl Into<Utf8PathBuf>) -> Result<Self, LoggerError> {
        let dir = dir.into();
        fs_err::create_dir_all(&dir).map_err(|err| LoggerError::Create {
            path: dir.clone(),
            err,
        })?;
        let path = dir.join(Self::FILE_NAME);
        let file = fs_err::File::create(&path).map_err(|err| LoggerError::Create {
            path: path.clone(),
            err,
        })?;
        debug!(%path, "opened test log");

        Ok(Self {
            dir,
            path,
            file: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    /// The directory logs are written to.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// The path of the main log.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Flushes and closes the main log. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), LoggerError> {
        let file = self.lock().take();
        match file {
            Some(mut file) => file.flush().map_err(|err| LoggerError::Write {
                name: Self::FILE_NAME.to_owned(),
                err,
            }),
            None => Ok(()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<BufWriter<fs_err::File>>> {
        self.file.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TestLogger for FileLogger {
    fn log_line(&self, location: &'static Location<'static>, line: &str) {
        debug!(target: "clustertest::test_log", %location, "{line}");

        let mut file = self.lock();
        let Some(file) = file.as_mut() else {
            return;
        };
        let res = writeln!(
            file,
            "{} {}:{}: {line}",
            Local::now().format("%H:%M:%S%.3f"),
            location.file(),
            location.line(),
        )
        .and_then(|()| file.flush());
        if let Err(err) = res {
            warn!(path = %self.path, "error writing to test log: {err}");
        }
    }

    fn child_writer(&self, name: &str) -> Result<Box<dyn Write + Send>, LoggerError> {
        if self.is_closed() {
            return Err(LoggerError::Closed);
        }
        let path = self.dir.join(format!("{name}.log"));
        let file = fs_err::File::create(&path).map_err(|err| LoggerError::Create { path, err })?;
        Ok(Box::new(file))
    }

    fn is_closed(&self) -> bool {
        self.lock().is_none()
    }
}

/// A logger that keeps all output in memory.
///
/// Useful for tests of code that takes a [`TestLogger`].
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<String>>,
    children: Mutex<BTreeMap<String, SharedBuf>>,
    closed: AtomicBool,
}

impl MemoryLogger {
    /// Creates a new, open, in-memory logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all lines logged so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Returns the contents of the child log `name`, if it was created.
    pub fn child_contents(&self, name: &str) -> Option<String> {
        let children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        children.get(name).map(SharedBuf::contents)
    }

    /// Returns the names of all child logs, in sorted order.
    pub fn child_names(&self) -> Vec<String> {
        let children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        children.keys().cloned().collect()
    }

    /// Closes the logger. Later lines and child logs are dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl TestLogger for MemoryLogger {
    fn log_line(&self, _location: &'static Location<'static>, line: &str) {
        if self.is_closed() {
            return;
        }
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_owned());
    }

    fn child_writer(&self, name: &str) -> Result<Box<dyn Write + Send>, LoggerError> {
        if self.is_closed() {
            return Err(LoggerError::Closed);
        }
        let buf = SharedBuf::default();
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_owned(), buf.clone());
        Ok(Box::new(buf))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    #[test]
    fn file_logger_writes_attributed_lines() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let logger = FileLogger::create(dir.path().join("artifacts")).expect("created logger");

        let location = Location::caller();
        logger.log_line(location, "test status: running");
        {
            let mut child = logger.child_writer("failure_1").expect("created child log");
            child.write_all(b"details").expect("wrote child log");
        }
        logger.close().expect("closed logger");
        assert!(logger.is_closed());
        logger.log_line(location, "dropped after close");

        let contents = fs_err::read_to_string(logger.path()).expect("read test log");
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 1, "contents: {contents}");
        assert!(
            lines[0].ends_with(&format!(
                "{}:{}: test status: running",
                location.file(),
                location.line()
            )),
            "line: {}",
            lines[0]
        );

        let child = fs_err::read_to_string(logger.dir().join("failure_1.log")).expect("read");
        assert_eq!(child, "details");

        assert!(matches!(
            logger.child_writer("failure_2"),
            Err(LoggerError::Closed)
        ));
    }

    #[test]
    fn shout_adds_newline_once() {
        let logger = MemoryLogger::new();
        let mut out = Vec::new();
        shout(&logger, &mut out, "--- PASS: foo (1s)").expect("wrote");
        shout(&logger, &mut out, "--- FAIL: bar (2s)\n").expect("wrote");

        assert_eq!(
            String::from_utf8(out).expect("utf-8"),
            "--- PASS: foo (1s)\n--- FAIL: bar (2s)\n"
        );
        assert_eq!(logger.lines(), ["--- PASS: foo (1s)", "--- FAIL: bar (2s)"]);
    }

    #[test]
    fn memory_logger_child_logs() {
        let logger = MemoryLogger::new();
        let mut writer = logger.child_writer("failure_1").expect("open");
        writer.write_all(b"one ").expect("write");
        writer.write_all(b"two").expect("write");
        assert_eq!(logger.child_contents("failure_1").as_deref(), Some("one two"));
        assert_eq!(logger.child_names(), ["failure_1"]);

        logger.close();
        logger.log_line(Location::caller(), "ignored");
        assert!(logger.lines().is_empty());
    }
}
