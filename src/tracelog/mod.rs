//! Buffered event log sinks.
//!
//! Each subsystem writes typed entries to a named sink (`packet`, `tcp`,
//! `reassm`, `analyzer`, `tls`). Sinks are registered process-wide before
//! capture starts; entries are buffered and flushed by count, age or file
//! size. Everything is a no-op until [`init`] enables it, so library users
//! and tests pay nothing.

use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

mod entry;
pub use entry::*;

/// The sinks this crate knows about. `get` with any other name yields a
/// permanently disabled sink.
pub const SINK_NAMES: &[&str] = &["packet", "tcp", "reassm", "analyzer", "tls"];

const TRUNCATE_MARKER: &str = "log truncated";

/// When buffered entries hit the disk.
#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    pub max_entries: usize,
    pub max_age: Duration,
    pub max_size: u64,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy {
            max_entries: 1000,
            max_age: Duration::from_secs(5 * 60),
            max_size: 10 * 1024 * 1024,
        }
    }
}

struct SinkState {
    path: String,
    enabled: bool,
    print_stdout: bool,
    file: Option<File>,
    buf: Vec<String>,
    last_flush: Instant,
    policy: FlushPolicy,
}

impl SinkState {
    fn disabled(path: String) -> Self {
        SinkState {
            path,
            enabled: false,
            print_stdout: false,
            file: None,
            buf: Vec::new(),
            last_flush: Instant::now(),
            policy: FlushPolicy::default(),
        }
    }

    fn open(&mut self) {
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => self.file = Some(file),
            Err(e) => {
                // A sink that cannot open its file reports once and goes
                // quiet; capture is never interrupted by logging trouble.
                eprintln!("failed to open log file {}: {e}", self.path);
                self.enabled = false;
                self.file = None;
            }
        }
    }

    fn flush(&mut self) {
        let Some(file) = self.file.as_mut() else {
            self.buf.clear();
            return;
        };
        if self.buf.is_empty() {
            return;
        }

        if let Ok(meta) = file.metadata() {
            if meta.len() > self.policy.max_size {
                *file = match File::create(&self.path) {
                    Ok(mut fresh) => {
                        let _ = writeln!(fresh, "{TRUNCATE_MARKER}: size limit");
                        fresh
                    }
                    Err(e) => {
                        eprintln!("failed to truncate log file {}: {e}", self.path);
                        self.buf.clear();
                        return;
                    }
                };
            }
        }

        for line in self.buf.drain(..) {
            let _ = writeln!(file, "{line}");
        }
        let _ = file.flush();
        self.last_flush = Instant::now();
    }

    fn truncate(&mut self) {
        self.buf.clear();
        match File::create(&self.path) {
            Ok(mut fresh) => {
                let _ = writeln!(fresh, "{TRUNCATE_MARKER}: new session");
                if self.enabled {
                    self.open();
                }
            }
            Err(e) => eprintln!("failed to truncate log file {}: {e}", self.path),
        }
    }
}

/// Handle to one named log. Cheap to clone; every holder shares the same
/// buffer and file.
#[derive(Clone)]
pub struct Sink {
    inner: Arc<Mutex<SinkState>>,
}

impl Sink {
    fn new(path: String) -> Self {
        Sink {
            inner: Arc::new(Mutex::new(SinkState::disabled(path))),
        }
    }

    /// Record one entry. Formats eagerly so the caller's borrows end here.
    pub fn record(&self, entry: impl Display) {
        let mut state = self.inner.lock().unwrap();
        if !state.enabled && !state.print_stdout {
            return;
        }

        let line = entry.to_string();
        if state.print_stdout {
            println!("{line}");
        }
        if !state.enabled {
            return;
        }

        state.buf.push(line);
        if state.buf.len() >= state.policy.max_entries
            || state.last_flush.elapsed() >= state.policy.max_age
        {
            state.flush();
        }
    }

    pub fn flush(&self) {
        self.inner.lock().unwrap().flush();
    }

    /// Whether entries currently go anywhere. Lets hot paths skip building
    /// expensive dumps.
    pub fn is_active(&self) -> bool {
        let state = self.inner.lock().unwrap();
        state.enabled || state.print_stdout
    }
}

struct Registry {
    sinks: Vec<(&'static str, Sink)>,
}

static REGISTRY: LazyLock<Mutex<Registry>> = LazyLock::new(|| {
    Mutex::new(Registry {
        sinks: SINK_NAMES
            .iter()
            .map(|name| (*name, Sink::new(format!("{name}.log"))))
            .collect(),
    })
});

/// Enable the registered sinks. `stdout_names` additionally mirror their
/// entries to stdout; `truncate` clears the files first. Call once, before
/// capture begins; without it every sink stays a no-op.
pub fn init(enabled: bool, truncate: bool, stdout_names: &[String]) {
    let registry = REGISTRY.lock().unwrap();
    for (name, sink) in &registry.sinks {
        let mut state = sink.inner.lock().unwrap();
        state.enabled = enabled;
        state.print_stdout = stdout_names.iter().any(|n| n == name);
        if truncate {
            state.truncate();
        }
        if state.enabled && state.file.is_none() {
            state.open();
        }
    }
}

/// Look up a sink by name. Unknown names get a disabled sink so callers
/// never have to handle absence.
pub fn get(name: &str) -> Sink {
    let registry = REGISTRY.lock().unwrap();
    registry
        .sinks
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, sink)| sink.clone())
        .unwrap_or_else(|| Sink::new(format!("{name}.log")))
}

/// Flush everything that is buffered; called on shutdown.
pub fn flush_all() {
    let registry = REGISTRY.lock().unwrap();
    for (_, sink) in &registry.sinks {
        sink.flush();
    }
}
