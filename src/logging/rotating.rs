// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Date-rotated JSON-lines log file with a retention sweep.
//!
//! # File layout
//!
//! ```text
//! rotation enabled:   {dir}/{base}_{YYYY-MM-DD}.log   (one file per day)
//! rotation disabled:  {dir}/{base}.log                (opened once, reused)
//! ```
//!
//! Every write checks the date first; when it differs from the open file's
//! date the old file is synced and closed and a new one is opened. Exactly one
//! file handle is open at a time.
//!
//! A background task (rotation enabled only) wakes every `sweep_interval` and
//! removes `{base}_{date}.log` files whose modification time is older than
//! `now - max_age`. Names that do not parse as that pattern are never touched,
//! and neither is the file currently being written.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{Local, NaiveDate, SecondsFormat};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::record::{Attr, Level, LogRecord};
use super::sink::{LogError, LogSink};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Returns "today" for rotation decisions
pub type DayClock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RotatingFileConfig {
    pub dir: PathBuf,
    pub base_name: String,
    /// Rotated files older than this are removed by the sweep
    pub max_age: Duration,
    pub rotation_enabled: bool,
    /// Minimum level accepted by `enabled`
    pub level: Level,
    pub sweep_interval: Duration,
}

impl RotatingFileConfig {
    pub fn new(dir: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base_name: base_name.into(),
            max_age: Duration::from_secs(30 * 24 * 60 * 60),
            rotation_enabled: false,
            level: Level::Debug,
            sweep_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Default)]
struct RotationState {
    current_date: Option<NaiveDate>,
    current_name: Option<String>,
    file: Option<File>,
}

struct Shared {
    config: RotatingFileConfig,
    level: AtomicU8,
    clock: DayClock,
    state: Mutex<RotationState>,
    sweeper_stop: Mutex<Option<watch::Sender<bool>>>,
}

/// File sink that owns one log destination at a time.
///
/// Clones and derived sinks (`with_attrs`, `with_group`) share the file.
#[derive(Clone)]
pub struct RotatingFileHandler {
    shared: Arc<Shared>,
    /// Attributes bound by `with_attrs`, each with the group path active when added
    attrs: Vec<(Vec<String>, Attr)>,
    groups: Vec<String>,
}

impl RotatingFileHandler {
    /// Open the destination file and start the retention sweep.
    pub fn new(config: RotatingFileConfig) -> io::Result<Self> {
        Self::with_clock(config, Arc::new(|| Local::now().date_naive()))
    }

    /// Like [`Self::new`] with an explicit source of "today".
    pub fn with_clock(config: RotatingFileConfig, clock: DayClock) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            level: AtomicU8::new(config.level as u8),
            config,
            clock,
            state: Mutex::new(RotationState::default()),
            sweeper_stop: Mutex::new(None),
        });

        shared.open_if_needed(&mut shared.state.lock())?;
        spawn_sweeper(&shared);

        info!(
            dir = %shared.config.dir.display(),
            base = %shared.config.base_name,
            rotation = shared.config.rotation_enabled,
            "Log file handler opened"
        );

        Ok(Self {
            shared,
            attrs: Vec::new(),
            groups: Vec::new(),
        })
    }

    /// Write raw bytes, rotating first if the date changed.
    pub fn write_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        self.shared.open_if_needed(&mut state)?;
        match state.file.as_mut() {
            Some(file) => file.write_all(bytes),
            None => Err(io::Error::new(io::ErrorKind::Other, "log file not open")),
        }
    }

    /// Run one retention sweep now; returns how many files were removed.
    pub fn sweep_now(&self) -> io::Result<usize> {
        self.shared.sweep()
    }

    /// Path of the file currently open, if any
    #[must_use]
    pub fn current_path(&self) -> Option<PathBuf> {
        let state = self.shared.state.lock();
        state
            .current_name
            .as_ref()
            .filter(|_| state.file.is_some())
            .map(|name| self.shared.config.dir.join(name))
    }

    #[must_use]
    pub fn level(&self) -> Level {
        Level::from_u8(self.shared.level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: Level) {
        self.shared.level.store(level as u8, Ordering::Relaxed);
    }

    /// Sync and close the open file and stop the sweep.
    ///
    /// Idempotent. A later write reopens a file.
    pub fn close_file(&self) -> io::Result<()> {
        if let Some(stop) = self.shared.sweeper_stop.lock().take() {
            let _ = stop.send(true);
        }

        let mut state = self.shared.state.lock();
        if let Some(mut file) = state.file.take() {
            state.current_date = None;
            state.current_name = None;
            file.flush()?;
            file.sync_all()?;
            debug!(dir = %self.shared.config.dir.display(), "Log file closed");
        }
        Ok(())
    }

    fn render(&self, record: &LogRecord) -> Result<Vec<u8>, LogError> {
        let mut root = Map::new();
        root.insert(
            "time".into(),
            Value::String(record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        root.insert("level".into(), Value::String(record.level.as_str().into()));
        root.insert("msg".into(), Value::String(record.message.clone()));

        for (path, attr) in &self.attrs {
            insert_at(&mut root, path, attr);
        }
        for attr in &record.attrs {
            insert_at(&mut root, &self.groups, attr);
        }

        let mut line = serde_json::to_vec(&Value::Object(root))?;
        line.push(b'\n');
        Ok(line)
    }
}

impl Shared {
    fn open_if_needed(&self, state: &mut RotationState) -> io::Result<()> {
        let dir = &self.config.dir;

        if self.config.rotation_enabled {
            let today = (self.clock)();
            if state.file.is_some() && state.current_date == Some(today) {
                return Ok(());
            }

            fs::create_dir_all(dir)?;
            let name = rotated_name(&self.config.base_name, today);
            let file = open_append(&dir.join(&name))?;

            let rotating = state.current_date.is_some();
            let previous = state.file.replace(file);
            state.current_date = Some(today);
            state.current_name = Some(name.clone());
            if rotating {
                crate::metrics::record_log_rotation();
                info!(file = %name, "Log file rotated");
            }

            // the new file is already installed, so a failed sync only
            // fails the write that triggered the rollover
            if let Some(mut old) = previous {
                old.flush()?;
                old.sync_all()?;
            }
            return Ok(());
        }

        if state.file.is_some() {
            return Ok(());
        }
        fs::create_dir_all(dir)?;
        let name = format!("{}.log", self.config.base_name);
        state.file = Some(open_append(&dir.join(&name))?);
        state.current_date = None;
        state.current_name = Some(name);
        Ok(())
    }

    fn sweep(&self) -> io::Result<usize> {
        if !self.config.rotation_enabled {
            return Ok(0);
        }

        let active = self.state.lock().current_name.clone();

        let entries = match fs::read_dir(&self.config.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let cutoff = SystemTime::now()
            .checked_sub(self.config.max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = 0usize;
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !is_rotated_name(&self.config.base_name, name) {
                continue;
            }
            if active.as_deref() == Some(name) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let Ok(modified) = meta.modified() else {
                continue;
            };

            if modified < cutoff {
                // a rollover may have happened since the scan started
                if self.state.lock().current_name.as_deref() == Some(name) {
                    continue;
                }
                match fs::remove_file(entry.path()) {
                    Ok(()) => {
                        removed += 1;
                        debug!(file = %name, "Expired log file removed");
                    }
                    Err(e) => warn!(file = %name, error = %e, "Failed to remove expired log file"),
                }
            }
        }

        if removed > 0 {
            crate::metrics::record_log_files_removed(removed);
            info!(removed, "Log retention sweep complete");
        }
        Ok(removed)
    }
}

fn spawn_sweeper(shared: &Arc<Shared>) {
    if !shared.config.rotation_enabled {
        return;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("No Tokio runtime available - log retention sweep disabled");
        return;
    };

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let weak: Weak<Shared> = Arc::downgrade(shared);
    let period = shared.config.sweep_interval.max(Duration::from_millis(1));

    runtime.spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(shared) = weak.upgrade() else { break };
                    match tokio::task::spawn_blocking(move || shared.sweep()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(error = %e, "Log retention sweep failed"),
                        Err(e) => warn!(error = %e, "Log retention sweep panicked"),
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Log retention sweeper stopped");
    });

    *shared.sweeper_stop.lock() = Some(stop_tx);
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// `{base}_{YYYY-MM-DD}.log`
#[must_use]
pub fn rotated_name(base: &str, date: NaiveDate) -> String {
    format!("{}_{}.log", base, date.format(DATE_FORMAT))
}

/// True only for names of the exact `{base}_{YYYY-MM-DD}.log` shape.
#[must_use]
pub fn is_rotated_name(base: &str, name: &str) -> bool {
    name.strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|rest| rest.strip_suffix(".log"))
        .filter(|date| date.len() == 10)
        .is_some_and(|date| NaiveDate::parse_from_str(date, DATE_FORMAT).is_ok())
}

fn insert_at(root: &mut Map<String, Value>, path: &[String], attr: &Attr) {
    let mut target = root;
    for group in path {
        let slot = target
            .entry(group.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        target = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
    target.insert(attr.key.clone(), attr.value.clone());
}

#[async_trait]
impl LogSink for RotatingFileHandler {
    fn enabled(&self, level: Level) -> bool {
        level >= self.level()
    }

    async fn handle(&self, record: &LogRecord) -> Result<(), LogError> {
        if !self.enabled(record.level) {
            return Ok(());
        }
        let line = self.render(record)?;
        self.write_bytes(&line)?;
        Ok(())
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn LogSink> {
        let mut derived = self.clone();
        derived
            .attrs
            .extend(attrs.into_iter().map(|attr| (self.groups.clone(), attr)));
        Arc::new(derived)
    }

    fn with_group(&self, name: &str) -> Arc<dyn LogSink> {
        let mut derived = self.clone();
        derived.groups.push(name.to_string());
        Arc::new(derived)
    }

    async fn close(&self) -> Result<(), LogError> {
        self.close_file()?;
        Ok(())
    }
}
