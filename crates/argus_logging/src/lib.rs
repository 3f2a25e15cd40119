//! Logging for Argus binaries.
//!
//! Every process (server, inference service, job workers) writes
//! date-stamped files under `~/.argus/logs`, one file per day per binary,
//! plus a stderr layer for the console. Files older than the retention
//! window are pruned at startup, so a long-lived install never needs manual
//! cleanup.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_RETENTION_DAYS: u32 = 14;
const DEFAULT_LOG_FILTER: &str =
    "argus=info,argus_engine=info,argus_inferd=info,argus_client=info,argus_pql=info,argus_db=info";

/// Per-binary logging options.
pub struct LogOptions<'a> {
    /// Prefix of this binary's log files.
    pub app_name: &'a str,
    /// Mirror the file-level filter to the console instead of warnings only.
    pub verbose: bool,
    /// Days of log files to keep; `None` reads `ARGUS_LOG_RETENTION_DAYS`
    /// and falls back to the default.
    pub retention_days: Option<u32>,
}

/// Initialize tracing: a daily file layer plus a stderr layer.
pub fn init_logging(options: LogOptions<'_>) -> Result<()> {
    let log_dir = logs_dir();
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let retention = options
        .retention_days
        .or_else(|| {
            std::env::var("ARGUS_LOG_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or(DEFAULT_RETENTION_DAYS);
    let pruned = prune_old_logs(&log_dir, options.app_name, today(), retention)?;
    if pruned > 0 {
        eprintln!("Pruned {pruned} old log files from {}", log_dir.display());
    }

    let writer = DailyFileWriter::new(log_dir, options.app_name);

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if options.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// The Argus home directory: `$ARGUS_HOME` or `~/.argus`.
pub fn argus_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("ARGUS_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .expect("Could not determine home directory")
        .join(".argus")
}

/// The logs directory: `~/.argus/logs`.
pub fn logs_dir() -> PathBuf {
    argus_home().join("logs")
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// File name for one day of one binary's logs.
fn log_file_name(app_name: &str, date: NaiveDate) -> String {
    format!("{app_name}-{}.log", date.format("%Y-%m-%d"))
}

/// Date encoded in a log file name, if it is one of `app_name`'s.
fn parse_log_date(app_name: &str, file_name: &str) -> Option<NaiveDate> {
    let date_part = file_name
        .strip_prefix(app_name)?
        .strip_prefix('-')?
        .strip_suffix(".log")?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Delete this binary's log files older than the retention window.
///
/// Other binaries' files and anything that does not parse as a dated log
/// are left alone. Returns the number of files removed.
fn prune_old_logs(
    dir: &Path,
    app_name: &str,
    today: NaiveDate,
    keep_days: u32,
) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to list log directory: {}", dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let Some(date) = name.to_str().and_then(|n| parse_log_date(app_name, n)) else {
            continue;
        };
        let age = (today - date).num_days();
        if age > keep_days as i64 {
            fs::remove_file(entry.path())
                .with_context(|| format!("Failed to prune {}", entry.path().display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}

struct OpenedLog {
    date: NaiveDate,
    file: File,
}

struct WriterState {
    dir: PathBuf,
    app_name: String,
    current: Mutex<Option<OpenedLog>>,
}

/// Appends to `{app}-{date}.log`, switching files when the date rolls over.
///
/// Cloned per tracing writer request; all clones share one file handle
/// behind a mutex, so interleaved events stay line-atomic.
#[derive(Clone)]
pub struct DailyFileWriter {
    state: Arc<WriterState>,
}

impl DailyFileWriter {
    pub fn new(dir: PathBuf, app_name: &str) -> Self {
        Self {
            state: Arc::new(WriterState {
                dir,
                app_name: app_name.to_string(),
                current: Mutex::new(None),
            }),
        }
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
        let mut current = self
            .state
            .current
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;

        let date = today();
        let stale = current.as_ref().map(|open| open.date != date).unwrap_or(true);
        if stale {
            let path = self
                .state
                .dir
                .join(log_file_name(&self.state.app_name, date));
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            *current = Some(OpenedLog { date, file });
        }

        f(&mut current.as_mut().expect("file opened above").file)
    }
}

impl Write for DailyFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(|file| file.flush())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for DailyFileWriter {
    type Writer = DailyFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
