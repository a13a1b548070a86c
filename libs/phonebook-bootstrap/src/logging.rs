//! Tracing setup for phonebook binaries.
//!
//! Console output is human readable on stderr. File output is JSON, rotated
//! by size, and routed per crate: a section keyed by a crate name gets its
//! own file, everything else lands in the `default` section's file.

use std::io::{IsTerminal, Write};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};
use parking_lot::Mutex;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LoggingConfig, Section};
use crate::paths::home_dir::resolve_under;

const DEFAULT_SECTION: &str = "default";
const DEFAULT_MAX_SIZE_MB: u64 = 100;

// Flushes the non-blocking console writer on exit.
static CONSOLE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// `None` means the sink is off. Unknown names fall back to INFO.
fn parse_level(s: &str) -> Option<Level> {
    match s.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" | "" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        "off" | "none" => None,
        _ => Some(Level::INFO),
    }
}

fn level_filter(s: &str) -> LevelFilter {
    parse_level(s).map_or(LevelFilter::OFF, LevelFilter::from_level)
}

/// True when `target` is `crate_name` itself or one of its modules.
fn matches_crate_prefix(target: &str, crate_name: &str) -> bool {
    target
        .strip_prefix(crate_name)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

// ---------- rotating file writer ----------

type Rotating = Arc<Mutex<FileRotate<AppendTimestamp>>>;

struct FileSink(Rotating);

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().flush()
    }
}

/// Rotation threshold in bytes, clamped for oversized settings.
fn rotation_bytes(section: &Section) -> usize {
    let bytes = section
        .max_size_mb
        .unwrap_or(DEFAULT_MAX_SIZE_MB)
        .saturating_mul(1024 * 1024);
    usize::try_from(bytes).unwrap_or(usize::MAX)
}

fn open_rotating(section: &Section, base_dir: &Path) -> std::io::Result<Option<Rotating>> {
    if section.file.trim().is_empty() {
        return Ok(None);
    }
    let path = resolve_under(base_dir, section.file.trim());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Backup count wins over age when both are configured.
    let limit = match section.max_backups {
        Some(n) => FileLimit::MaxFiles(n),
        None => FileLimit::Age(chrono::Duration::days(
            i64::from(section.max_age_days.unwrap_or(1)),
        )),
    };

    let rotate = FileRotate::new(
        &path,
        AppendTimestamp::default(limit),
        ContentLimit::BytesSurpassed(rotation_bytes(section)),
        Compression::None,
        None,
    );
    Ok(Some(Arc::new(Mutex::new(rotate))))
}

// ---------- per-target routing ----------

/// Discards writes for targets without a file.
struct RoutedSink(Option<FileSink>);

impl Write for RoutedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.0 {
            Some(sink) => sink.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.0 {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
struct FileRouter {
    fallback: Option<Rotating>,
    // Longest prefix first so nested crates win over their parents.
    by_crate: Vec<(String, Rotating)>,
}

impl FileRouter {
    fn build(cfg: &LoggingConfig, base_dir: &Path) -> Self {
        let mut router = FileRouter::default();
        for (name, section) in cfg {
            let writer = match open_rotating(section, base_dir) {
                Ok(Some(writer)) => writer,
                Ok(None) => continue,
                Err(e) => {
                    eprintln!("Failed to open log file '{}' for '{name}': {e}", section.file);
                    continue;
                }
            };
            if name == DEFAULT_SECTION {
                router.fallback = Some(writer);
            } else {
                router.by_crate.push((name.clone(), writer));
            }
        }
        router
            .by_crate
            .sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        router
    }

    fn is_empty(&self) -> bool {
        self.fallback.is_none() && self.by_crate.is_empty()
    }

    fn route(&self, target: &str) -> Option<&Rotating> {
        self.by_crate
            .iter()
            .find(|(name, _)| matches_crate_prefix(target, name))
            .map(|(_, writer)| writer)
            .or(self.fallback.as_ref())
    }
}

impl<'a> fmt::MakeWriter<'a> for FileRouter {
    type Writer = RoutedSink;

    fn make_writer(&'a self) -> Self::Writer {
        RoutedSink(self.fallback.clone().map(FileSink))
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        RoutedSink(self.route(meta.target()).cloned().map(FileSink))
    }
}

// ---------- level targets ----------

fn console_targets(cfg: &LoggingConfig) -> Targets {
    let default = cfg
        .get(DEFAULT_SECTION)
        .map_or(LevelFilter::INFO, |s| level_filter(&s.console_level));

    cfg.iter()
        .filter(|(name, _)| name.as_str() != DEFAULT_SECTION)
        .fold(Targets::new().with_default(default), |targets, (name, s)| {
            targets.with_target(name.clone(), level_filter(&s.console_level))
        })
}

fn file_targets(cfg: &LoggingConfig, router: &FileRouter) -> Targets {
    let default = match cfg.get(DEFAULT_SECTION) {
        Some(s) if router.fallback.is_some() => level_filter(&s.file_level),
        _ => LevelFilter::OFF,
    };

    cfg.iter()
        .filter(|(name, s)| name.as_str() != DEFAULT_SECTION && !s.file.trim().is_empty())
        .fold(Targets::new().with_default(default), |targets, (name, s)| {
            targets.with_target(name.clone(), level_filter(&s.file_level))
        })
}

// ---------- init ----------

/// Install the global subscriber described by `cfg`.
///
/// Relative log file paths resolve against `base_dir`. `RUST_LOG`, when set,
/// caps both sinks. Calling this twice keeps the first subscriber.
pub fn init_logging(cfg: &LoggingConfig, base_dir: &Path) {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("LogTracer init skipped: {e}");
    }

    if cfg.is_empty() {
        init_minimal();
        return;
    }

    let router = FileRouter::build(cfg, base_dir);
    let console = console_targets(cfg);
    let files = file_targets(cfg, &router);

    let (stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = CONSOLE_GUARD.set(guard);

    let console_layer = fmt::layer()
        .with_writer(stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(console);

    let file_layer = (!router.is_empty()).then(|| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(router)
            .with_filter(files)
    });

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().ok())
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

/// Console-only INFO logging, honoring `RUST_LOG`.
pub fn init_minimal() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(env)
        .with(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339()),
        )
        .try_init();
}
