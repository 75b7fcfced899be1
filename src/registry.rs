//! Process-wide registration: datasource search paths, font files and log
//! severity.
//!
//! These settings apply to every map handle in the process. Call them once
//! while the application starts up, before any rendering begins; changing
//! them while other threads render is not supported.

use log::{debug, info, LevelFilter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

use crate::{Error, Result};

#[derive(Debug, Default)]
struct Registry {
    datasource_paths: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
}

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| RwLock::new(Registry::default()))
}

const FONT_EXTENSIONS: &[&str] = &["ttf", "otf", "ttc", "pfa", "pfb"];

/// Add a directory to the datasource search path.
///
/// Relative datasource files referenced by map descriptions are looked up in
/// registered directories, in registration order, after the description's
/// own directory.
pub fn register_datasources(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if !path.is_dir() {
        return Err(Error::RegistrationError(format!(
            "datasource path {} is not a directory",
            path.display()
        )));
    }
    let path = path.canonicalize().map_err(|e| {
        Error::RegistrationError(format!("cannot resolve {}: {}", path.display(), e))
    })?;

    let mut reg = registry()
        .write()
        .map_err(|_| Error::RegistrationError("registry lock poisoned".into()))?;
    if !reg.datasource_paths.contains(&path) {
        info!("registered datasource path {}", path.display());
        reg.datasource_paths.push(path);
    }
    Ok(())
}

/// Register a font file, or every font file directly inside a directory.
/// Returns the number of newly registered files.
pub fn register_fonts(path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let candidates: Vec<PathBuf> = if path.is_dir() {
        std::fs::read_dir(path)
            .map_err(|e| {
                Error::RegistrationError(format!("cannot read {}: {}", path.display(), e))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_font_file(p))
            .collect()
    } else if path.is_file() && is_font_file(path) {
        vec![path.to_path_buf()]
    } else {
        return Err(Error::RegistrationError(format!(
            "{} is neither a font file nor a directory",
            path.display()
        )));
    };

    let mut reg = registry()
        .write()
        .map_err(|_| Error::RegistrationError("registry lock poisoned".into()))?;
    let mut added = 0;
    for file in candidates {
        if !reg.font_files.contains(&file) {
            debug!("registered font {}", file.display());
            reg.font_files.push(file);
            added += 1;
        }
    }
    info!("registered {} font files from {}", added, path.display());
    Ok(added)
}

fn is_font_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FONT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Registered datasource directories, in registration order
pub fn datasource_paths() -> Vec<PathBuf> {
    registry()
        .read()
        .map(|r| r.datasource_paths.clone())
        .unwrap_or_default()
}

/// Registered font files, in registration order
pub fn font_files() -> Vec<PathBuf> {
    registry()
        .read()
        .map(|r| r.font_files.clone())
        .unwrap_or_default()
}

/// Drop every registration
pub fn clear_registrations() {
    if let Ok(mut reg) = registry().write() {
        *reg = Registry::default();
    }
}

/// Global log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    None,
    Debug,
    Warn,
    Error,
}

impl LogLevel {
    pub fn level_filter(self) -> LevelFilter {
        match self {
            LogLevel::None => LevelFilter::Off,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(LogLevel::None),
            "debug" => Ok(LogLevel::Debug),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(Error::InputError(format!("unknown log level '{}'", other))),
        }
    }
}

/// Set the maximum level the `log` facade lets through, process-wide
pub fn set_log_severity(level: LogLevel) {
    log::set_max_level(level.level_filter());
}
