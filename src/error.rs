//! Error types for the map facade

use std::path::PathBuf;
use thiserror::Error;

use crate::engine::{EngineError, ENGINE_NAMESPACE};

/// Result type alias for map operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a map
///
/// Variants that wrap an engine failure carry the engine's diagnostic
/// verbatim, prefixed with [`ENGINE_NAMESPACE`]; see [`Error::is_engine_error`].
#[derive(Error, Debug)]
pub enum Error {
    /// The map description was malformed or could not be read
    #[error("Failed to load map: {0}")]
    LoadError(String),

    /// The viewport could not be positioned (no data for zoom-all, unusable extent)
    #[error("Viewport error: {0}")]
    ViewportError(String),

    /// Rasterization failed
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Encoding the rasterized image into the requested format failed
    #[error("Encoding failed: {0}")]
    EncodeError(String),

    /// Invalid caller-supplied input (dimensions, buffers, option combinations)
    #[error("Invalid input: {0}")]
    InputError(String),

    /// Writing output to the file system failed
    #[error("Failed to write {}: {source}", path.display())]
    FileSystemError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The map handle was used after it had been released
    #[error("Map handle used after release")]
    ResourceError,

    /// A process-wide registration call was given an unusable path
    #[error("Registration failed: {0}")]
    RegistrationError(String),

    /// A layer selector reported a failure while evaluating a layer
    #[error("Layer selection failed for '{layer}': {reason}")]
    SelectorError { layer: String, reason: String },
}

impl Error {
    /// Whether this error carries a diagnostic produced by the rendering engine
    /// rather than by the facade itself.
    pub fn is_engine_error(&self) -> bool {
        let msg = match self {
            Error::LoadError(m)
            | Error::ViewportError(m)
            | Error::RenderError(m)
            | Error::EncodeError(m) => m,
            _ => return false,
        };
        msg.starts_with(ENGINE_NAMESPACE)
    }

    pub(crate) fn load(err: EngineError) -> Self {
        Error::LoadError(err.to_string())
    }

    pub(crate) fn viewport(err: EngineError) -> Self {
        Error::ViewportError(err.to_string())
    }

    pub(crate) fn encode(err: EngineError) -> Self {
        Error::EncodeError(err.to_string())
    }

    /// Rasterization failures are render errors unless the engine blamed the
    /// extent, which belongs to the viewport.
    pub(crate) fn render(err: EngineError) -> Self {
        if err.is_extent() {
            Error::ViewportError(err.to_string())
        } else {
            Error::RenderError(err.to_string())
        }
    }
}
