//! Error type definitions for the pitboard service
//!
//! The hierarchy mirrors the layering of the service: the encoder and the
//! cache tiers return their own typed errors, the resolver folds them into
//! `ResolveError`, and `AppError` is the top-level type used at the binary
//! boundary.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Raster resolution errors
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Warm tier storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors produced by the raster encoder.
///
/// Recoverable input problems (missing geometry, missing history, empty
/// stats) never surface here; the encoder substitutes placeholders. Only
/// an unusable input or a broken internal invariant is an error.
#[derive(Error, Debug)]
pub enum RenderError {
    /// The render input carries no race card at all
    #[error("Render input has no race schedule to draw")]
    EmptySchedule,

    /// Internal canvas invariant violation (out-of-range geometry, bad dimensions)
    #[error("Canvas error: {message}")]
    Canvas { message: String },
}

/// Warm tier read/write failures
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem IO failure
    #[error("Warm tier IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Atomic replacement of an entry failed
    #[error("Failed to persist warm entry {name}: {message}")]
    Persist { name: String, message: String },
}

/// Errors surfaced by `Resolver::resolve`
///
/// The resolver is the last layer allowed to decide between falling back
/// and failing; everything in this enum is a hard failure for the single
/// request it occurred on. The caller is expected to answer with the error
/// raster (`Renderer::encode_error`), which is never cached.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The schedule provider failed to produce a render input
    #[error("Schedule provider error: {message}")]
    Upstream { message: String },

    /// The schedule provider exceeded the configured time bound
    #[error("Schedule provider timed out after {seconds}s")]
    UpstreamTimeout { seconds: u64 },

    /// Encoding failed for this request
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
}

impl AppError {
    /// Create a configuration error with a custom message
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl RenderError {
    /// Create a canvas invariant error
    pub fn canvas<S: Into<String>>(message: S) -> Self {
        Self::Canvas {
            message: message.into(),
        }
    }
}

impl ResolveError {
    /// Create an upstream provider error
    pub fn upstream<S: Into<String>>(message: S) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }
}
