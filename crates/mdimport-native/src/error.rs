//! Errors raised while loading native libraries and acquiring dispensers.

use std::path::PathBuf;

use mdimport::Status;
use thiserror::Error;

/// Errors raised before a session exists.
#[derive(Error, Debug)]
pub enum NativeError {
    /// The dynamic library could not be loaded.
    #[error("failed to load {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    /// A required export is missing.
    #[error("{} does not export {symbol}: {source}", path.display())]
    Symbol {
        path: PathBuf,
        symbol: String,
        #[source]
        source: libloading::Error,
    },

    /// The factory entry point returned a failure status.
    #[error("{symbol} failed with status {status}")]
    Factory { symbol: String, status: Status },

    /// A call reported success but produced a null interface pointer.
    #[error("{what} returned a null interface")]
    NullInterface { what: String },
}

/// Convenience alias for native results.
pub type Result<T, E = NativeError> = std::result::Result<T, E>;
