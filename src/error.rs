//! Error types for the unigrams library
//!
//! The accumulator itself is total over its inputs and never fails. Errors only
//! arise at the edges: writing or decoding reports, loading configuration,
//! wiring the plugin into a host, and parsing replay traces.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while encoding or decoding a binary report
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report truncated at offset {offset}: needed {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("Unsupported address field width: {0} (expected 4 or 8)")]
    UnsupportedAddressWidth(u32),

    #[error("Unsupported stack kind field width: {0} (expected 1, 2, 4 or 8)")]
    UnsupportedStackKindWidth(u32),

    #[error("Unknown stack kind {value} at offset {offset}")]
    UnknownStackKind { offset: usize, value: u64 },

    #[error("Invalid kernel-mode flag {value:#x} at offset {offset}")]
    InvalidKernelFlag { offset: usize, value: u8 },

    #[error("Value {value:#x} of field '{field}' does not fit in {width} bytes")]
    ValueTooWide {
        field: &'static str,
        value: u64,
        width: u32,
    },
}

/// Errors raised while loading a [`crate::config::ProfilerConfig`]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid word width: {0} (expected 4 or 8)")]
    InvalidWidth(u32),
}

/// Errors raised by the plugin lifecycle
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PluginError {
    #[error("Required plugin '{0}' is not available")]
    MissingDependency(String),

    #[error("Plugin has already been finalized")]
    AlreadyFinalized,

    #[error("Plugin has not been initialized")]
    NotInitialized,
}

/// Errors raised while reading a JSON-lines replay trace
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed event on line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed byte payload on line {line}: {source}")]
    Hex {
        line: usize,
        #[source]
        source: hex::FromHexError,
    },
}
