//! Unigrams - per-context byte-value histograms of traced memory accesses
//!
//! For every execution context observed in a traced program, this library
//! counts how often each byte value (0-255) is read and written there, and
//! persists the counts as compact binary reports on shutdown.
//!
//! The instrumentation host supplies memory-access events and resolves their
//! execution contexts; see [`plugin`] for the seam between the two.

pub mod accumulator;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod histogram;
pub mod plugin;
pub mod replay;
pub mod report;
pub mod tracker;

pub use accumulator::Accumulator;
pub use config::ProfilerConfig;
pub use context::{ExecutionContext, StackKind};
pub use histogram::{ByteHistogram, DenseCounts};
pub use plugin::{MemoryAccess, MemoryAccessPlugin, UnigramPlugin};
pub use report::{decode_report, write_report, ByteOrder, ReportFormat, WordWidth};
pub use tracker::{AccessKind, DualTracker};
