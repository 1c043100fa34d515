//! Host-facing plugin lifecycle
//!
//! The host runtime (an emulator, a binary instrumentation framework, or the
//! replay harness in [`crate::replay`]) drives the profiler through the
//! [`MemoryAccessPlugin`] trait:
//!
//! 1. `initialize` - declare dependencies and subscribe to memory events
//! 2. `on_memory_access` - once per traced access, on the accessing thread
//! 3. `finalize` - terminal flush of both reports, at most once
//!
//! The host-specific parts, registering callbacks and deriving an
//! [`ExecutionContext`] from live CPU state, stay behind [`PluginHost`] and
//! [`ContextResolver`] so the profiler has no dependency on any host ABI.

use std::path::PathBuf;

use crate::accumulator::Accumulator;
use crate::config::ProfilerConfig;
use crate::context::ExecutionContext;
use crate::error::{PluginError, ReportError};
use crate::report::{write_report_file, ReportStats};
use crate::tracker::{AccessKind, DualTracker};

/// Plugin providing call-stack aware execution contexts
pub const CALLSTACK_PLUGIN: &str = "callstack_instr";

/// One traced memory access as delivered by the host
#[derive(Debug, Clone, Copy)]
pub struct MemoryAccess<'a> {
    /// Resolved program point of the access
    pub context: ExecutionContext,
    /// Guest virtual address of the first byte
    pub address: u64,
    /// Access width in bytes as reported by the host
    pub size: usize,
    /// Bytes read or written, `None` if the host could not supply them
    pub buffer: Option<&'a [u8]>,
    pub is_write: bool,
}

impl<'a> MemoryAccess<'a> {
    /// Access whose size is the buffer length
    pub fn new(context: ExecutionContext, address: u64, buffer: &'a [u8], is_write: bool) -> Self {
        Self {
            context,
            address,
            size: buffer.len(),
            buffer: Some(buffer),
            is_write,
        }
    }

    /// Bytes to count: exactly `size` bytes, or none for a malformed event
    fn payload(&self) -> &'a [u8] {
        match self.buffer {
            None => {
                if self.size != 0 {
                    tracing::debug!(
                        address = self.address,
                        size = self.size,
                        "Access without buffer ignored"
                    );
                }
                &[]
            }
            Some(buffer) if buffer.len() < self.size => {
                tracing::warn!(
                    address = self.address,
                    size = self.size,
                    available = buffer.len(),
                    "Access buffer shorter than access size, counting available bytes"
                );
                buffer
            }
            Some(buffer) => &buffer[..self.size],
        }
    }
}

/// Services a host runtime offers to a plugin during initialization
pub trait PluginHost {
    /// Load another plugin, returning whether it is available
    fn require(&mut self, plugin: &str) -> bool;

    /// Keep the program counter exact at every memory callback
    fn enable_precise_pc(&mut self);

    /// Turn on memory access callbacks
    fn enable_memory_callbacks(&mut self);

    /// Deliver accesses of `kind` (after the access completed) to the plugin
    fn subscribe(&mut self, kind: AccessKind);
}

/// Derives the execution context of an access from host state
pub trait ContextResolver {
    /// Host snapshot the context is derived from
    type State;

    fn resolve_context(&self, state: &Self::State) -> ExecutionContext;
}

/// Lifecycle of a memory-access plugin
pub trait MemoryAccessPlugin {
    /// Register with the host
    fn initialize(&mut self, host: &mut dyn PluginHost) -> Result<(), PluginError>;

    /// Handle one memory access
    fn on_memory_access(&self, access: MemoryAccess<'_>);

    /// Flush all state; only the first call does any work
    fn finalize(&self) -> Result<FlushSummary, PluginError>;
}

/// Outcome of flushing one report
#[derive(Debug)]
pub struct FlushOutcome {
    pub kind: AccessKind,
    pub path: PathBuf,
    pub result: Result<ReportStats, ReportError>,
}

impl FlushOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcome of the terminal flush
#[derive(Debug)]
pub struct FlushSummary {
    pub reads: FlushOutcome,
    pub writes: FlushOutcome,
    /// Events that arrived after shutdown began
    pub dropped_events: u64,
}

impl FlushSummary {
    /// Whether both reports were written
    pub fn all_written(&self) -> bool {
        self.reads.is_ok() && self.writes.is_ok()
    }

    /// Both outcomes, reads first
    pub fn outcomes(&self) -> [&FlushOutcome; 2] {
        [&self.reads, &self.writes]
    }
}

/// Per-context byte histograms over memory reads and writes
#[derive(Debug)]
pub struct UnigramPlugin {
    config: ProfilerConfig,
    tracker: DualTracker,
    initialized: bool,
}

impl UnigramPlugin {
    pub fn new(config: ProfilerConfig) -> Self {
        Self {
            config,
            tracker: DualTracker::new(),
            initialized: false,
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Accumulator state, for hosts that inspect it before finalizing
    pub fn tracker(&self) -> &DualTracker {
        &self.tracker
    }

    fn flush(&self, kind: AccessKind) -> FlushOutcome {
        let path = match kind {
            AccessKind::Read => self.config.read_report_path(),
            AccessKind::Write => self.config.write_report_path(),
        };

        // Take ownership so the accumulator is released once written
        let accumulator: Accumulator = std::mem::take(&mut *self.tracker.lock(kind));
        let result = write_report_file(&accumulator, &path, &self.config.report_format());

        if let Err(e) = &result {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "Couldn't write {} report",
                kind.as_str()
            );
        }

        FlushOutcome { kind, path, result }
    }
}

impl MemoryAccessPlugin for UnigramPlugin {
    fn initialize(&mut self, host: &mut dyn PluginHost) -> Result<(), PluginError> {
        tracing::info!("Initializing plugin unigrams");

        if !host.require(CALLSTACK_PLUGIN) {
            return Err(PluginError::MissingDependency(CALLSTACK_PLUGIN.to_string()));
        }
        host.enable_precise_pc();
        host.enable_memory_callbacks();
        host.subscribe(AccessKind::Read);
        host.subscribe(AccessKind::Write);

        self.initialized = true;
        Ok(())
    }

    #[inline]
    fn on_memory_access(&self, access: MemoryAccess<'_>) {
        let payload = access.payload();
        if payload.is_empty() {
            return;
        }

        let kind = AccessKind::from_is_write(access.is_write);
        if !self.tracker.record(kind, access.context, payload) {
            tracing::warn!(
                address = access.address,
                dropped = self.tracker.dropped_events(),
                "Access after shutdown dropped"
            );
        }
    }

    fn finalize(&self) -> Result<FlushSummary, PluginError> {
        if !self.initialized {
            return Err(PluginError::NotInitialized);
        }
        if !self.tracker.begin_shutdown() {
            return Err(PluginError::AlreadyFinalized);
        }

        // A failed read report must not prevent the write report
        let reads = self.flush(AccessKind::Read);
        let writes = self.flush(AccessKind::Write);

        Ok(FlushSummary {
            reads,
            writes,
            dropped_events: self.tracker.dropped_events(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StackKind;
    use crate::report::read_report_file;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingHost {
        available: bool,
        precise_pc: bool,
        memcb: bool,
        subscribed: Vec<AccessKind>,
    }

    impl PluginHost for RecordingHost {
        fn require(&mut self, plugin: &str) -> bool {
            self.available && plugin == CALLSTACK_PLUGIN
        }
        fn enable_precise_pc(&mut self) {
            self.precise_pc = true;
        }
        fn enable_memory_callbacks(&mut self) {
            self.memcb = true;
        }
        fn subscribe(&mut self, kind: AccessKind) {
            self.subscribed.push(kind);
        }
    }

    fn config_in(dir: &TempDir) -> ProfilerConfig {
        ProfilerConfig {
            output_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(StackKind::Asid, 0x10, 0x20, (0x30, 0))
    }

    fn ready_plugin(config: ProfilerConfig) -> UnigramPlugin {
        let mut plugin = UnigramPlugin::new(config);
        let mut host = RecordingHost {
            available: true,
            ..Default::default()
        };
        plugin.initialize(&mut host).unwrap();
        plugin
    }

    #[test]
    fn test_initialize_registers_with_host() {
        let mut plugin = UnigramPlugin::new(ProfilerConfig::default());
        let mut host = RecordingHost {
            available: true,
            ..Default::default()
        };
        plugin.initialize(&mut host).unwrap();

        assert!(host.precise_pc);
        assert!(host.memcb);
        assert_eq!(host.subscribed, vec![AccessKind::Read, AccessKind::Write]);
    }

    #[test]
    fn test_initialize_fails_without_callstack() {
        let mut plugin = UnigramPlugin::new(ProfilerConfig::default());
        let mut host = RecordingHost::default();
        assert_eq!(
            plugin.initialize(&mut host),
            Err(PluginError::MissingDependency(CALLSTACK_PLUGIN.to_string()))
        );
        assert!(host.subscribed.is_empty());
    }

    #[test]
    fn test_finalize_requires_initialize() {
        let plugin = UnigramPlugin::new(ProfilerConfig::default());
        assert_eq!(plugin.finalize().unwrap_err(), PluginError::NotInitialized);
    }

    #[test]
    fn test_malformed_events_are_noops() {
        let dir = TempDir::new().unwrap();
        let plugin = ready_plugin(config_in(&dir));

        plugin.on_memory_access(MemoryAccess::new(ctx(), 0x1000, &[], false));
        plugin.on_memory_access(MemoryAccess {
            context: ctx(),
            address: 0x1000,
            size: 4,
            buffer: None,
            is_write: true,
        });

        assert!(plugin.tracker().lock(AccessKind::Read).is_empty());
        assert!(plugin.tracker().lock(AccessKind::Write).is_empty());
    }

    #[test]
    fn test_size_limits_counted_bytes() {
        let dir = TempDir::new().unwrap();
        let plugin = ready_plugin(config_in(&dir));

        plugin.on_memory_access(MemoryAccess {
            context: ctx(),
            address: 0x1000,
            size: 2,
            buffer: Some(&[1, 2, 3, 4]),
            is_write: false,
        });
        assert_eq!(plugin.tracker().lock(AccessKind::Read).total_observations(), 2);

        plugin.on_memory_access(MemoryAccess {
            context: ctx(),
            address: 0x1000,
            size: 8,
            buffer: Some(&[1, 2, 3]),
            is_write: false,
        });
        assert_eq!(plugin.tracker().lock(AccessKind::Read).total_observations(), 5);
    }

    #[test]
    fn test_finalize_writes_both_reports_once() {
        let dir = TempDir::new().unwrap();
        let plugin = ready_plugin(config_in(&dir));

        plugin.on_memory_access(MemoryAccess::new(ctx(), 0x1000, &[5], false));
        plugin.on_memory_access(MemoryAccess::new(ctx(), 0x1000, &[9], true));

        let summary = plugin.finalize().unwrap();
        assert!(summary.all_written());
        assert_eq!(summary.reads.result.as_ref().unwrap().contexts, 1);

        let reads = read_report_file(&summary.reads.path).unwrap();
        assert_eq!(reads.counts_for(&ctx()).unwrap().get(5), 1);
        assert_eq!(reads.counts_for(&ctx()).unwrap().get(9), 0);

        let writes = read_report_file(&summary.writes.path).unwrap();
        assert_eq!(writes.counts_for(&ctx()).unwrap().get(9), 1);

        assert_eq!(plugin.finalize().unwrap_err(), PluginError::AlreadyFinalized);

        plugin.on_memory_access(MemoryAccess::new(ctx(), 0x1000, &[1], true));
        assert_eq!(plugin.tracker().dropped_events(), 1);
    }

    #[test]
    fn test_accesses_after_shutdown_are_counted() {
        let dir = TempDir::new().unwrap();
        let plugin = ready_plugin(config_in(&dir));
        plugin.on_memory_access(MemoryAccess::new(ctx(), 0x1000, &[7], false));
        let summary = plugin.finalize().unwrap();
        assert_eq!(summary.dropped_events, 0);

        plugin.on_memory_access(MemoryAccess::new(ctx(), 0x1000, &[1, 2], false));
        plugin.on_memory_access(MemoryAccess::new(ctx(), 0x1004, &[3], true));
        assert_eq!(plugin.tracker().dropped_events(), 2);

        // Nothing dropped after shutdown reaches the flushed accumulators
        assert!(plugin.tracker().lock(AccessKind::Read).is_empty());
        assert!(plugin.tracker().lock(AccessKind::Write).is_empty());
    }

    #[test]
    fn test_read_failure_does_not_block_write_report() {
        let dir = TempDir::new().unwrap();
        let config = ProfilerConfig {
            read_report: dir.path().join("missing").join("reads.bin"),
            output_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let plugin = ready_plugin(config);
        plugin.on_memory_access(MemoryAccess::new(ctx(), 0x1000, &[7], true));

        let summary = plugin.finalize().unwrap();
        assert!(!summary.all_written());
        assert!(matches!(summary.reads.result, Err(ReportError::Io(_))));
        assert!(summary.writes.is_ok());
        assert!(summary.writes.path.exists());
    }
}
