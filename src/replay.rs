//! Replay harness
//!
//! Stands in for a live host runtime: reads recorded memory accesses from a
//! JSON-lines trace, resolves each one to an [`ExecutionContext`] and feeds
//! it through a [`MemoryAccessPlugin`]. One event per line:
//!
//! ```json
//! {"kind":"write","address":4096,"bytes":"41414100","state":{"pc":4198400,"caller":4198000,"asid":1}}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::context::{ExecutionContext, StackKind};
use crate::error::ReplayError;
use crate::plugin::{ContextResolver, MemoryAccess, MemoryAccessPlugin, PluginHost};
use crate::tracker::AccessKind;

/// CPU state captured alongside a recorded access
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub pc: u64,
    #[serde(default)]
    pub caller: u64,
    #[serde(default)]
    pub asid: u64,
    #[serde(default)]
    pub thread_id: Option<u64>,
    #[serde(default)]
    pub stack_pointer: Option<u64>,
    #[serde(default)]
    pub kernel: bool,
}

/// One recorded access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedAccess {
    pub kind: AccessKind,
    #[serde(default)]
    pub address: u64,
    /// Hex-encoded bytes
    pub bytes: String,
    /// Reported access size, defaults to the number of bytes
    #[serde(default)]
    pub size: Option<usize>,
    pub state: CpuSnapshot,
}

/// Resolves contexts from [`CpuSnapshot`]s using a fixed stack kind
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotResolver {
    pub stack_kind: StackKind,
}

impl SnapshotResolver {
    pub fn new(stack_kind: StackKind) -> Self {
        Self { stack_kind }
    }
}

impl ContextResolver for SnapshotResolver {
    type State = CpuSnapshot;

    fn resolve_context(&self, state: &CpuSnapshot) -> ExecutionContext {
        let sid = match self.stack_kind {
            StackKind::Asid => (state.asid, 0),
            StackKind::Threaded => (state.asid, state.thread_id.unwrap_or(0)),
            StackKind::Heuristic => (state.stack_pointer.unwrap_or(0), state.asid),
        };
        ExecutionContext {
            stack_kind: self.stack_kind,
            caller: state.caller,
            pc: state.pc,
            sid_first: sid.0,
            sid_second: sid.1,
            is_kernel_mode: state.kernel,
        }
    }
}

/// Host stand-in used while replaying
///
/// Everything a plugin asks for is available; requests are recorded.
#[derive(Debug, Default)]
pub struct ReplayHost {
    pub required: Vec<String>,
    pub subscriptions: Vec<AccessKind>,
    pub precise_pc: bool,
    pub memory_callbacks: bool,
}

impl PluginHost for ReplayHost {
    fn require(&mut self, plugin: &str) -> bool {
        self.required.push(plugin.to_string());
        true
    }

    fn enable_precise_pc(&mut self) {
        self.precise_pc = true;
    }

    fn enable_memory_callbacks(&mut self) {
        self.memory_callbacks = true;
    }

    fn subscribe(&mut self, kind: AccessKind) {
        self.subscriptions.push(kind);
    }
}

/// Counts of what a replay delivered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    pub reads: u64,
    pub writes: u64,
    pub bytes: u64,
    /// Events skipped because nobody subscribed to their kind
    pub unsubscribed: u64,
}

/// Feed every event in `input` to `plugin`
///
/// Only kinds present in `host.subscriptions` are delivered, as a live host
/// would do.
pub fn replay<R, P, C>(
    input: R,
    host: &ReplayHost,
    plugin: &P,
    resolver: &C,
) -> Result<ReplayStats, ReplayError>
where
    R: BufRead,
    P: MemoryAccessPlugin + ?Sized,
    C: ContextResolver<State = CpuSnapshot>,
{
    let mut stats = ReplayStats::default();

    for (index, line) in input.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line_no = index + 1;

        let event: RecordedAccess = serde_json::from_str(trimmed)
            .map_err(|source| ReplayError::Json { line: line_no, source })?;
        let bytes = hex::decode(event.bytes.trim())
            .map_err(|source| ReplayError::Hex { line: line_no, source })?;

        if !host.subscriptions.contains(&event.kind) {
            stats.unsubscribed += 1;
            continue;
        }

        let context = resolver.resolve_context(&event.state);
        let access = MemoryAccess {
            context,
            address: event.address,
            size: event.size.unwrap_or(bytes.len()),
            buffer: Some(bytes.as_slice()),
            is_write: event.kind == AccessKind::Write,
        };
        plugin.on_memory_access(access);

        match event.kind {
            AccessKind::Read => stats.reads += 1,
            AccessKind::Write => stats.writes += 1,
        }
        stats.bytes += access.size.min(bytes.len()) as u64;
    }

    tracing::info!(
        reads = stats.reads,
        writes = stats.writes,
        bytes = stats.bytes,
        "Replay complete"
    );
    Ok(stats)
}
